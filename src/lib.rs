//! BitTorrent v1 client core.
//!
//! The crate is organized bottom-up: the bencode codec feeds the metainfo
//! parser and the tracker clients; peer sessions drive one connection
//! each; the storage layer verifies and persists pieces; the torrent
//! controller wires them together and runs the event loop.
pub mod bencode;
pub mod bitfield;
pub mod metainfo;
pub mod peer;
pub mod storage;
pub mod torrent;
pub mod tracker;
pub mod util;
