//! Peer wire protocol.
//!
//! One TCP connection per remote peer: a 68-byte handshake, then
//! length-prefixed frames. Every error here is fatal for its connection
//! only; the session closes the socket, the controller drops the peer and
//! the torrent carries on.
use std::time::Duration;
use thiserror::Error;

pub mod handshake;
pub mod message;
pub mod session;

/// Wire cap on a block transfer, both directions.
pub const MAX_BLOCK_SIZE: u32 = 16 * 1024;

/// Zero-length frame cadence while a session is open.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect timed out")]
    ConnectTimeout,

    #[error("invalid handshake header")]
    InvalidProtocol,

    #[error("info hash mismatch")]
    InfoHashMismatch,

    #[error("peer id mismatch")]
    PeerIdMismatch,

    #[error("duplicate connection for this address")]
    DuplicatePeer,

    #[error("oversized frame of {0} bytes")]
    OversizedFrame(u32),

    #[error("unknown message id {0}")]
    UnknownMessage(u8),

    #[error("invalid {0}-message size")]
    InvalidMessageSize(&'static str),

    #[error("bitfield of {got} bytes, expected {expected}")]
    BadBitfieldLength { got: usize, expected: usize },

    #[error("block for piece {0} we did not request")]
    UnrequestedPiece(u32),

    #[error("block offset {begin} out of range for piece {index}")]
    BlockOutOfRange { index: u32, begin: u32 },

    #[error("block of {0} bytes exceeds the wire cap")]
    OversizedBlock(usize),

    #[error("peer requested {0} bytes, beyond the wire cap")]
    OversizedRequest(u32),

    #[error("peer requested a block while choked")]
    RequestWhileChoked,

    #[error("peer requested a block without showing interest")]
    RequestWithoutInterest,
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
