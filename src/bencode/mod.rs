//! Bencode codec.
//!
//! Bencode is the serialization format BitTorrent uses for metainfo files
//! and HTTP tracker responses. Four types exist: integers (`i42e`), byte
//! strings (`4:spam`), lists (`l...e`) and dictionaries (`d...e`).
//!
//! The decoder keeps, for every member of the top-level dictionary, the
//! byte range of the encoded source it came from. The info hash of a
//! torrent is the SHA-1 of the raw `info` slice; re-encoding is not
//! byte-exact for files produced by other clients, so the raw range is the
//! only correct input for hashing.
use std::collections::BTreeMap;
use thiserror::Error;

pub mod decoder;
pub mod encoder;

pub use decoder::{decode, Document};
pub use encoder::encode;

/// A decoded bencode value.
///
/// Byte strings stay raw (`Vec<u8>`); a torrent's `pieces` string is not
/// UTF-8. Dictionaries use a `BTreeMap` so encoding emits keys in
/// lexicographic byte order without an extra sort.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unexpected byte {1:#04x} at offset {0}")]
    UnexpectedByte(usize, u8),

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid integer")]
    InvalidInteger,

    #[error("invalid string length")]
    InvalidLength,

    #[error("top-level value must be a dictionary")]
    NotADictionary,
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
