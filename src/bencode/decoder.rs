//! Slice-based bencode decoder.
//!
//! The parser walks a byte slice with an explicit cursor instead of an
//! `io::Read` stream so that absolute offsets are available for span
//! tracking. Non-sorted dictionary keys are accepted on input; only the
//! encoder enforces canonical ordering.
use super::{DecodeError, DecodeResult, Value};
use std::collections::BTreeMap;
use std::ops::Range;

/// A decoded top-level dictionary together with the byte range each of its
/// members occupied in the source.
#[derive(Debug)]
pub struct Document<'a> {
    source: &'a [u8],
    root: BTreeMap<Vec<u8>, Value>,
    spans: BTreeMap<Vec<u8>, Range<usize>>,
}

impl<'a> Document<'a> {
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.root.get(key)
    }

    /// The exact source bytes that encoded the value under `key`.
    ///
    /// For the `info` member this slice is what gets SHA-1'd into the
    /// info hash.
    pub fn raw(&self, key: &[u8]) -> Option<&'a [u8]> {
        self.spans.get(key).map(|r| &self.source[r.clone()])
    }

    pub fn into_root(self) -> BTreeMap<Vec<u8>, Value> {
        self.root
    }
}

/// Decodes a top-level bencoded dictionary.
///
/// Anything other than a dictionary at the top level is rejected; both
/// metainfo files and tracker responses are dictionaries.
pub fn decode(source: &[u8]) -> DecodeResult<Document<'_>> {
    let mut cur = Cursor::new(source);
    if cur.peek()? != b'd' {
        return Err(DecodeError::NotADictionary);
    }
    cur.advance();

    let mut root = BTreeMap::new();
    let mut spans = BTreeMap::new();
    loop {
        if cur.peek()? == b'e' {
            cur.advance();
            break;
        }
        let key = cur.parse_bytes()?;
        let start = cur.pos;
        let value = cur.parse_value()?;
        spans.insert(key.clone(), start..cur.pos);
        root.insert(key, value);
    }

    Ok(Document { source, root, spans })
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn peek(&self) -> DecodeResult<u8> {
        self.buf.get(self.pos).copied().ok_or(DecodeError::UnexpectedEof)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::UnexpectedEof)?;
        if end > self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Collects ASCII up to (and consuming) `term`.
    fn digits_until(&mut self, term: u8) -> DecodeResult<&'a str> {
        let start = self.pos;
        loop {
            let b = self.peek()?;
            self.advance();
            if b == term {
                break;
            }
        }
        let raw = &self.buf[start..self.pos - 1];
        std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidInteger)
    }

    fn parse_value(&mut self) -> DecodeResult<Value> {
        match self.peek()? {
            b'0'..=b'9' => self.parse_bytes().map(Value::Bytes),
            b'i' => self.parse_int().map(Value::Int),
            b'l' => self.parse_list().map(Value::List),
            b'd' => self.parse_dict().map(Value::Dict),
            other => Err(DecodeError::UnexpectedByte(self.pos, other)),
        }
    }

    /// `<len>:<bytes>` with the cursor on the first length digit.
    fn parse_bytes(&mut self) -> DecodeResult<Vec<u8>> {
        if !self.peek()?.is_ascii_digit() {
            return Err(DecodeError::UnexpectedByte(self.pos, self.peek()?));
        }
        let len: usize = self
            .digits_until(b':')?
            .parse()
            .map_err(|_| DecodeError::InvalidLength)?;
        Ok(self.take(len)?.to_vec())
    }

    /// `i<decimal>e`. Leading zeros and `-0` are malformed per BEP-3.
    fn parse_int(&mut self) -> DecodeResult<i64> {
        self.advance(); // consume 'i'
        let digits = self.digits_until(b'e')?;
        if digits.is_empty()
            || digits == "-0"
            || (digits.len() > 1 && digits.starts_with('0'))
            || (digits.len() > 2 && digits.starts_with("-0"))
        {
            return Err(DecodeError::InvalidInteger);
        }
        digits.parse().map_err(|_| DecodeError::InvalidInteger)
    }

    fn parse_list(&mut self) -> DecodeResult<Vec<Value>> {
        self.advance(); // consume 'l'
        let mut list = Vec::new();
        loop {
            if self.peek()? == b'e' {
                self.advance();
                return Ok(list);
            }
            list.push(self.parse_value()?);
        }
    }

    fn parse_dict(&mut self) -> DecodeResult<BTreeMap<Vec<u8>, Value>> {
        self.advance(); // consume 'd'
        let mut dict = BTreeMap::new();
        loop {
            if self.peek()? == b'e' {
                self.advance();
                return Ok(dict);
            }
            let key = self.parse_bytes()?;
            let value = self.parse_value()?;
            dict.insert(key, value);
        }
    }
}
