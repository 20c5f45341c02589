//! Metainfo (`.torrent`) parsing.
//!
//! A metainfo file is a bencoded dictionary with an `announce` URL and an
//! `info` dictionary describing the payload. The info hash that identifies
//! the torrent on the wire is the SHA-1 of the raw `info` bytes as they
//! appear in the file, which is why parsing goes through
//! [`bencode::decode`] and its span tracking rather than serde.
use crate::bencode::{self, Value};
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode decoding error: {0}")]
    Decode(#[from] bencode::DecodeError),

    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),

    #[error("`pieces` length is not a multiple of 20")]
    InvalidPiecesLength,

    #[error("field `{0}` must be positive")]
    NonPositive(&'static str),

    #[error("torrent must declare exactly one of `length` and `files`")]
    AmbiguousLayout,
}

pub type MetainfoResult<T> = std::result::Result<T, MetainfoError>;

/// One file of the torrent payload.
///
/// `begin` is the byte offset of the file in the linear concatenation of
/// all files; entries are ordered so `begin` is strictly increasing and
/// contiguous.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the torrent's base directory.
    pub path: PathBuf,
    pub begin: u64,
    pub length: u64,
}

#[derive(Debug, Clone)]
pub struct Metainfo {
    pub info_hash: [u8; 20],
    /// Tracker tiers per BEP-12. Tier 0 holds the main `announce` URL;
    /// `announce-list` tiers follow with duplicates dropped.
    pub trackers: Vec<Vec<String>>,
    pub piece_hashes: Vec<[u8; 20]>,
    pub piece_length: u64,
    pub total_size: u64,
    /// Payload file name (single-file) or base directory name (multi-file).
    pub name: String,
    pub files: Vec<FileEntry>,
    pub single_file: bool,
    pub comment: Option<String>,
    pub created_by: Option<String>,
}

impl Metainfo {
    pub fn load(path: impl AsRef<Path>) -> MetainfoResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(&bytes)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub fn parse(bytes: &[u8]) -> MetainfoResult<Self> {
        let doc = bencode::decode(bytes)?;

        let announce = doc
            .get(b"announce")
            .and_then(Value::as_str)
            .ok_or(MetainfoError::MissingField("announce"))?
            .to_string();

        let info_raw = doc.raw(b"info").ok_or(MetainfoError::MissingField("info"))?;
        let info = doc
            .get(b"info")
            .and_then(Value::as_dict)
            .ok_or(MetainfoError::MissingField("info"))?;
        let info_hash = Sha1::digest(info_raw).into();

        let name = info
            .get(b"name".as_slice())
            .and_then(Value::as_str)
            .ok_or(MetainfoError::MissingField("name"))?
            .to_string();

        let piece_length = info
            .get(b"piece length".as_slice())
            .and_then(Value::as_int)
            .ok_or(MetainfoError::MissingField("piece length"))?;
        if piece_length <= 0 {
            return Err(MetainfoError::NonPositive("piece length"));
        }

        let pieces = info
            .get(b"pieces".as_slice())
            .and_then(Value::as_bytes)
            .ok_or(MetainfoError::MissingField("pieces"))?;
        if pieces.len() % 20 != 0 {
            return Err(MetainfoError::InvalidPiecesLength);
        }
        let piece_hashes: Vec<[u8; 20]> = pieces
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let length = info.get(b"length".as_slice());
        let file_list = info.get(b"files".as_slice());
        let (files, total_size, single_file) = match (length, file_list) {
            (Some(v), None) => {
                let length = positive(v.as_int(), "length")?;
                let entry = FileEntry {
                    path: PathBuf::from(&name),
                    begin: 0,
                    length,
                };
                (vec![entry], length, true)
            }
            (None, Some(v)) => {
                let list = v.as_list().ok_or(MetainfoError::MissingField("files"))?;
                let files = parse_files(list)?;
                let total = files.iter().map(|f| f.length).sum();
                (files, total, false)
            }
            _ => return Err(MetainfoError::AmbiguousLayout),
        };

        let trackers = collect_trackers(announce, doc.get(b"announce-list"));
        let comment = doc.get(b"comment").and_then(Value::as_str).map(str::to_string);
        let created_by = doc
            .get(b"created by")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Metainfo {
            info_hash,
            trackers,
            piece_hashes,
            piece_length: piece_length as u64,
            total_size,
            name,
            files,
            single_file,
            comment,
            created_by,
        })
    }

    pub fn piece_count(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Length of piece `index`: `piece_length` for all but the last piece,
    /// which is `total_size % piece_length` (or a full piece when the
    /// modulus is zero).
    pub fn piece_size(&self, index: usize) -> u64 {
        if index + 1 == self.piece_count() {
            let rem = self.total_size % self.piece_length;
            if rem != 0 {
                return rem;
            }
        }
        self.piece_length
    }

    /// Announce URLs flattened across tiers, main tracker first.
    pub fn tracker_urls(&self) -> Vec<&str> {
        self.trackers
            .iter()
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

fn positive(value: Option<i64>, field: &'static str) -> MetainfoResult<u64> {
    match value {
        Some(v) if v > 0 => Ok(v as u64),
        Some(_) => Err(MetainfoError::NonPositive(field)),
        None => Err(MetainfoError::MissingField(field)),
    }
}

fn parse_files(list: &[Value]) -> MetainfoResult<Vec<FileEntry>> {
    let mut files = Vec::with_capacity(list.len());
    let mut begin = 0u64;
    for entry in list {
        let dict = entry.as_dict().ok_or(MetainfoError::MissingField("files"))?;
        let length = positive(
            dict.get(b"length".as_slice()).and_then(Value::as_int),
            "file length",
        )?;
        let segments = dict
            .get(b"path".as_slice())
            .and_then(Value::as_list)
            .ok_or(MetainfoError::MissingField("file path"))?;
        if segments.is_empty() {
            return Err(MetainfoError::MissingField("file path"));
        }
        let mut path = PathBuf::new();
        for segment in segments {
            path.push(
                segment
                    .as_str()
                    .ok_or(MetainfoError::MissingField("file path"))?,
            );
        }
        files.push(FileEntry { path, begin, length });
        begin += length;
    }
    Ok(files)
}

/// Builds tracker tiers: the main announce URL is its own first tier,
/// `announce-list` tiers follow, duplicate URLs are dropped.
fn collect_trackers(announce: String, announce_list: Option<&Value>) -> Vec<Vec<String>> {
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(announce.clone());
    let mut tiers = vec![vec![announce]];

    let Some(list) = announce_list.and_then(Value::as_list) else {
        return tiers;
    };
    for tier in list {
        let Some(urls) = tier.as_list() else { continue };
        let tier: Vec<String> = urls
            .iter()
            .filter_map(Value::as_str)
            .filter(|url| seen.insert(url.to_string()))
            .map(str::to_string)
            .collect();
        if !tier.is_empty() {
            tiers.push(tier);
        }
    }
    tiers
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Bencodes a minimal single-file torrent by hand.
    pub(crate) fn single_file_torrent(
        name: &str,
        piece_length: u64,
        length: u64,
        piece_hashes: &[[u8; 20]],
    ) -> Vec<u8> {
        let mut pieces = Vec::new();
        for hash in piece_hashes {
            pieces.extend_from_slice(hash);
        }
        let mut out = Vec::new();
        out.extend_from_slice(b"d8:announce31:http://tracker.example/announce4:infod");
        out.extend_from_slice(format!("6:lengthi{length}e").as_bytes());
        out.extend_from_slice(format!("4:name{}:{name}", name.len()).as_bytes());
        out.extend_from_slice(format!("12:piece lengthi{piece_length}e").as_bytes());
        out.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
        out.extend_from_slice(&pieces);
        out.extend_from_slice(b"ee");
        out
    }

    fn multi_file_torrent() -> Vec<u8> {
        let hashes = [[0u8; 20]; 2];
        let mut pieces = Vec::new();
        for hash in &hashes {
            pieces.extend_from_slice(hash);
        }
        let mut out = Vec::new();
        out.extend_from_slice(b"d8:announce31:http://tracker.example/announce");
        out.extend_from_slice(
            b"13:announce-listll31:http://tracker.example/announce25:udp://backup.example:8000el16:http://third.w/ae",
        );
        out.extend_from_slice(b"e4:infod5:filesl");
        out.extend_from_slice(b"d6:lengthi700e4:pathl1:a2:bbee");
        out.extend_from_slice(b"d6:lengthi324e4:pathl1:cee");
        out.extend_from_slice(b"e4:name3:dir12:piece lengthi512e");
        out.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
        out.extend_from_slice(&pieces);
        out.extend_from_slice(b"ee");
        out
    }

    #[test]
    fn parses_single_file() {
        let bytes = single_file_torrent("payload.bin", 16384, 16384, &[[7u8; 20]]);
        let meta = Metainfo::parse(&bytes).unwrap();
        assert_eq!(meta.name, "payload.bin");
        assert!(meta.single_file);
        assert_eq!(meta.total_size, 16384);
        assert_eq!(meta.piece_count(), 1);
        assert_eq!(meta.piece_hashes[0], [7u8; 20]);
        assert_eq!(
            meta.files,
            vec![FileEntry {
                path: PathBuf::from("payload.bin"),
                begin: 0,
                length: 16384,
            }]
        );
    }

    #[test]
    fn parses_multi_file_with_contiguous_begins() {
        let meta = Metainfo::parse(&multi_file_torrent()).unwrap();
        assert!(!meta.single_file);
        assert_eq!(meta.name, "dir");
        assert_eq!(meta.total_size, 1024);
        assert_eq!(meta.files.len(), 2);
        assert_eq!(meta.files[0].path, PathBuf::from("a/bb"));
        assert_eq!(meta.files[0].begin, 0);
        assert_eq!(meta.files[1].path, PathBuf::from("c"));
        assert_eq!(meta.files[1].begin, 700);
        assert_eq!(meta.files[1].length, 324);
    }

    #[test]
    fn flattens_tracker_tiers_dropping_duplicates() {
        let meta = Metainfo::parse(&multi_file_torrent()).unwrap();
        assert_eq!(
            meta.tracker_urls(),
            vec![
                "http://tracker.example/announce",
                "udp://backup.example:8000",
                "http://third.w/a",
            ]
        );
        assert_eq!(meta.trackers.len(), 3);
        assert_eq!(meta.trackers[0].len(), 1);
        assert_eq!(meta.trackers[1], vec!["udp://backup.example:8000"]);
    }

    #[test]
    fn info_hash_is_sha1_of_raw_info_slice() {
        let bytes = single_file_torrent("x", 512, 512, &[[1u8; 20]]);
        let meta = Metainfo::parse(&bytes).unwrap();

        let doc = bencode::decode(&bytes).unwrap();
        let raw = doc.raw(b"info").unwrap();
        let expected: [u8; 20] = Sha1::digest(raw).into();
        assert_eq!(meta.info_hash, expected);
    }

    #[test]
    fn info_hash_survives_unsorted_info_keys() {
        // `name` placed after `pieces`: decode-then-encode would reorder
        // and produce a different digest than the raw slice.
        let mut out = Vec::new();
        out.extend_from_slice(b"d8:announce10:http://t/a4:infod");
        out.extend_from_slice(b"6:lengthi4e12:piece lengthi4e");
        out.extend_from_slice(b"6:pieces20:\x01\x01\x01\x01\x01\x01\x01\x01\x01\x01\x01\x01\x01\x01\x01\x01\x01\x01\x01\x01");
        out.extend_from_slice(b"4:name1:xee");
        let meta = Metainfo::parse(&out).unwrap();

        let doc = bencode::decode(&out).unwrap();
        let raw = doc.raw(b"info").unwrap();
        let from_raw: [u8; 20] = Sha1::digest(raw).into();
        let reencoded = bencode::encode(doc.get(b"info").unwrap());
        let from_reencode: [u8; 20] = Sha1::digest(&reencoded).into();

        assert_eq!(meta.info_hash, from_raw);
        assert_ne!(meta.info_hash, from_reencode);
    }

    #[test]
    fn last_piece_size() {
        let bytes = single_file_torrent("x", 512, 1200, &[[0u8; 20]; 3]);
        let meta = Metainfo::parse(&bytes).unwrap();
        assert_eq!(meta.piece_size(0), 512);
        assert_eq!(meta.piece_size(1), 512);
        assert_eq!(meta.piece_size(2), 176);

        let bytes = single_file_torrent("x", 512, 1024, &[[0u8; 20]; 2]);
        let meta = Metainfo::parse(&bytes).unwrap();
        assert_eq!(meta.piece_size(1), 512);
    }

    #[test]
    fn rejects_missing_fields() {
        assert!(matches!(
            Metainfo::parse(b"d4:infod6:lengthi1e4:name1:x12:piece lengthi1e6:pieces20:aaaaaaaaaaaaaaaaaaaaee"),
            Err(MetainfoError::MissingField("announce"))
        ));
        assert!(matches!(
            Metainfo::parse(b"d8:announce10:http://t/ae"),
            Err(MetainfoError::MissingField("info"))
        ));
    }

    #[test]
    fn rejects_ragged_pieces_string() {
        let mut bytes = b"d8:announce10:http://t/a4:infod6:lengthi4e4:name1:x12:piece lengthi4e6:pieces19:".to_vec();
        bytes.extend_from_slice(&[0u8; 19]);
        bytes.extend_from_slice(b"ee");
        assert!(matches!(
            Metainfo::parse(&bytes),
            Err(MetainfoError::InvalidPiecesLength)
        ));
    }

    #[test]
    fn rejects_zero_piece_length_and_ambiguous_layout() {
        let bytes = b"d8:announce10:http://t/a4:infod6:lengthi4e4:name1:x12:piece lengthi0e6:pieces0:ee";
        assert!(matches!(
            Metainfo::parse(bytes),
            Err(MetainfoError::NonPositive("piece length"))
        ));

        let bytes = b"d8:announce10:http://t/a4:infod4:name1:x12:piece lengthi4e6:pieces0:ee";
        assert!(matches!(
            Metainfo::parse(bytes),
            Err(MetainfoError::AmbiguousLayout)
        ));
    }
}
