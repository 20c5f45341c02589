//! Piece and file storage.
//!
//! [`PieceStore`] owns the piece table, the file table and the completion
//! bitfield, and runs a background worker thread for disk I/O. The
//! controller talks to it synchronously for validation and bookkeeping;
//! actual reads and writes are queued to the worker, which posts
//! completion events back through a channel drained on the async side.
//!
//! A piece has two completion levels. `claimed` means a verified copy has
//! been accepted and queued for disk, so selection stops offering the
//! piece. The bitfield bit is set only once the worker's write has
//! returned from the kernel; `have` broadcasts, block serving and
//! termination all key off the bit.
use crate::bitfield::Bitfield;
use crate::metainfo::Metainfo;
use crate::peer::MAX_BLOCK_SIZE;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::fs::OpenOptions;
use std::path::{Component, Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

mod worker;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("path `{0}` escapes the download directory")]
    UnsafePath(PathBuf),
}

pub type DiskResult<T> = std::result::Result<T, DiskError>;

/// Completion events posted by the disk worker.
#[derive(Debug)]
pub enum DiskEvent {
    /// Piece `index` is on disk and its bitfield bit is set.
    WriteDone { from: u32, index: u32 },
    /// A requested block was gathered from disk.
    ReadDone {
        from: u32,
        index: u32,
        begin: u32,
        data: Bytes,
    },
    /// Disk failure; fatal for the torrent.
    Fatal(DiskError),
}

#[derive(Debug)]
enum DiskJob {
    Write { index: u32, from: u32, data: Vec<u8> },
    Read { index: u32, from: u32, begin: u32, length: u32 },
}

struct StoreFile {
    path: PathBuf,
    begin: u64,
    length: u64,
    file: Mutex<std::fs::File>,
}

struct PieceState {
    bits: Bitfield,
    claimed: Vec<bool>,
    priority: Vec<u32>,
}

pub struct PieceStore {
    piece_hashes: Vec<[u8; 20]>,
    piece_length: u64,
    total_size: u64,
    state: Arc<Mutex<PieceState>>,
    jobs: Option<mpsc::Sender<DiskJob>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl PieceStore {
    /// Opens (creating as needed) every payload file under `base_dir`,
    /// truncates files that grew past their declared length, scans
    /// existing bytes to repopulate the completion bitfield, and starts
    /// the disk worker.
    ///
    /// The scan is sequential by piece index; pieces straddling file
    /// boundaries are stitched together before hashing.
    pub fn open(
        meta: &Metainfo,
        base_dir: &Path,
        events: UnboundedSender<DiskEvent>,
    ) -> DiskResult<Self> {
        std::fs::create_dir_all(base_dir)?;

        let mut files = Vec::with_capacity(meta.files.len());
        for entry in &meta.files {
            if !is_clean_relative(&entry.path) {
                return Err(DiskError::UnsafePath(entry.path.clone()));
            }
            let full = base_dir.join(&entry.path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&full)?;
            let on_disk = file.metadata()?.len();
            if on_disk > entry.length {
                tracing::info!(path = %full.display(), "truncating oversized file");
                file.set_len(entry.length)?;
            }
            files.push(StoreFile {
                path: full,
                begin: entry.begin,
                length: entry.length,
                file: Mutex::new(file),
            });
        }
        let files = Arc::new(files);
        for f in files.iter() {
            tracing::debug!(
                path = %f.path.display(),
                begin = f.begin,
                length = f.length,
                "registered payload file"
            );
        }

        let mut state = PieceState {
            bits: Bitfield::new(meta.piece_count()),
            claimed: vec![false; meta.piece_count()],
            priority: vec![0; meta.piece_count()],
        };
        scan_pieces(meta, &files, &mut state);
        tracing::info!(
            completed = state.bits.count(),
            total = meta.piece_count(),
            "initial piece scan finished"
        );
        let state = Arc::new(Mutex::new(state));

        let (jobs_tx, jobs_rx) = mpsc::channel();
        let worker = worker::spawn(files, Arc::clone(&state), meta.piece_length, jobs_rx, events)?;

        Ok(PieceStore {
            piece_hashes: meta.piece_hashes.clone(),
            piece_length: meta.piece_length,
            total_size: meta.total_size,
            state,
            jobs: Some(jobs_tx),
            worker: Some(worker),
        })
    }

    pub fn total_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    pub fn completed_pieces(&self) -> usize {
        self.state.lock().unwrap().bits.count()
    }

    /// True once every piece is verified and persisted.
    pub fn is_complete(&self) -> bool {
        self.state.lock().unwrap().bits.all()
    }

    /// Verified-and-persisted flag for one piece.
    pub fn piece_done(&self, index: u32) -> bool {
        self.state.lock().unwrap().bits.has(index as usize)
    }

    /// Consistent snapshot of the completion bitfield for the wire.
    pub fn completed_bits(&self) -> Bitfield {
        self.state.lock().unwrap().bits.clone()
    }

    pub fn piece_size(&self, index: u32) -> u64 {
        piece_size(self.piece_length, self.total_size, self.total_pieces(), index)
    }

    /// Bytes of payload that are verified and persisted.
    pub fn computed_downloaded(&self) -> u64 {
        let state = self.state.lock().unwrap();
        (0..self.total_pieces() as u32)
            .filter(|&i| state.bits.has(i as usize))
            .map(|i| piece_size(self.piece_length, self.total_size, self.total_pieces(), i))
            .sum()
    }

    /// Picks the next piece to download for a peer owning `available`
    /// pieces: the lowest-priority unclaimed piece, ties broken by lowest
    /// index. The winner's priority counter is bumped so concurrent peers
    /// spread across different pieces. `None` when the peer has nothing
    /// we still need.
    pub fn piece_for_request(&self, available: impl Fn(u32) -> bool) -> Option<u32> {
        let mut state = self.state.lock().unwrap();
        let mut best: Option<(u32, u32)> = None;
        for index in 0..self.total_pieces() as u32 {
            if state.claimed[index as usize] || !available(index) {
                continue;
            }
            let priority = state.priority[index as usize];
            if priority == 0 {
                state.priority[index as usize] = 1;
                return Some(index);
            }
            if best.map_or(true, |(_, p)| priority < p) {
                best = Some((index, priority));
            }
        }
        let (index, _) = best?;
        state.priority[index as usize] += 1;
        Some(index)
    }

    /// Accepts a fully assembled piece: verifies the hash against the
    /// metainfo digest and queues the disk write. Returns false when the
    /// index is invalid, the piece is already accepted, or the hash does
    /// not match; the caller accounts rejected bytes as wasted.
    pub fn write_piece(&self, index: u32, from: u32, data: Vec<u8>) -> bool {
        let Some(expected) = self.piece_hashes.get(index as usize) else {
            return false;
        };
        if self.state.lock().unwrap().claimed[index as usize] {
            return false;
        }
        let digest: [u8; 20] = Sha1::digest(&data).into();
        if digest != *expected {
            return false;
        }
        {
            let mut state = self.state.lock().unwrap();
            // Raced with another acceptance while hashing.
            if state.claimed[index as usize] {
                return false;
            }
            state.claimed[index as usize] = true;
        }
        self.send_job(DiskJob::Write { index, from, data })
    }

    /// Queues a block read for serving a peer request. Requires the piece
    /// bit to be set and the block to lie inside the piece and under the
    /// wire cap.
    pub fn read_block(&self, index: u32, from: u32, begin: u32, length: u32) -> bool {
        if index as usize >= self.total_pieces() || length == 0 || length > MAX_BLOCK_SIZE {
            return false;
        }
        if u64::from(begin) + u64::from(length) > self.piece_size(index) {
            return false;
        }
        if !self.piece_done(index) {
            return false;
        }
        self.send_job(DiskJob::Read { index, from, begin, length })
    }

    fn send_job(&self, job: DiskJob) -> bool {
        match &self.jobs {
            Some(jobs) => jobs.send(job).is_ok(),
            None => false,
        }
    }
}

impl Drop for PieceStore {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn piece_size(piece_length: u64, total_size: u64, count: usize, index: u32) -> u64 {
    if index as usize + 1 == count {
        let rem = total_size % piece_length;
        if rem != 0 {
            return rem;
        }
    }
    piece_length
}

/// Rejects `..`, root and prefix components; payload paths must stay
/// inside the download directory.
fn is_clean_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && path.components().any(|c| matches!(c, Component::Normal(_)))
}

/// The per-file slices of the global byte range `[start, start + len)`.
/// Yields `(file index, offset in file, offset in buffer, len)`.
fn fragments(
    files: &[StoreFile],
    start: u64,
    len: usize,
) -> impl Iterator<Item = (usize, u64, usize, usize)> + '_ {
    let end = start + len as u64;
    files.iter().enumerate().filter_map(move |(i, f)| {
        let file_end = f.begin + f.length;
        let lo = start.max(f.begin);
        let hi = end.min(file_end);
        if lo >= hi {
            return None;
        }
        Some((i, lo - f.begin, (lo - start) as usize, (hi - lo) as usize))
    })
}

/// Gathers the global byte range into `buf`, stitching across file
/// boundaries. Fails (with `UnexpectedEof`) when some file does not yet
/// hold the bytes, which the scan treats as "piece not present".
fn read_range(files: &[StoreFile], start: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut covered = 0usize;
    for (i, file_off, buf_off, len) in fragments(files, start, buf.len()) {
        let mut file = files[i].file.lock().unwrap();
        file.seek(SeekFrom::Start(file_off))?;
        file.read_exact(&mut buf[buf_off..buf_off + len])?;
        covered += len;
    }
    if covered != buf.len() {
        return Err(std::io::ErrorKind::UnexpectedEof.into());
    }
    Ok(())
}

/// Scatters `data` at the global offset across the files it overlaps.
fn write_range(files: &[StoreFile], start: u64, data: &[u8]) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    for (i, file_off, buf_off, len) in fragments(files, start, data.len()) {
        let mut file = files[i].file.lock().unwrap();
        file.seek(SeekFrom::Start(file_off))?;
        file.write_all(&data[buf_off..buf_off + len])?;
    }
    Ok(())
}

fn scan_pieces(meta: &Metainfo, files: &[StoreFile], state: &mut PieceState) {
    let mut buf = Vec::new();
    for index in 0..meta.piece_count() {
        let size = meta.piece_size(index) as usize;
        buf.resize(size, 0);
        let start = index as u64 * meta.piece_length;
        if read_range(files, start, &mut buf).is_err() {
            continue;
        }
        let digest: [u8; 20] = Sha1::digest(&buf).into();
        if digest == meta.piece_hashes[index] {
            state.bits.set(index);
            state.claimed[index] = true;
        }
    }
}
