//! Torrent controller.
//!
//! One [`Torrent`] per metainfo file. It owns the piece store and the
//! tracker set, keeps the live peer map and the dial blacklist, and runs
//! the main loop that wires trackers to peer sessions to disk events.
//!
//! Peer sessions run as their own tasks and talk back through the shared
//! state; the controller talks to them through per-peer command channels.
//! Disk work lives on the store's worker thread and surfaces here as
//! [`DiskEvent`]s.
use crate::metainfo::{Metainfo, MetainfoError};
use crate::peer::handshake::Handshake;
use crate::peer::session::{self, PeerCommand, PeerHandle};
use crate::peer::MAX_BLOCK_SIZE;
use crate::storage::{DiskError, DiskEvent, PieceStore};
use crate::tracker::{AnnounceQuery, Event, RemotePeer, Tracker};
use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Azureus-style client prefix of our peer id.
const PEER_ID_PREFIX: &[u8; 8] = b"-CT11000";

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error(transparent)]
    Metainfo(#[from] MetainfoError),

    #[error(transparent)]
    Disk(#[from] DiskError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TorrentResult<T> = std::result::Result<T, TorrentError>;

/// Outcome of a `download` (or `seed`) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// Every piece verified and persisted during this run.
    Completed,
    /// The initial scan found the payload already complete; no tracker
    /// was contacted.
    AlreadyDownloaded,
    /// No tracker answered the initial announce.
    TrackerQueryFailure,
    /// The loop ended without completing (fatal disk failure).
    NetworkError,
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory torrent payloads are placed under.
    pub download_dir: PathBuf,
    /// Request granularity; capped at the 16 KiB wire limit.
    pub block_size: u32,
    pub connect_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            download_dir: PathBuf::from("Torrents"),
            block_size: MAX_BLOCK_SIZE,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Cumulative transfer counters. Not persisted across restarts; trackers
/// see them reset.
#[derive(Debug, Default)]
pub struct Counters {
    downloaded: AtomicU64,
    uploaded: AtomicU64,
    wasted: AtomicU64,
    hash_misses: AtomicU64,
}

impl Counters {
    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::Relaxed)
    }

    pub fn uploaded(&self) -> u64 {
        self.uploaded.load(Ordering::Relaxed)
    }

    pub fn wasted(&self) -> u64 {
        self.wasted.load(Ordering::Relaxed)
    }

    pub fn hash_misses(&self) -> u64 {
        self.hash_misses.load(Ordering::Relaxed)
    }
}

/// State a torrent shares with its peer sessions.
///
/// Sessions hold an `Arc<Shared>`; the controller holds the only strong
/// handle to each session's command channel, so a dropped peer cannot
/// outlive the map entry that names it. The peer map is keyed by the
/// remote's 32-bit IPv4 address.
pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) info_hash: [u8; 20],
    pub(crate) peer_id: [u8; 20],
    pub(crate) handshake: [u8; 68],
    pub(crate) store: PieceStore,
    pub(crate) settings: Settings,
    peers: Mutex<HashMap<u32, PeerHandle>>,
    blacklist: Mutex<HashSet<u32>>,
    counters: Counters,
}

impl Shared {
    fn new(meta: &Metainfo, store: PieceStore, settings: Settings) -> Arc<Self> {
        let peer_id = generate_peer_id();
        let handshake = Handshake::new(meta.info_hash, peer_id).to_bytes();
        Arc::new(Shared {
            name: meta.name.clone(),
            info_hash: meta.info_hash,
            peer_id,
            handshake,
            store,
            settings,
            peers: Mutex::new(HashMap::new()),
            blacklist: Mutex::new(HashSet::new()),
            counters: Counters::default(),
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        meta: &Metainfo,
        base_dir: &Path,
        settings: Settings,
    ) -> (Arc<Self>, UnboundedReceiver<DiskEvent>) {
        let (tx, rx) = unbounded_channel();
        let store = PieceStore::open(meta, base_dir, tx).unwrap();
        (Self::new(meta, store, settings), rx)
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.counters
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.store.is_complete()
    }

    pub(crate) fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// A session assembled a full piece. Accepted bytes count as
    /// downloaded; rejected ones as wasted plus a hash miss. Accepting
    /// the same piece twice is a no-op rejection: counters for
    /// downloaded data and the on-disk bytes stay untouched.
    pub(crate) fn handle_piece_completed(&self, from: u32, index: u32, data: Vec<u8>) -> bool {
        let len = data.len() as u64;
        if self.store.write_piece(index, from, data) {
            self.counters.downloaded.fetch_add(len, Ordering::Relaxed);
            true
        } else {
            self.counters.wasted.fetch_add(len, Ordering::Relaxed);
            self.counters.hash_misses.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(torrent = %self.name, index, "piece rejected");
            false
        }
    }

    /// A session relays a remote block request; false tells it to choke.
    pub(crate) fn handle_block_request(
        &self,
        from: u32,
        index: u32,
        begin: u32,
        length: u32,
    ) -> bool {
        self.store.read_block(index, from, begin, length)
    }

    pub(crate) fn add_uploaded(&self, bytes: u64) {
        self.counters.uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// False when a session for this address already exists.
    pub(crate) fn try_register_peer(&self, ip: u32, handle: PeerHandle) -> bool {
        let mut peers = self.peers.lock().unwrap();
        if peers.contains_key(&ip) {
            return false;
        }
        tracing::info!(
            torrent = %self.name,
            peer = %handle.addr,
            established = peers.len() + 1,
            "peer connected"
        );
        peers.insert(ip, handle);
        true
    }

    pub(crate) fn remove_peer(&self, ip: u32, reason: &str) {
        let mut peers = self.peers.lock().unwrap();
        if peers.remove(&ip).is_some() {
            tracing::info!(
                torrent = %self.name,
                established = peers.len(),
                reason,
                "peer removed"
            );
        }
    }

    /// Claims the address for a dial attempt; false when it is already
    /// being dialed or failed before.
    pub(crate) fn try_blacklist(&self, ip: u32) -> bool {
        self.blacklist.lock().unwrap().insert(ip)
    }

    /// Handshake success clears the blacklist entry.
    pub(crate) fn unblacklist(&self, ip: u32) {
        self.blacklist.lock().unwrap().remove(&ip);
    }

    pub(crate) fn broadcast_have(&self, index: u32) {
        let peers = self.peers.lock().unwrap();
        for handle in peers.values() {
            let _ = handle.commands.send(PeerCommand::Have(index));
        }
    }

    pub(crate) fn send_block(&self, to: u32, index: u32, begin: u32, data: Bytes) {
        if let Some(handle) = self.peers.lock().unwrap().get(&to) {
            let _ = handle.commands.send(PeerCommand::Block { index, begin, data });
        }
    }

    fn disconnect_all(&self) {
        let mut peers = self.peers.lock().unwrap();
        for (_, handle) in peers.drain() {
            let _ = handle.commands.send(PeerCommand::Shutdown);
        }
    }
}

pub struct Torrent {
    shared: Arc<Shared>,
    /// Tracker tiers still unproven, in BEP-12 order.
    tiers: Vec<Vec<Tracker>>,
    /// Trackers that have answered at least once.
    active: Vec<Tracker>,
    /// Random announce key, stable for the life of the torrent.
    key: u32,
    total_size: u64,
    comment: Option<String>,
    started_at: Option<std::time::Instant>,
    disk_events: UnboundedReceiver<DiskEvent>,
}

impl Torrent {
    /// Parses the metainfo, opens (and scans) the payload files, and
    /// prepares trackers. Blocks on disk I/O; call it off the reactor
    /// (e.g. via `spawn_blocking`) when that matters.
    pub fn open(path: impl AsRef<Path>, settings: Settings) -> TorrentResult<Self> {
        let meta = Metainfo::load(path)?;
        Self::from_metainfo(meta, settings)
    }

    pub fn from_metainfo(meta: Metainfo, settings: Settings) -> TorrentResult<Self> {
        let base_dir = if meta.single_file {
            settings.download_dir.clone()
        } else {
            settings.download_dir.join(&meta.name)
        };
        let (disk_tx, disk_events) = unbounded_channel();
        let store = PieceStore::open(&meta, &base_dir, disk_tx)?;

        let tiers: Vec<Vec<Tracker>> = meta
            .trackers
            .iter()
            .map(|tier| {
                tier.iter()
                    .filter_map(|url| match Tracker::new(url) {
                        Ok(tracker) => Some(tracker),
                        Err(err) => {
                            tracing::warn!(url = %url, error = %err, "skipping unusable tracker");
                            None
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|tier| !tier.is_empty())
            .collect();

        Ok(Torrent {
            shared: Shared::new(&meta, store, settings),
            tiers,
            active: Vec::new(),
            key: rand::rng().random(),
            total_size: meta.total_size,
            comment: meta.comment.clone(),
            started_at: None,
            disk_events,
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn info_hash(&self) -> &[u8; 20] {
        &self.shared.info_hash
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn total_pieces(&self) -> usize {
        self.shared.store.total_pieces()
    }

    pub fn completed_pieces(&self) -> usize {
        self.shared.store.completed_pieces()
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.shared.counters().downloaded()
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.shared.counters().uploaded()
    }

    pub fn wasted_bytes(&self) -> u64 {
        self.shared.counters().wasted()
    }

    pub fn hash_misses(&self) -> u64 {
        self.shared.counters().hash_misses()
    }

    pub fn active_peers(&self) -> usize {
        self.shared.peer_count()
    }

    /// Time since `download` (or `seed`) started; zero before either.
    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Mean download rate in bytes per second over this run.
    pub fn download_speed(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.shared.counters().downloaded() as f64 / secs
    }

    /// Projected time to completion at the current mean rate.
    pub fn eta(&self) -> Option<Duration> {
        let downloaded = self.shared.store.computed_downloaded();
        let rate = self.download_speed();
        if downloaded == 0 || rate <= 0.0 {
            return None;
        }
        let remaining = self.total_size.saturating_sub(downloaded);
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    /// Downloads until every piece is persisted. Fires `started` first;
    /// `completed` or `stopped` on the way out.
    pub async fn download(&mut self, port: u16) -> TorrentResult<DownloadState> {
        if self.shared.store.is_complete() {
            tracing::info!(torrent = %self.shared.name, "payload already complete on disk");
            return Ok(DownloadState::AlreadyDownloaded);
        }
        if !self.walk_tiers(Event::Started, port).await {
            return Ok(DownloadState::TrackerQueryFailure);
        }
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!(torrent = %self.shared.name, port, "download started");
        self.started_at = Some(std::time::Instant::now());

        let outcome = self.run_loop(listener, port, false).await;

        let event = if outcome == DownloadState::Completed {
            Event::Completed
        } else {
            Event::Stopped
        };
        self.announce_active(event, port).await;
        self.shared.disconnect_all();
        Ok(outcome)
    }

    /// Serves other peers indefinitely; returns only on a fatal disk
    /// failure. Announces `started` if this torrent has no active
    /// tracker yet (seeding can still serve inbound peers without one).
    pub async fn seed(&mut self, port: u16) -> TorrentResult<DownloadState> {
        if self.active.is_empty() {
            let _ = self.walk_tiers(Event::Started, port).await;
        }
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!(torrent = %self.shared.name, port, "seeding");
        if self.started_at.is_none() {
            self.started_at = Some(std::time::Instant::now());
        }

        let outcome = self.run_loop(listener, port, true).await;

        self.announce_active(Event::Stopped, port).await;
        self.shared.disconnect_all();
        Ok(outcome)
    }

    /// The reactor loop: inbound accepts, disk completions, tracker
    /// deadlines. `have` for a piece goes out only from here, after its
    /// write-completion event, never before the bytes are durable.
    async fn run_loop(&mut self, listener: TcpListener, port: u16, seeding: bool) -> DownloadState {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept_peer(stream, addr),
                    Err(err) => tracing::warn!(error = %err, "accept failed"),
                },
                event = self.disk_events.recv() => match event {
                    Some(DiskEvent::WriteDone { index, .. }) => {
                        self.shared.broadcast_have(index);
                        tracing::info!(
                            torrent = %self.shared.name,
                            index,
                            completed = self.shared.store.completed_pieces(),
                            total = self.shared.store.total_pieces(),
                            downloaded = %crate::util::human_bytes(self.shared.counters().downloaded()),
                            wasted = %crate::util::human_bytes(self.shared.counters().wasted()),
                            hash_misses = self.shared.counters().hash_misses(),
                            speed = %format!("{:.1} KiB/s", self.download_speed() / 1024.0),
                            "piece complete"
                        );
                        if !seeding && self.shared.store.is_complete() {
                            return DownloadState::Completed;
                        }
                    }
                    Some(DiskEvent::ReadDone { from, index, begin, data }) => {
                        self.shared.send_block(from, index, begin, data);
                    }
                    Some(DiskEvent::Fatal(err)) => {
                        tracing::error!(torrent = %self.shared.name, error = %err, "disk failure");
                        return DownloadState::NetworkError;
                    }
                    None => return DownloadState::NetworkError,
                },
                _ = tick.tick() => self.poll_trackers(port).await,
            }
        }
    }

    fn accept_peer(&self, stream: TcpStream, addr: SocketAddr) {
        // The peer map is keyed by IPv4; v6 connections are dropped.
        let SocketAddr::V4(addr) = addr else { return };
        tokio::spawn(session::run_inbound(Arc::clone(&self.shared), stream, addr));
    }

    fn query(&self, event: Event, port: u16) -> AnnounceQuery {
        let downloaded = self.shared.store.computed_downloaded();
        AnnounceQuery {
            info_hash: self.shared.info_hash,
            peer_id: self.shared.peer_id,
            port,
            key: self.key,
            event,
            downloaded,
            uploaded: self.shared.counters().uploaded(),
            left: self.total_size.saturating_sub(downloaded),
        }
    }

    /// BEP-12 walk: shuffle each unproven tier, try tiers in order, stop
    /// at the first tracker that answers and promote it to the active
    /// set. Returns whether any tracker answered.
    async fn walk_tiers(&mut self, event: Event, port: u16) -> bool {
        let query = self.query(event, port);
        {
            let mut rng = rand::rng();
            for tier in &mut self.tiers {
                tier.shuffle(&mut rng);
            }
        }
        for tier_index in 0..self.tiers.len() {
            for tracker_index in 0..self.tiers[tier_index].len() {
                let tracker = &mut self.tiers[tier_index][tracker_index];
                // Failed trackers carry a retry floor; skip until due.
                if !tracker.time_up() {
                    continue;
                }
                match tracker.announce(&query).await {
                    Ok(peers) => {
                        let tracker = self.tiers[tier_index].remove(tracker_index);
                        self.active.push(tracker);
                        self.intake(peers);
                        return true;
                    }
                    Err(err) => {
                        tracing::warn!(
                            torrent = %self.shared.name,
                            url = self.tiers[tier_index][tracker_index].url(),
                            error = %err,
                            "tracker announce failed"
                        );
                    }
                }
            }
        }
        false
    }

    /// Periodic tracker poll: re-announce on every active tracker whose
    /// deadline passed. With no active tracker, retry the tier walk.
    async fn poll_trackers(&mut self, port: u16) {
        if self.active.is_empty() {
            if !self.walk_tiers(Event::None, port).await {
                return;
            }
        }
        let query = self.query(Event::None, port);
        let mut gathered = Vec::new();
        for tracker in &mut self.active {
            if !tracker.time_up() {
                continue;
            }
            match tracker.announce(&query).await {
                Ok(mut peers) => gathered.append(&mut peers),
                Err(err) => {
                    tracing::warn!(url = tracker.url(), error = %err, "tracker announce failed");
                }
            }
        }
        self.intake(gathered);
    }

    async fn announce_active(&mut self, event: Event, port: u16) {
        let query = self.query(event, port);
        for tracker in &mut self.active {
            if let Err(err) = tracker.announce(&query).await {
                tracing::debug!(url = tracker.url(), error = %err, "final announce failed");
            }
        }
    }

    /// Dials tracker-provided peers that are neither connected nor
    /// already claimed by a dial attempt.
    fn intake(&self, peers: Vec<RemotePeer>) {
        if self.shared.store.is_complete() {
            return;
        }
        for peer in peers {
            let ip = u32::from(*peer.addr.ip());
            if self.shared.peers.lock().unwrap().contains_key(&ip) {
                continue;
            }
            if !self.shared.try_blacklist(ip) {
                continue;
            }
            tokio::spawn(session::connect_outbound(Arc::clone(&self.shared), peer));
        }
    }
}

/// 20 bytes: the Azureus-style `-CT11000` prefix plus 12 random bytes.
fn generate_peer_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(PEER_ID_PREFIX);
    rand::rng().fill(&mut id[8..]);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::tests::single_file_torrent;
    use sha1::{Digest, Sha1};
    use tokio::sync::mpsc;

    fn hash(data: &[u8]) -> [u8; 20] {
        Sha1::digest(data).into()
    }

    #[test]
    fn peer_id_has_client_prefix_and_random_suffix() {
        let a = generate_peer_id();
        let b = generate_peer_id();
        assert_eq!(&a[..8], b"-CT11000");
        assert_eq!(&b[..8], b"-CT11000");
        assert_ne!(a, b);
    }

    #[test]
    fn handshake_blob_layout() {
        let payload = b"x".repeat(512);
        let meta =
            Metainfo::parse(&single_file_torrent("x", 512, 512, &[hash(&payload)])).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let (shared, _rx) = Shared::for_tests(&meta, dir.path(), Settings::default());
        assert_eq!(shared.handshake.len(), 68);
        assert_eq!(shared.handshake[0], 0x13);
        assert_eq!(&shared.handshake[1..20], b"BitTorrent protocol");
        assert_eq!(&shared.handshake[28..48], &meta.info_hash);
        assert_eq!(&shared.handshake[48..68], &shared.peer_id);
    }

    #[tokio::test]
    async fn fully_present_torrent_is_already_downloaded() {
        // The payload exists and matches before open; download() must
        // return without contacting any tracker (the announce URL here
        // does not even resolve).
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![0x2bu8; 16384];
        let bytes = single_file_torrent("payload.bin", 16384, 16384, &[hash(&payload)]);
        let meta = Metainfo::parse(&bytes).unwrap();
        std::fs::write(dir.path().join("payload.bin"), &payload).unwrap();

        let settings = Settings {
            download_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let mut torrent = Torrent::from_metainfo(meta, settings).unwrap();
        assert_eq!(torrent.completed_pieces(), 1);
        assert_eq!(
            torrent.download(0).await.unwrap(),
            DownloadState::AlreadyDownloaded
        );
    }

    #[tokio::test]
    async fn piece_acceptance_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![0x11u8; 512];
        let meta =
            Metainfo::parse(&single_file_torrent("x", 512, 512, &[hash(&payload)])).unwrap();
        let (shared, mut disk) = Shared::for_tests(
            &meta,
            dir.path(),
            Settings::default(),
        );

        assert!(shared.handle_piece_completed(1, 0, payload.clone()));
        assert_eq!(shared.counters().downloaded(), 512);
        assert!(matches!(
            disk.recv().await.unwrap(),
            DiskEvent::WriteDone { .. }
        ));
        let on_disk = std::fs::read(dir.path().join("x")).unwrap();

        // the same accepted bytes again: rejected, nothing else moves
        assert!(!shared.handle_piece_completed(1, 0, payload.clone()));
        assert_eq!(shared.counters().downloaded(), 512);
        assert_eq!(shared.store.completed_pieces(), 1);
        assert_eq!(std::fs::read(dir.path().join("x")).unwrap(), on_disk);
    }

    #[tokio::test]
    async fn rejected_piece_counts_waste_and_broadcasts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let payload = vec![0x11u8; 512];
        let meta =
            Metainfo::parse(&single_file_torrent("x", 512, 512, &[hash(&payload)])).unwrap();
        let (shared, _disk) = Shared::for_tests(&meta, dir.path(), Settings::default());

        // observe broadcasts through a fake registered peer
        let (tx, mut commands) = mpsc::unbounded_channel();
        assert!(shared.try_register_peer(
            7,
            PeerHandle {
                addr: "10.0.0.7:6881".parse().unwrap(),
                commands: tx,
            }
        ));

        assert!(!shared.handle_piece_completed(7, 0, vec![0u8; 512]));
        assert_eq!(shared.counters().wasted(), 512);
        assert_eq!(shared.counters().hash_misses(), 1);
        assert_eq!(shared.counters().downloaded(), 0);
        assert_eq!(shared.store.completed_pieces(), 0);
        assert!(commands.try_recv().is_err());
    }

    #[tokio::test]
    async fn have_broadcast_reaches_every_peer() {
        let dir = tempfile::tempdir().unwrap();
        let meta =
            Metainfo::parse(&single_file_torrent("x", 512, 512, &[[1u8; 20]])).unwrap();
        let (shared, _disk) = Shared::for_tests(&meta, dir.path(), Settings::default());

        let mut receivers = Vec::new();
        for ip in [1u32, 2, 3] {
            let (tx, rx) = mpsc::unbounded_channel();
            let addr = format!("10.0.0.{ip}:6881").parse().unwrap();
            assert!(shared.try_register_peer(ip, PeerHandle { addr, commands: tx }));
            receivers.push(rx);
        }
        // duplicate registration is refused
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(!shared.try_register_peer(
            2,
            PeerHandle {
                addr: "10.0.0.2:9999".parse().unwrap(),
                commands: tx,
            }
        ));

        shared.broadcast_have(4);
        for rx in &mut receivers {
            assert!(matches!(rx.try_recv().unwrap(), PeerCommand::Have(4)));
        }
    }

    #[test]
    fn blacklist_claims_once_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let meta =
            Metainfo::parse(&single_file_torrent("x", 512, 512, &[[1u8; 20]])).unwrap();
        let (shared, _disk) = Shared::for_tests(&meta, dir.path(), Settings::default());

        assert!(shared.try_blacklist(42));
        assert!(!shared.try_blacklist(42));
        shared.unblacklist(42);
        assert!(shared.try_blacklist(42));
    }
}
