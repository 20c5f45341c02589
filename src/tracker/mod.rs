//! Tracker clients.
//!
//! One [`Tracker`] exists per announce URL; the transport (HTTP or UDP) is
//! chosen by the URL scheme. A tracker remembers when its next announce is
//! due: successful announces push the deadline out by the interval the
//! tracker returned, failures push it out by a 30-second retry floor and
//! leave the tracker alive for the next poll.
use std::net::{Ipv4Addr, SocketAddrV4};
use thiserror::Error;
use tokio::time::{Duration, Instant};
use url::Url;

pub mod http;
pub mod udp;

/// Minimum wait before retrying a failed tracker.
const RETRY_FLOOR: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid announce url: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported announce scheme `{0}`")]
    UnsupportedScheme(String),

    #[error("unable to resolve tracker host")]
    Unresolvable,

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker answered with http status {0}")]
    BadStatus(u16),

    #[error("undecodable tracker response: {0}")]
    Decode(#[from] serde_bencode::Error),

    #[error("malformed tracker response")]
    Malformed,

    #[error("tracker failure: {0}")]
    Failure(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tracker timed out")]
    Timeout,

    #[error("transaction id mismatch")]
    TransactionMismatch,

    #[error("action mismatch")]
    ActionMismatch,
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Announce event. The discriminants are the BEP-15 wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    None = 0,
    Completed = 1,
    Started = 2,
    Stopped = 3,
}

impl Event {
    pub(crate) fn wire_value(self) -> u32 {
        self as u32
    }

    /// The `event=` query value for HTTP announces; periodic announces
    /// omit the parameter entirely.
    pub(crate) fn query_value(self) -> Option<&'static str> {
        match self {
            Event::None => None,
            Event::Completed => Some("completed"),
            Event::Started => Some("started"),
            Event::Stopped => Some("stopped"),
        }
    }
}

/// Everything a single announce needs to know about our side.
#[derive(Debug, Clone)]
pub struct AnnounceQuery {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    /// Port we accept peer connections on.
    pub port: u16,
    /// Random per-torrent key, lets the tracker recognize us across IPs.
    pub key: u32,
    pub event: Event,
    pub downloaded: u64,
    pub uploaded: u64,
    pub left: u64,
}

/// A peer address handed back by a tracker. Non-compact HTTP responses may
/// also carry the peer's id, which the handshake later verifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeer {
    pub addr: SocketAddrV4,
    pub id: Option<[u8; 20]>,
}

#[derive(Debug)]
pub struct Announce {
    /// Seconds until the next announce.
    pub interval: u64,
    pub peers: Vec<RemotePeer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Http,
    Udp,
}

pub struct Tracker {
    url: Url,
    transport: Transport,
    deadline: Instant,
}

impl Tracker {
    pub fn new(url: &str) -> TrackerResult<Self> {
        let url = Url::parse(url)?;
        let transport = match url.scheme() {
            "http" | "https" => Transport::Http,
            "udp" => Transport::Udp,
            other => return Err(TrackerError::UnsupportedScheme(other.to_string())),
        };
        Ok(Tracker {
            url,
            transport,
            // A fresh tracker is due immediately.
            deadline: Instant::now(),
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// True once the next-announce deadline has passed.
    pub fn time_up(&self) -> bool {
        Instant::now() >= self.deadline
    }

    #[tracing::instrument(level = "debug", skip(self, query), fields(url = %self.url, event = ?query.event))]
    pub async fn announce(&mut self, query: &AnnounceQuery) -> TrackerResult<Vec<RemotePeer>> {
        let outcome = match self.transport {
            Transport::Http => http::announce(&self.url, query).await,
            Transport::Udp => udp::announce(&self.url, query).await,
        };
        match outcome {
            Ok(announce) => {
                self.deadline = Instant::now() + Duration::from_secs(announce.interval).max(RETRY_FLOOR);
                tracing::debug!(
                    peers = announce.peers.len(),
                    interval = announce.interval,
                    "announce ok"
                );
                Ok(announce.peers)
            }
            Err(err) => {
                self.deadline = Instant::now() + RETRY_FLOOR;
                Err(err)
            }
        }
    }
}

/// Decodes a compact peer list: 6 bytes per peer, 4 of IPv4 and 2 of port,
/// both big-endian. All-zero addresses are skipped.
pub(crate) fn parse_compact_peers(bytes: &[u8]) -> TrackerResult<Vec<RemotePeer>> {
    if bytes.len() % 6 != 0 {
        return Err(TrackerError::Malformed);
    }
    Ok(bytes
        .chunks_exact(6)
        .filter_map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            if ip.is_unspecified() {
                return None;
            }
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            Some(RemotePeer {
                addr: SocketAddrV4::new(ip, port),
                id: None,
            })
        })
        .collect())
}
