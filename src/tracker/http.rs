//! HTTP announce transport.
//!
//! A single GET per announce. `info_hash` and `peer_id` are raw 20-byte
//! strings and must be percent-encoded by hand; handing them to a URL
//! library's query builder would escape the escapes.
use super::{
    parse_compact_peers, Announce, AnnounceQuery, RemotePeer, TrackerError, TrackerResult,
};
use serde::Deserialize;
use serde_bytes::ByteBuf;
use std::net::{IpAddr, SocketAddrV4};
use url::Url;

pub(crate) async fn announce(base: &Url, query: &AnnounceQuery) -> TrackerResult<Announce> {
    let url = announce_url(base, query);
    let response = reqwest::get(url).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(TrackerError::BadStatus(status.as_u16()));
    }
    let body = response.bytes().await?;
    parse_response(&body)
}

fn announce_url(base: &Url, q: &AnnounceQuery) -> Url {
    let mut qs = format!(
        "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1&key={:08x}",
        url_encode(&q.info_hash),
        url_encode(&q.peer_id),
        q.port,
        q.uploaded,
        q.downloaded,
        q.left,
        q.key,
    );
    if let Some(event) = q.event.query_value() {
        qs.push_str("&event=");
        qs.push_str(event);
    }
    // Announce URLs occasionally ship their own parameters (passkeys).
    if let Some(existing) = base.query() {
        qs = format!("{existing}&{qs}");
    }
    let mut url = base.clone();
    url.set_query(Some(&qs));
    url
}

/// Percent-encodes arbitrary bytes, leaving RFC 3986 unreserved
/// characters as-is.
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    encoded
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    interval: Option<i64>,
    #[serde(default)]
    peers: Option<Peers>,
    #[serde(default, rename = "failure reason")]
    failure_reason: Option<String>,
}

/// Trackers answer with either the compact byte-string form or a list of
/// per-peer dictionaries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Peers {
    Compact(ByteBuf),
    Dicts(Vec<PeerDict>),
}

#[derive(Debug, Deserialize)]
struct PeerDict {
    ip: String,
    port: u16,
    #[serde(default, rename = "peer id")]
    peer_id: Option<ByteBuf>,
}

fn parse_response(bytes: &[u8]) -> TrackerResult<Announce> {
    let response: Response = serde_bencode::from_bytes(bytes)?;
    if let Some(reason) = response.failure_reason {
        return Err(TrackerError::Failure(reason));
    }
    let interval = match response.interval {
        Some(secs) if secs >= 0 => secs as u64,
        _ => return Err(TrackerError::Malformed),
    };
    let peers = match response.peers {
        Some(Peers::Compact(buf)) => parse_compact_peers(&buf)?,
        Some(Peers::Dicts(dicts)) => dicts.into_iter().filter_map(peer_from_dict).collect(),
        None => Vec::new(),
    };
    Ok(Announce { interval, peers })
}

fn peer_from_dict(dict: PeerDict) -> Option<RemotePeer> {
    // The peer map is keyed by IPv4; v6 entries are dropped.
    let ip = match dict.ip.parse::<IpAddr>().ok()? {
        IpAddr::V4(ip) => ip,
        IpAddr::V6(_) => return None,
    };
    let id = dict
        .peer_id
        .as_ref()
        .and_then(|id| <[u8; 20]>::try_from(&id[..]).ok());
    Some(RemotePeer {
        addr: SocketAddrV4::new(ip, dict.port),
        id,
    })
}
