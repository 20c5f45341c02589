//! UDP announce transport (BEP-15).
//!
//! Two round-trips per announce: a connect exchange that yields a
//! connection id, then the announce proper. Both replies are validated
//! against the action and the random transaction id we sent.
use super::{parse_compact_peers, Announce, AnnounceQuery, TrackerError, TrackerResult};
use byteorder::{BigEndian, ByteOrder};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};
use url::Url;

const PROTOCOL_MAGIC: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) async fn announce(url: &Url, query: &AnnounceQuery) -> TrackerResult<Announce> {
    let host = url.host_str().ok_or(TrackerError::Unresolvable)?;
    let port = url.port().ok_or(TrackerError::Unresolvable)?;
    let addr = tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or(TrackerError::Unresolvable)?;

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(addr).await?;
    let mut buf = [0u8; 1500];

    let tx = rand::rng().random::<u32>();
    socket.send(&connect_request(tx)).await?;
    let n = recv(&socket, &mut buf).await?;
    let connection_id = parse_connect_response(&buf[..n], tx)?;

    let tx = rand::rng().random::<u32>();
    socket.send(&announce_request(connection_id, tx, query)).await?;
    let n = recv(&socket, &mut buf).await?;
    parse_announce_response(&buf[..n], tx)
}

async fn recv(socket: &UdpSocket, buf: &mut [u8]) -> TrackerResult<usize> {
    match timeout(RESPONSE_TIMEOUT, socket.recv(buf)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TrackerError::Timeout),
    }
}

/// 16 bytes: protocol magic, action 0, transaction id.
fn connect_request(tx: u32) -> [u8; 16] {
    let mut buf = [0u8; 16];
    BigEndian::write_u64(&mut buf[0..8], PROTOCOL_MAGIC);
    BigEndian::write_u32(&mut buf[8..12], ACTION_CONNECT);
    BigEndian::write_u32(&mut buf[12..16], tx);
    buf
}

/// 16 bytes back: action 0, our transaction id, the connection id.
fn parse_connect_response(buf: &[u8], tx: u32) -> TrackerResult<u64> {
    if buf.len() < 16 {
        return Err(TrackerError::Malformed);
    }
    if BigEndian::read_u32(&buf[0..4]) != ACTION_CONNECT {
        return Err(TrackerError::ActionMismatch);
    }
    if BigEndian::read_u32(&buf[4..8]) != tx {
        return Err(TrackerError::TransactionMismatch);
    }
    Ok(BigEndian::read_u64(&buf[8..16]))
}

/// The 98-byte announce packet. Field offsets are fixed by BEP-15.
fn announce_request(connection_id: u64, tx: u32, q: &AnnounceQuery) -> [u8; 98] {
    let mut buf = [0u8; 98];
    BigEndian::write_u64(&mut buf[0..8], connection_id);
    BigEndian::write_u32(&mut buf[8..12], ACTION_ANNOUNCE);
    BigEndian::write_u32(&mut buf[12..16], tx);
    buf[16..36].copy_from_slice(&q.info_hash);
    buf[36..56].copy_from_slice(&q.peer_id);
    BigEndian::write_u64(&mut buf[56..64], q.downloaded);
    BigEndian::write_u64(&mut buf[64..72], q.left);
    BigEndian::write_u64(&mut buf[72..80], q.uploaded);
    BigEndian::write_u32(&mut buf[80..84], q.event.wire_value());
    BigEndian::write_u32(&mut buf[84..88], 0); // ip: let the tracker use the source
    BigEndian::write_u32(&mut buf[88..92], 0); // key
    BigEndian::write_u32(&mut buf[92..96], u32::MAX); // num_want = -1
    BigEndian::write_u16(&mut buf[96..98], q.port);
    buf
}

/// At least 20 bytes back: action 1, transaction id, interval, leecher and
/// seeder counts, then 6-byte compact peer entries.
fn parse_announce_response(buf: &[u8], tx: u32) -> TrackerResult<Announce> {
    if buf.len() < 20 {
        return Err(TrackerError::Malformed);
    }
    if BigEndian::read_u32(&buf[0..4]) != ACTION_ANNOUNCE {
        return Err(TrackerError::ActionMismatch);
    }
    if BigEndian::read_u32(&buf[4..8]) != tx {
        return Err(TrackerError::TransactionMismatch);
    }
    let interval = BigEndian::read_u32(&buf[8..12]) as u64;
    let peers = parse_compact_peers(&buf[20..])?;
    Ok(Announce { interval, peers })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::Event;

    fn query() -> AnnounceQuery {
        AnnounceQuery {
            info_hash: [0x11; 20],
            peer_id: [0x22; 20],
            port: 6889,
            key: 0,
            event: Event::Started,
            downloaded: 0x0102030405060708,
            uploaded: 0x1112131415161718,
            left: 0x2122232425262728,
        }
    }

    #[test]
    fn connect_request_layout() {
        let buf = connect_request(0xdeadbeef);
        assert_eq!(&buf[0..8], &[0x00, 0x00, 0x04, 0x17, 0x27, 0x10, 0x19, 0x80]);
        assert_eq!(&buf[8..12], &[0, 0, 0, 0]);
        assert_eq!(&buf[12..16], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn connect_response_yields_connection_id() {
        let mut buf = [0u8; 16];
        BigEndian::write_u32(&mut buf[0..4], ACTION_CONNECT);
        BigEndian::write_u32(&mut buf[4..8], 7);
        BigEndian::write_u64(&mut buf[8..16], 0xc0ffee);
        assert_eq!(parse_connect_response(&buf, 7).unwrap(), 0xc0ffee);
    }

    #[test]
    fn connect_response_validation() {
        let mut buf = [0u8; 16];
        BigEndian::write_u32(&mut buf[0..4], 3);
        BigEndian::write_u32(&mut buf[4..8], 7);
        assert!(matches!(
            parse_connect_response(&buf, 7),
            Err(TrackerError::ActionMismatch)
        ));

        BigEndian::write_u32(&mut buf[0..4], ACTION_CONNECT);
        assert!(matches!(
            parse_connect_response(&buf, 8),
            Err(TrackerError::TransactionMismatch)
        ));

        assert!(matches!(
            parse_connect_response(&buf[..10], 7),
            Err(TrackerError::Malformed)
        ));
    }

    #[test]
    fn announce_request_layout() {
        let q = query();
        let buf = announce_request(0xc1d2e3f4a5b6c7d8, 0x01020304, &q);
        assert_eq!(buf.len(), 98);
        assert_eq!(&buf[0..8], &0xc1d2e3f4a5b6c7d8u64.to_be_bytes());
        assert_eq!(BigEndian::read_u32(&buf[8..12]), 1);
        assert_eq!(&buf[12..16], &[1, 2, 3, 4]);
        assert_eq!(&buf[16..36], &[0x11; 20]);
        assert_eq!(&buf[36..56], &[0x22; 20]);
        assert_eq!(BigEndian::read_u64(&buf[56..64]), q.downloaded);
        assert_eq!(BigEndian::read_u64(&buf[64..72]), q.left);
        assert_eq!(BigEndian::read_u64(&buf[72..80]), q.uploaded);
        assert_eq!(BigEndian::read_u32(&buf[80..84]), 2); // started
        assert_eq!(BigEndian::read_u32(&buf[84..88]), 0); // ip
        assert_eq!(BigEndian::read_u32(&buf[88..92]), 0); // key
        assert_eq!(&buf[92..96], &[0xff, 0xff, 0xff, 0xff]); // num_want
        assert_eq!(BigEndian::read_u16(&buf[96..98]), 6889);
    }

    #[test]
    fn announce_response_parses_interval_and_peers() {
        let mut buf = vec![0u8; 26];
        BigEndian::write_u32(&mut buf[0..4], ACTION_ANNOUNCE);
        BigEndian::write_u32(&mut buf[4..8], 9);
        BigEndian::write_u32(&mut buf[8..12], 1800);
        buf[20..26].copy_from_slice(&[127, 0, 0, 1, 0x1a, 0xe1]);
        let announce = parse_announce_response(&buf, 9).unwrap();
        assert_eq!(announce.interval, 1800);
        assert_eq!(announce.peers.len(), 1);
        assert_eq!(announce.peers[0].addr, "127.0.0.1:6881".parse().unwrap());
    }

    #[test]
    fn announce_response_validation() {
        let mut buf = vec![0u8; 20];
        BigEndian::write_u32(&mut buf[0..4], ACTION_ANNOUNCE);
        BigEndian::write_u32(&mut buf[4..8], 9);
        assert!(matches!(
            parse_announce_response(&buf[..19], 9),
            Err(TrackerError::Malformed)
        ));
        assert!(matches!(
            parse_announce_response(&buf, 10),
            Err(TrackerError::TransactionMismatch)
        ));
        BigEndian::write_u32(&mut buf[0..4], ACTION_CONNECT);
        assert!(matches!(
            parse_announce_response(&buf, 9),
            Err(TrackerError::ActionMismatch)
        ));
    }
}
