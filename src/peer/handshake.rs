//! The 68-byte handshake that opens every peer connection.
//!
//! Layout: one length byte (0x13), the literal `BitTorrent protocol`,
//! 8 reserved bytes, the 20-byte info hash, the 20-byte peer id. The
//! outbound side writes first and then reads; the inbound side reads
//! first. Reserved bytes are written as zero and ignored on read.
use super::{PeerError, PeerResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const HANDSHAKE_LEN: usize = 68;
const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Handshake { info_hash, peer_id }
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL);
        // bytes 20..28 stay zero: no extensions advertised
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Parses and checks the fixed header. Hash and id checks are a
    /// separate step ([`Handshake::validate`]) so the caller can tell the
    /// failure modes apart.
    pub fn parse(buf: &[u8; HANDSHAKE_LEN]) -> PeerResult<Self> {
        if buf[0] != PROTOCOL.len() as u8 || &buf[1..20] != PROTOCOL {
            return Err(PeerError::InvalidProtocol);
        }
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);
        Ok(Handshake { info_hash, peer_id })
    }

    pub async fn read<R: AsyncRead + Unpin>(stream: &mut R) -> PeerResult<Self> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut buf).await?;
        Self::parse(&buf)
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, stream: &mut W) -> PeerResult<()> {
        stream.write_all(&self.to_bytes()).await?;
        Ok(())
    }

    /// The remote must be on our torrent, and, when the tracker told us
    /// who to expect, must be who it claimed to be.
    pub fn validate(
        &self,
        info_hash: &[u8; 20],
        expected_peer_id: Option<&[u8; 20]>,
    ) -> PeerResult<()> {
        if &self.info_hash != info_hash {
            return Err(PeerError::InfoHashMismatch);
        }
        if let Some(expected) = expected_peer_id {
            if &self.peer_id != expected {
                return Err(PeerError::PeerIdMismatch);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_68_bytes() {
        let hs = Handshake::new([0xaa; 20], [0xbb; 20]);
        let bytes = hs.to_bytes();
        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 0x13);
        assert_eq!(&bytes[1..20], b"BitTorrent protocol");
        assert_eq!(&bytes[20..28], &[0u8; 8]);
        assert_eq!(&bytes[28..48], &[0xaa; 20]);
        assert_eq!(&bytes[48..68], &[0xbb; 20]);
    }

    #[test]
    fn round_trips() {
        let hs = Handshake::new([1; 20], [2; 20]);
        assert_eq!(Handshake::parse(&hs.to_bytes()).unwrap(), hs);
    }

    #[test]
    fn rejects_bad_header() {
        let mut bytes = Handshake::new([1; 20], [2; 20]).to_bytes();
        bytes[0] = 0x12;
        assert!(matches!(
            Handshake::parse(&bytes),
            Err(PeerError::InvalidProtocol)
        ));

        let mut bytes = Handshake::new([1; 20], [2; 20]).to_bytes();
        bytes[5] = b'x';
        assert!(matches!(
            Handshake::parse(&bytes),
            Err(PeerError::InvalidProtocol)
        ));
    }

    #[tokio::test]
    async fn detects_info_hash_mismatch_over_a_stream() {
        // Remote sends a handshake whose hash differs in one byte.
        let (mut near, mut far) = tokio::io::duplex(256);
        let mut remote_hash = [0xaa; 20];
        remote_hash[7] ^= 0x01;
        Handshake::new(remote_hash, [0xbb; 20])
            .write(&mut far)
            .await
            .unwrap();

        let received = Handshake::read(&mut near).await.unwrap();
        assert!(matches!(
            received.validate(&[0xaa; 20], None),
            Err(PeerError::InfoHashMismatch)
        ));
    }

    #[tokio::test]
    async fn verifies_tracker_supplied_peer_id() {
        let (mut near, mut far) = tokio::io::duplex(256);
        Handshake::new([0xaa; 20], [0xbb; 20])
            .write(&mut far)
            .await
            .unwrap();

        let received = Handshake::read(&mut near).await.unwrap();
        assert!(received.validate(&[0xaa; 20], Some(&[0xbb; 20])).is_ok());
        assert!(matches!(
            received.validate(&[0xaa; 20], Some(&[0xbc; 20])),
            Err(PeerError::PeerIdMismatch)
        ));
    }
}
