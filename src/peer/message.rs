//! Peer wire messages.
//!
//! After the handshake every frame is a 4-byte big-endian length followed
//! by that many payload bytes; a zero length is a keep-alive. The first
//! payload byte is the message id. All multi-byte integers are big-endian.
use super::{PeerError, PeerResult};
use bytes::{BufMut, Bytes, BytesMut};
use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncRead, AsyncReadExt};

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;
const ID_PORT: u8 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Bytes),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Bytes },
    Cancel { index: u32, begin: u32, length: u32 },
    Port(u16),
}

impl Message {
    /// Encodes the full frame, length prefix included.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.frame_len());
        match self {
            Message::KeepAlive => buf.put_u32(0),
            Message::Choke => Self::put_header(&mut buf, ID_CHOKE, 0),
            Message::Unchoke => Self::put_header(&mut buf, ID_UNCHOKE, 0),
            Message::Interested => Self::put_header(&mut buf, ID_INTERESTED, 0),
            Message::NotInterested => Self::put_header(&mut buf, ID_NOT_INTERESTED, 0),
            Message::Have(index) => {
                Self::put_header(&mut buf, ID_HAVE, 4);
                buf.put_u32(*index);
            }
            Message::Bitfield(bits) => {
                Self::put_header(&mut buf, ID_BITFIELD, bits.len());
                buf.put_slice(bits);
            }
            Message::Request { index, begin, length } => {
                Self::put_header(&mut buf, ID_REQUEST, 12);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece { index, begin, block } => {
                Self::put_header(&mut buf, ID_PIECE, 8 + block.len());
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            Message::Cancel { index, begin, length } => {
                Self::put_header(&mut buf, ID_CANCEL, 12);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Port(port) => {
                Self::put_header(&mut buf, ID_PORT, 2);
                buf.put_u16(*port);
            }
        }
        buf.freeze()
    }

    fn put_header(buf: &mut BytesMut, id: u8, payload: usize) {
        buf.put_u32(1 + payload as u32);
        buf.put_u8(id);
    }

    fn frame_len(&self) -> usize {
        4 + match self {
            Message::KeepAlive => 0,
            Message::Have(_) => 5,
            Message::Bitfield(bits) => 1 + bits.len(),
            Message::Request { .. } | Message::Cancel { .. } => 13,
            Message::Piece { block, .. } => 9 + block.len(),
            Message::Port(_) => 3,
            _ => 1,
        }
    }

    /// Decodes one frame payload (the bytes after the length prefix).
    /// An empty payload is a keep-alive. Payload sizes are validated per
    /// message id; violations are fatal for the connection.
    pub fn decode(payload: &[u8]) -> PeerResult<Message> {
        let Some((&id, body)) = payload.split_first() else {
            return Ok(Message::KeepAlive);
        };
        let msg = match id {
            ID_CHOKE => sized("choke", body, 0, Message::Choke)?,
            ID_UNCHOKE => sized("unchoke", body, 0, Message::Unchoke)?,
            ID_INTERESTED => sized("interested", body, 0, Message::Interested)?,
            ID_NOT_INTERESTED => sized("not-interested", body, 0, Message::NotInterested)?,
            ID_HAVE => {
                if body.len() != 4 {
                    return Err(PeerError::InvalidMessageSize("have"));
                }
                Message::Have(BigEndian::read_u32(body))
            }
            ID_BITFIELD => {
                if body.is_empty() {
                    return Err(PeerError::InvalidMessageSize("bitfield"));
                }
                Message::Bitfield(Bytes::copy_from_slice(body))
            }
            ID_REQUEST => {
                if body.len() != 12 {
                    return Err(PeerError::InvalidMessageSize("request"));
                }
                Message::Request {
                    index: BigEndian::read_u32(&body[0..4]),
                    begin: BigEndian::read_u32(&body[4..8]),
                    length: BigEndian::read_u32(&body[8..12]),
                }
            }
            ID_PIECE => {
                // index + begin + at least one block byte
                if body.len() < 9 {
                    return Err(PeerError::InvalidMessageSize("piece"));
                }
                Message::Piece {
                    index: BigEndian::read_u32(&body[0..4]),
                    begin: BigEndian::read_u32(&body[4..8]),
                    block: Bytes::copy_from_slice(&body[8..]),
                }
            }
            ID_CANCEL => {
                if body.len() != 12 {
                    return Err(PeerError::InvalidMessageSize("cancel"));
                }
                Message::Cancel {
                    index: BigEndian::read_u32(&body[0..4]),
                    begin: BigEndian::read_u32(&body[4..8]),
                    length: BigEndian::read_u32(&body[8..12]),
                }
            }
            ID_PORT => {
                if body.len() != 2 {
                    return Err(PeerError::InvalidMessageSize("port"));
                }
                Message::Port(BigEndian::read_u16(body))
            }
            other => return Err(PeerError::UnknownMessage(other)),
        };
        Ok(msg)
    }

    /// Reads one frame off the stream. `max_payload` caps the announced
    /// length before any allocation; a peer claiming more is misbehaving.
    pub async fn read_from<R: AsyncRead + Unpin>(
        stream: &mut R,
        max_payload: u32,
    ) -> PeerResult<Message> {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await?;
        let length = u32::from_be_bytes(prefix);
        if length == 0 {
            return Ok(Message::KeepAlive);
        }
        if length > max_payload {
            return Err(PeerError::OversizedFrame(length));
        }
        let mut payload = vec![0u8; length as usize];
        stream.read_exact(&mut payload).await?;
        Message::decode(&payload)
    }
}

fn sized(name: &'static str, body: &[u8], want: usize, msg: Message) -> PeerResult<Message> {
    if body.len() != want {
        return Err(PeerError::InvalidMessageSize(name));
    }
    Ok(msg)
}
