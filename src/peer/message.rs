//! The peer wire protocol message types and their length-prefixed framing.
//!
//! Every message after the handshake is framed as a 4-byte big-endian
//! length prefix followed by that many bytes of payload. A length of
//! zero is a keep-alive with no further payload.
use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{PeerError, PeerResult};
use crate::consts::BLOCK_SIZE;

/// Largest payload we're willing to buffer for a single frame. Guards
/// against a misbehaving peer claiming an enormous length prefix.
const MAX_FRAME_LEN: u32 = BLOCK_SIZE + 17;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub index: u32,
    pub begin: u32,
    pub data: Vec<u8>,
}

/// A single peer wire protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request(Request),
    Piece(Block),
    Cancel(Request),
    /// A message id this client doesn't implement. Carried through so the
    /// caller can log and ignore it instead of treating it as a protocol
    /// violation, per the wire protocol's unknown-id handling.
    Unknown(u8),
}

impl Message {
    fn id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(0),
            Message::Unchoke => Some(1),
            Message::Interested => Some(2),
            Message::NotInterested => Some(3),
            Message::Have(_) => Some(4),
            Message::Bitfield(_) => Some(5),
            Message::Request(_) => Some(6),
            Message::Piece(_) => Some(7),
            Message::Cancel(_) => Some(8),
            Message::Unknown(id) => Some(*id),
        }
    }

    /// Serializes this message into its length-prefixed wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        if let Some(id) = self.id() {
            payload.push(id);
        }

        match self {
            Message::KeepAlive | Message::Choke | Message::Unchoke | Message::Interested
            | Message::NotInterested => {}
            Message::Have(index) => payload.extend_from_slice(&index.to_be_bytes()),
            Message::Bitfield(bits) => payload.extend_from_slice(bits),
            Message::Request(r) | Message::Cancel(r) => {
                payload.extend_from_slice(&r.index.to_be_bytes());
                payload.extend_from_slice(&r.begin.to_be_bytes());
                payload.extend_from_slice(&r.length.to_be_bytes());
            }
            Message::Piece(b) => {
                payload.extend_from_slice(&b.index.to_be_bytes());
                payload.extend_from_slice(&b.begin.to_be_bytes());
                payload.extend_from_slice(&b.data);
            }
            Message::Unknown(_) => {}
        }

        let mut framed = Vec::with_capacity(4 + payload.len());
        framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        framed.extend_from_slice(&payload);
        framed
    }

    /// Parses a message from its payload (without the length prefix).
    /// An empty slice decodes as a keep-alive.
    fn decode(payload: &[u8]) -> PeerResult<Self> {
        let Some((&id, body)) = payload.split_first() else {
            return Ok(Message::KeepAlive);
        };

        match id {
            0 => Ok(Message::Choke),
            1 => Ok(Message::Unchoke),
            2 => Ok(Message::Interested),
            3 => Ok(Message::NotInterested),
            4 => {
                if body.len() != 4 {
                    return Err(PeerError::InvalidMessage("have: wrong payload length".into()));
                }
                Ok(Message::Have(BigEndian::read_u32(body)))
            }
            5 => Ok(Message::Bitfield(body.to_vec())),
            6 | 8 => {
                if body.len() != 12 {
                    return Err(PeerError::InvalidMessage(
                        "request/cancel: wrong payload length".into(),
                    ));
                }
                let request = Request {
                    index: BigEndian::read_u32(&body[0..4]),
                    begin: BigEndian::read_u32(&body[4..8]),
                    length: BigEndian::read_u32(&body[8..12]),
                };
                if id == 6 {
                    Ok(Message::Request(request))
                } else {
                    Ok(Message::Cancel(request))
                }
            }
            7 => {
                if body.len() < 8 {
                    return Err(PeerError::InvalidMessage("piece: payload too short".into()));
                }
                Ok(Message::Piece(Block {
                    index: BigEndian::read_u32(&body[0..4]),
                    begin: BigEndian::read_u32(&body[4..8]),
                    data: body[8..].to_vec(),
                }))
            }
            other => Ok(Message::Unknown(other)),
        }
    }

    /// Reads a single framed message from an async stream.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> PeerResult<Self> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = BigEndian::read_u32(&len_buf);

        if len == 0 {
            return Ok(Message::KeepAlive);
        }
        if len > MAX_FRAME_LEN {
            return Err(PeerError::FrameTooLarge(len));
        }

        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload).await?;
        Message::decode(&payload)
    }

    /// Writes this message, framed, to an async stream.
    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> PeerResult<()> {
        writer.write_all(&self.encode()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_each_message_kind() {
        let messages = vec![
            Message::Choke,
            Message::Unchoke,
            Message::Interested,
            Message::NotInterested,
            Message::Have(7),
            Message::Bitfield(vec![0b1010_0000]),
            Message::Request(Request {
                index: 1,
                begin: 0,
                length: 16384,
            }),
            Message::Piece(Block {
                index: 1,
                begin: 0,
                data: vec![1, 2, 3, 4],
            }),
            Message::Cancel(Request {
                index: 1,
                begin: 0,
                length: 16384,
            }),
        ];

        for message in messages {
            let mut buf = std::io::Cursor::new(message.encode());
            let decoded = Message::read(&mut buf).await.unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[tokio::test]
    async fn keep_alive_is_zero_length_frame() {
        let mut buf = std::io::Cursor::new(Message::KeepAlive.encode());
        assert_eq!(Message::KeepAlive.encode(), vec![0, 0, 0, 0]);
        assert_eq!(Message::read(&mut buf).await.unwrap(), Message::KeepAlive);
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let mut len_buf = Vec::new();
        len_buf.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        let mut buf = std::io::Cursor::new(len_buf);
        assert!(matches!(
            Message::read(&mut buf).await,
            Err(PeerError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn tolerates_unknown_message_id() {
        assert_eq!(Message::decode(&[200]).unwrap(), Message::Unknown(200));
    }
}
