//! The BitTorrent peer handshake protocol.
//!
//! The handshake is the first message exchanged between two peers. It verifies
//! that both peers are participating in the same torrent (via info_hash) and
//! establishes basic protocol compatibility.
use super::PeerError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::instrument;

const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";

/** Represents a BitTorrent handshake message as defined in the BitTorrent protocol.

A handshake is the first message exchanged between peers and contains:
- Protocol identifier ("BitTorrent protocol")
- Reserved bytes for protocol extensions
- Info hash identifying the torrent
- Peer ID identifying the client */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_len: u8,
    pub protocol: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    /** Creates a new handshake with the specified info hash and peer ID. */
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self {
            protocol_len: 19,
            protocol: *PROTOCOL,
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }

    /** Serializes the handshake into a 68-byte array as per the BitTorrent protocol.

    The serialized format is:
    - 1 byte: protocol string length (19)
    - 19 bytes: protocol string ("BitTorrent protocol")
    - 8 bytes: reserved bytes (all zeros)
    - 20 bytes: info hash
    - 20 bytes: peer ID */
    #[instrument(level = "trace")]
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = self.protocol_len;
        buf[1..20].copy_from_slice(&self.protocol);
        buf[20..28].copy_from_slice(&self.reserved);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Reads and validates a handshake from a raw 68-byte buffer.
    fn parse(buf: &[u8; 68]) -> Result<Self, PeerError> {
        let protocol_len = buf[0];
        if protocol_len != 19 {
            return Err(PeerError::InvalidHandshake(format!(
                "invalid protocol length: {}",
                protocol_len
            )));
        }

        let mut protocol = [0u8; 19];
        protocol.copy_from_slice(&buf[1..20]);
        if &protocol != PROTOCOL {
            return Err(PeerError::InvalidHandshake(format!(
                "unexpected protocol string: {:?}",
                protocol
            )));
        }

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&buf[20..28]);

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[48..68]);

        Ok(Self {
            protocol_len,
            protocol,
            reserved,
            info_hash,
            peer_id,
        })
    }

    /// Reads a handshake from a connected TCP stream.
    #[instrument(level = "trace", skip(stream))]
    pub async fn read(stream: &mut TcpStream) -> Result<Self, PeerError> {
        let mut buf = [0u8; 68];
        stream.read_exact(&mut buf).await?;
        Self::parse(&buf)
    }

    /// Validates that this handshake's info hash matches the expected value.
    pub fn validate(&self, expected_info_hash: [u8; 20]) -> Result<(), PeerError> {
        if self.info_hash != expected_info_hash {
            return Err(PeerError::InfoHashMismatch);
        }
        Ok(())
    }

    /// Performs a complete handshake with a peer over a TCP connection:
    /// connects, sends our handshake, reads the peer's, and validates its
    /// info hash against ours before returning it.
    #[instrument(level = "debug", skip(peer_id))]
    pub async fn do_handshake(
        peer_addr: &std::net::SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Result<(TcpStream, Handshake), PeerError> {
        let mut stream = TcpStream::connect(peer_addr).await?;

        let our_handshake = Handshake::new(info_hash, peer_id);
        stream.write_all(&our_handshake.serialize()).await?;

        let their_handshake = Handshake::read(&mut stream).await?;
        their_handshake.validate(info_hash)?;

        Ok((stream, their_handshake))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_and_parses_round_trip() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);
        let buf = handshake.serialize();
        assert_eq!(Handshake::parse(&buf).unwrap(), handshake);
    }

    #[test]
    fn rejects_wrong_protocol_length() {
        let mut buf = Handshake::new([1u8; 20], [2u8; 20]).serialize();
        buf[0] = 18;
        assert!(matches!(
            Handshake::parse(&buf),
            Err(PeerError::InvalidHandshake(_))
        ));
    }

    #[test]
    fn rejects_wrong_protocol_string() {
        let mut buf = Handshake::new([1u8; 20], [2u8; 20]).serialize();
        buf[1] = b'X';
        assert!(matches!(
            Handshake::parse(&buf),
            Err(PeerError::InvalidHandshake(_))
        ));
    }

    #[test]
    fn validate_rejects_mismatched_info_hash() {
        let handshake = Handshake::new([1u8; 20], [2u8; 20]);
        assert!(matches!(
            handshake.validate([9u8; 20]),
            Err(PeerError::InfoHashMismatch)
        ));
    }
}
