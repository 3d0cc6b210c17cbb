//! Peer wire protocol: handshake and message framing.
//!
//! A peer connection starts with a [`handshake::Handshake`] exchange,
//! then switches to length-prefixed [`message::Message`] frames for the
//! rest of the session.
use thiserror::Error;

pub mod connection;
pub mod handshake;
pub mod message;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),

    #[error("peer's info hash does not match ours")]
    InfoHashMismatch,

    #[error("invalid peer message: {0}")]
    InvalidMessage(String),

    #[error("message exceeds maximum frame length: {0} bytes")]
    FrameTooLarge(u32),

    #[error("fatal error, shutting down: {0}")]
    Fatal(String),
}

pub type PeerResult<T> = std::result::Result<T, PeerError>;
