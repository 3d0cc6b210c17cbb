//! Protocol constants shared across the downloader.
//!
//! Centralized here instead of inline so the peer wire protocol, the
//! piece manager, and the client coordinator all agree on one set of
//! numbers.

/// Maximum size, in bytes, of a single block request/response.
pub const BLOCK_SIZE: u32 = 16_384;

/// Number of peer-connection workers the client coordinator keeps running.
pub const MAX_CONNECTIONS: usize = 30;

/// How long a block request may stay pending before it is eligible for
/// re-issue to another peer, in milliseconds.
pub const MAX_PENDING_MS: u64 = 600_000;

/// Default local port advertised to the tracker.
pub const DEFAULT_PORT: u16 = 6889;

/// Peer-id prefix identifying this client implementation.
pub const PEER_ID_PREFIX: &[u8] = b"-PC0001-";
