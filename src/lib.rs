//! Library root for rs-torrent-client.
//!
//! Re-exports core modules for use in the `rstc` binary and other libraries.
pub mod bencode;
pub mod client;
pub mod consts;
pub mod peer;
pub mod piece;
pub mod torrent;
pub mod tracker;
