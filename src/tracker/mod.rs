//! Tracker client logic for the BitTorrent protocol.
//!
//! This module implements communication with BitTorrent trackers, including:
//! - Announce requests and responses
//! - Compact peer list parsing
//! - Peer ID generation and URL encoding helpers
//!
//! Used by the client to discover peers for a torrent.
use crate::torrent::file::TorrentFile;
use rand::Rng;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid tracker announce URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("announce request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("failed to decode tracker response: {0}")]
    Decode(#[from] serde_bencode::Error),

    #[error("tracker returned a failure reason: {0}")]
    Failure(String),

    #[error("unsupported tracker response layout: {0}")]
    UnsupportedLayout(String),
}

pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// A client communicating with a BitTorrent tracker over HTTP.
#[derive(Debug)]
pub struct Client {
    peer_id: [u8; 20],
    port: u16,
}

/// Parameters for a tracker announce request.
#[derive(Debug)]
pub struct AnnounceRequest {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: i64,
    pub downloaded: i64,
    pub compact: bool,
    pub left: i64,
}

/// A peer received from the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub ip: IpAddr,
    pub port: u16,
}

/// The parsed response from a tracker announce.
#[derive(Debug)]
pub struct AnnounceResponse {
    pub interval: i64,
    pub peers: Vec<Peer>,
}

#[derive(Debug, Deserialize)]
struct TrackerResponse {
    #[serde(default)]
    #[serde(rename = "failure reason")]
    failure_reason: Option<String>,
    #[serde(default)]
    interval: i64,
    #[serde(default)]
    peers: Peers,
}

/// The tracker's peer list, either compact (a flat byte string of 6-byte
/// peer entries) or dictionary form (a list of `{ip, port}` dicts).
///
/// Only the compact form is supported for connecting to peers; a
/// dictionary-form response is rejected with
/// `TrackerError::UnsupportedLayout`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Peers {
    Compact(Vec<u8>),
    Dictionary(Vec<PeerDict>),
}

impl Default for Peers {
    fn default() -> Self {
        Peers::Compact(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct PeerDict {
    ip: String,
    port: u16,
}

impl Client {
    pub fn new(port: u16) -> TrackerResult<Self> {
        Ok(Self {
            peer_id: generate_peer_id(),
            port,
        })
    }

    /// This client's 20-byte peer ID, advertised to trackers and peers.
    pub fn peer_id(&self) -> [u8; 20] {
        self.peer_id
    }

    /// Sends an announce request to the tracker to get a list of peers.
    ///
    /// `first` marks the initial announce of a session (`event=started`);
    /// `uploaded` is always zero, since this client never seeds (see
    /// SPEC_FULL.md's open question on upload accounting).
    #[tracing::instrument(skip(self, torrent), level = "debug")]
    pub async fn announce(
        &self,
        torrent: &TorrentFile,
        first: bool,
        uploaded: i64,
        downloaded: i64,
    ) -> TrackerResult<AnnounceResponse> {
        let request = AnnounceRequest {
            info_hash: torrent.info_hash,
            peer_id: self.peer_id,
            port: self.port,
            uploaded,
            downloaded,
            compact: true,
            left: (torrent.total_length() - downloaded).max(0),
        };

        let mut url = url::Url::parse(&torrent.announce)?;
        let mut params = vec![
            ("info_hash", url_encode(&request.info_hash)),
            ("peer_id", url_encode(&request.peer_id)),
            ("port", request.port.to_string()),
            ("uploaded", request.uploaded.to_string()),
            ("downloaded", request.downloaded.to_string()),
            ("left", request.left.to_string()),
            ("compact", (request.compact as i32).to_string()),
        ];
        if first {
            params.push(("event", "started".to_string()));
        }
        url.query_pairs_mut().extend_pairs(&params).finish();
        tracing::debug!(%url, info_hash = %hex::encode(request.info_hash), "making announce request to tracker");
        let response = reqwest::get(url).await?;
        if !response.status().is_success() {
            return Err(TrackerError::Failure(format!(
                "http status {}",
                response.status()
            )));
        }
        let response_bytes = response.bytes().await?;
        Self::parse_announce_response(&response_bytes)
    }

    /// Parses the bencoded body of a tracker announce response.
    ///
    /// The BitTorrent tracker protocol represents a peer list either as a
    /// compact byte string (4 bytes IPv4 + 2 bytes port per peer) or as a
    /// list of `{ip, port}` dictionaries. Only the compact form is
    /// accepted.
    fn parse_announce_response(bytes: &[u8]) -> TrackerResult<AnnounceResponse> {
        let tracker_response: TrackerResponse = serde_bencode::from_bytes(bytes)?;

        if let Some(reason) = tracker_response.failure_reason {
            return Err(TrackerError::Failure(reason));
        }

        let peers = match tracker_response.peers {
            Peers::Compact(bytes) => bytes
                .chunks_exact(6)
                .map(|chunk| {
                    let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                    let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                    Peer {
                        ip: IpAddr::V4(ip),
                        port,
                    }
                })
                .collect(),
            Peers::Dictionary(_) => {
                return Err(TrackerError::UnsupportedLayout(
                    "dictionary-form peer lists are not supported".to_string(),
                ));
            }
        };

        Ok(AnnounceResponse {
            interval: tracker_response.interval,
            peers,
        })
    }
}

/// Generates a peer ID for this client.
///
/// The peer ID is 20 bytes: an 8-byte prefix identifying the client
/// ("-PC0001-") followed by 12 ASCII decimal digits chosen at random.
fn generate_peer_id() -> [u8; 20] {
    let mut peer_id = [0u8; 20];
    let prefix = crate::consts::PEER_ID_PREFIX;
    peer_id[..prefix.len()].copy_from_slice(prefix);

    let mut rng = rand::rng();
    for slot in &mut peer_id[prefix.len()..] {
        *slot = b'0' + rng.random_range(0..10);
    }
    peer_id
}

/// URL-encodes a byte slice according to RFC 3986.
///
/// Unreserved characters (a-z, A-Z, 0-9, -, ., _, ~) are left as-is;
/// everything else is percent-encoded.
fn url_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 3);
    for &byte in bytes {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(byte as char);
            }
            _ => {
                encoded.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_peer_id_with_prefix_and_digit_suffix() {
        let peer_id = generate_peer_id();
        assert_eq!(&peer_id[..8], b"-PC0001-");
        assert!(peer_id[8..].iter().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn url_encodes_reserved_bytes() {
        assert_eq!(url_encode(b"Hello World!"), "Hello%20World%21");
        assert_eq!(url_encode(b"abc-._~"), "abc-._~");
    }

    #[test]
    fn parses_compact_peer_list() {
        let body = b"d8:intervali1800e5:peers6:\x7f\x00\x00\x01\x1a\xe1e";
        let response = Client::parse_announce_response(body).unwrap();
        assert_eq!(response.interval, 1800);
        assert_eq!(response.peers.len(), 1);
        assert_eq!(response.peers[0].port, 0x1ae1);
    }

    #[test]
    fn rejects_dictionary_peer_list() {
        let body = b"d8:intervali1800e5:peersld2:ip9:127.0.0.14:porti6881eeee";
        assert!(matches!(
            Client::parse_announce_response(body),
            Err(TrackerError::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn surfaces_tracker_failure_reason() {
        let body = b"d14:failure reason23:info_hash not recognizede";
        assert!(matches!(
            Client::parse_announce_response(body),
            Err(TrackerError::Failure(_))
        ));
    }
}
