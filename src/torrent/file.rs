//! Torrent file structure and parsing logic.
//!
//! This module defines the TorrentFile struct and related helpers for
//! parsing, validating, and working with .torrent file metadata. Only
//! single-file layouts are supported: a root info dict carrying a
//! `files` list is rejected rather than assembled into a multi-file
//! download.
use crate::bencode::BencodeValue;
use crate::torrent::info_hash;

use super::{TorrentError, TorrentResult};
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

#[derive(Debug, PartialEq, Clone)]
pub struct TorrentFile {
    pub announce: String,
    pub announce_list: Vec<Vec<String>>,
    pub creation_date: Option<SystemTime>,
    pub comment: String,
    pub created_by: String,
    pub encoding: String,
    pub info: InfoDict,
    pub info_hash: [u8; 20],
    pub pieces_hash: Vec<[u8; 20]>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct InfoDict {
    pub piece_length: i64,
    pub pieces: Vec<u8>,
    pub private: bool,
    pub name: String,
    pub length: i64,
}

/**
Parses the concatenated SHA-1 hashes from the `pieces` string.

# Torrent Protocol Context:
The `pieces` key within the `info` dictionary is a single string (byte sequence)
that is a concatenation of 20-byte SHA-1 hashes for each piece of the torrent.
This function breaks that long string into individual 20-byte hash arrays.
The order of these hashes is crucial as it corresponds directly to the piece index.
*/
#[tracing::instrument(level = "trace")]
fn parse_pieces(pieces_bytes: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    let num_pieces = pieces_bytes.len() / 20;
    let mut hashes = Vec::with_capacity(num_pieces);
    for i in 0..num_pieces {
        let start = i * 20;
        let end = start + 20;

        let mut hash_array = [0u8; 20];
        hash_array.copy_from_slice(&pieces_bytes[start..end]);
        hashes.push(hash_array);
    }
    Ok(hashes)
}

/// Parses the announce-list tiers, a fallback list of alternate tracker URLs.
fn parse_announce_list(value: &BencodeValue) -> TorrentResult<Vec<Vec<String>>> {
    let tiers = value
        .as_list()
        .ok_or_else(|| TorrentError::InvalidFormat("announce-list not a list".to_string()))?;

    let mut result = Vec::with_capacity(tiers.len());
    for tier in tiers {
        let trackers = tier
            .as_list()
            .ok_or_else(|| TorrentError::InvalidFormat("announce tier not a list".to_string()))?;

        let mut tier_vec = Vec::with_capacity(trackers.len());
        for tracker in trackers {
            let s = tracker
                .as_str_bytes()
                .ok_or_else(|| TorrentError::InvalidFormat("tracker URL not a string".to_string()))?;
            tier_vec.push(String::from_utf8(s.to_vec()).map_err(|e| {
                TorrentError::InvalidFormat(format!("invalid tracker URL (not UTF-8): {}", e))
            })?);
        }
        result.push(tier_vec);
    }
    Ok(result)
}

/**
Parses the info dictionary from the torrent file.

A `files` key in the dict marks a multi-file layout, which is rejected
with `TorrentError::UnsupportedLayout` rather than parsed.
*/
fn parse_info_dict(value: &BencodeValue) -> TorrentResult<InfoDict> {
    if value.get(b"files").is_some() {
        return Err(TorrentError::UnsupportedLayout(
            "multi-file torrents are not supported".to_string(),
        ));
    }

    let piece_length = value
        .get(b"piece length")
        .and_then(BencodeValue::as_integer)
        .ok_or_else(|| TorrentError::MissingField("piece length".to_string()))?;

    let pieces_bytes = value
        .get(b"pieces")
        .and_then(BencodeValue::as_str_bytes)
        .ok_or_else(|| TorrentError::MissingField("pieces".to_string()))?
        .to_vec();

    let private = matches!(value.get(b"private").and_then(BencodeValue::as_integer), Some(1));

    let name = value
        .get(b"name")
        .and_then(BencodeValue::as_str_bytes)
        .ok_or_else(|| TorrentError::MissingField("name".to_string()))
        .and_then(|s| {
            String::from_utf8(s.to_vec())
                .map_err(|e| TorrentError::InvalidFormat(format!("invalid name (not UTF-8): {}", e)))
        })?;

    let length = value
        .get(b"length")
        .and_then(BencodeValue::as_integer)
        .ok_or_else(|| TorrentError::MissingField("length".to_string()))?;

    Ok(InfoDict {
        piece_length,
        pieces: pieces_bytes,
        private,
        name,
        length,
    })
}

impl TorrentFile {
    /// Returns the total length, in bytes, of the downloaded file.
    pub fn total_length(&self) -> i64 {
        self.info.length
    }

    /// Returns the total number of pieces in the torrent.
    pub fn num_pieces(&self) -> usize {
        self.pieces_hash.len()
    }

    /**
    Returns the size of a specific piece in the torrent.

    All pieces are `piece_length` bytes except the last, which is
    whatever remains of `total_length()`.
    */
    pub fn piece_size(&self, index: usize) -> i64 {
        if index >= self.num_pieces() {
            return 0;
        }
        if index < self.num_pieces() - 1 {
            self.info.piece_length
        } else {
            let total_length = self.total_length();
            let full_pieces_length = (self.num_pieces() - 1) as i64 * self.info.piece_length;
            let last_piece_size = total_length - full_pieces_length;

            if last_piece_size == 0 && self.num_pieces() > 0 {
                self.info.piece_length
            } else {
                last_piece_size
            }
        }
    }

    /// Returns the single destination file path for this download.
    pub fn file_path(&self) -> PathBuf {
        PathBuf::from(&self.info.name)
    }

    /**
    Parses the torrent file data into a `TorrentFile` struct.

    Extracts `announce`, `info`, and the optional `announce-list`,
    `creation date`, `comment`, `created by`, and `encoding` fields,
    then derives `info_hash` and `pieces_hash` from the parsed info
    dict.
    */
    #[tracing::instrument(level = "debug")]
    pub fn parse(data: BencodeValue) -> TorrentResult<TorrentFile> {
        if data.as_dict().is_none() {
            return Err(TorrentError::InvalidFormat("root is not a dictionary".to_string()));
        }

        let announce = data
            .get(b"announce")
            .and_then(BencodeValue::as_str_bytes)
            .ok_or_else(|| TorrentError::MissingField("announce".to_string()))
            .and_then(|s| {
                String::from_utf8(s.to_vec()).map_err(|e| {
                    TorrentError::InvalidFormat(format!("invalid announce URL (not UTF-8): {}", e))
                })
            })?;

        let info_value = data
            .get(b"info")
            .ok_or_else(|| TorrentError::MissingField("info".to_string()))?;

        let info = parse_info_dict(info_value)?;

        let announce_list = match data.get(b"announce-list") {
            Some(v) => parse_announce_list(v)?,
            None => Vec::new(),
        };

        let creation_date = match data.get(b"creation date").and_then(BencodeValue::as_integer) {
            Some(timestamp) => {
                let secs: u64 = timestamp.try_into().map_err(|_| {
                    TorrentError::InvalidFormat("creation date out of range".to_string())
                })?;
                Some(UNIX_EPOCH + std::time::Duration::from_secs(secs))
            }
            None => None,
        };

        let comment = data
            .get(b"comment")
            .and_then(BencodeValue::as_str_bytes)
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .unwrap_or_default();
        let created_by = data
            .get(b"created by")
            .and_then(BencodeValue::as_str_bytes)
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .unwrap_or_default();
        let encoding = data
            .get(b"encoding")
            .and_then(BencodeValue::as_str_bytes)
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .unwrap_or_default();

        let info_hash = info_hash::calculate_info_hash(info_value)?;
        let pieces_hash = parse_pieces(&info.pieces)?;

        Ok(TorrentFile {
            announce,
            announce_list,
            creation_date,
            comment,
            created_by,
            encoding,
            info,
            info_hash,
            pieces_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode;

    fn single_file_torrent() -> BencodeValue {
        BencodeValue::Dict(vec![
            (
                b"announce".to_vec(),
                BencodeValue::String(b"http://tracker.example/announce".to_vec()),
            ),
            (
                b"info".to_vec(),
                BencodeValue::Dict(vec![
                    (b"piece length".to_vec(), BencodeValue::Integer(16384)),
                    (b"pieces".to_vec(), BencodeValue::String(vec![0u8; 20])),
                    (b"name".to_vec(), BencodeValue::String(b"file.bin".to_vec())),
                    (b"length".to_vec(), BencodeValue::Integer(16384)),
                ]),
            ),
        ])
    }

    #[test]
    fn parses_single_file_torrent() {
        let torrent = TorrentFile::parse(single_file_torrent()).unwrap();
        assert_eq!(torrent.announce, "http://tracker.example/announce");
        assert_eq!(torrent.info.name, "file.bin");
        assert_eq!(torrent.total_length(), 16384);
        assert_eq!(torrent.num_pieces(), 1);
        assert_eq!(torrent.file_path(), PathBuf::from("file.bin"));
    }

    #[test]
    fn rejects_multi_file_layout() {
        let mut data = single_file_torrent();
        if let BencodeValue::Dict(entries) = &mut data {
            let (_, info) = entries.iter_mut().find(|(k, _)| k == b"info").unwrap();
            if let BencodeValue::Dict(info_entries) = info {
                info_entries.push((b"files".to_vec(), BencodeValue::List(vec![])));
            }
        }
        assert!(matches!(
            TorrentFile::parse(data),
            Err(TorrentError::UnsupportedLayout(_))
        ));
    }

    #[test]
    fn rejects_pieces_not_multiple_of_twenty() {
        let mut data = single_file_torrent();
        if let BencodeValue::Dict(entries) = &mut data {
            let (_, info) = entries.iter_mut().find(|(k, _)| k == b"info").unwrap();
            if let BencodeValue::Dict(info_entries) = info {
                let (_, pieces) = info_entries.iter_mut().find(|(k, _)| k == b"pieces").unwrap();
                *pieces = BencodeValue::String(vec![0u8; 19]);
            }
        }
        assert!(matches!(
            TorrentFile::parse(data),
            Err(TorrentError::InvalidPiecesHashLength)
        ));
    }

    #[test]
    fn last_piece_size_accounts_for_remainder() {
        let data = BencodeValue::Dict(vec![
            (
                b"announce".to_vec(),
                BencodeValue::String(b"http://tracker.example/announce".to_vec()),
            ),
            (
                b"info".to_vec(),
                BencodeValue::Dict(vec![
                    (b"piece length".to_vec(), BencodeValue::Integer(10)),
                    (b"pieces".to_vec(), BencodeValue::String(vec![0u8; 40])),
                    (b"name".to_vec(), BencodeValue::String(b"file.bin".to_vec())),
                    (b"length".to_vec(), BencodeValue::Integer(25)),
                ]),
            ),
        ]);
        let torrent = TorrentFile::parse(data).unwrap();
        assert_eq!(torrent.num_pieces(), 2);
        assert_eq!(torrent.piece_size(0), 10);
        assert_eq!(torrent.piece_size(1), 15);
    }

    #[test]
    fn info_hash_matches_standalone_calculation() {
        let data = single_file_torrent();
        let torrent = TorrentFile::parse(data.clone()).unwrap();
        let info_value = data.get(b"info").unwrap();
        let encoded = bencode::encode(info_value).unwrap();
        let expected = {
            use sha1::{Digest, Sha1};
            let mut hasher = Sha1::new();
            hasher.update(&encoded);
            let digest = hasher.finalize();
            let mut out = [0u8; 20];
            out.copy_from_slice(&digest);
            out
        };
        assert_eq!(torrent.info_hash, expected);
    }
}
