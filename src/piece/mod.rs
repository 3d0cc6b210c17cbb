//! Piece and block bookkeeping: splitting a torrent into blocks, tracking
//! which ones are missing/pending/retrieved, picking what to request next
//! (rarest piece first, with stalled-request re-issue), verifying
//! completed pieces against their SHA-1 hash, and writing verified pieces
//! to the destination file.
use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use sha1::{Digest, Sha1};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::consts::{BLOCK_SIZE, MAX_PENDING_MS};
use crate::peer::message::Request;
use crate::torrent::file::TorrentFile;

#[derive(Debug, Error)]
pub enum PieceError {
    #[error("I/O error writing piece to disk: {0}")]
    Io(#[from] std::io::Error),
}

pub type PieceResult<T> = std::result::Result<T, PieceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockStatus {
    Missing,
    Pending,
    Retrieved,
}

#[derive(Debug, Clone)]
struct Block {
    offset: u32,
    length: u32,
    status: BlockStatus,
    data: Vec<u8>,
}

#[derive(Debug)]
struct Piece {
    index: usize,
    blocks: Vec<Block>,
    hash: [u8; 20],
}

impl Piece {
    fn new(index: usize, length: i64, hash: [u8; 20]) -> Self {
        let mut blocks = Vec::new();
        let mut offset = 0u32;
        let length = length as u32;
        while offset < length {
            let block_length = std::cmp::min(BLOCK_SIZE, length - offset);
            blocks.push(Block {
                offset,
                length: block_length,
                status: BlockStatus::Missing,
                data: Vec::new(),
            });
            offset += block_length;
        }
        Self { index, blocks, hash }
    }

    fn reset(&mut self) {
        for block in &mut self.blocks {
            block.status = BlockStatus::Missing;
            block.data.clear();
        }
    }

    /// Marks the first missing block pending and returns a request for it.
    fn next_request(&mut self) -> Option<Request> {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.status == BlockStatus::Missing)?;
        block.status = BlockStatus::Pending;
        Some(Request {
            index: self.index as u32,
            begin: block.offset,
            length: block.length,
        })
    }

    fn block_received(&mut self, offset: u32, data: Vec<u8>) {
        match self.blocks.iter_mut().find(|b| b.offset == offset) {
            Some(block) => {
                block.status = BlockStatus::Retrieved;
                block.data = data;
            }
            None => warn!(offset, piece = self.index, "received unknown block offset"),
        }
    }

    fn is_complete(&self) -> bool {
        self.blocks.iter().all(|b| b.status == BlockStatus::Retrieved)
    }

    fn data(&self) -> Vec<u8> {
        let mut blocks: Vec<&Block> = self.blocks.iter().collect();
        blocks.sort_by_key(|b| b.offset);
        blocks.into_iter().flat_map(|b| b.data.clone()).collect()
    }

    fn hash_matches(&self) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(self.data());
        hasher.finalize().as_slice() == self.hash
    }
}

struct PendingRequest {
    piece: usize,
    offset: u32,
    added: Instant,
}

/// Coordinates piece/block selection and completion across all connected
/// peers for a single download.
pub struct PieceManager {
    piece_length: i64,
    file: File,
    peers: HashMap<SocketAddr, Vec<bool>>,
    pending_blocks: Vec<PendingRequest>,
    missing_pieces: Vec<Piece>,
    ongoing_pieces: Vec<Piece>,
    have_pieces: usize,
    total_pieces: usize,
    max_pending: Duration,
}

impl PieceManager {
    /// Builds a manager for `torrent`, splitting each piece into blocks and
    /// opening (creating if necessary) `output_path` for random-access writes.
    pub fn new(torrent: &TorrentFile, output_path: &std::path::Path) -> PieceResult<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(output_path)?;
        file.set_len(torrent.total_length() as u64)?;

        let total_pieces = torrent.num_pieces();
        let missing_pieces = (0..total_pieces)
            .map(|index| Piece::new(index, torrent.piece_size(index), torrent.pieces_hash[index]))
            .collect();

        Ok(Self {
            piece_length: torrent.info.piece_length,
            file,
            peers: HashMap::new(),
            pending_blocks: Vec::new(),
            missing_pieces,
            ongoing_pieces: Vec::new(),
            have_pieces: 0,
            total_pieces,
            max_pending: Duration::from_millis(MAX_PENDING_MS),
        })
    }

    pub fn add_peer(&mut self, addr: SocketAddr, bitfield: Vec<bool>) {
        self.peers.insert(addr, bitfield);
    }

    pub fn update_peer(&mut self, addr: SocketAddr, piece_index: usize) {
        if let Some(bitfield) = self.peers.get_mut(&addr) {
            if piece_index < bitfield.len() {
                bitfield[piece_index] = true;
            }
        }
    }

    pub fn remove_peer(&mut self, addr: &SocketAddr) {
        self.peers.remove(addr);
    }

    pub fn complete(&self) -> bool {
        self.have_pieces == self.total_pieces
    }

    pub fn bytes_downloaded(&self) -> i64 {
        self.have_pieces as i64 * self.piece_length
    }

    /// Picks the next block to request from `addr`: first an expired
    /// in-flight request (re-issued), then a continuation of a piece
    /// already in progress, then the rarest piece this peer has that
    /// nobody has started yet.
    #[instrument(skip(self), level = "trace")]
    pub fn next_request(&mut self, addr: SocketAddr) -> Option<Request> {
        if !self.peers.contains_key(&addr) {
            return None;
        }

        if let Some(request) = self.expired_request(addr) {
            return Some(request);
        }
        if let Some(request) = self.next_ongoing(addr) {
            return Some(request);
        }
        self.next_from_rarest(addr)
    }

    fn peer_has(&self, addr: SocketAddr, piece_index: usize) -> bool {
        self.peers
            .get(&addr)
            .and_then(|bitfield| bitfield.get(piece_index))
            .copied()
            .unwrap_or(false)
    }

    fn expired_request(&mut self, addr: SocketAddr) -> Option<Request> {
        let now = Instant::now();
        let max_pending = self.max_pending;
        let peers = &self.peers;

        let position = self.pending_blocks.iter().position(|r| {
            peers
                .get(&addr)
                .is_some_and(|b| b.get(r.piece).copied().unwrap_or(false))
                && now.duration_since(r.added) > max_pending
        })?;

        let piece = self.pending_blocks[position].piece;
        let offset = self.pending_blocks[position].offset;
        let length = self
            .ongoing_pieces
            .iter()
            .find(|p| p.index == piece)?
            .blocks
            .iter()
            .find(|b| b.offset == offset)?
            .length;

        self.pending_blocks[position].added = now;
        debug!(piece, offset, "re-requesting stalled block");

        Some(Request {
            index: piece as u32,
            begin: offset,
            length,
        })
    }

    fn next_ongoing(&mut self, addr: SocketAddr) -> Option<Request> {
        for piece in &mut self.ongoing_pieces {
            if !self.peers.get(&addr).is_some_and(|b| b.get(piece.index).copied().unwrap_or(false)) {
                continue;
            }
            if let Some(request) = piece.next_request() {
                self.pending_blocks.push(PendingRequest {
                    piece: piece.index,
                    offset: request.begin,
                    added: Instant::now(),
                });
                return Some(request);
            }
        }
        None
    }

    fn next_from_rarest(&mut self, addr: SocketAddr) -> Option<Request> {
        let index = self
            .missing_pieces
            .iter()
            .filter(|p| self.peer_has(addr, p.index))
            .min_by_key(|p| {
                self.peers
                    .values()
                    .filter(|bitfield| bitfield.get(p.index).copied().unwrap_or(false))
                    .count()
            })
            .map(|p| p.index)?;

        let position = self.missing_pieces.iter().position(|p| p.index == index)?;
        let mut piece = self.missing_pieces.remove(position);
        let request = piece.next_request();
        if request.is_some() {
            self.pending_blocks.push(PendingRequest {
                piece: piece.index,
                offset: request.as_ref().unwrap().begin,
                added: Instant::now(),
            });
        }
        self.ongoing_pieces.push(piece);
        request
    }

    /// Records a received block. If its piece is now complete, verifies
    /// the hash: a match is written to disk and moved to the completed
    /// set, a mismatch discards the piece's data and re-queues it.
    #[instrument(skip(self, data), level = "debug")]
    pub fn block_received(
        &mut self,
        piece_index: usize,
        offset: u32,
        data: Vec<u8>,
    ) -> PieceResult<()> {
        self.pending_blocks
            .retain(|r| !(r.piece == piece_index && r.offset == offset));

        let Some(position) = self.ongoing_pieces.iter().position(|p| p.index == piece_index) else {
            warn!(piece_index, "received block for a piece that isn't ongoing");
            return Ok(());
        };

        self.ongoing_pieces[position].block_received(offset, data);

        if !self.ongoing_pieces[position].is_complete() {
            return Ok(());
        }

        let piece = self.ongoing_pieces.remove(position);
        if piece.hash_matches() {
            self.write_piece(&piece)?;
            self.have_pieces += 1;
            info!(
                "{} / {} pieces downloaded ({:.1}%)",
                self.have_pieces,
                self.total_pieces,
                (self.have_pieces as f64 / self.total_pieces as f64) * 100.0
            );
        } else {
            info!(piece = piece.index, "discarding corrupt piece");
            let mut piece = piece;
            piece.reset();
            self.missing_pieces.push(piece);
        }

        Ok(())
    }

    fn write_piece(&mut self, piece: &Piece) -> PieceResult<()> {
        let position = piece.index as u64 * self.piece_length as u64;
        self.file.seek(SeekFrom::Start(position))?;
        self.file.write_all(&piece.data())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::BencodeValue;
    use crate::torrent::file::TorrentFile;
    use std::net::{IpAddr, Ipv4Addr};

    fn torrent_with(piece_length: i64, total_length: i64, num_pieces: usize) -> TorrentFile {
        let data = BencodeValue::Dict(vec![
            (b"announce".to_vec(), BencodeValue::String(b"http://t".to_vec())),
            (
                b"info".to_vec(),
                BencodeValue::Dict(vec![
                    (b"piece length".to_vec(), BencodeValue::Integer(piece_length)),
                    (b"pieces".to_vec(), BencodeValue::String(vec![0u8; 20 * num_pieces])),
                    (b"name".to_vec(), BencodeValue::String(b"out.bin".to_vec())),
                    (b"length".to_vec(), BencodeValue::Integer(total_length)),
                ]),
            ),
        ]);
        TorrentFile::parse(data).unwrap()
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn picks_rarest_piece_first() {
        // Mirrors the spec's literal scenario: three peers advertising
        // {0,1,2}, {0,1}, {0} respectively — piece 2 is held by only one
        // peer, so P1's first request should target it rather than the
        // universally-held piece 0.
        let torrent = torrent_with(BLOCK_SIZE as i64, BLOCK_SIZE as i64 * 3, 3);
        let dir = tempfile_dir();
        let mut manager = PieceManager::new(&torrent, &dir.join("out.bin")).unwrap();

        manager.add_peer(addr(1), vec![true, true, true]);
        manager.add_peer(addr(2), vec![true, true, false]);
        manager.add_peer(addr(3), vec![true, false, false]);

        let request = manager.next_request(addr(1)).unwrap();
        assert_eq!(request.index, 2);
    }

    #[test]
    fn reissues_stalled_request() {
        let torrent = torrent_with(BLOCK_SIZE as i64, BLOCK_SIZE as i64, 1);
        let dir = tempfile_dir();
        let mut manager = PieceManager::new(&torrent, &dir.join("out.bin")).unwrap();
        manager.add_peer(addr(1), vec![true]);
        manager.max_pending = Duration::from_millis(0);

        let first = manager.next_request(addr(1)).unwrap();
        let second = manager.next_request(addr(1)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn completes_piece_on_matching_hash() {
        let data = b"hello world! this is a single block".to_vec();
        let hash = {
            let mut hasher = Sha1::new();
            hasher.update(&data);
            let digest = hasher.finalize();
            let mut out = [0u8; 20];
            out.copy_from_slice(&digest);
            out
        };

        let torrent_data = BencodeValue::Dict(vec![
            (b"announce".to_vec(), BencodeValue::String(b"http://t".to_vec())),
            (
                b"info".to_vec(),
                BencodeValue::Dict(vec![
                    (b"piece length".to_vec(), BencodeValue::Integer(data.len() as i64)),
                    (b"pieces".to_vec(), BencodeValue::String(hash.to_vec())),
                    (b"name".to_vec(), BencodeValue::String(b"out.bin".to_vec())),
                    (b"length".to_vec(), BencodeValue::Integer(data.len() as i64)),
                ]),
            ),
        ]);
        let torrent = TorrentFile::parse(torrent_data).unwrap();
        let dir = tempfile_dir();
        let mut manager = PieceManager::new(&torrent, &dir.join("out.bin")).unwrap();
        manager.add_peer(addr(1), vec![true]);

        let request = manager.next_request(addr(1)).unwrap();
        assert_eq!(request.index, 0);
        manager
            .block_received(0, request.begin, data.clone())
            .unwrap();
        assert!(manager.complete());
        assert_eq!(manager.bytes_downloaded(), data.len() as i64);
    }

    #[test]
    fn requeues_piece_on_hash_mismatch() {
        let torrent = torrent_with(8, 8, 1);
        let dir = tempfile_dir();
        let mut manager = PieceManager::new(&torrent, &dir.join("out.bin")).unwrap();
        manager.add_peer(addr(1), vec![true]);

        let request = manager.next_request(addr(1)).unwrap();
        manager
            .block_received(0, request.begin, vec![9u8; request.length as usize])
            .unwrap();

        assert!(!manager.complete());
        assert_eq!(manager.missing_pieces.len(), 1);
    }

    fn tempfile_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "rstc-piece-test-{:?}",
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
