//! Drives a single peer connection: handshake, bitfield exchange, and the
//! choke/request/piece message loop that feeds blocks to the shared
//! [`PieceManager`](crate::piece::PieceManager).
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, instrument, warn};

use super::handshake::Handshake;
use super::message::Message;
use super::{PeerError, PeerResult};
use crate::piece::PieceManager;

/// How long to wait for any message before treating the peer as dead.
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Expands a bitfield byte string into one bool per piece index.
fn expand_bitfield(bytes: &[u8], num_pieces: usize) -> Vec<bool> {
    let mut bits = Vec::with_capacity(num_pieces);
    for byte in bytes {
        for i in 0..8 {
            if bits.len() == num_pieces {
                return bits;
            }
            bits.push((byte >> (7 - i)) & 1 == 1);
        }
    }
    bits.resize(num_pieces, false);
    bits
}

/// Runs a single peer connection to completion: handshakes, then loops
/// reading and reacting to wire messages until the peer disconnects, the
/// download completes, an explicit stop is requested, or an error occurs.
/// Always deregisters the peer from `piece_manager` on the way out.
///
/// Each iteration races a message read against `stop` so an external
/// shutdown request is observed between protocol steps rather than only
/// at the next inbound message. A fatal error writing a verified piece to
/// disk (surfaced through `block_received`) is recorded in `fatal` and
/// broadcast via `stop_tx` so the whole download halts, not just this
/// connection.
#[instrument(skip(piece_manager, info_hash, peer_id, stop_tx, stop_rx, fatal), fields(%addr))]
pub async fn run(
    addr: SocketAddr,
    info_hash: [u8; 20],
    peer_id: [u8; 20],
    piece_manager: Arc<Mutex<PieceManager>>,
    num_pieces: usize,
    stop_tx: watch::Sender<bool>,
    mut stop_rx: watch::Receiver<bool>,
    fatal: Arc<StdMutex<Option<String>>>,
) -> PeerResult<()> {
    let (mut stream, _their_handshake) =
        Handshake::do_handshake(&addr, info_hash, peer_id).await?;

    Message::Interested.write(&mut stream).await?;

    let mut choked = true;
    let mut in_flight = false;
    let mut registered = false;

    let result = loop {
        if *stop_rx.borrow() {
            break Ok(());
        }
        if piece_manager.lock().await.complete() {
            break Ok(());
        }

        let message = tokio::select! {
            _ = stop_rx.changed() => break Ok(()),
            outcome = timeout(READ_TIMEOUT, Message::read(&mut stream)) => {
                match outcome {
                    Ok(result) => result?,
                    Err(_) => break Err(PeerError::InvalidMessage("peer timed out".to_string())),
                }
            }
        };

        if !registered
            && !matches!(message, Message::KeepAlive | Message::Bitfield(_) | Message::Unknown(_))
        {
            break Err(PeerError::InvalidMessage(
                "expected bitfield as the first message".to_string(),
            ));
        }

        match message {
            Message::KeepAlive => {}
            Message::Choke => {
                choked = true;
                in_flight = false;
            }
            Message::Unchoke => choked = false,
            Message::Interested | Message::NotInterested => {}
            Message::Have(index) => {
                piece_manager.lock().await.update_peer(addr, index as usize);
            }
            Message::Bitfield(bits) => {
                let bitfield = expand_bitfield(&bits, num_pieces);
                piece_manager.lock().await.add_peer(addr, bitfield);
                registered = true;
            }
            Message::Request(_) | Message::Cancel(_) => {
                debug!("ignoring upload request from peer (uploading is not supported)");
            }
            Message::Unknown(id) => {
                debug!(id, "ignoring unsupported message id");
            }
            Message::Piece(block) => {
                in_flight = false;
                if let Err(e) = piece_manager
                    .lock()
                    .await
                    .block_received(block.index as usize, block.begin, block.data)
                {
                    error!(error = %e, "fatal error writing verified piece to disk");
                    *fatal.lock().unwrap() = Some(e.to_string());
                    let _ = stop_tx.send(true);
                    break Err(PeerError::Fatal(e.to_string()));
                }
            }
        }

        if !choked && !in_flight {
            let next = piece_manager.lock().await.next_request(addr);
            if let Some(request) = next {
                Message::Request(request).write(&mut stream).await?;
                in_flight = true;
            }
        }
    };

    piece_manager.lock().await.remove_peer(&addr);
    if let Err(ref e) = result {
        warn!(error = %e, "peer connection ended with an error");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_bitfield_bytes_into_bools() {
        let bits = expand_bitfield(&[0b1010_0000], 4);
        assert_eq!(bits, vec![true, false, true, false]);
    }

    #[test]
    fn truncates_bitfield_to_piece_count() {
        let bits = expand_bitfield(&[0xFF, 0xFF], 3);
        assert_eq!(bits, vec![true, true, true]);
    }

    #[test]
    fn pads_short_bitfield_with_false() {
        let bits = expand_bitfield(&[0b1000_0000], 5);
        assert_eq!(bits, vec![true, false, false, false, false]);
    }
}
