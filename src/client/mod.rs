//! Top-level download coordinator: owns the tracker client and the shared
//! piece manager, keeps a pool of peer-connection workers fed from the
//! tracker's peer list, and re-announces on the tracker's interval.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::consts::MAX_CONNECTIONS;
use crate::peer::connection;
use crate::piece::{PieceError, PieceManager};
use crate::torrent::file::TorrentFile;
use crate::tracker::{self, TrackerError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to set up piece storage: {0}")]
    Piece(#[from] PieceError),

    #[error("failed to create tracker client: {0}")]
    Tracker(#[from] TrackerError),

    #[error("fatal error, download aborted: {0}")]
    Fatal(String),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Drives a single-torrent download from start to completion.
pub struct Coordinator {
    torrent: TorrentFile,
    tracker: tracker::Client,
    piece_manager: Arc<Mutex<PieceManager>>,
    peer_id: [u8; 20],
    stop_tx: watch::Sender<bool>,
}

impl Coordinator {
    /// Builds a coordinator for `torrent`, writing the downloaded file to
    /// `output_path` and advertising `port` to the tracker.
    pub fn new(torrent: TorrentFile, output_path: PathBuf, port: u16) -> ClientResult<Self> {
        let piece_manager = PieceManager::new(&torrent, &output_path)?;
        let tracker = tracker::Client::new(port)?;
        let peer_id = tracker.peer_id();
        info!(peer_id = %hex::encode(peer_id), "starting download");

        let (stop_tx, _stop_rx) = watch::channel(false);

        Ok(Self {
            torrent,
            tracker,
            piece_manager: Arc::new(Mutex::new(piece_manager)),
            peer_id,
            stop_tx,
        })
    }

    /// A handle callers can use to request a graceful shutdown — every
    /// peer worker observes it (via `tokio::select!` alongside its next
    /// message read) and the announce loop observes it between ticks.
    pub fn stop_handle(&self) -> watch::Sender<bool> {
        self.stop_tx.clone()
    }

    /// Runs the download to completion: announces to the tracker, feeds
    /// discovered peers to a fixed pool of connection workers, and
    /// re-announces on the tracker's interval until every piece is
    /// verified and written.
    #[instrument(skip(self), fields(announce = %self.torrent.announce))]
    pub async fn run(self) -> ClientResult<()> {
        let (tx, rx) = mpsc::unbounded_channel::<SocketAddr>();
        let rx = Arc::new(Mutex::new(rx));
        let num_pieces = self.torrent.num_pieces();
        let info_hash = self.torrent.info_hash;
        let fatal: Arc<StdMutex<Option<String>>> = Arc::new(StdMutex::new(None));

        let mut workers = Vec::with_capacity(MAX_CONNECTIONS);
        for _ in 0..MAX_CONNECTIONS {
            let rx = rx.clone();
            let piece_manager = self.piece_manager.clone();
            let peer_id = self.peer_id;
            let stop_tx = self.stop_tx.clone();
            let mut stop_rx = self.stop_tx.subscribe();
            let fatal = fatal.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    if *stop_rx.borrow() {
                        break;
                    }
                    let addr = tokio::select! {
                        _ = stop_rx.changed() => break,
                        addr = async {
                            let mut rx = rx.lock().await;
                            rx.recv().await
                        } => addr,
                    };
                    let Some(addr) = addr else { break };
                    if *stop_rx.borrow() || piece_manager.lock().await.complete() {
                        break;
                    }
                    if let Err(e) = connection::run(
                        addr,
                        info_hash,
                        peer_id,
                        piece_manager.clone(),
                        num_pieces,
                        stop_tx.clone(),
                        stop_rx.clone(),
                        fatal.clone(),
                    )
                    .await
                    {
                        debug!(%addr, error = %e, "peer connection ended");
                    }
                }
            }));
        }

        let mut previous_announce: Option<Instant> = None;
        let mut interval = Duration::from_secs(30 * 60);
        let mut stop_rx = self.stop_tx.subscribe();

        let result = loop {
            if self.piece_manager.lock().await.complete() {
                info!("torrent downloaded successfully");
                break Ok(());
            }
            if let Some(message) = fatal.lock().unwrap().take() {
                break Err(ClientError::Fatal(message));
            }
            if *stop_rx.borrow() {
                info!("stop requested, shutting down");
                break Ok(());
            }

            let due = previous_announce.map_or(true, |at| at.elapsed() >= interval);
            if !due {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    _ = stop_rx.changed() => {
                        info!("stop requested, shutting down");
                        break Ok(());
                    }
                }
                continue;
            }

            let first = previous_announce.is_none();
            let downloaded = self.piece_manager.lock().await.bytes_downloaded();
            match self
                .tracker
                .announce(&self.torrent, first, 0, downloaded)
                .await
            {
                Ok(response) => {
                    previous_announce = Some(Instant::now());
                    interval = Duration::from_secs(response.interval.max(1) as u64);
                    drain(&rx).await;
                    for peer in response.peers {
                        let _ = tx.send(SocketAddr::new(peer.ip, peer.port));
                    }
                }
                Err(e) => warn!(error = %e, "tracker announce failed, will retry"),
            }
        };

        let _ = self.stop_tx.send(true);
        drop(tx);
        for worker in workers {
            let _ = worker.await;
        }
        result
    }

    pub fn total_length(&self) -> i64 {
        self.torrent.total_length()
    }
}

/// Empties the pending-peers queue so a fresh announce's peer list fully
/// replaces the previous one instead of being appended to stale entries.
async fn drain(rx: &Arc<Mutex<mpsc::UnboundedReceiver<SocketAddr>>>) {
    let mut rx = rx.lock().await;
    while rx.try_recv().is_ok() {}
}
