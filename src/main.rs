//! `rstc` — a single-file BitTorrent downloader.
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rs_torrent_client::bencode;
use rs_torrent_client::client::Coordinator;
use rs_torrent_client::consts::DEFAULT_PORT;
use rs_torrent_client::torrent::file::TorrentFile;
use tracing_subscriber::EnvFilter;

/// Downloads the single file described by a .torrent metainfo file.
#[derive(Debug, Parser)]
#[command(name = "rstc", version)]
struct Args {
    /// Path to the .torrent metainfo file.
    metainfo: PathBuf,

    /// Increase log verbosity to debug.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Alias for --verbose, kept for compatibility with an older CLI entry point.
    #[arg(short = 'd', long = "display")]
    display: bool,

    /// Local port advertised to the tracker.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory the downloaded file is written into.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose || args.display);

    let torrent = match load_torrent(&args.metainfo) {
        Ok(torrent) => torrent,
        Err(e) => {
            tracing::error!(error = %e, "failed to load metainfo file");
            return ExitCode::FAILURE;
        }
    };

    let output_path = args.output_dir.join(torrent.file_path());
    let coordinator = match Coordinator::new(torrent, output_path, args.port) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            tracing::error!(error = %e, "failed to start download");
            return ExitCode::FAILURE;
        }
    };

    let stop = coordinator.stop_handle();
    let mut run = tokio::spawn(coordinator.run());

    let panicked = |e: tokio::task::JoinError| {
        rs_torrent_client::client::ClientError::Fatal(format!("download task panicked: {e}"))
    };

    let result = tokio::select! {
        result = &mut run => result.unwrap_or_else(|e| Err(panicked(e))),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt, shutting down");
            let _ = stop.send(true);
            run.await.unwrap_or_else(|e| Err(panicked(e)))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "download coordinator exited with an error");
            ExitCode::FAILURE
        }
    }
}

fn load_torrent(path: &std::path::Path) -> anyhow::Result<TorrentFile> {
    let bytes = std::fs::read(path)?;
    let value = bencode::decode(&bytes)?;
    let torrent = TorrentFile::parse(value)?;
    Ok(torrent)
}
