use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tidebit::peer::MAX_BLOCK_SIZE;
use tidebit::torrent::{DownloadState, Settings, Torrent};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tidebit", version, about = "BitTorrent client")]
struct Cli {
    /// .torrent files to download
    #[arg(required = true)]
    torrents: Vec<PathBuf>,

    /// Directory to place downloads in
    #[arg(short, long, default_value = "Torrents")]
    download_dir: PathBuf,

    /// Listen port for the first torrent; incremented for each further one
    #[arg(short, long, default_value_t = 6881)]
    port: u16,

    /// Print metainfo and piece completion, then exit
    #[arg(long)]
    no_download: bool,

    /// Do not seed after a download finishes
    #[arg(long)]
    no_seed: bool,

    /// Request block size in bytes (capped at the 16 KiB wire limit)
    #[arg(long)]
    block_size: Option<u32>,

    /// Peer connect timeout in seconds
    #[arg(long, default_value_t = 30)]
    connect_timeout: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let block_size = match cli.block_size {
        Some(size) if size == 0 || size > MAX_BLOCK_SIZE => {
            tracing::warn!(size, cap = MAX_BLOCK_SIZE, "clamping block size to the wire cap");
            MAX_BLOCK_SIZE
        }
        Some(size) => size,
        None => MAX_BLOCK_SIZE,
    };
    let settings = Settings {
        download_dir: cli.download_dir.clone(),
        block_size,
        connect_timeout: Duration::from_secs(cli.connect_timeout),
    };

    let mut tasks = Vec::new();
    for (i, path) in cli.torrents.iter().cloned().enumerate() {
        let settings = settings.clone();
        let port = cli.port.wrapping_add(i as u16);
        let no_download = cli.no_download;
        let no_seed = cli.no_seed;
        tasks.push(tokio::spawn(async move {
            match run_torrent(path.clone(), settings, port, no_download, no_seed).await {
                Ok(()) => true,
                Err(err) => {
                    tracing::error!(torrent = %path.display(), error = %err, "torrent failed");
                    false
                }
            }
        }));
    }

    let mut all_ok = true;
    for task in tasks {
        all_ok &= task.await.unwrap_or(false);
    }
    if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn run_torrent(
    path: PathBuf,
    settings: Settings,
    port: u16,
    no_download: bool,
    no_seed: bool,
) -> anyhow::Result<()> {
    // open() scans existing payload bytes, so keep it off the reactor
    let display = path.display().to_string();
    let mut torrent = tokio::task::spawn_blocking(move || Torrent::open(&path, settings))
        .await
        .context("open task panicked")?
        .with_context(|| format!("{display}: unable to open torrent"))?;

    tracing::info!(
        torrent = torrent.name(),
        info_hash = %hex::encode(torrent.info_hash()),
        size = torrent.total_size(),
        pieces = torrent.total_pieces(),
        completed = torrent.completed_pieces(),
        "opened"
    );
    if let Some(comment) = torrent.comment() {
        tracing::info!(torrent = torrent.name(), comment, "torrent comment");
    }
    if no_download {
        return Ok(());
    }

    let state = torrent.download(port).await?;
    match state {
        DownloadState::Completed => {
            tracing::info!(torrent = torrent.name(), "finished download");
        }
        DownloadState::AlreadyDownloaded => {
            tracing::info!(torrent = torrent.name(), "was already downloaded");
        }
        DownloadState::TrackerQueryFailure => {
            anyhow::bail!("no tracker responded");
        }
        DownloadState::NetworkError => {
            anyhow::bail!("download aborted before completion");
        }
    }
    tracing::info!(
        torrent = torrent.name(),
        downloaded = %tidebit::util::human_bytes(torrent.downloaded_bytes()),
        uploaded = %tidebit::util::human_bytes(torrent.uploaded_bytes()),
        wasted = %tidebit::util::human_bytes(torrent.wasted_bytes()),
        hash_misses = torrent.hash_misses(),
        "transfer totals"
    );

    if !no_seed {
        torrent.seed(port).await?;
    }
    Ok(())
}
