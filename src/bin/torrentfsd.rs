//! `torrentfsd` — the daemon: loads torrents, serves the RPC socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use torrentfs::config::DaemonConfig;
use torrentfs::manager::Manager;
use torrentfs::rpc::RpcServer;
use torrentfs::session::memory::MemorySession;
use torrentfs::session::SessionBackend;

#[derive(Parser, Debug)]
#[command(name = "torrentfsd", about = "TorrentFS daemon")]
struct Cli {
    /// Load a single `.torrent` file at startup.
    #[arg(long)]
    torrent: Option<PathBuf>,

    /// Watch a directory for `.torrent` files.
    #[arg(long)]
    torrent_dir: Option<PathBuf>,

    /// Root directory for per-torrent cache data.
    #[arg(long, default_value = "cache")]
    cache: PathBuf,

    /// RPC socket path (overrides the default search order).
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Enable startup prefetch for every loaded torrent.
    #[arg(long)]
    prefetch: bool,

    /// Skip hash-checking of existing cache data.
    #[arg(long)]
    skip_check: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        tracing::error!(error = %err, "torrentfsd failed to start");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = DaemonConfig::from_default_locations().await?;
    config.validate()?;
    config.cache_dir = cli.cache.clone();
    config.socket = cli.socket.clone();
    config.torrent_dir = cli.torrent_dir.clone();
    config.torrent_file = cli.torrent.clone();
    if cli.skip_check {
        config.skip_check = true;
    }
    if cli.prefetch {
        config.prefetch.on_start = true;
    }

    tokio::fs::create_dir_all(&config.cache_dir).await?;

    let session: Arc<dyn SessionBackend> = Arc::new(MemorySession::new());
    let manager = Arc::new(Manager::new(config.cache_dir.clone(), config.clone(), session.clone()));

    if let Some(path) = &config.torrent_file {
        match manager.add_torrent_file(path).await {
            Ok(id) => tracing::info!(%id, "loaded torrent"),
            Err(err) => tracing::error!(error = %err, "failed to load --torrent"),
        }
    }

    if let Some(dir) = config.torrent_dir.clone() {
        tokio::fs::create_dir_all(&dir).await?;
        let watch_manager = manager.clone();
        tokio::spawn(async move {
            torrentfs::watcher::run(watch_manager, dir, Duration::from_millis(1000)).await;
        });
    }

    {
        let alerts_manager = manager.clone();
        let mut alerts = session.subscribe();
        tokio::spawn(async move {
            loop {
                match alerts.recv().await {
                    Ok(alert) => alerts_manager.dispatch_alert(&alert),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "alerts consumer lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    if config.resume.save_interval_s > 0 {
        let resume_manager = manager.clone();
        let interval = Duration::from_secs(config.resume.save_interval_s);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                for engine in resume_manager.engines() {
                    if let Err(err) = engine.save_resume_data().await {
                        tracing::warn!(id = %engine.id, error = %err, "failed to save resume data");
                    }
                }
            }
        });
    }

    let socket_path = config.resolve_socket_path();
    let server = RpcServer::new(manager, config.torrent_dir.clone());
    server.serve(&socket_path).await?;
    Ok(())
}
