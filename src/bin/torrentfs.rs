//! `torrentfs` — a thin RPC client for `torrentfsd`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::net::UnixStream;
use torrentfs::codec;

#[derive(Parser, Debug)]
#[command(name = "torrentfs", about = "TorrentFS client")]
struct Cli {
    #[arg(long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Torrents,
    Status { torrent: String },
    StatusAll,
    List { torrent: String, path: String },
    Stat { torrent: String, path: String },
    Read {
        torrent: String,
        path: String,
        offset: u64,
        size: u64,
        #[arg(default_value = "auto")]
        mode: String,
    },
    Pin { torrent: String, path: String },
    Unpin { torrent: String, path: String },
    Pinned { torrent: String },
    Prefetch { torrent: String, path: String },
    CacheSize,
    PruneCache {
        #[arg(long)]
        dry_run: bool,
    },
    AddMagnet { magnet: String },
}

fn socket_path(cli: &Cli) -> PathBuf {
    if let Some(p) = &cli.socket {
        return p.clone();
    }
    if let Ok(p) = std::env::var("TORRENTFSD_SOCKET") {
        return PathBuf::from(p);
    }
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(dir).join("torrentfsd.sock");
    }
    PathBuf::from("/tmp/torrentfsd.sock")
}

fn request_for(command: &Command) -> Value {
    match command {
        Command::Torrents => json!({"cmd": "torrents"}),
        Command::Status { torrent } => json!({"cmd": "status", "torrent": torrent}),
        Command::StatusAll => json!({"cmd": "status-all"}),
        Command::List { torrent, path } => json!({"cmd": "list", "torrent": torrent, "path": path}),
        Command::Stat { torrent, path } => json!({"cmd": "stat", "torrent": torrent, "path": path}),
        Command::Read { torrent, path, offset, size, mode } => {
            json!({"cmd": "read", "torrent": torrent, "path": path, "offset": offset, "size": size, "mode": mode})
        }
        Command::Pin { torrent, path } => json!({"cmd": "pin", "torrent": torrent, "path": path}),
        Command::Unpin { torrent, path } => json!({"cmd": "unpin", "torrent": torrent, "path": path}),
        Command::Pinned { torrent } => json!({"cmd": "pinned", "torrent": torrent}),
        Command::Prefetch { torrent, path } => json!({"cmd": "prefetch", "torrent": torrent, "path": path}),
        Command::CacheSize => json!({"cmd": "cache-size"}),
        Command::PruneCache { dry_run } => json!({"cmd": "prune-cache", "dry_run": dry_run}),
        Command::AddMagnet { magnet } => json!({"cmd": "add-magnet", "magnet": magnet}),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();
    let cli = Cli::parse();
    let path = socket_path(&cli);

    let mut stream = UnixStream::connect(&path)
        .await
        .map_err(|e| anyhow::anyhow!("could not connect to {}: {e}", path.display()))?;

    let request = request_for(&cli.command);
    codec::write_frame(&mut stream, &request).await?;
    let response: Value = codec::read_frame(&mut stream).await?;

    if matches!(cli.command, Command::Read { .. }) {
        if let Some(len) = response.get("data_len").and_then(Value::as_u64) {
            let mut data = vec![0u8; len as usize];
            use tokio::io::AsyncReadExt;
            stream.read_exact(&mut data).await?;
            use std::io::Write;
            std::io::stdout().write_all(&data)?;
            return Ok(());
        }
    }

    println!("{}", serde_json::to_string_pretty(&response)?);
    if response.get("ok").and_then(Value::as_bool) == Some(false) {
        std::process::exit(1);
    }
    Ok(())
}
