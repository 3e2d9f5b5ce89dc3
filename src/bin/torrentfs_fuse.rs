//! `torrentfs-fuse` — FUSE driver entry point.
//!
//! Mounting a real FUSE filesystem is out of scope here (see DESIGN.md): the
//! kernel-facing mount loop is a thick, OS-specific collaborator of its own.
//! This binary instead validates that a daemon is reachable over its RPC
//! socket and reports the torrents it would expose as a mountpoint, so the
//! RPC surface this crate does own can be exercised end-to-end without a
//! real kernel mount.

use std::path::PathBuf;

use clap::Parser;
use serde_json::Value;
use tokio::net::UnixStream;
use torrentfs::codec;

#[derive(Parser, Debug)]
#[command(name = "torrentfs-fuse", about = "TorrentFS FUSE driver (RPC connectivity check)")]
struct Cli {
    /// Where the filesystem would be mounted.
    mountpoint: PathBuf,

    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    let socket = cli
        .socket
        .or_else(|| std::env::var("TORRENTFSD_SOCKET").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("/tmp/torrentfsd.sock"));

    let mut stream = UnixStream::connect(&socket)
        .await
        .map_err(|e| anyhow::anyhow!("could not reach torrentfsd at {}: {e}", socket.display()))?;

    codec::write_frame(&mut stream, &serde_json::json!({"cmd": "hello"})).await?;
    let response: Value = codec::read_frame(&mut stream).await?;
    let torrents = response.get("torrents").cloned().unwrap_or(Value::Array(vec![]));

    tracing::info!(
        mountpoint = %cli.mountpoint.display(),
        torrents = %torrents,
        "would mount these torrents as the filesystem root (kernel mount not implemented)"
    );
    Ok(())
}
