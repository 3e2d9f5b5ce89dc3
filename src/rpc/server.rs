//! RPC acceptor and per-connection worker (spec.md §4.10).
//!
//! The acceptor never blocks on work: each accepted connection gets its own
//! task, and within that task requests are processed strictly sequentially
//! (no in-connection pipelining), so a slow `read` only ever delays that one
//! connection.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};

use crate::codec;
use crate::manager::Manager;
use crate::rpc::protocol::{self, Request};

pub struct RpcServer {
    manager: Arc<Manager>,
    torrent_dir: Option<PathBuf>,
    next_conn_id: AtomicU64,
}

impl RpcServer {
    pub fn new(manager: Arc<Manager>, torrent_dir: Option<PathBuf>) -> Self {
        Self {
            manager,
            torrent_dir,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Bind `socket_path` and accept connections until the process exits.
    /// A stale socket file from an unclean prior shutdown is removed first.
    pub async fn serve(&self, socket_path: &Path) -> std::io::Result<()> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path)?;
        }
        let listener = UnixListener::bind(socket_path)?;
        tracing::info!(socket = %socket_path.display(), "rpc server listening");

        loop {
            let (stream, _addr) = listener.accept().await?;
            let manager = self.manager.clone();
            let torrent_dir = self.torrent_dir.clone();
            let conn_id = self.next_conn_id.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, manager, torrent_dir, conn_id).await {
                    tracing::debug!(conn = conn_id, error = %err, "rpc connection closed");
                }
            });
        }
    }
}

async fn handle_connection(
    mut stream: UnixStream,
    manager: Arc<Manager>,
    torrent_dir: Option<PathBuf>,
    conn_id: u64,
) -> std::io::Result<()> {
    loop {
        let request: Request = match codec::read_frame(&mut stream).await {
            Ok(req) => req,
            Err(err) => {
                tracing::debug!(conn = conn_id, error = %err, "connection closed or framing error");
                return Ok(());
            }
        };

        let cmd = request.cmd.clone();
        let dispatched = protocol::dispatch(&manager, request, torrent_dir.as_deref()).await;
        match dispatched.header.get("error").and_then(|v| v.as_str()) {
            Some(token) => {
                crate::rpc_error!(conn_id, &cmd, token);
            }
            None => {
                crate::rpc_log!(conn_id, &cmd);
            }
        }
        protocol::write_response(&mut stream, dispatched)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "failed to write rpc response"))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::session::memory::MemorySession;

    #[tokio::test]
    async fn hello_round_trips_over_the_socket() {
        let dir = tempfile::tempdir().unwrap();
        let session: Arc<dyn crate::session::SessionBackend> = Arc::new(MemorySession::new());
        let manager = Arc::new(Manager::new(dir.path().join("cache"), DaemonConfig::default(), session));
        let server = RpcServer::new(manager, None);
        let socket_path = dir.path().join("rpc.sock");

        let socket_path_clone = socket_path.clone();
        tokio::spawn(async move {
            let _ = server.serve(&socket_path_clone).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let req = serde_json::json!({"id": 1, "cmd": "hello"});
        codec::write_frame(&mut stream, &req).await.unwrap();
        let resp: serde_json::Value = codec::read_frame(&mut stream).await.unwrap();
        assert_eq!(resp["ok"], true);
        assert_eq!(resp["id"], 1);
    }

    #[tokio::test]
    async fn unknown_command_does_not_close_connection() {
        let dir = tempfile::tempdir().unwrap();
        let session: Arc<dyn crate::session::SessionBackend> = Arc::new(MemorySession::new());
        let manager = Arc::new(Manager::new(dir.path().join("cache"), DaemonConfig::default(), session));
        let server = RpcServer::new(manager, None);
        let socket_path = dir.path().join("rpc2.sock");

        let socket_path_clone = socket_path.clone();
        tokio::spawn(async move {
            let _ = server.serve(&socket_path_clone).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        codec::write_frame(&mut stream, &serde_json::json!({"cmd": "bogus"})).await.unwrap();
        let resp: serde_json::Value = codec::read_frame(&mut stream).await.unwrap();
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["error"], "UnknownCommand");

        // Connection survives: a second, valid command still gets answered.
        codec::write_frame(&mut stream, &serde_json::json!({"cmd": "hello"})).await.unwrap();
        let resp2: serde_json::Value = codec::read_frame(&mut stream).await.unwrap();
        assert_eq!(resp2["ok"], true);
    }
}
