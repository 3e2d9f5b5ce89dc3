use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use torrentfs::config::DaemonConfig;
use torrentfs::manager::Manager;
use torrentfs::session::memory::MemorySession;
use torrentfs::session::SessionBackend;

pub fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Write a deterministic fixture `.torrent` (JSON sidecar) file.
pub fn write_fixture(dir: &Path, file_name: &str, torrent_name: &str, infohash: Option<&str>, piece_length: u64, files: &[(&str, Vec<u8>)]) -> PathBuf {
    let files_json: Vec<_> = files
        .iter()
        .map(|(path, content)| serde_json::json!({"path": path, "content": b64(content)}))
        .collect();
    let mut spec = serde_json::json!({
        "torrent_name": torrent_name,
        "piece_length": piece_length,
        "files": files_json,
    });
    if let Some(hash) = infohash {
        spec["infohash"] = serde_json::Value::String(hash.to_string());
    }
    let path = dir.join(file_name);
    std::fs::write(&path, spec.to_string()).unwrap();
    path
}

pub fn new_manager(cache_root: PathBuf) -> Arc<Manager> {
    new_manager_with_config(cache_root, DaemonConfig::default())
}

pub fn new_manager_with_config(cache_root: PathBuf, config: DaemonConfig) -> Arc<Manager> {
    let session: Arc<dyn SessionBackend> = Arc::new(MemorySession::new());
    Arc::new(Manager::new(cache_root, config, session))
}
