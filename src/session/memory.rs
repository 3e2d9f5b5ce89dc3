//! Deterministic in-process [`SessionBackend`], used by tests and to let the
//! daemon run against local fixture torrents with no real BitTorrent network.
//!
//! Torrents are described by a small JSON sidecar (not a real `.torrent`
//! bencode file — that parsing is the session library's job per spec.md §1)
//! carrying each file's literal content, so reads can be verified byte-exact
//! against ground truth in tests (spec.md §8).

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::broadcast;

use super::{AddOpts, Alert, AlertKind, SessionBackend, TorrentHandle, TorrentMetainfo, TorrentState, TorrentStats};
use crate::error::{Result, TorrentFsError};

#[derive(Debug, Deserialize)]
struct MemoryFileSpec {
    path: String,
    /// Literal file content, so tests can assert byte-exact reads.
    #[serde(with = "base64_bytes")]
    content: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct MemoryTorrentSpec {
    infohash: Option<String>,
    torrent_name: String,
    piece_length: u64,
    files: Vec<MemoryFileSpec>,
    #[serde(default)]
    trackers: Vec<String>,
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(d: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

fn derive_infohash(torrent_name: &str, total_size: u64) -> String {
    let mut hasher = DefaultHasher::new();
    torrent_name.hash(&mut hasher);
    total_size.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// In-memory [`SessionBackend`] backing local fixture torrents.
pub struct MemorySession {
    alerts_tx: broadcast::Sender<Alert>,
    // infohash -> concatenated file content, kept from parse through add_torrent.
    content_by_infohash: DashMap<String, Vec<u8>>,
}

impl MemorySession {
    pub fn new() -> Self {
        let (alerts_tx, _rx) = broadcast::channel(1024);
        Self {
            alerts_tx,
            content_by_infohash: DashMap::new(),
        }
    }
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBackend for MemorySession {
    fn parse_torrent_file(&self, path: &Path) -> Result<TorrentMetainfo> {
        let raw = std::fs::read_to_string(path)?;
        let spec: MemoryTorrentSpec = serde_json::from_str(&raw)?;
        if spec.piece_length == 0 {
            return Err(TorrentFsError::TorrentError("piece_length must be > 0".into()));
        }

        let total_size: u64 = spec.files.iter().map(|f| f.content.len() as u64).sum();
        let infohash = spec
            .infohash
            .clone()
            .unwrap_or_else(|| derive_infohash(&spec.torrent_name, total_size));
        let num_pieces = if total_size == 0 {
            1
        } else {
            total_size.div_ceil(spec.piece_length) as u32
        };

        let mut content = Vec::with_capacity(total_size as usize);
        let mut files = Vec::with_capacity(spec.files.len());
        for f in &spec.files {
            files.push((f.path.clone(), f.content.len() as u64));
            content.extend_from_slice(&f.content);
        }
        self.content_by_infohash.insert(infohash.clone(), content);

        Ok(TorrentMetainfo {
            infohash,
            torrent_name: spec.torrent_name,
            piece_length: spec.piece_length,
            num_pieces,
            files,
            trackers: spec.trackers,
        })
    }

    fn add_torrent(
        &self,
        metainfo: &TorrentMetainfo,
        _cache_dir: PathBuf,
        opts: AddOpts,
    ) -> Result<Arc<dyn TorrentHandle>> {
        let content = self
            .content_by_infohash
            .get(&metainfo.infohash)
            .map(|c| c.clone())
            .unwrap_or_default();

        let already_verified = opts.skip_check || opts.resume_data.is_some();
        let have = vec![already_verified; metainfo.num_pieces as usize];
        let state = if already_verified {
            TorrentState::Downloading
        } else {
            TorrentState::CheckingFiles
        };

        Ok(Arc::new(MemoryTorrentHandle {
            infohash: metainfo.infohash.clone(),
            piece_length: metainfo.piece_length,
            num_pieces: metainfo.num_pieces,
            content,
            have: Mutex::new(have),
            priorities: Mutex::new(vec![1u8; metainfo.num_pieces as usize]),
            state: Mutex::new(state),
            alerts_tx: self.alerts_tx.clone(),
        }))
    }

    fn remove_torrent(&self, infohash: &str) {
        self.content_by_infohash.remove(infohash);
    }

    fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alerts_tx.subscribe()
    }
}

/// Concrete in-memory torrent handle. Exposes extra test-only methods
/// ([`MemoryTorrentHandle::mark_have`], [`MemoryTorrentHandle::mark_all_have`])
/// beyond the [`TorrentHandle`] trait, for driving piece completion
/// deterministically.
pub struct MemoryTorrentHandle {
    infohash: String,
    piece_length: u64,
    num_pieces: u32,
    content: Vec<u8>,
    have: Mutex<Vec<bool>>,
    priorities: Mutex<Vec<u8>>,
    state: Mutex<TorrentState>,
    alerts_tx: broadcast::Sender<Alert>,
}

impl MemoryTorrentHandle {
    /// Mark a piece downloaded and fire the corresponding alert.
    pub fn mark_have(&self, index: u32) {
        if let Some(slot) = self.have.lock().unwrap().get_mut(index as usize) {
            *slot = true;
        }
        let _ = self.alerts_tx.send(Alert {
            torrent_id: self.infohash.clone(),
            kind: AlertKind::PieceFinished(index),
        });
    }

    /// Mark every piece downloaded (simulates a completed torrent).
    pub fn mark_all_have(&self) {
        for i in 0..self.num_pieces {
            self.mark_have(i);
        }
        *self.state.lock().unwrap() = TorrentState::Seeding;
    }

    pub fn set_state(&self, state: TorrentState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn priority(&self, index: u32) -> u8 {
        self.priorities
            .lock()
            .unwrap()
            .get(index as usize)
            .copied()
            .unwrap_or(0)
    }
}

impl TorrentHandle for MemoryTorrentHandle {
    fn piece_length(&self) -> u64 {
        self.piece_length
    }

    fn num_pieces(&self) -> u32 {
        self.num_pieces
    }

    fn has_piece(&self, index: u32) -> bool {
        self.have
            .lock()
            .unwrap()
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    fn set_piece_priority(&self, index: u32, priority: u8) {
        if let Some(slot) = self.priorities.lock().unwrap().get_mut(index as usize) {
            *slot = priority;
        }
    }

    fn set_piece_deadline(&self, _index: u32, _deadline_ms_from_now: u64) {
        // The in-memory backend has no network scheduler to prioritize;
        // real backends forward this to the session library's deadline API.
    }

    fn read_bytes(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| TorrentFsError::IoError("read range overflow".into()))?;
        if end > self.content.len() as u64 {
            return Err(TorrentFsError::IoError("read past end of storage".into()));
        }
        if self.piece_length > 0 {
            let p0 = (offset / self.piece_length) as u32;
            let p1 = if len == 0 {
                p0
            } else {
                ((end - 1) / self.piece_length) as u32
            };
            for p in p0..=p1 {
                if !self.has_piece(p) {
                    return Err(TorrentFsError::IoError(format!("piece {p} not downloaded")));
                }
            }
        }
        Ok(self.content[offset as usize..end as usize].to_vec())
    }

    fn state(&self) -> TorrentState {
        *self.state.lock().unwrap()
    }

    fn stats(&self) -> TorrentStats {
        let have = self.have.lock().unwrap();
        let have_count = have.iter().filter(|&&h| h).count();
        TorrentStats {
            peers: 0,
            download_rate_bps: 0,
            upload_rate_bps: if have_count == have.len() { 0 } else { 0 },
        }
    }

    fn save_resume_data(&self) -> Vec<u8> {
        let have = self.have.lock().unwrap().clone();
        serde_json::to_vec(&have).unwrap_or_default()
    }

    fn reannounce(&self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_and_reads_back_bytes() {
        let session = MemorySession::new();
        let spec = serde_json::json!({
            "torrent_name": "sample",
            "piece_length": 16,
            "files": [
                {"path": "a/b.txt", "content": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"0123456789")},
                {"path": "d.md", "content": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"hello")},
            ]
        });
        let f = fixture(&spec.to_string());
        let meta = session.parse_torrent_file(f.path()).unwrap();
        assert_eq!(meta.files.len(), 2);
        assert_eq!(meta.num_pieces, 1);

        let handle = session
            .add_torrent(&meta, PathBuf::from("/tmp/cache"), AddOpts::default())
            .unwrap();
        assert_eq!(handle.state(), TorrentState::CheckingFiles);
        assert!(!handle.has_piece(0));
        handle.set_piece_priority(0, 7);

        let memory = handle
            .as_any()
            .downcast_ref::<MemoryTorrentHandle>()
            .unwrap();
        assert_eq!(memory.priority(0), 7);
        memory.mark_have(0);
        assert!(handle.has_piece(0));
        assert_eq!(handle.read_bytes(0, 10).unwrap(), b"0123456789");
    }

    #[test]
    fn skip_check_marks_all_pieces_have() {
        let session = MemorySession::new();
        let spec = serde_json::json!({
            "torrent_name": "sample2",
            "piece_length": 4,
            "files": [
                {"path": "f.bin", "content": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"12345678")},
            ]
        });
        let f = fixture(&spec.to_string());
        let meta = session.parse_torrent_file(f.path()).unwrap();
        let handle = session
            .add_torrent(
                &meta,
                PathBuf::from("/tmp/cache"),
                AddOpts {
                    skip_check: true,
                    resume_data: None,
                },
            )
            .unwrap();
        assert!(handle.has_piece(0));
        assert_eq!(handle.read_bytes(0, 8).unwrap(), b"12345678");
    }
}
