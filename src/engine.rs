//! Per-torrent engine (spec.md §4.7): owns the torrent handle, path index,
//! pin store, and outstanding-read bookkeeping, and exposes the operations
//! the RPC layer dispatches into.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;

use crate::cache_manager::logical_bytes;
use crate::config::DaemonConfig;
use crate::error::{Result, TorrentFsError};
use crate::path_index::{ChildEntry, Lookup, PathIndex};
use crate::pin_store::{PinStore, PinnedEntry};
use crate::prefetch::{self, PrefetchInfo};
use crate::read_scheduler::{self, PieceWaker, PriorityLedger, ReadMode};
use crate::session::{Alert, AlertKind, TorrentHandle, TorrentMetainfo, TorrentState};

/// Cancel token for one outstanding read, keyed by a monotonic id local to
/// the engine (spec.md §4.7 "OutstandingReads").
struct OutstandingRead {
    cancel: Arc<Notify>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileStatus {
    pub path: String,
    pub size: u64,
    pub have_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TorrentStatus {
    pub id: String,
    pub name: String,
    pub torrent_name: String,
    pub state: &'static str,
    pub have_pieces: u32,
    pub num_pieces: u32,
    pub peers: u32,
    pub download_rate_bps: u64,
    pub upload_rate_bps: u64,
    pub files: Vec<FileStatus>,
    pub trackers: Vec<String>,
}

fn state_token(state: TorrentState) -> &'static str {
    match state {
        TorrentState::CheckingFiles => "checking_files",
        TorrentState::Downloading => "downloading",
        TorrentState::Seeding => "seeding",
        TorrentState::Paused => "paused",
        TorrentState::Error => "error",
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

pub struct Engine {
    pub id: String,
    pub display_name: String,
    pub cache_dir: PathBuf,
    metainfo: TorrentMetainfo,
    handle: Arc<dyn TorrentHandle>,
    index: PathIndex,
    waker: Arc<PieceWaker>,
    ledger: PriorityLedger,
    pins: PinStore,
    prefetch_cfg: crate::prefetch::PrefetchConfig,
    outstanding: DashMap<u64, OutstandingRead>,
    next_read_id: AtomicU64,
}

impl Engine {
    pub async fn new(
        id: String,
        display_name: String,
        metainfo: TorrentMetainfo,
        handle: Arc<dyn TorrentHandle>,
        cache_dir: PathBuf,
        config: &DaemonConfig,
    ) -> Result<Self> {
        let index = PathIndex::build(&metainfo.files, metainfo.piece_length, metainfo.num_pieces)?;
        let pins = PinStore::load(&cache_dir).await;
        pins.reconcile(&index).await;
        Ok(Self {
            id,
            display_name,
            cache_dir,
            metainfo,
            handle,
            index,
            waker: Arc::new(PieceWaker::new()),
            ledger: PriorityLedger::new(),
            pins,
            prefetch_cfg: config.prefetch.clone(),
            outstanding: DashMap::new(),
            next_read_id: AtomicU64::new(1),
        })
    }

    pub fn torrent_name(&self) -> &str {
        &self.metainfo.torrent_name
    }

    pub fn waker(&self) -> Arc<PieceWaker> {
        self.waker.clone()
    }

    /// Feed one session alert into this engine's wait/priority state.
    pub fn handle_alert(&self, alert: &Alert) {
        match &alert.kind {
            AlertKind::PieceFinished(_) | AlertKind::TorrentError(_) => self.waker.notify(),
            AlertKind::FileCompleted(_) | AlertKind::MetadataReceived => {}
        }
    }

    pub fn list(&self, path: &str) -> Result<Vec<ChildEntry>> {
        self.index.list(path)
    }

    pub fn stat(&self, path: &str) -> Result<crate::path_index::StatEntry> {
        self.index.stat(path)
    }

    pub fn file_info(&self, path: &str) -> Result<serde_json::Value> {
        let file = self.index.file_entry(path)?;
        let have_pieces = (file.first_piece..=file.last_piece)
            .filter(|&p| self.handle.has_piece(p))
            .count();
        Ok(serde_json::json!({
            "piece_length": self.metainfo.piece_length,
            "first_piece": file.first_piece,
            "last_piece": file.last_piece,
            "have_pieces": have_pieces,
            "size": file.size,
        }))
    }

    pub fn prefetch_info(&self, path: &str) -> Result<Option<PrefetchInfo>> {
        let file = self.index.file_entry(path)?;
        Ok(prefetch::compute_info(&self.prefetch_cfg, self.handle.as_ref(), &self.index, &file))
    }

    pub async fn read(
        &self,
        path: &str,
        offset: u64,
        size: u64,
        mode: ReadMode,
        timeout_s: Option<f64>,
    ) -> Result<Vec<u8>> {
        if size == 0 || size > 16 * 1024 * 1024 {
            return Err(TorrentFsError::ReadSizeInvalid);
        }
        let file = self.index.file_entry(path)?;

        let read_id = self.next_read_id.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(Notify::new());
        self.outstanding.insert(read_id, OutstandingRead { cancel: cancel.clone() });

        let result = read_scheduler::scheduled_read(
            &self.handle,
            &self.waker,
            &self.ledger,
            &file,
            offset,
            size,
            mode,
            timeout_s,
            &cancel,
        )
        .await;

        self.outstanding.remove(&read_id);
        result
    }

    /// Cancel every outstanding read on this engine (a client disconnect).
    pub fn cancel_all_reads(&self) {
        for entry in self.outstanding.iter() {
            entry.cancel.notify_waiters();
        }
    }

    pub async fn pin(&self, path: &str) -> Result<()> {
        let file = self.index.file_entry(path)?;
        for p in file.first_piece..=file.last_piece {
            self.ledger.add_pin(p);
            self.handle.set_piece_priority(p, read_scheduler::PRIORITY_READ);
        }
        self.pins.pin(path).await?;
        Ok(())
    }

    pub async fn unpin(&self, path: &str) -> Result<()> {
        let file = self.index.file_entry(path)?;
        for p in file.first_piece..=file.last_piece {
            self.ledger.remove_pin(p, self.handle.as_ref());
        }
        self.pins.unpin(path).await?;
        Ok(())
    }

    /// Iterate the files under `path` (the whole torrent if `path` is the
    /// root) and pin each, bounded by `prefetch.max_dirs`/`max_files`
    /// (spec.md §4.5 `pin-dir`).
    pub async fn pin_dir(&self, path: &str) -> Result<usize> {
        let files = self.index.files_under(path, self.prefetch_cfg.max_dirs)?;
        let limit = if self.prefetch_cfg.max_files == 0 {
            usize::MAX
        } else {
            self.prefetch_cfg.max_files as usize
        };
        let mut count = 0;
        for file in files.into_iter().take(limit) {
            for p in file.first_piece..=file.last_piece {
                self.ledger.add_pin(p);
                self.handle.set_piece_priority(p, read_scheduler::PRIORITY_READ);
            }
            self.pins.pin(&file.path).await?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn unpin_dir(&self, path: &str) -> Result<usize> {
        let files = self.index.files_under(path, self.prefetch_cfg.max_dirs)?;
        let mut count = 0;
        for file in files {
            for p in file.first_piece..=file.last_piece {
                self.ledger.remove_pin(p, self.handle.as_ref());
            }
            self.pins.unpin(&file.path).await?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn pinned(&self) -> Vec<PinnedEntry> {
        let mut entries = Vec::new();
        for path in self.pins.paths().await {
            let Ok(file) = self.index.file_entry(&path) else {
                continue;
            };
            let file_name = std::path::Path::new(&path)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&path)
                .to_string();
            entries.push(PinnedEntry {
                path,
                file_name,
                torrent_name: self.metainfo.torrent_name.clone(),
                size: file.size,
            });
        }
        entries
    }

    /// Prefetch `path`, which may name a file or a directory (spec.md §4.4
    /// trigger (b)).
    pub async fn prefetch(&self, path: &str) -> Result<()> {
        match self.index.lookup(path)? {
            Lookup::File(_) => {
                let file = self.index.file_entry(path)?;
                prefetch::prefetch_file(&self.prefetch_cfg, self.handle.as_ref(), &self.ledger, &self.index, &file).await;
            }
            Lookup::Dir { .. } => {
                let files = self.index.files_under(path, self.prefetch_cfg.max_dirs)?;
                prefetch::prefetch_files(&self.prefetch_cfg, self.handle.as_ref(), &self.ledger, &self.index, &files).await;
            }
        }
        Ok(())
    }

    /// Prefetch every eligible file in the torrent (spec.md §4.4 trigger (a),
    /// `prefetch.on_start`).
    pub async fn prefetch_all(&self) {
        if let Ok(files) = self.index.files_under("", self.prefetch_cfg.max_dirs) {
            prefetch::prefetch_files(&self.prefetch_cfg, self.handle.as_ref(), &self.ledger, &self.index, &files).await;
        }
    }

    pub fn reannounce(&self) {
        self.handle.reannounce();
    }

    pub fn status(&self) -> TorrentStatus {
        let stats = self.handle.stats();
        let num_pieces = self.handle.num_pieces();
        let have_pieces = (0..num_pieces).filter(|&p| self.handle.has_piece(p)).count() as u32;
        let files = self
            .metainfo
            .files
            .iter()
            .map(|(path, size)| {
                let have_bytes = self
                    .index
                    .file_entry(path)
                    .map(|entry| {
                        let have = (entry.first_piece..=entry.last_piece)
                            .filter(|&p| self.handle.has_piece(p))
                            .count() as u64;
                        let span = (entry.last_piece - entry.first_piece + 1) as u64;
                        entry.size.saturating_mul(have) / span.max(1)
                    })
                    .unwrap_or(0);
                FileStatus {
                    path: path.clone(),
                    size: *size,
                    have_bytes,
                }
            })
            .collect();

        TorrentStatus {
            id: self.id.clone(),
            name: self.display_name.clone(),
            torrent_name: self.metainfo.torrent_name.clone(),
            state: state_token(self.handle.state()),
            have_pieces,
            num_pieces,
            peers: stats.peers,
            download_rate_bps: stats.download_rate_bps,
            upload_rate_bps: stats.upload_rate_bps,
            files,
            trackers: self.metainfo.trackers.clone(),
        }
    }

    pub fn total_size(&self) -> u64 {
        self.metainfo.files.iter().map(|(_, size)| *size).sum()
    }

    pub fn logical_bytes(&self) -> u64 {
        logical_bytes(self.handle.as_ref(), self.total_size())
    }

    /// Persist resume data next to the pin file (spec.md §4.7).
    pub async fn save_resume_data(&self) -> std::io::Result<()> {
        let data = self.handle.save_resume_data();
        let path = self.cache_dir.join("resume.bin");
        let tmp = self.cache_dir.join("resume.bin.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await
    }
}
