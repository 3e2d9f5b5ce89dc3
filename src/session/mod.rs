//! Trait boundary for the underlying BitTorrent session.
//!
//! spec.md §1 treats "the underlying BitTorrent session library" as an
//! external collaborator, "assumed to provide session, torrent handle,
//! piece-priority, deadline, alerts, and resume-data primitives equivalent
//! to a modern libtorrent." This module is that boundary: [`SessionBackend`]
//! and [`TorrentHandle`] name exactly those primitives. [`memory`] ships a
//! deterministic in-process implementation used by tests and by the daemon
//! when no real session library is linked in.

pub mod memory;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

/// Parsed torrent metadata, as a real session library would hand back after
/// reading a `.torrent` file's metainfo dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentMetainfo {
    /// Infohash, as lowercase hex (spec.md §3 "Torrent" `id`).
    pub infohash: String,
    /// Metadata-provided torrent name (spec.md §3 `torrent_name`).
    pub torrent_name: String,
    pub piece_length: u64,
    pub num_pieces: u32,
    /// Ordered `(path, size)` pairs, in the order they're concatenated in storage.
    pub files: Vec<(String, u64)>,
    /// Tracker URLs (or `torrentfs://<name>` alias placeholders, substituted
    /// against `trackers.aliases` at load time — spec.md §6 "Configuration").
    pub trackers: Vec<String>,
}

/// Options applied when a torrent is added to the session.
#[derive(Debug, Clone, Default)]
pub struct AddOpts {
    /// Skip hash-checking of existing cache data (spec.md §4.7).
    pub skip_check: bool,
    /// Resume data blob from a prior run, if any (spec.md §4.7).
    pub resume_data: Option<Vec<u8>>,
}

/// Coarse torrent state (spec.md §4.7 `status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentState {
    CheckingFiles,
    Downloading,
    Seeding,
    Paused,
    Error,
}

/// Snapshot of a torrent's network activity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TorrentStats {
    pub peers: u32,
    pub download_rate_bps: u64,
    pub upload_rate_bps: u64,
}

/// An alert dispatched by the session's alert stream (spec.md §5 "session alerts thread").
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub torrent_id: String,
    pub kind: AlertKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertKind {
    PieceFinished(u32),
    FileCompleted(usize),
    MetadataReceived,
    TorrentError(String),
}

/// A handle to one torrent inside the session.
///
/// All piece-priority and deadline mutation is expected to be cheap and
/// non-blocking (the session library serializes it internally); reads may
/// block only inside [`TorrentHandle::read_bytes`] when called for bytes not
/// yet downloaded — callers in this crate never do that, instead waiting for
/// `has_piece` via the alert stream first (spec.md §4.3).
pub trait TorrentHandle: Send + Sync {
    fn piece_length(&self) -> u64;
    fn num_pieces(&self) -> u32;
    fn has_piece(&self, index: u32) -> bool;

    /// Raise or lower a piece's download priority. `0` means "do not download".
    fn set_piece_priority(&self, index: u32, priority: u8);

    /// Request the piece be completed by `deadline_ms_from_now` milliseconds
    /// from now (spec.md §4.3 step 2). Implementations need not clear
    /// deadlines explicitly; a stale deadline on an already-downgraded piece
    /// is benign (spec.md §4.3 "Cancellation").
    fn set_piece_deadline(&self, index: u32, deadline_ms_from_now: u64);

    /// Read bytes already resident on local storage. Callers must only
    /// request ranges fully covered by `have` pieces.
    fn read_bytes(&self, offset: u64, len: u64) -> Result<Vec<u8>>;

    fn state(&self) -> TorrentState;
    fn stats(&self) -> TorrentStats;

    /// Serialize resume data for persistence (spec.md §4.7 "Resume data").
    fn save_resume_data(&self) -> Vec<u8>;

    fn reannounce(&self);

    /// Escape hatch for backend-specific test helpers (e.g.
    /// [`memory::MemoryTorrentHandle`]'s piece-completion driver).
    fn as_any(&self) -> &dyn std::any::Any;
}

/// The session itself: owns zero or more torrent handles and an alert stream.
pub trait SessionBackend: Send + Sync {
    /// Parse a `.torrent` file's metadata. A real backend calls into the
    /// session library's metainfo parser; see [`memory::MemorySession`] for
    /// the deterministic JSON-sidecar format used in this crate's tests.
    fn parse_torrent_file(&self, path: &Path) -> Result<TorrentMetainfo>;

    /// Register a torrent with the session, rooted at `cache_dir`.
    fn add_torrent(
        &self,
        metainfo: &TorrentMetainfo,
        cache_dir: PathBuf,
        opts: AddOpts,
    ) -> Result<Arc<dyn TorrentHandle>>;

    /// Remove a torrent's handle from the session.
    fn remove_torrent(&self, infohash: &str);

    /// Subscribe to the session's alert stream.
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Alert>;
}
