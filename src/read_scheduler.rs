//! Priority-driven read scheduler (spec.md §4.3).
//!
//! A `read` blocks a worker task — never the RPC connection task handling
//! other commands — on a [`tokio::sync::Notify`] that the engine's alert
//! pump wakes whenever a piece completes. There is no sync/async boundary to
//! bridge here (unlike a FUSE kernel callback), so a condvar-style
//! wait/re-check loop built on `Notify` stands in for the session library's
//! condition variable.

use std::cmp::max;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Result, TorrentFsError};
use crate::path_index::FileEntry;
use crate::session::TorrentHandle;

/// Default priority for a piece nothing currently wants.
pub const PRIORITY_IDLE: u8 = 1;
/// Priority raised by an in-flight foreground read.
pub const PRIORITY_READ: u8 = 7;
/// Priority raised by prefetch (spec.md §4.4): below a live read, above idle.
pub const PRIORITY_PREFETCH: u8 = 6;

/// Spacing between sequential pieces' deadlines, biasing the session toward
/// delivering a streaming read in piece order.
const DEADLINE_GAP_MS: u64 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Auto,
    Sync,
    Async,
}

impl ReadMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "auto" => Ok(ReadMode::Auto),
            "sync" => Ok(ReadMode::Sync),
            "async" => Ok(ReadMode::Async),
            other => Err(TorrentFsError::BadRequest(format!("unknown read mode: {other}"))),
        }
    }
}

/// Tracks, per torrent, which pieces currently have a priority reason to stay
/// raised (an active read, a pin, or a prefetch) so that a cancelled read can
/// safely downgrade only pieces nothing else still wants (spec.md §4.3
/// "Cancellation").
#[derive(Default)]
pub struct PriorityLedger {
    reasons: dashmap::DashMap<u32, PieceReasons>,
}

#[derive(Default, Clone, Copy)]
struct PieceReasons {
    reads: u32,
    pins: u32,
    prefetches: u32,
}

impl PieceReasons {
    fn is_empty(&self) -> bool {
        self.reads == 0 && self.pins == 0 && self.prefetches == 0
    }

    fn floor(&self) -> u8 {
        if self.reads > 0 || self.pins > 0 {
            PRIORITY_READ
        } else if self.prefetches > 0 {
            PRIORITY_PREFETCH
        } else {
            PRIORITY_IDLE
        }
    }
}

impl PriorityLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_read(&self, piece: u32) {
        self.reasons.entry(piece).or_default().reads += 1;
    }

    /// Release a read's hold on a piece, downgrading it to the next-highest
    /// surviving reason (tie-break: elementwise max, spec.md §4.3).
    pub fn release_read(&self, piece: u32, handle: &dyn TorrentHandle) {
        let floor = {
            let mut entry = self.reasons.entry(piece).or_default();
            entry.reads = entry.reads.saturating_sub(1);
            let floor = entry.floor();
            if entry.is_empty() {
                drop(entry);
                self.reasons.remove(&piece);
            }
            floor
        };
        handle.set_piece_priority(piece, max(floor, PRIORITY_IDLE));
    }

    pub fn add_pin(&self, piece: u32) {
        self.reasons.entry(piece).or_default().pins += 1;
    }

    pub fn remove_pin(&self, piece: u32, handle: &dyn TorrentHandle) {
        let floor = {
            let mut entry = self.reasons.entry(piece).or_default();
            entry.pins = entry.pins.saturating_sub(1);
            let floor = entry.floor();
            if entry.is_empty() {
                drop(entry);
                self.reasons.remove(&piece);
            }
            floor
        };
        handle.set_piece_priority(piece, max(floor, PRIORITY_IDLE));
    }

    pub fn add_prefetch(&self, piece: u32) {
        self.reasons.entry(piece).or_default().prefetches += 1;
    }

    pub fn remove_prefetch(&self, piece: u32, handle: &dyn TorrentHandle) {
        let floor = {
            let mut entry = self.reasons.entry(piece).or_default();
            entry.prefetches = entry.prefetches.saturating_sub(1);
            let floor = entry.floor();
            if entry.is_empty() {
                drop(entry);
                self.reasons.remove(&piece);
            }
            floor
        };
        handle.set_piece_priority(piece, max(floor, PRIORITY_IDLE));
    }
}

/// Wakes every worker blocked on piece completion for one torrent. The
/// engine's alert pump calls [`PieceWaker::notify`] on every `piece_finished`
/// / `torrent_error` alert; it carries no payload, each waiter re-checks
/// `has_piece` itself (spec.md §4.3 step 4).
#[derive(Default)]
pub struct PieceWaker {
    notify: Notify,
    generation: AtomicU64,
}

impl PieceWaker {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn notify(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn generation_now(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn wait_for_change(&self, since: u64) {
        if self.generation_now() != since {
            return;
        }
        self.notify.notified().await;
    }
}

/// Read the bytes `[offset, offset+length)` of `file`, waiting per `mode` for
/// pieces not yet downloaded (spec.md §4.3).
pub async fn scheduled_read(
    handle: &Arc<dyn TorrentHandle>,
    waker: &PieceWaker,
    ledger: &PriorityLedger,
    file: &FileEntry,
    offset: u64,
    length: u64,
    mode: ReadMode,
    timeout_s: Option<f64>,
    cancel: &tokio::sync::Notify,
) -> Result<Vec<u8>> {
    let effective_len = length.min(file.size.saturating_sub(offset));
    if effective_len == 0 {
        return Ok(Vec::new());
    }
    let start = file.offset + offset;
    let end = start + effective_len - 1;
    let piece_length = handle.piece_length().max(1);
    let p0 = (start / piece_length) as u32;
    let p1 = (end / piece_length) as u32;

    if mode == ReadMode::Async {
        return read_available_prefix(handle, file, offset, effective_len, p0, p1, piece_length);
    }

    for p in p0..=p1 {
        ledger.add_read(p);
    }
    for (k, p) in (p0..=p1).enumerate() {
        handle.set_piece_priority(p, PRIORITY_READ);
        handle.set_piece_deadline(p, k as u64 * DEADLINE_GAP_MS);
    }

    let deadline = timeout_s.map(|s| Instant::now() + Duration::from_secs_f64(s.max(0.0)));
    let result = loop {
        if (p0..=p1).all(|p| handle.has_piece(p)) {
            break handle.read_bytes(start, effective_len);
        }

        let since = waker.generation_now();
        let wait = waker.wait_for_change(since);
        tokio::select! {
            biased;
            _ = cancel.notified() => {
                break Err(TorrentFsError::Cancelled);
            }
            _ = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                break Err(TorrentFsError::Timeout);
            }
            _ = wait => {
                continue;
            }
        }
    };

    for p in p0..=p1 {
        ledger.release_read(p, handle.as_ref());
    }
    result
}

fn read_available_prefix(
    handle: &Arc<dyn TorrentHandle>,
    file: &FileEntry,
    offset: u64,
    effective_len: u64,
    p0: u32,
    p1: u32,
    piece_length: u64,
) -> Result<Vec<u8>> {
    if !handle.has_piece(p0) {
        return Err(TorrentFsError::WouldBlock);
    }
    let mut available_through = p0;
    for p in p0..=p1 {
        if handle.has_piece(p) {
            available_through = p;
        } else {
            break;
        }
    }
    let start = file.offset + offset;
    let prefix_end_exclusive = if available_through == p1 {
        start + effective_len
    } else {
        (available_through as u64 + 1) * piece_length
    };
    let len = prefix_end_exclusive.saturating_sub(start);
    handle.read_bytes(start, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::memory::{MemorySession, MemoryTorrentHandle};
    use crate::session::{AddOpts, SessionBackend};
    use std::io::Write;

    fn setup(content: &[u8], piece_length: u64) -> (Arc<dyn TorrentHandle>, FileEntry) {
        let session = MemorySession::new();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let spec = serde_json::json!({
            "torrent_name": "t",
            "piece_length": piece_length,
            "files": [{"path": "f.bin", "content": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, content)}],
        });
        f.write_all(spec.to_string().as_bytes()).unwrap();
        let meta = session.parse_torrent_file(f.path()).unwrap();
        let handle = session
            .add_torrent(&meta, std::path::PathBuf::from("/tmp"), AddOpts::default())
            .unwrap();
        let file = FileEntry {
            path: "f.bin".into(),
            size: content.len() as u64,
            offset: 0,
            first_piece: 0,
            last_piece: meta.num_pieces.saturating_sub(1),
            offset_in_first_piece: 0,
            offset_in_last_piece: 0,
        };
        (handle, file)
    }

    #[tokio::test]
    async fn async_mode_returns_available_prefix_only() {
        let (handle, file) = setup(b"0123456789abcdef", 4);
        let mem = handle.as_any().downcast_ref::<MemoryTorrentHandle>().unwrap();
        mem.mark_have(0);
        let waker = PieceWaker::new();
        let ledger = PriorityLedger::new();
        let cancel = tokio::sync::Notify::new();
        let out = scheduled_read(&handle, &waker, &ledger, &file, 0, 16, ReadMode::Async, None, &cancel)
            .await
            .unwrap();
        assert_eq!(out, b"0123");
    }

    #[tokio::test]
    async fn async_mode_would_block_when_first_piece_missing() {
        let (handle, file) = setup(b"0123456789abcdef", 4);
        let waker = PieceWaker::new();
        let ledger = PriorityLedger::new();
        let cancel = tokio::sync::Notify::new();
        let err = scheduled_read(&handle, &waker, &ledger, &file, 0, 16, ReadMode::Async, None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TorrentFsError::WouldBlock));
    }

    #[tokio::test]
    async fn auto_mode_waits_then_returns_once_pieces_complete() {
        let (handle, file) = setup(b"0123456789abcdef", 4);
        let waker = Arc::new(PieceWaker::new());
        let ledger = PriorityLedger::new();
        let cancel = tokio::sync::Notify::new();

        let handle2 = handle.clone();
        let waker2 = waker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let mem = handle2.as_any().downcast_ref::<MemoryTorrentHandle>().unwrap();
            mem.mark_have(0);
            mem.mark_have(1);
            mem.mark_have(2);
            mem.mark_have(3);
            waker2.notify();
        });

        let out = scheduled_read(&handle, &waker, &ledger, &file, 0, 16, ReadMode::Auto, Some(5.0), &cancel)
            .await
            .unwrap();
        assert_eq!(out, b"0123456789abcdef");
    }

    #[tokio::test]
    async fn auto_mode_times_out_when_pieces_never_arrive() {
        let (handle, file) = setup(b"0123456789abcdef", 4);
        let waker = PieceWaker::new();
        let ledger = PriorityLedger::new();
        let cancel = tokio::sync::Notify::new();
        let err = scheduled_read(&handle, &waker, &ledger, &file, 0, 16, ReadMode::Auto, Some(0.02), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TorrentFsError::Timeout));
    }

    #[test]
    fn priority_ledger_downgrades_to_idle_once_unreferenced() {
        let (handle, _file) = futures_test_handle();
        let ledger = PriorityLedger::new();
        ledger.add_read(3);
        ledger.add_read(3);
        handle.set_piece_priority(3, PRIORITY_READ);
        ledger.release_read(3, handle.as_ref());
        assert_eq!(
            handle
                .as_any()
                .downcast_ref::<MemoryTorrentHandle>()
                .unwrap()
                .priority(3),
            PRIORITY_READ
        );
        ledger.release_read(3, handle.as_ref());
        assert_eq!(
            handle
                .as_any()
                .downcast_ref::<MemoryTorrentHandle>()
                .unwrap()
                .priority(3),
            PRIORITY_IDLE
        );
    }

    fn futures_test_handle() -> (Arc<dyn TorrentHandle>, FileEntry) {
        setup(b"0123456789abcdef", 4)
    }
}
