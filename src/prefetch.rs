//! Head/tail prefetch policy (spec.md §4.4).
//!
//! Grounded in the same "ranges of pieces get a priority bump" shape as a
//! stream prioritizer walking urgent/high/normal piece windows, but driven
//! by byte ranges clamped into megabyte bounds rather than a fixed piece
//! count, since prefetch here targets file head/tail, not playback position.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::path_index::{FileEntry, PathIndex};
use crate::read_scheduler::{PriorityLedger, PRIORITY_PREFETCH};
use crate::session::TorrentHandle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefetchMode {
    Media,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchProfile {
    pub start_pct: f64,
    pub start_min_mb: f64,
    pub start_max_mb: f64,
    pub end_pct: f64,
    pub end_min_mb: f64,
    pub end_max_mb: f64,
}

impl Default for PrefetchProfile {
    fn default() -> Self {
        Self {
            start_pct: 0.02,
            start_min_mb: 1.0,
            start_max_mb: 16.0,
            end_pct: 0.01,
            end_min_mb: 0.5,
            end_max_mb: 8.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    pub on_start: bool,
    pub mode: PrefetchMode,
    pub media: PrefetchProfile,
    pub media_extensions: Vec<String>,
    pub other: PrefetchProfile,
    pub max_mb: u64,
    pub max_files: u32,
    pub max_dirs: u32,
    pub batch_size: u32,
    pub batch_sleep_ms: u64,
    pub scan_sleep_ms: u64,
    pub sleep_ms: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            on_start: false,
            mode: PrefetchMode::Media,
            media: PrefetchProfile::default(),
            media_extensions: vec![
                "mp4".into(),
                "mkv".into(),
                "avi".into(),
                "mov".into(),
                "webm".into(),
                "mp3".into(),
                "flac".into(),
            ],
            other: PrefetchProfile {
                start_pct: 0.01,
                start_min_mb: 0.25,
                start_max_mb: 4.0,
                end_pct: 0.0,
                end_min_mb: 0.0,
                end_max_mb: 0.0,
            },
            max_mb: 512,
            max_files: 64,
            max_dirs: 16,
            batch_size: 32,
            batch_sleep_ms: 5,
            scan_sleep_ms: 1,
            sleep_ms: 0,
        }
    }
}

/// Normalize a percent input that may be given as `0–1` or `0–100`.
fn normalize_pct(pct: f64) -> f64 {
    if pct > 1.0 {
        pct / 100.0
    } else {
        pct
    }
}

fn clamp_mb(bytes_pct: f64, file_size: u64, min_mb: f64, max_mb: f64) -> u64 {
    let raw = normalize_pct(bytes_pct) * file_size as f64;
    let min_bytes = min_mb * 1024.0 * 1024.0;
    let max_bytes = max_mb * 1024.0 * 1024.0;
    raw.clamp(min_bytes, max_bytes.max(min_bytes)) as u64
}

fn is_media(path: &str, extensions: &[String]) -> bool {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
}

/// The computed head/tail byte ranges for one file (also surfaced verbatim
/// as the `prefetch-info` RPC response, spec.md §6).
#[derive(Debug, Clone, Serialize)]
pub struct PrefetchInfo {
    pub head_bytes: u64,
    pub tail_bytes: u64,
    pub head_pieces: u32,
    pub tail_pieces: u32,
    pub have_head: bool,
    pub have_tail: bool,
}

fn profile_for<'a>(cfg: &'a PrefetchConfig, path: &str) -> Option<&'a PrefetchProfile> {
    let media = is_media(path, &cfg.media_extensions);
    match (&cfg.mode, media) {
        (PrefetchMode::Media, true) => Some(&cfg.media),
        (PrefetchMode::Media, false) => None,
        (PrefetchMode::All, _) => Some(&cfg.other),
    }
}

/// Compute the head/tail prefetch ranges for `file` under `cfg`, without
/// mutating any piece priority (used by `prefetch-info`).
pub fn compute_info(cfg: &PrefetchConfig, handle: &dyn TorrentHandle, index: &PathIndex, file: &FileEntry) -> Option<PrefetchInfo> {
    let profile = profile_for(cfg, &file.path)?;
    let head_bytes = clamp_mb(profile.start_pct, file.size, profile.start_min_mb, profile.start_max_mb).min(file.size);
    let tail_bytes = clamp_mb(profile.end_pct, file.size, profile.end_min_mb, profile.end_max_mb).min(file.size.saturating_sub(head_bytes));

    let (head_p0, head_p1, _) = index.pieces_for(file, 0, head_bytes.max(1));
    let tail_start = file.size.saturating_sub(tail_bytes);
    let (tail_p0, tail_p1, _) = index.pieces_for(file, tail_start, tail_bytes.max(1));

    let have_head = head_bytes == 0 || (head_p0..=head_p1).all(|p| handle.has_piece(p));
    let have_tail = tail_bytes == 0 || (tail_p0..=tail_p1).all(|p| handle.has_piece(p));

    Some(PrefetchInfo {
        head_bytes,
        tail_bytes,
        head_pieces: head_p1.saturating_sub(head_p0) + 1,
        tail_pieces: if tail_bytes == 0 { 0 } else { tail_p1.saturating_sub(tail_p0) + 1 },
        have_head,
        have_tail,
    })
}

/// Raise piece priority over `file`'s head and tail ranges (spec.md §4.4).
/// Returns the number of distinct pieces touched, for `max_mb`/`max_files`
/// bookkeeping by the caller.
pub async fn prefetch_file(
    cfg: &PrefetchConfig,
    handle: &dyn TorrentHandle,
    ledger: &PriorityLedger,
    index: &PathIndex,
    file: &FileEntry,
) -> u32 {
    let Some(info) = compute_info(cfg, handle, index, file) else {
        return 0;
    };
    let mut touched = 0u32;

    if info.head_bytes > 0 {
        let (p0, p1, _) = index.pieces_for(file, 0, info.head_bytes);
        touched += raise_range(handle, ledger, p0, p1, cfg).await;
    }
    if info.tail_bytes > 0 {
        let tail_start = file.size.saturating_sub(info.tail_bytes);
        let (p0, p1, _) = index.pieces_for(file, tail_start, info.tail_bytes);
        touched += raise_range(handle, ledger, p0, p1, cfg).await;
    }
    touched
}

/// Prefetch a list of files (a directory sweep or the whole torrent),
/// enforcing the global `max_mb`/`max_files` caps and pacing the sweep with
/// `scan_sleep_ms`/`sleep_ms` (spec.md §4.4). `max_dirs` is enforced by the
/// caller when it builds `files` (see [`PathIndex::files_under`]). `0` for
/// `max_mb`/`max_files` means unlimited, matching this crate's other
/// 0-means-unlimited config fields.
pub async fn prefetch_files(
    cfg: &PrefetchConfig,
    handle: &dyn TorrentHandle,
    ledger: &PriorityLedger,
    index: &PathIndex,
    files: &[FileEntry],
) -> u32 {
    let max_bytes = if cfg.max_mb == 0 { u64::MAX } else { cfg.max_mb.saturating_mul(1024 * 1024) };
    let max_files = if cfg.max_files == 0 { u32::MAX } else { cfg.max_files };

    let mut files_touched = 0u32;
    let mut bytes_seen = 0u64;
    for file in files {
        if files_touched >= max_files || bytes_seen >= max_bytes {
            break;
        }
        bytes_seen = bytes_seen.saturating_add(file.size);

        let touched = prefetch_file(cfg, handle, ledger, index, file).await;
        if touched > 0 {
            files_touched += 1;
        }

        if cfg.scan_sleep_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(cfg.scan_sleep_ms)).await;
        }
        if cfg.sleep_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(cfg.sleep_ms)).await;
        }
    }
    files_touched
}

async fn raise_range(handle: &dyn TorrentHandle, ledger: &PriorityLedger, p0: u32, p1: u32, cfg: &PrefetchConfig) -> u32 {
    let mut touched = 0u32;
    let mut since_sleep = 0u32;
    for p in p0..=p1 {
        if !handle.has_piece(p) {
            ledger.add_prefetch(p);
            handle.set_piece_priority(p, PRIORITY_PREFETCH);
            touched += 1;
        }
        since_sleep += 1;
        if since_sleep >= cfg.batch_size.max(1) {
            since_sleep = 0;
            if cfg.batch_sleep_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(cfg.batch_sleep_ms)).await;
            }
        }
    }
    touched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::memory::MemorySession;
    use crate::session::{AddOpts, SessionBackend};
    use std::io::Write;

    fn setup(size: usize, piece_length: u64) -> (std::sync::Arc<dyn TorrentHandle>, PathIndex, FileEntry) {
        let session = MemorySession::new();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let content = vec![0xABu8; size];
        let spec = serde_json::json!({
            "torrent_name": "t",
            "piece_length": piece_length,
            "files": [{"path": "movie.mp4", "content": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &content)}],
        });
        f.write_all(spec.to_string().as_bytes()).unwrap();
        let meta = session.parse_torrent_file(f.path()).unwrap();
        let handle = session
            .add_torrent(&meta, std::path::PathBuf::from("/tmp"), AddOpts::default())
            .unwrap();
        let index = PathIndex::build(&meta.files, meta.piece_length, meta.num_pieces).unwrap();
        let file = index.file_entry("movie.mp4").unwrap();
        (handle, index, file)
    }

    #[test]
    fn normalizes_percent_conventions() {
        assert_eq!(normalize_pct(0.02), 0.02);
        assert_eq!(normalize_pct(2.0), 0.02);
    }

    #[tokio::test]
    async fn media_profile_applies_to_matching_extension() {
        let (handle, index, file) = setup(1_000_000, 16_384);
        let cfg = PrefetchConfig::default();
        let ledger = PriorityLedger::new();
        let touched = prefetch_file(&cfg, handle.as_ref(), &ledger, &index, &file).await;
        assert!(touched > 0);
        assert!(handle.has_piece(0) == false);
    }

    #[tokio::test]
    async fn prefetch_files_stops_at_max_files() {
        let session = MemorySession::new();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let content = vec![0xCDu8; 1_000_000];
        let spec = serde_json::json!({
            "torrent_name": "multi",
            "piece_length": 16_384,
            "files": [
                {"path": "a.mp4", "content": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &content)},
                {"path": "b.mp4", "content": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &content)},
            ],
        });
        f.write_all(spec.to_string().as_bytes()).unwrap();
        let meta = session.parse_torrent_file(f.path()).unwrap();
        let handle = session.add_torrent(&meta, std::path::PathBuf::from("/tmp"), AddOpts::default()).unwrap();
        let index = PathIndex::build(&meta.files, meta.piece_length, meta.num_pieces).unwrap();
        let files = index.files_under("", 0).unwrap();

        let mut cfg = PrefetchConfig::default();
        cfg.max_files = 1;
        let ledger = PriorityLedger::new();
        let touched = prefetch_files(&cfg, handle.as_ref(), &ledger, &index, &files).await;
        assert_eq!(touched, 1);
    }

    #[tokio::test]
    async fn non_media_file_skipped_in_media_mode() {
        let session = MemorySession::new();
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let content = vec![0u8; 100_000];
        let spec = serde_json::json!({
            "torrent_name": "t",
            "piece_length": 16384,
            "files": [{"path": "readme.txt", "content": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &content)}],
        });
        f.write_all(spec.to_string().as_bytes()).unwrap();
        let meta = session.parse_torrent_file(f.path()).unwrap();
        let handle = session.add_torrent(&meta, std::path::PathBuf::from("/tmp"), AddOpts::default()).unwrap();
        let index = PathIndex::build(&meta.files, meta.piece_length, meta.num_pieces).unwrap();
        let file = index.file_entry("readme.txt").unwrap();
        let cfg = PrefetchConfig::default();
        assert!(compute_info(&cfg, handle.as_ref(), &index, &file).is_none());
    }
}
