//! Cache accounting and pruning (spec.md §4.6).

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;

use crate::session::TorrentHandle;

/// `logical_bytes` / `disk_bytes` pair returned by `cache-size`.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheSize {
    pub logical_bytes: u64,
    pub disk_bytes: u64,
}

/// Sum of file sizes weighted by each torrent's `have` fraction.
pub fn logical_bytes(handle: &dyn TorrentHandle, total_size: u64) -> u64 {
    let num_pieces = handle.num_pieces().max(1);
    let have_count = (0..handle.num_pieces()).filter(|&p| handle.has_piece(p)).count() as u64;
    total_size.saturating_mul(have_count) / num_pieces as u64
}

/// Walk `dir` recursively, summing on-disk file sizes.
pub async fn disk_bytes(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(e) => e,
            Err(_) => continue,
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

#[derive(Debug, Clone, Serialize)]
pub struct PruneResult {
    pub removed: Vec<String>,
    pub skipped: Vec<String>,
}

/// List (and, unless `dry_run`, remove) `<id>` subdirectories of `cache_root`
/// that belong to no currently-loaded torrent. Never touches a loaded
/// torrent's directory.
pub async fn prune_cache(cache_root: &Path, loaded_ids: &HashSet<String>, dry_run: bool) -> std::io::Result<PruneResult> {
    let mut removed = Vec::new();
    let mut skipped = Vec::new();

    let mut entries = match tokio::fs::read_dir(cache_root).await {
        Ok(e) => e,
        Err(_) => return Ok(PruneResult { removed, skipped }),
    };
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if loaded_ids.contains(&name) {
            skipped.push(name);
            continue;
        }
        if dry_run {
            removed.push(name);
        } else {
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed.push(name),
                Err(err) => {
                    tracing::warn!(dir = %name, error = %err, "failed to prune cache directory");
                    skipped.push(name);
                }
            }
        }
    }
    Ok(PruneResult { removed, skipped })
}
