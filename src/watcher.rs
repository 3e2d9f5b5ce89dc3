//! Poll-based directory watcher (spec.md §4.9).
//!
//! Polls the watched directory at a fixed interval; renames are modelled as
//! remove+add since a poll loop cannot distinguish them from the directory
//! listing alone (spec.md §9 "watcher rename-in-place").

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::manager::Manager;

async fn scan(dir: &Path) -> HashMap<String, PathBuf> {
    let mut found = HashMap::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "watcher scan failed");
            return found;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("torrent") {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                found.insert(name.to_string(), path);
            }
        }
    }
    found
}

/// Run one poll cycle: diff `dir`'s `*.torrent` files against `known`,
/// adding new ones and tearing down removed ones. Returns the updated
/// `known` set (file name -> id) for the next cycle.
pub async fn poll_once(manager: &Manager, dir: &Path, known: &mut HashMap<String, String>) {
    let current = scan(dir).await;

    let removed: Vec<String> = known.keys().filter(|name| !current.contains_key(*name)).cloned().collect();
    for name in removed {
        if let Some(id) = known.remove(&name) {
            tracing::info!(file = %name, %id, "torrent file removed, tearing down engine");
            if let Err(err) = manager.remove_torrent(&id).await {
                tracing::warn!(file = %name, error = %err, "failed to remove torrent");
            }
        }
    }

    let known_names: HashSet<String> = known.keys().cloned().collect();
    for (name, path) in current {
        if known_names.contains(&name) {
            continue;
        }
        match manager.add_torrent_file(&path).await {
            Ok(id) => {
                tracing::info!(file = %name, %id, "torrent file added");
                known.insert(name, id);
            }
            Err(err) => {
                tracing::warn!(file = %name, error = %err, "failed to add torrent file");
            }
        }
    }
}

/// Poll `dir` forever at `interval`, applying diffs to `manager`. Intended to
/// run as its own task for the daemon's lifetime.
pub async fn run(manager: std::sync::Arc<Manager>, dir: PathBuf, interval: Duration) {
    let mut known = HashMap::new();
    loop {
        poll_once(&manager, &dir, &mut known).await;
        tokio::time::sleep(interval).await;
    }
}
