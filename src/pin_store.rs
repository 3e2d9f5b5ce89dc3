//! Persistent pin set (spec.md §4.5).
//!
//! Persisted as `<cache_dir>/.pinned.json`, written via temp-file-then-rename
//! the way the engine persists resume data (spec.md §4.7), so a crash never
//! leaves a half-written file. A corrupt or truncated file on load falls back
//! to an empty set with a warning rather than failing torrent startup.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::path_index::PathIndex;

/// One torrent-relative path held in the pin set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct PinnedPath(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinnedEntry {
    pub path: String,
    pub file_name: String,
    pub torrent_name: String,
    pub size: u64,
}

pub struct PinStore {
    file: PathBuf,
    pins: tokio::sync::RwLock<BTreeSet<String>>,
}

impl PinStore {
    /// Load the pin set from `cache_dir/.pinned.json`, tolerating a missing
    /// or corrupt file.
    pub async fn load(cache_dir: &Path) -> Self {
        let file = cache_dir.join(".pinned.json");
        let pins = match tokio::fs::read(&file).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeSet<String>>(&bytes) {
                Ok(set) => set,
                Err(err) => {
                    tracing::warn!(path = %file.display(), error = %err, "pin store corrupt, starting empty");
                    BTreeSet::new()
                }
            },
            Err(_) => BTreeSet::new(),
        };
        Self {
            file,
            pins: tokio::sync::RwLock::new(pins),
        }
    }

    async fn persist(&self, pins: &BTreeSet<String>) -> std::io::Result<()> {
        let tmp = self.file.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(pins).unwrap_or_default();
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.file).await
    }

    pub async fn pin(&self, path: &str) -> std::io::Result<()> {
        let mut pins = self.pins.write().await;
        pins.insert(path.to_string());
        self.persist(&pins).await
    }

    pub async fn unpin(&self, path: &str) -> std::io::Result<()> {
        let mut pins = self.pins.write().await;
        pins.remove(path);
        self.persist(&pins).await
    }

    pub async fn is_pinned(&self, path: &str) -> bool {
        self.pins.read().await.contains(path)
    }

    pub async fn paths(&self) -> Vec<String> {
        self.pins.read().await.iter().cloned().collect()
    }

    /// Drop pins that no longer resolve to a file in `index`, persisting the
    /// cleaned-up set and warning once per dropped path (spec.md §3 `PinSet`
    /// invariant: every path in the set resolves to a `FileEntry` at load time).
    pub async fn reconcile(&self, index: &PathIndex) {
        let mut pins = self.pins.write().await;
        let stale: Vec<String> = pins.iter().filter(|path| index.file_entry(path).is_err()).cloned().collect();
        if stale.is_empty() {
            return;
        }
        for path in &stale {
            tracing::warn!(path = %path, "dropping stale pin: no longer resolves to a file");
            pins.remove(path);
        }
        if let Err(err) = self.persist(&pins).await {
            tracing::warn!(error = %err, "failed to persist pin set after reconciliation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pin_then_unpin_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = PinStore::load(dir.path()).await;
        store.pin("a/b.mp4").await.unwrap();
        assert!(store.is_pinned("a/b.mp4").await);

        let reloaded = PinStore::load(dir.path()).await;
        assert_eq!(reloaded.paths().await, vec!["a/b.mp4".to_string()]);

        store.unpin("a/b.mp4").await.unwrap();
        assert!(!store.is_pinned("a/b.mp4").await);
    }

    #[tokio::test]
    async fn reconcile_drops_pins_that_no_longer_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let store = PinStore::load(dir.path()).await;
        store.pin("a/b.txt").await.unwrap();
        store.pin("gone.bin").await.unwrap();

        let index = PathIndex::build(&[("a/b.txt".to_string(), 10)], 16, 1).unwrap();
        store.reconcile(&index).await;

        assert_eq!(store.paths().await, vec!["a/b.txt".to_string()]);
        let reloaded = PinStore::load(dir.path()).await;
        assert_eq!(reloaded.paths().await, vec!["a/b.txt".to_string()]);
    }

    #[tokio::test]
    async fn corrupt_file_falls_back_to_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(".pinned.json"), b"{not json")
            .await
            .unwrap();
        let store = PinStore::load(dir.path()).await;
        assert!(store.paths().await.is_empty());
    }
}
