//! Multi-torrent registry (spec.md §4.8): `{id -> Engine}` plus the
//! `{name -> id | ambiguous}` secondary index used for `torrent` field
//! resolution.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::cache_manager::{self, CacheSize, PruneResult};
use crate::config::DaemonConfig;
use crate::engine::Engine;
use crate::error::{Result, TorrentFsError};
use crate::session::{AddOpts, Alert, SessionBackend};

#[derive(Debug, Clone, Serialize)]
pub struct TorrentSummary {
    pub id: String,
    pub name: String,
    pub torrent_name: String,
    pub cache: String,
}

pub struct Manager {
    cache_root: PathBuf,
    config: DaemonConfig,
    session: Arc<dyn SessionBackend>,
    engines: DashMap<String, Arc<Engine>>,
    base_counts: DashMap<String, u32>,
    display_to_id: DashMap<String, String>,
}

impl Manager {
    pub fn new(cache_root: PathBuf, config: DaemonConfig, session: Arc<dyn SessionBackend>) -> Self {
        Self {
            cache_root,
            config,
            session,
            engines: DashMap::new(),
            base_counts: DashMap::new(),
            display_to_id: DashMap::new(),
        }
    }

    fn short_id(id: &str) -> &str {
        &id[..id.len().min(8)]
    }

    async fn register(&self, torrent_file: &Path) -> Result<String> {
        let mut metainfo = self.session.parse_torrent_file(torrent_file)?;
        metainfo.trackers = resolve_trackers(&metainfo.trackers, &self.config.trackers.aliases);
        let id = metainfo.infohash.clone();
        if self.engines.contains_key(&id) {
            return Ok(id);
        }

        let cache_dir = self.cache_root.join(&id);
        tokio::fs::create_dir_all(&cache_dir).await?;
        let resume_data = tokio::fs::read(cache_dir.join("resume.bin")).await.ok();
        let opts = AddOpts {
            skip_check: self.config.skip_check,
            resume_data,
        };
        let handle = self.session.add_torrent(&metainfo, cache_dir.clone(), opts)?;

        let base = metainfo.torrent_name.clone();
        let ordinal = {
            let mut count = self.base_counts.entry(base.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let display_name = if ordinal == 1 {
            self.display_to_id.insert(base.clone(), id.clone());
            base.clone()
        } else {
            if ordinal == 2 {
                self.display_to_id.remove(&base);
            }
            let name = format!("{base}__{}", Self::short_id(&id));
            self.display_to_id.insert(name.clone(), id.clone());
            name
        };

        let engine = Engine::new(id.clone(), display_name, metainfo, handle, cache_dir, &self.config).await?;
        if self.config.prefetch.on_start {
            engine.prefetch_all().await;
        }
        self.engines.insert(id.clone(), Arc::new(engine));
        Ok(id)
    }

    pub async fn add_torrent_file(&self, path: &Path) -> Result<String> {
        self.register(path).await
    }

    pub async fn remove_torrent(&self, id: &str) -> Result<()> {
        if let Some((_, engine)) = self.engines.remove(id) {
            engine.cancel_all_reads();
            self.session.remove_torrent(id);
            let _ = tokio::fs::remove_dir_all(&engine.cache_dir).await;
        }
        Ok(())
    }

    /// Resolve an incoming `torrent` field per spec.md §4.8's three-step rule.
    pub fn resolve(&self, torrent: &str) -> Result<Arc<Engine>> {
        if torrent.is_empty() {
            return Err(TorrentFsError::TorrentRequired);
        }
        if let Some(engine) = self.engines.get(torrent) {
            return Ok(engine.clone());
        }
        if let Some(id) = self.display_to_id.get(torrent) {
            if let Some(engine) = self.engines.get(id.as_str()) {
                return Ok(engine.clone());
            }
        }
        if self.base_counts.get(torrent).map(|c| *c > 1).unwrap_or(false) {
            return Err(TorrentFsError::TorrentNameAmbiguous(torrent.to_string()));
        }
        Err(TorrentFsError::TorrentNotFound(torrent.to_string()))
    }

    pub fn list(&self) -> Vec<TorrentSummary> {
        self.engines
            .iter()
            .map(|entry| TorrentSummary {
                id: entry.id.clone(),
                name: entry.display_name.clone(),
                torrent_name: entry.torrent_name().to_string(),
                cache: entry.cache_dir.to_string_lossy().to_string(),
            })
            .collect()
    }

    pub fn engines(&self) -> Vec<Arc<Engine>> {
        self.engines.iter().map(|e| e.clone()).collect()
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn dispatch_alert(&self, alert: &Alert) {
        if let Some(engine) = self.engines.get(&alert.torrent_id) {
            engine.handle_alert(alert);
        }
    }

    pub async fn cache_size(&self) -> std::io::Result<CacheSize> {
        let mut logical = 0u64;
        for engine in self.engines() {
            logical += engine.logical_bytes();
        }
        let disk = cache_manager::disk_bytes(&self.cache_root).await?;
        Ok(CacheSize { logical_bytes: logical, disk_bytes: disk })
    }

    pub async fn prune_cache(&self, dry_run: bool) -> std::io::Result<PruneResult> {
        let loaded: HashSet<String> = self.engines.iter().map(|e| e.id.clone()).collect();
        cache_manager::prune_cache(&self.cache_root, &loaded, dry_run).await
    }

    /// Fetch-and-register a magnet link. Real magnet/DHT resolution is the
    /// session library's job; this in-memory backend instead expects the
    /// deterministic fixture payload carried in a `torrentfs-spec` query
    /// parameter (base64-encoded JSON), so end-to-end `add-magnet` flows can
    /// be exercised without a real swarm.
    pub async fn add_magnet(&self, magnet: &str, torrent_dir: &Path) -> Result<String> {
        let spec_b64 = extract_query_param(magnet, "torrentfs-spec")
            .ok_or_else(|| TorrentFsError::BadRequest("magnet missing torrentfs-spec fixture payload".into()))?;
        use base64::Engine as _;
        let spec_json = base64::engine::general_purpose::STANDARD
            .decode(spec_b64.as_bytes())
            .map_err(|e| TorrentFsError::BadRequest(format!("invalid torrentfs-spec: {e}")))?;

        tokio::fs::create_dir_all(torrent_dir).await?;
        let stable_name = format!("magnet-{}.torrent", stable_name_hash(magnet));
        let dest = torrent_dir.join(stable_name);
        tokio::fs::write(&dest, &spec_json).await?;
        self.register(&dest).await
    }

    /// Fetch-and-register a `source-add` source of the `archive:<id>` or URL
    /// forms, via the same `torrentfs-spec` fixture convention `add_magnet`
    /// uses — this backend resolves neither archive.org ids nor real URLs.
    pub async fn add_source(&self, source: &str, torrent_dir: &Path) -> Result<String> {
        let spec_b64 = extract_query_param(source, "torrentfs-spec")
            .ok_or_else(|| TorrentFsError::BadRequest("source missing torrentfs-spec fixture payload".into()))?;
        use base64::Engine as _;
        let spec_json = base64::engine::general_purpose::STANDARD
            .decode(spec_b64.as_bytes())
            .map_err(|e| TorrentFsError::BadRequest(format!("invalid torrentfs-spec: {e}")))?;

        tokio::fs::create_dir_all(torrent_dir).await?;
        let stable_name = format!("source-{}.torrent", stable_name_hash(source));
        let dest = torrent_dir.join(stable_name);
        tokio::fs::write(&dest, &spec_json).await?;
        self.register(&dest).await
    }
}

/// Substitute `torrentfs://<name>` tracker placeholders with the URL lists
/// configured under `trackers.aliases`; anything else passes through unchanged.
fn resolve_trackers(trackers: &[String], aliases: &HashMap<String, Vec<String>>) -> Vec<String> {
    let mut resolved = Vec::with_capacity(trackers.len());
    for tracker in trackers {
        if let Some(name) = tracker.strip_prefix("torrentfs://") {
            if let Some(urls) = aliases.get(name) {
                resolved.extend(urls.iter().cloned());
                continue;
            }
        }
        resolved.push(tracker.clone());
    }
    resolved
}

fn extract_query_param(url: &str, key: &str) -> Option<String> {
    let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            if k == key {
                return Some(v.to_string());
            }
        }
    }
    None
}

fn stable_name_hash(input: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
