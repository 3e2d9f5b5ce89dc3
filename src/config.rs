//! Daemon configuration (spec.md §6 "Configuration").
//!
//! Mirrors the shape of a conventional config-struct-of-substructs loader —
//! one `Default` impl per substruct, a `from_file`/`from_default_locations`
//! search, a `validate` pass — but stays thin: no env/CLI merge layers, since
//! the config loader here hands the engine a plain key/value map and CLI
//! flags are applied by the caller directly onto the loaded struct.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TorrentFsError};
use crate::prefetch::PrefetchConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckingConfig {
    /// 0 means unlimited.
    pub max_active: u32,
}

impl Default for CheckingConfig {
    fn default() -> Self {
        Self { max_active: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeConfig {
    /// 0 disables periodic resume-data saves.
    pub save_interval_s: u64,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self { save_interval_s: 120 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrackersConfig {
    /// Maps `torrentfs://<name>` to tracker URL lists, substituted at torrent load.
    pub aliases: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub max_metadata_mb: u32,
    pub skip_check: bool,
    pub checking: CheckingConfig,
    pub resume: ResumeConfig,
    pub trackers: TrackersConfig,
    pub prefetch: PrefetchConfig,

    #[serde(skip)]
    pub socket: Option<PathBuf>,
    #[serde(skip)]
    pub cache_dir: PathBuf,
    #[serde(skip)]
    pub torrent_dir: Option<PathBuf>,
    #[serde(skip)]
    pub torrent_file: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            max_metadata_mb: 16,
            skip_check: false,
            checking: CheckingConfig::default(),
            resume: ResumeConfig::default(),
            trackers: TrackersConfig::default(),
            prefetch: PrefetchConfig::default(),
            socket: None,
            cache_dir: PathBuf::from("cache"),
            torrent_dir: None,
            torrent_file: None,
        }
    }
}

/// Fields recognized from the JSON document; anything else is ignored with a warning.
#[derive(Debug, Deserialize)]
struct RawConfig {
    max_metadata_mb: Option<u32>,
    skip_check: Option<bool>,
    checking: Option<CheckingConfig>,
    resume: Option<ResumeConfig>,
    trackers: Option<TrackersConfig>,
    prefetch: Option<PrefetchConfig>,
    #[serde(flatten)]
    unknown: HashMap<String, serde_json::Value>,
}

impl DaemonConfig {
    /// Parse a config document, applying recognized keys over the defaults
    /// and warning on anything unrecognized.
    pub fn from_str(raw: &str) -> Result<Self> {
        let parsed: RawConfig = serde_json::from_str(raw)?;
        let mut cfg = DaemonConfig::default();
        if let Some(v) = parsed.max_metadata_mb {
            cfg.max_metadata_mb = v;
        }
        if let Some(v) = parsed.skip_check {
            cfg.skip_check = v;
        }
        if let Some(v) = parsed.checking {
            cfg.checking = v;
        }
        if let Some(v) = parsed.resume {
            cfg.resume = v;
        }
        if let Some(v) = parsed.trackers {
            cfg.trackers = v;
        }
        if let Some(v) = parsed.prefetch {
            cfg.prefetch = v;
        }
        for key in parsed.unknown.keys() {
            tracing::warn!(key = %key, "ignoring unrecognized config key");
        }
        Ok(cfg)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_str(&raw)
    }

    /// Search `$TORRENTFSD_CONFIG`, then the ordered default locations
    /// (spec.md §6), returning defaults if none exist.
    pub async fn from_default_locations() -> Result<Self> {
        if let Ok(path) = std::env::var("TORRENTFSD_CONFIG") {
            return Self::from_file(Path::new(&path)).await;
        }
        let mut candidates = Vec::new();
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(".config/torrentfs/torrentfsd.json"));
        }
        candidates.push(PathBuf::from("/etc/torrentfs/torrentfsd.json"));
        candidates.push(PathBuf::from("config/torrentfsd.json"));

        for candidate in candidates {
            if tokio::fs::metadata(&candidate).await.is_ok() {
                return Self::from_file(&candidate).await;
            }
        }
        Ok(DaemonConfig::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_metadata_mb == 0 {
            return Err(TorrentFsError::BadRequest("max_metadata_mb must be > 0".into()));
        }
        Ok(())
    }

    /// Resolve the RPC socket path per spec.md §6's search order.
    pub fn resolve_socket_path(&self) -> PathBuf {
        if let Some(path) = &self.socket {
            return path.clone();
        }
        if let Ok(path) = std::env::var("TORRENTFSD_SOCKET") {
            return PathBuf::from(path);
        }
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            return PathBuf::from(runtime_dir).join("torrentfsd.sock");
        }
        PathBuf::from("/tmp/torrentfsd.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        assert!(DaemonConfig::default().validate().is_ok());
    }

    #[test]
    fn parses_recognized_keys_and_ignores_unknown() {
        let raw = r#"{
            "max_metadata_mb": 32,
            "skip_check": true,
            "checking": {"max_active": 2},
            "resume": {"save_interval_s": 60},
            "bogus_key": 1
        }"#;
        let cfg = DaemonConfig::from_str(raw).unwrap();
        assert_eq!(cfg.max_metadata_mb, 32);
        assert!(cfg.skip_check);
        assert_eq!(cfg.checking.max_active, 2);
        assert_eq!(cfg.resume.save_interval_s, 60);
    }

    #[test]
    fn rejects_zero_metadata_cap() {
        let mut cfg = DaemonConfig::default();
        cfg.max_metadata_mb = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn socket_path_falls_back_through_search_order() {
        let cfg = DaemonConfig::default();
        let resolved = cfg.resolve_socket_path();
        assert!(resolved.to_string_lossy().ends_with("torrentfsd.sock"));
    }
}
