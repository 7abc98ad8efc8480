//! Freshness-bounded snapshot cache.
//!
//! A per-scope JSON file holding the last fetched flat item list, consulted
//! as a performance hint before the first live fetch. The cache is
//! opportunistic: a missing, corrupt or stale entry behaves as a miss and
//! must never prevent a fresh fetch. Stores are best-effort.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::types::ItemRecord;

/// Cached payloads older than this are ignored by default.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(180);

/// One cached scope snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub items: Vec<ItemRecord>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
    pub fetched_at: DateTime<Utc>,
}

/// Directory-backed cache of scope snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the cache entry for a scope.
    pub fn path_for(&self, scope: &str) -> PathBuf {
        let safe: String = scope
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        self.dir.join(format!("{safe}.feed-cache.json"))
    }

    /// Load the cached snapshot for a scope if it is fresher than `max_age`.
    /// Corrupt or unreadable entries are treated as a miss.
    pub async fn load(&self, scope: &str, max_age: Duration) -> Option<CachedSnapshot> {
        let path = self.path_for(scope);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), "failed to read snapshot cache: {}", e);
                return None;
            }
        };
        let cached: CachedSnapshot = match serde_json::from_str(&content) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(path = %path.display(), "corrupt snapshot cache, ignoring: {}", e);
                return None;
            }
        };
        let age = Utc::now() - cached.fetched_at;
        match age.to_std() {
            Ok(age) if age <= max_age => Some(cached),
            _ => {
                debug!(scope, "snapshot cache stale, ignoring");
                None
            }
        }
    }

    /// Persist a snapshot for a scope. Failures are logged and swallowed:
    /// the cache is a hint, never a requirement.
    pub async fn store(&self, scope: &str, snapshot: &CachedSnapshot) {
        let path = self.path_for(scope);
        if let Err(e) = self.try_store(&path, snapshot).await {
            warn!(path = %path.display(), "failed to write snapshot cache: {}", e);
        }
    }

    async fn try_store(&self, path: &Path, snapshot: &CachedSnapshot) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, content).await
    }
}
