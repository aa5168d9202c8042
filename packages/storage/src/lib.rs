//! Crash-tolerant snapshot files.
//!
//! A snapshot directory holds:
//! - `<name>.json`: the canonical snapshot
//! - `<name>.backup.<stamp>.json`: copies of earlier canonical files, newest kept
//! - `<name>.corrupt.<stamp>.json`: canonical files that failed to parse
//!
//! The canonical file is only ever replaced by renaming a fully written
//! temporary file over it, so a partial write never clobbers a valid snapshot.
//! Loading never fails: it falls back to the newest parseable backup and
//! finally to an empty value.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("invalid snapshot config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotConfig {
    /// Directory holding the canonical, backup and quarantine files.
    pub dir: PathBuf,
    /// File stem shared by all snapshot files.
    pub name: String,
    /// Number of backups to keep.
    pub backups: usize,
    /// Number of quarantined corrupt files to keep.
    pub quarantine: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/deployments"),
            name: "deployments".to_string(),
            backups: 10,
            quarantine: 10,
        }
    }
}

impl SnapshotConfig {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn with_backups(mut self, backups: usize) -> Self {
        self.backups = backups;
        self
    }

    pub fn with_quarantine(mut self, quarantine: usize) -> Self {
        self.quarantine = quarantine;
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `SNAPSHOT_DIR` (default: `./data/deployments`)
    /// - `SNAPSHOT_BACKUPS` (default: 10)
    /// - `SNAPSHOT_QUARANTINE` (default: 10)
    pub fn from_env() -> Result<Self, SnapshotError> {
        let defaults = Self::default();

        let dir = std::env::var("SNAPSHOT_DIR")
            .ok()
            .and_then(non_empty)
            .map(PathBuf::from)
            .unwrap_or(defaults.dir);

        Ok(Self {
            dir,
            name: defaults.name,
            backups: parse_count_env("SNAPSHOT_BACKUPS")?.unwrap_or(defaults.backups),
            quarantine: parse_count_env("SNAPSHOT_QUARANTINE")?.unwrap_or(defaults.quarantine),
        })
    }
}

/// Where a loaded snapshot came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSource {
    Canonical,
    Backup(PathBuf),
    Empty,
}

#[derive(Debug)]
pub struct Loaded<T> {
    pub value: T,
    pub source: SnapshotSource,
}

pub struct SnapshotStore {
    config: SnapshotConfig,
    /// Serializes writers; the canonical file has exactly one writer at a time.
    write_lock: Mutex<()>,
    seq: AtomicU64,
}

impl SnapshotStore {
    pub fn new(config: SnapshotConfig) -> Self {
        Self {
            config,
            write_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    pub fn canonical_path(&self) -> PathBuf {
        self.config.dir.join(format!("{}.json", self.config.name))
    }

    /// Write `value` as the new canonical snapshot.
    ///
    /// The previous canonical file is copied to a backup first (best effort),
    /// and backups beyond the retention count are pruned afterwards.
    pub async fn save<T: Serialize>(&self, value: &T) -> Result<(), SnapshotError> {
        let json = serde_json::to_vec_pretty(value)?;

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.config.dir).await?;

        let canonical = self.canonical_path();
        if fs::try_exists(&canonical).await.unwrap_or(false) {
            let backup = self.stamped_path("backup");
            if let Err(e) = fs::copy(&canonical, &backup).await {
                tracing::warn!("Failed to back up snapshot to {:?}: {}", backup, e);
            }
        }

        let tmp_path = self.config.dir.join(format!("{}.json.tmp", self.config.name));
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &canonical).await?;
        tracing::debug!("Saved snapshot to {:?}", canonical);

        if let Err(e) = self.prune("backup", self.config.backups).await {
            tracing::warn!("Failed to prune snapshot backups: {}", e);
        }

        Ok(())
    }

    /// Load the newest readable snapshot.
    ///
    /// A canonical file that fails to parse is renamed aside as a corrupt
    /// file, then backups are tried newest first. If nothing parses the
    /// result is `T::default()`.
    pub async fn load<T: DeserializeOwned + Default>(&self) -> Loaded<T> {
        let canonical = self.canonical_path();

        match fs::read(&canonical).await {
            Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    tracing::info!("Loaded snapshot from {:?}", canonical);
                    return Loaded {
                        value,
                        source: SnapshotSource::Canonical,
                    };
                }
                Err(e) => {
                    tracing::error!("Snapshot {:?} is corrupt: {}", canonical, e);
                    self.quarantine(&canonical).await;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No snapshot at {:?}, starting empty", canonical);
                return Loaded {
                    value: T::default(),
                    source: SnapshotSource::Empty,
                };
            }
            Err(e) => {
                tracing::error!("Failed to read snapshot {:?}: {}", canonical, e);
            }
        }

        let backups = match self.backups().await {
            Ok(backups) => backups,
            Err(e) => {
                tracing::error!("Failed to list snapshot backups: {}", e);
                Vec::new()
            }
        };

        for path in backups {
            let parsed = match fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<T>(&bytes).map_err(SnapshotError::from),
                Err(e) => Err(SnapshotError::from(e)),
            };
            match parsed {
                Ok(value) => {
                    tracing::warn!("Recovered snapshot from backup {:?}", path);
                    return Loaded {
                        value,
                        source: SnapshotSource::Backup(path),
                    };
                }
                Err(e) => tracing::warn!("Skipping unreadable backup {:?}: {}", path, e),
            }
        }

        tracing::warn!("No usable snapshot or backup, starting empty");
        Loaded {
            value: T::default(),
            source: SnapshotSource::Empty,
        }
    }

    /// Backup files, newest first.
    pub async fn backups(&self) -> Result<Vec<PathBuf>, SnapshotError> {
        self.list("backup").await
    }

    /// Quarantined corrupt files, newest first.
    pub async fn quarantined(&self) -> Result<Vec<PathBuf>, SnapshotError> {
        self.list("corrupt").await
    }

    async fn quarantine(&self, canonical: &Path) {
        let _guard = self.write_lock.lock().await;
        let target = self.stamped_path("corrupt");
        match fs::rename(canonical, &target).await {
            Ok(()) => tracing::warn!("Moved corrupt snapshot to {:?}", target),
            Err(e) => {
                tracing::error!("Failed to quarantine corrupt snapshot {:?}: {}", canonical, e);
                return;
            }
        }
        if let Err(e) = self.prune("corrupt", self.config.quarantine).await {
            tracing::warn!("Failed to prune quarantined snapshots: {}", e);
        }
    }

    /// `<name>.<tag>.<utc stamp>-<seq>.json`; names sort chronologically.
    fn stamped_path(&self, tag: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.9fZ");
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.config
            .dir
            .join(format!("{}.{}.{}-{:06}.json", self.config.name, tag, stamp, seq))
    }

    async fn list(&self, tag: &str) -> Result<Vec<PathBuf>, SnapshotError> {
        let prefix = format!("{}.{}.", self.config.name, tag);
        let mut paths = Vec::new();

        let mut entries = match fs::read_dir(&self.config.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(paths),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&prefix) && file_name.ends_with(".json") {
                paths.push(entry.path());
            }
        }

        paths.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(paths)
    }

    async fn prune(&self, tag: &str, keep: usize) -> Result<(), SnapshotError> {
        for stale in self.list(tag).await?.into_iter().skip(keep) {
            fs::remove_file(&stale).await?;
            tracing::debug!("Pruned {:?}", stale);
        }
        Ok(())
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_count_env(var_name: &str) -> Result<Option<usize>, SnapshotError> {
    let Some(v) = std::env::var(var_name).ok().and_then(non_empty) else {
        return Ok(None);
    };
    v.parse::<usize>().map(Some).map_err(|e| {
        SnapshotError::InvalidConfig(format!("invalid count for {var_name}={v}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use std::collections::BTreeMap;

    use super::*;

    type Jobs = BTreeMap<String, Vec<String>>;

    fn jobs(entries: &[(&str, &[&str])]) -> Jobs {
        entries
            .iter()
            .map(|(id, lines)| (id.to_string(), lines.iter().map(|l| l.to_string()).collect()))
            .collect()
    }

    #[tokio::test]
    async fn save_then_load_round_trips() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir()?;
        let store = SnapshotStore::new(SnapshotConfig::in_dir(dir.path()));

        let value = jobs(&[("J1", &["a", "b"]), ("J2", &[])]);
        store.save(&value).await?;

        let loaded: Loaded<Jobs> = store.load().await;
        assert_eq!(loaded.source, SnapshotSource::Canonical);
        assert_eq!(loaded.value, value);
        Ok(())
    }

    #[tokio::test]
    async fn missing_snapshot_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(SnapshotConfig::in_dir(dir.path().join("absent")));

        let loaded: Loaded<Jobs> = store.load().await;
        assert_eq!(loaded.source, SnapshotSource::Empty);
        assert!(loaded.value.is_empty());
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_quarantined_and_loads_empty() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir()?;
        let store = SnapshotStore::new(SnapshotConfig::in_dir(dir.path()));
        fs::write(store.canonical_path(), b"{\"J1\": [\"a\", \"b\"").await?;

        let loaded: Loaded<Jobs> = store.load().await;
        assert_eq!(loaded.source, SnapshotSource::Empty);
        assert!(loaded.value.is_empty());

        assert!(!fs::try_exists(store.canonical_path()).await?);
        let quarantined = store.quarantined().await?;
        assert_eq!(quarantined.len(), 1);
        let kept = fs::read(&quarantined[0]).await?;
        assert_eq!(kept, b"{\"J1\": [\"a\", \"b\"");
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_snapshot_falls_back_to_newest_valid_backup() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir()?;
        let store = SnapshotStore::new(SnapshotConfig::in_dir(dir.path()));

        let first = jobs(&[("J1", &["a"])]);
        let second = jobs(&[("J1", &["a", "b"])]);
        store.save(&first).await?;
        store.save(&second).await?;
        // The backup of `second` is created by this third save.
        store.save(&jobs(&[("J1", &["a", "b", "c"])])).await?;

        fs::write(store.canonical_path(), b"garbage").await?;

        let loaded: Loaded<Jobs> = store.load().await;
        assert!(matches!(loaded.source, SnapshotSource::Backup(_)));
        assert_eq!(loaded.value, second);
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_backups_are_skipped() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir()?;
        let store = SnapshotStore::new(SnapshotConfig::in_dir(dir.path()));

        let good = jobs(&[("J1", &["ok"])]);
        store.save(&good).await?;
        store.save(&jobs(&[("J2", &[])])).await?;

        // Make a newer, broken backup by saving over a corrupt canonical.
        fs::write(store.canonical_path(), b"not json").await?;
        store.save(&jobs(&[("J3", &[])])).await?;
        fs::write(store.canonical_path(), b"not json either").await?;

        let loaded: Loaded<Jobs> = store.load().await;
        assert!(matches!(loaded.source, SnapshotSource::Backup(_)));
        assert_eq!(loaded.value, good);
        Ok(())
    }

    #[tokio::test]
    async fn backups_are_pruned_to_retention() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir()?;
        let store = SnapshotStore::new(SnapshotConfig::in_dir(dir.path()).with_backups(3));

        for i in 0..8 {
            store.save(&jobs(&[(&format!("J{i}"), &[])])).await?;
        }

        let backups = store.backups().await?;
        assert_eq!(backups.len(), 3);

        // Newest backup holds the canonical content from just before the last save.
        let newest: Jobs = serde_json::from_slice(&fs::read(&backups[0]).await?)?;
        assert!(newest.contains_key("J6"));
        Ok(())
    }

    #[tokio::test]
    async fn load_then_save_is_idempotent() -> Result<(), SnapshotError> {
        let dir = tempfile::tempdir()?;
        let store = SnapshotStore::new(SnapshotConfig::in_dir(dir.path()));
        store.save(&jobs(&[("b", &["2"]), ("a", &["1", "x"])])).await?;
        let before = fs::read(store.canonical_path()).await?;

        let loaded: Loaded<Jobs> = store.load().await;
        store.save(&loaded.value).await?;

        let after = fs::read(store.canonical_path()).await?;
        assert_eq!(before, after);
        Ok(())
    }
}
