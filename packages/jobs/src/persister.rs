//! Snapshot persister: the glue between the job store and the snapshot files.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use storage::{SnapshotError, SnapshotSource, SnapshotStore};

use crate::store::{JobMap, JobStore};

const NEVER_SAVED: u64 = u64::MAX;

pub struct Persister {
    snapshots: SnapshotStore,
    store: Arc<JobStore>,
    saved_revision: AtomicU64,
    save_lock: tokio::sync::Mutex<()>,
}

impl Persister {
    pub fn new(snapshots: SnapshotStore, store: Arc<JobStore>) -> Self {
        Self {
            snapshots,
            store,
            saved_revision: AtomicU64::new(NEVER_SAVED),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Read the job map at startup. Never fails; the worst case is an empty map.
    pub async fn load(snapshots: &SnapshotStore) -> (JobMap, SnapshotSource) {
        let loaded = snapshots.load::<JobMap>().await;
        match &loaded.source {
            SnapshotSource::Canonical => {
                tracing::info!("Loaded {} job(s) from snapshot", loaded.value.len())
            }
            SnapshotSource::Backup(path) => tracing::warn!(
                "Loaded {} job(s) from backup {}",
                loaded.value.len(),
                path.display()
            ),
            SnapshotSource::Empty => tracing::info!("No usable snapshot, starting empty"),
        }
        (loaded.value, loaded.source)
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Whether the store changed since the last successful save.
    pub fn is_dirty(&self) -> bool {
        self.saved_revision.load(Ordering::Acquire) != self.store.revision()
    }

    /// Write the current store to disk.
    ///
    /// Saves are serialized, and each one snapshots the store after taking the
    /// lock, so a slower save can never overwrite a newer one.
    pub async fn save(&self) -> Result<(), SnapshotError> {
        let _guard = self.save_lock.lock().await;
        let revision = self.store.revision();
        let jobs = self.store.snapshot();
        self.snapshots.save(&jobs).await?;
        self.saved_revision.store(revision, Ordering::Release);
        tracing::debug!("Saved snapshot of {} job(s) at revision {}", jobs.len(), revision);
        Ok(())
    }

    /// Save only if something changed. Returns whether a save happened.
    pub async fn save_if_dirty(&self) -> Result<bool, SnapshotError> {
        if !self.is_dirty() {
            return Ok(false);
        }
        self.save().await?;
        Ok(true)
    }

    /// Save and log failures instead of returning them.
    pub async fn save_logged(&self, context: &str) {
        if let Err(e) = self.save().await {
            tracing::error!("Snapshot save failed ({}): {}", context, e);
        }
    }
}
