//! The runtime facade used by route handlers.
//!
//! Constructed once at startup with [`Orchestrator::start`] and torn down with
//! [`Orchestrator::shutdown`], which waits for workers and writes a final snapshot.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use deploy_core::{JobId, JobKind, JobRecord, JobStatus, Metadata, StreamEvent};
use futures_util::Stream;
use ractor::{Actor, ActorRef};
use storage::SnapshotStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{OverloadPolicy, RuntimeConfig};
use crate::error::RuntimeError;
use crate::handler::{JobContext, JobResult};
use crate::housekeeper::{Housekeeper, HousekeeperArgs};
use crate::messages::HousekeeperMessage;
use crate::persister::Persister;
use crate::pool::{PoolStatus, WorkerPool};
use crate::runner::JobRunner;
use crate::store::JobStore;
use crate::stream;

const MIN_HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(10);

pub struct Orchestrator {
    config: RuntimeConfig,
    store: Arc<JobStore>,
    pool: WorkerPool,
    runner: JobRunner,
    persister: Arc<Persister>,
    housekeeper: ActorRef<HousekeeperMessage>,
    housekeeper_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Load the last snapshot and start the housekeeping actor.
    pub async fn start(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let snapshots = SnapshotStore::new(config.snapshot.clone());
        let (jobs, _source) = Persister::load(&snapshots).await;

        let store = Arc::new(JobStore::from_records(jobs, config.persist_every));
        let interrupted = store.recover_interrupted();
        if interrupted > 0 {
            tracing::warn!("Marked {} interrupted job(s) as failed", interrupted);
        }

        let persister = Arc::new(Persister::new(snapshots, store.clone()));
        let args = HousekeeperArgs {
            store: store.clone(),
            persister: persister.clone(),
            interval: config.housekeeping_interval.max(MIN_HOUSEKEEPING_INTERVAL),
            retention: config.retention,
        };
        let (housekeeper, handle) = Actor::spawn(None, Housekeeper, args)
            .await
            .map_err(|e| RuntimeError::Actor(format!("Failed to spawn housekeeper: {}", e)))?;
        store.set_persist_trigger(Arc::new(housekeeper.clone()));

        tracing::info!(
            "Orchestrator ready: {} worker(s), synchronous={}, {} job(s) loaded",
            config.max_workers,
            config.synchronous,
            store.len()
        );

        Ok(Self {
            pool: WorkerPool::new(config.max_workers, config.synchronous),
            runner: JobRunner::new(store.clone(), persister.clone()),
            config,
            store,
            persister,
            housekeeper,
            housekeeper_handle: Mutex::new(Some(handle)),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Create a pending record for `job_id` and hand `job` to the worker pool.
    ///
    /// Returns `Ok(false)` when the pool refused the job; the record is removed
    /// again in that case. With [`OverloadPolicy::RunInline`] a refused job runs
    /// past the ceiling and the call returns once it settled. Inline jobs run on
    /// their own task: dropping this future does not leave the job unfinished.
    pub async fn submit_job<F, Fut>(
        &self,
        job_id: JobId,
        kind: JobKind,
        metadata: Metadata,
        job: F,
    ) -> Result<bool, RuntimeError>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        self.store
            .insert(JobRecord::new(job_id.clone(), kind, metadata))?;

        let runner = self.runner.clone();
        let id = job_id.clone();
        let work = async move { runner.run(id, job).await };

        match self.pool.try_submit(&job_id, work).await {
            Ok(()) => Ok(true),
            Err(work) => match self.config.overload {
                OverloadPolicy::RunInline => {
                    tracing::warn!(
                        "[{}-{}] Worker pool full, running job inline",
                        kind.log_prefix(),
                        job_id
                    );
                    self.pool.run_inline(&job_id, work).await;
                    Ok(true)
                }
                OverloadPolicy::Reject => {
                    self.store.remove(&job_id);
                    Ok(false)
                }
            },
        }
    }

    pub fn get_job(&self, job_id: &JobId) -> Option<JobRecord> {
        self.store.get(job_id)
    }

    /// Every job without logs, newest first.
    pub fn list_jobs(&self) -> Vec<JobRecord> {
        self.store.list()
    }

    /// Live tail of a job: its lines from the start, then one status marker.
    pub fn stream_job(&self, job_id: JobId) -> impl Stream<Item = StreamEvent> + Send + 'static {
        stream::tail(self.store.clone(), job_id, self.config.stream_poll_interval)
    }

    pub fn append(&self, job_id: &JobId, line: impl Into<String>) -> bool {
        self.store.append(job_id, line)
    }

    pub fn mark_terminal(&self, job_id: &JobId, status: JobStatus) -> bool {
        self.store.mark_terminal(job_id, status)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<deploy_core::JobEvent> {
        self.store.subscribe()
    }

    /// Drop finished jobs created more than `age` ago. Snapshot backups are left as they are.
    pub async fn purge_older_than(&self, age: Duration) -> usize {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
        let removed = self.store.purge_older_than(age);
        if removed > 0 {
            tracing::info!("Purged {} finished job(s)", removed);
            self.persister.save_logged("purge").await;
        }
        removed
    }

    /// Drop every finished job.
    pub async fn clear(&self) -> usize {
        let removed = self.store.clear_terminal();
        tracing::info!("Cleared {} finished job(s)", removed);
        if removed > 0 {
            self.persister.save_logged("clear").await;
        }
        removed
    }

    /// Ask the housekeeper to save right away. Returns whether the save succeeded.
    pub async fn persist_now(&self) -> bool {
        let result = ractor::rpc::call(
            &self.housekeeper,
            |reply| HousekeeperMessage::Flush { reply },
            Some(Duration::from_secs(10)),
        )
        .await;
        matches!(result, Ok(ractor::rpc::CallResult::Success(true)))
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Forget finished worker handles. Returns how many were dropped.
    pub fn emergency_cleanup(&self) -> usize {
        self.pool.emergency_cleanup()
    }

    /// Wait for running jobs (up to the configured grace), save, stop housekeeping.
    pub async fn shutdown(&self) {
        tracing::info!(
            "Shutting down, waiting up to {:?} for {} job(s)",
            self.config.shutdown_grace,
            self.pool.in_flight()
        );

        if !self.pool.drain(self.config.shutdown_grace).await {
            let aborted = self.pool.abort_all();
            tracing::warn!("Grace period elapsed, aborted {} job(s)", aborted);
        }

        self.persister.save_logged("shutdown").await;

        self.housekeeper.stop(None);
        let handle = self
            .housekeeper_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        tracing::info!("Shutdown complete");
    }
}
