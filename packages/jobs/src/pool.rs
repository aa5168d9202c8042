//! Bounded worker pool.
//!
//! Admission is a check-and-increment under one mutex. The lock is never held
//! while a job runs; the slot taken at admission is released by a guard that
//! drops when the worker task ends, however it ends.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use deploy_core::JobId;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

#[derive(Default)]
struct PoolState {
    in_flight: usize,
    active: BTreeSet<JobId>,
    workers: HashMap<JobId, JoinHandle<()>>,
}

struct Shared {
    state: Mutex<PoolState>,
    idle: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One unit of admitted concurrency. Dropping it frees the slot.
struct WorkerSlot {
    job_id: JobId,
    shared: Arc<Shared>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        let now_idle = {
            let mut state = self.shared.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.active.remove(&self.job_id);
            state.in_flight == 0
        };
        if now_idle {
            self.shared.idle.notify_waiters();
        }
    }
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub max_workers: usize,
    pub in_flight: usize,
    pub synchronous: bool,
    pub active_jobs: Vec<JobId>,
    pub pid: u32,
}

#[derive(Clone)]
pub struct WorkerPool {
    max_workers: usize,
    synchronous: bool,
    shared: Arc<Shared>,
}

impl WorkerPool {
    pub fn new(max_workers: usize, synchronous: bool) -> Self {
        Self {
            max_workers: max_workers.max(1),
            synchronous,
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState::default()),
                idle: Notify::new(),
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn is_synchronous(&self) -> bool {
        self.synchronous
    }

    /// Admit `work` and run it, or refuse it when every slot is taken.
    ///
    /// In synchronous mode the work always runs to completion on the caller
    /// before this returns `true`.
    pub async fn submit<F>(&self, job_id: &JobId, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.try_submit(job_id, work).await.is_ok()
    }

    /// Like [`submit`](Self::submit), but hands the work back when it was not admitted.
    pub async fn try_submit<F>(&self, job_id: &JobId, work: F) -> Result<(), F>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.synchronous {
            self.run_inline(job_id, work).await;
            return Ok(());
        }

        let slot = match self.admit(job_id) {
            Ok(slot) => slot,
            Err(in_flight) => {
                tracing::warn!(
                    "Worker pool full ({}/{}), rejecting job {}",
                    in_flight,
                    self.max_workers,
                    job_id
                );
                return Err(work);
            }
        };

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Cannot start worker for job {}: {}", job_id, e);
                drop(slot);
                let swept = self.emergency_cleanup();
                tracing::warn!("Emergency cleanup released {} finished worker(s)", swept);
                return Err(work);
            }
        };

        let worker = handle.spawn(async move {
            let _slot = slot;
            work.await;
        });

        let mut state = self.shared.lock();
        state.workers.retain(|_, h| !h.is_finished());
        if !worker.is_finished() {
            state.workers.insert(job_id.clone(), worker);
        }
        Ok(())
    }

    /// Run `work` regardless of the ceiling and wait for it to finish.
    ///
    /// The work runs on its own task, so dropping the returned future stops
    /// the waiting, never the work.
    pub async fn run_inline<F>(&self, job_id: &JobId, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let slot = self.take_slot(job_id);
        let task = async move {
            let _slot = slot;
            work.await;
        };
        match Handle::try_current() {
            Ok(handle) => {
                if let Err(e) = handle.spawn(task).await {
                    tracing::error!("Inline job {} did not complete: {}", job_id, e);
                }
            }
            Err(_) => task.await,
        }
    }

    fn take_slot(&self, job_id: &JobId) -> WorkerSlot {
        let mut state = self.shared.lock();
        state.in_flight += 1;
        state.active.insert(job_id.clone());
        WorkerSlot {
            job_id: job_id.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Check-and-increment. On refusal returns the in-flight count that was seen.
    fn admit(&self, job_id: &JobId) -> Result<WorkerSlot, usize> {
        let in_flight = {
            let mut state = self.shared.lock();
            if state.in_flight >= self.max_workers {
                return Err(state.in_flight);
            }
            state.in_flight += 1;
            state.active.insert(job_id.clone());
            state.in_flight
        };

        if in_flight * 5 >= self.max_workers * 4 {
            tracing::warn!(
                "Worker pool under pressure: {}/{} slots in use",
                in_flight,
                self.max_workers
            );
        }

        Ok(WorkerSlot {
            job_id: job_id.clone(),
            shared: self.shared.clone(),
        })
    }

    /// Forget handles of workers that already finished. Returns how many were dropped.
    pub fn emergency_cleanup(&self) -> usize {
        let mut state = self.shared.lock();
        let before = state.workers.len();
        state.workers.retain(|_, h| !h.is_finished());
        before - state.workers.len()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.lock().in_flight
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        PoolStatus {
            max_workers: self.max_workers,
            in_flight: state.in_flight,
            synchronous: self.synchronous,
            active_jobs: state.active.iter().cloned().collect(),
            pid: std::process::id(),
        }
    }

    /// Wait for in-flight work to finish. Returns `false` if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }

    /// Abort every worker still running. Their slots are released as the tasks unwind.
    pub fn abort_all(&self) -> usize {
        let workers: Vec<JoinHandle<()>> = {
            let mut state = self.shared.lock();
            state.workers.drain().map(|(_, h)| h).collect()
        };
        let mut aborted = 0;
        for worker in workers {
            if !worker.is_finished() {
                worker.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_workers", &self.max_workers)
            .field("synchronous", &self.synchronous)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
