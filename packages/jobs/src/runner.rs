//! Job runner: drives one job function through its lifecycle.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use deploy_core::{JobId, JobStatus};
use futures_util::FutureExt;

use crate::error::JobError;
use crate::handler::{JobContext, JobResult};
use crate::persister::Persister;
use crate::store::JobStore;

#[derive(Clone)]
pub struct JobRunner {
    store: Arc<JobStore>,
    persister: Arc<Persister>,
}

impl JobRunner {
    pub fn new(store: Arc<JobStore>, persister: Arc<Persister>) -> Self {
        Self { store, persister }
    }

    /// Run `job` for the record `job_id`.
    ///
    /// A pending record is moved to running first; a record already running
    /// is taken as is. Finished records are left alone and `job` is not
    /// called. Errors and panics from the job are recorded in its log and
    /// status and never escape. The snapshot is saved once the job settles.
    pub async fn run<F, Fut>(&self, job_id: JobId, job: F)
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = JobResult>,
    {
        let Some(record) = self.store.get(&job_id) else {
            tracing::error!("Runner started for unknown job {}", job_id);
            return;
        };

        let prefix = record.kind.log_prefix();
        let started = match record.status {
            JobStatus::Running => true,
            _ => self.store.transition(&job_id, JobStatus::Running),
        };
        if !started {
            tracing::warn!("[{}-{}] Job already finished, not running it", prefix, job_id);
            return;
        }
        tracing::info!("[{}-{}] Job started", prefix, job_id);

        let ctx = JobContext::new(job_id.clone(), record.kind, self.store.clone());
        let outcome = AssertUnwindSafe(async move { job(ctx).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(JobError::Panic(panic_message(panic))));

        match outcome {
            Ok(()) => {
                if self.store.transition(&job_id, JobStatus::Success) {
                    tracing::info!("[{}-{}] Job succeeded", prefix, job_id);
                } else {
                    tracing::info!(
                        "[{}-{}] Job finished with status set by the job: {:?}",
                        prefix,
                        job_id,
                        self.store.status(&job_id)
                    );
                }
            }
            Err(e) => {
                tracing::error!("[{}-{}] Job failed: {}", prefix, job_id, e);
                self.store
                    .append(&job_id, format!("ERROR: {}: {}", e.kind(), e));
                self.store.transition(&job_id, JobStatus::Failed);
            }
        }

        self.persister.save_logged("job finished").await;
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "job panicked".to_string()
    }
}
