//! What a job function sees while it runs.

use std::sync::Arc;

use deploy_core::{JobId, JobKind, JobStatus};

use crate::error::JobError;
use crate::store::JobStore;

/// Result type for job functions.
pub type JobResult = Result<(), JobError>;

/// Handle passed to a job function: its identity plus access to its own log.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    kind: JobKind,
    store: Arc<JobStore>,
}

impl JobContext {
    pub(crate) fn new(job_id: JobId, kind: JobKind, store: Arc<JobStore>) -> Self {
        Self {
            job_id,
            kind,
            store,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Append a line to this job's log.
    pub fn log(&self, line: impl Into<String>) {
        self.store.append(&self.job_id, line);
    }

    /// Settle the job's status before returning. The runner leaves it alone afterwards.
    pub fn mark_terminal(&self, status: JobStatus) -> bool {
        self.store.mark_terminal(&self.job_id, status)
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("kind", &self.kind)
            .finish()
    }
}
