//! Event types for log tailing and lifecycle notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, JobKind, JobStatus};

/// One item of a live log tail.
///
/// A tail is a finite sequence of `Line` events followed by exactly one
/// `Status` event, or a single `NotFound` event for an unknown job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A log line, with its position in the job's log.
    Line { index: usize, message: String },
    /// The job reached a terminal status; the tail ends here.
    Status { status: JobStatus, message: String },
    /// No job with this id exists.
    NotFound { job_id: JobId },
}

impl StreamEvent {
    /// Check if this event ends the tail.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Line { .. })
    }

    /// Build the closing status marker for a finished job.
    pub fn finished(status: JobStatus) -> Self {
        StreamEvent::Status {
            status,
            message: format!("Deployment {}.", status),
        }
    }
}

/// Lifecycle notifications broadcast by the job store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A job record was created.
    Submitted {
        job_id: JobId,
        kind: JobKind,
        timestamp: DateTime<Utc>,
    },
    /// A worker started executing the job.
    Started {
        job_id: JobId,
        kind: JobKind,
        timestamp: DateTime<Utc>,
    },
    /// The job reached a terminal status.
    Finished {
        job_id: JobId,
        kind: JobKind,
        status: JobStatus,
        duration_ms: Option<u64>,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::Submitted { timestamp, .. } => *timestamp,
            JobEvent::Started { timestamp, .. } => *timestamp,
            JobEvent::Finished { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event.
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Submitted { job_id, .. } => job_id,
            JobEvent::Started { job_id, .. } => job_id,
            JobEvent::Finished { job_id, .. } => job_id,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::Submitted { job_id, kind, .. } => {
                format!("{} job {} submitted", kind, job_id)
            }
            JobEvent::Started { job_id, kind, .. } => format!("{} job {} started", kind, job_id),
            JobEvent::Finished {
                job_id,
                kind,
                status,
                duration_ms,
                ..
            } => match duration_ms {
                Some(ms) => format!("{} job {} -> {} in {}ms", kind, job_id, status, ms),
                None => format!("{} job {} -> {}", kind, job_id, status),
            },
        }
    }
}
