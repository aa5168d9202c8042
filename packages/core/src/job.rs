//! Job domain types for background deployment operations.

use std::borrow::Borrow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Caller-supplied fields stored alongside a job. Never interpreted by the core.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Opaque identifier for a job.
///
/// Route handlers generate ids with [`JobId::new`], which uses a ULID so that
/// ids sort chronologically; any other string is accepted as well.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The external operation a job performs.
///
/// The core only uses this to prefix log output; routing is the caller's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    File,
    Sql,
    Command,
    Systemd,
    Template,
    Rollback,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::File => "file",
            JobKind::Sql => "sql",
            JobKind::Command => "command",
            JobKind::Systemd => "systemd",
            JobKind::Template => "template",
            JobKind::Rollback => "rollback",
        }
    }

    /// Prefix used when mirroring job output into the process log.
    pub fn log_prefix(&self) -> &'static str {
        match self {
            JobKind::File => "FILE",
            JobKind::Sql => "SQL",
            JobKind::Command => "COMMAND",
            JobKind::Systemd => "SYSTEMD",
            JobKind::Template => "TEMPLATE",
            JobKind::Rollback => "ROLLBACK",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a job in its lifecycle.
///
/// Status only ever moves forward: pending, then running, then exactly one
/// of the terminal states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted but not yet picked up by a worker.
    #[default]
    Pending,
    /// A worker is executing the job function.
    Running,
    /// The job function returned normally.
    Success,
    /// The job function returned an error or panicked.
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Success | JobStatus::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted background operation: its status, ordered log and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Which external operation this job performs.
    pub kind: JobKind,
    /// Current status.
    pub status: JobStatus,
    /// When the job was submitted. Never changes.
    pub created_at: DateTime<Utc>,
    /// When the job record last changed.
    pub updated_at: DateTime<Utc>,
    /// When a worker picked the job up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Output lines in append order.
    #[serde(default)]
    pub logs: Vec<String>,
    /// Opaque caller-supplied fields (targets, file names, ...).
    #[serde(default)]
    pub metadata: Metadata,
}

impl JobRecord {
    /// Create a new pending job.
    pub fn new(id: JobId, kind: JobKind, metadata: Metadata) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            logs: Vec::new(),
            metadata,
        }
    }

    /// Wall-clock duration between start and finish, if both are known.
    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        u64::try_from((finished - started).num_milliseconds()).ok()
    }

    /// Copy of this record without its log lines, for listings.
    pub fn summary(&self) -> JobRecord {
        JobRecord {
            logs: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        assert!(JobStatus::Pending.can_advance_to(JobStatus::Running));
        assert!(JobStatus::Running.can_advance_to(JobStatus::Success));
        assert!(JobStatus::Running.can_advance_to(JobStatus::Failed));
        assert!(!JobStatus::Running.can_advance_to(JobStatus::Pending));
        assert!(!JobStatus::Success.can_advance_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_advance_to(JobStatus::Running));
        assert!(!JobStatus::Running.can_advance_to(JobStatus::Running));
    }

    #[test]
    fn record_serializes_with_lowercase_tags() {
        let record = JobRecord::new(JobId::from("J1"), JobKind::Systemd, Metadata::new());
        let value = serde_json::to_value(&record).unwrap_or_default();
        assert_eq!(value["id"], "J1");
        assert_eq!(value["kind"], "systemd");
        assert_eq!(value["status"], "pending");
        assert!(value.get("started_at").is_none());
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }
}
