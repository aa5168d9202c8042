//! Error types for the job runtime.

use deploy_core::JobId;

use crate::config::ConfigError;

/// Errors surfaced to callers of the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] storage::SnapshotError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Actor error: {0}")]
    Actor(String),
}

/// Error returned by a job function. Absorbed by the runner and recorded in
/// the job log; never propagated further.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{program} exited with code {}", .code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    ExitStatus { program: String, code: Option<i32> },

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Panic(String),

    #[error("{0}")]
    Message(String),
}

impl JobError {
    pub fn msg(message: impl Into<String>) -> Self {
        JobError::Message(message.into())
    }

    /// Stable name of the error variant, recorded in the failure log line.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Io(_) => "io",
            JobError::ExitStatus { .. } => "exit_status",
            JobError::InvalidInput(_) => "invalid_input",
            JobError::Panic(_) => "panic",
            JobError::Message(_) => "message",
        }
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        JobError::Message(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        JobError::Message(message.to_string())
    }
}
