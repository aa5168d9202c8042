//! Job runtime for the deployment orchestrator.
//!
//! - [`JobStore`]: in-memory job records and per-job logs
//! - [`WorkerPool`]: bounded admission and execution
//! - [`JobRunner`]: status lifecycle and failure capture around a job function
//! - [`Persister`] and the housekeeping actor: snapshots and retention
//! - [`Orchestrator`]: the facade route handlers talk to

pub mod config;
pub mod error;
pub mod handler;
pub mod housekeeper;
pub mod messages;
pub mod orchestrator;
pub mod persister;
pub mod pool;
pub mod runner;
pub mod store;
pub mod stream;

pub use config::{ConfigError, OverloadPolicy, RuntimeConfig};
pub use error::{JobError, RuntimeError};
pub use handler::{JobContext, JobResult};
pub use orchestrator::Orchestrator;
pub use persister::Persister;
pub use pool::{PoolStatus, WorkerPool};
pub use runner::JobRunner;
pub use store::{JobMap, JobStore, PersistReason, PersistTrigger};

pub use deploy_core::{JobEvent, JobId, JobKind, JobRecord, JobStatus, Metadata, StreamEvent};
