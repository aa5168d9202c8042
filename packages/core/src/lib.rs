//! Core domain types for the deployment orchestrator.
//!
//! This crate contains shared types used across all packages:
//! - JobRecord, JobStatus and JobKind for background deployment jobs
//! - Stream and lifecycle events for log tailing and notifications

mod events;
mod job;

pub use events::{JobEvent, StreamEvent};
pub use job::{JobId, JobKind, JobRecord, JobStatus, Metadata};
