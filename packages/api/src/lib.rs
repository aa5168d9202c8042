//! HTTP API of the deployment orchestrator.
//!
//! Route handlers validate requests, submit job functions to the
//! [`jobs::Orchestrator`] and read job state back out of it. The job
//! functions themselves live in [`deploy`].

pub mod deploy;
pub mod dto;
pub mod error;
pub mod inventory;
pub mod router;
pub mod routes;
pub mod settings;
pub mod state;
pub mod templates;

pub use error::ApiError;
pub use inventory::{Inventory, Vm};
pub use router::create_router;
pub use settings::ApiSettings;
pub use state::AppState;
pub use templates::TemplateStore;
