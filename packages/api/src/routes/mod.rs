//! Route handlers.

pub mod deploy;
pub mod fts;
pub mod history;
pub mod inventory;
pub mod logs;
pub mod system;
pub mod templates;
