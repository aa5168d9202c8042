//! Job functions that drive ansible-playbook, psql and ssh.

pub mod executors;
pub mod playbook;
pub mod process;
pub mod template;
pub mod validate;

pub use executors::{FileDeployment, ShellCommand, SqlDeployment, SystemdJob};
pub use playbook::SystemdOperation;
pub use template::{DeploymentTemplate, StepAction, TemplateDeployment, TemplateStep};
pub use validate::{ValidationResult, validate_file};
