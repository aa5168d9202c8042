//! Checksum validation of a finished file deployment.

use jobs::{JobId, Orchestrator};
use serde::Serialize;
use tokio::process::Command;

use super::executors::FileDeployment;
use super::process::{run_capture, shell_quote};
use crate::inventory::Inventory;
use crate::settings::ApiSettings;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub vm: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Run `cksum` on the deployed file on every target, logging into the deployment's log.
///
/// Runs on the request task; the deployment is usually finished by now, and
/// these lines are appended after its terminal status.
pub async fn validate_file(
    orchestrator: &Orchestrator,
    settings: &ApiSettings,
    inventory: &Inventory,
    job_id: &JobId,
    deployment: &FileDeployment,
) -> Vec<ValidationResult> {
    let target = format!(
        "{}/{}",
        deployment.target_path.trim_end_matches('/'),
        deployment.file
    );
    orchestrator.append(
        job_id,
        format!(
            "Starting validation for file {} on {} VMs",
            deployment.file,
            deployment.vms.len()
        ),
    );

    let mut results = Vec::with_capacity(deployment.vms.len());
    for name in &deployment.vms {
        let Some(vm) = inventory.find_vm(name) else {
            orchestrator.append(job_id, format!("ERROR: VM {} not found in inventory", name));
            results.push(ValidationResult {
                vm: name.clone(),
                status: "ERROR: VM not found".to_string(),
                output: None,
            });
            continue;
        };

        let mut command = Command::new(&settings.ssh_bin);
        command
            .arg(format!("{}@{}", settings.ansible_user, vm.ip))
            .arg(format!("cksum {}", shell_quote(&target)));
        orchestrator.append(job_id, format!("Running cksum on {}", name));

        let result = match run_capture(command).await {
            Ok((true, output)) => {
                orchestrator.append(job_id, format!("Validation on {}: {}", name, output));
                ValidationResult {
                    vm: name.clone(),
                    status: "SUCCESS".to_string(),
                    output: Some(output),
                }
            }
            Ok((false, output)) => {
                orchestrator.append(job_id, format!("Validation failed on {}: {}", name, output));
                ValidationResult {
                    vm: name.clone(),
                    status: "ERROR".to_string(),
                    output: Some(output),
                }
            }
            Err(e) => {
                orchestrator.append(job_id, format!("Validation failed on {}: {}", name, e));
                ValidationResult {
                    vm: name.clone(),
                    status: "ERROR".to_string(),
                    output: Some(e.to_string()),
                }
            }
        };
        results.push(result);
    }
    results
}
