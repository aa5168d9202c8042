//! The job functions behind each deployment route.
//!
//! Each one reports progress through its [`JobContext`] and ends the log with
//! a `SUCCESS:` or `ERROR:` line. Failures are returned as [`JobError`] so the
//! runner records them and marks the job failed.

use std::path::Path;
use std::sync::Arc;

use jobs::{JobContext, JobError, JobResult, Metadata};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::process::Command;

use super::playbook::{self, FileCopy, SystemdOperation};
use super::process::{check_status, describe, program, run_streaming};
use crate::inventory::{Inventory, Vm};
use crate::settings::ApiSettings;

/// Copy one fix file to a directory on every target VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDeployment {
    pub ft: String,
    pub file: String,
    pub user: String,
    pub target_path: String,
    pub vms: Vec<String>,
    #[serde(default)]
    pub sudo: bool,
}

/// Run one SQL fix file through psql. The password travels separately and is never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlDeployment {
    pub ft: String,
    pub file: String,
    pub db_user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellCommand {
    pub command: String,
    pub vms: Vec<String>,
    #[serde(default)]
    pub sudo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemdJob {
    pub service: String,
    pub operation: SystemdOperation,
    pub vms: Vec<String>,
}

/// Serialize job parameters into the record's metadata.
pub fn to_metadata<T: Serialize>(params: &T) -> Metadata {
    match serde_json::to_value(params) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => Metadata::new(),
    }
}

pub async fn file_deployment(
    ctx: JobContext,
    settings: Arc<ApiSettings>,
    inventory: Arc<Inventory>,
    job: FileDeployment,
) -> JobResult {
    let source = settings.source_file(&job.ft, &job.file);
    ensure_exists(&source, "Source file").await?;

    ctx.log(format!(
        "Starting file deployment for {} to {} VMs",
        job.file,
        job.vms.len()
    ));
    let targets = resolve_targets(&ctx, &inventory, &job.vms)?;

    let source = source.to_string_lossy();
    let yaml = playbook::file_playbook(&FileCopy {
        source: &source,
        target_dir: &job.target_path,
        file_name: &job.file,
        owner: &job.user,
        sudo: job.sudo,
    })
    .map_err(render_error)?;

    let outcome = run_playbook(
        &ctx,
        &settings,
        playbook::FILE_GROUP,
        &targets,
        &yaml,
        "file_deploy",
    )
    .await;
    finish(
        &ctx,
        outcome,
        "File deployment completed successfully",
        "File deployment failed",
    )
}

pub async fn sql_deployment(
    ctx: JobContext,
    settings: Arc<ApiSettings>,
    job: SqlDeployment,
    db_password: String,
) -> JobResult {
    let source = settings.source_file(&job.ft, &job.file);
    ensure_exists(&source, "SQL file").await?;

    ctx.log(format!("Starting SQL deployment for {}", job.file));

    let mut command = Command::new(&settings.psql_bin);
    command
        .args(["-U", job.db_user.as_str(), "-h", settings.db_host.as_str(), "-f"])
        .arg(&source)
        .env("PGPASSWORD", db_password);
    ctx.log(format!("Executing SQL: {}", describe(&command)));

    let program = program(&command);
    let outcome = match run_streaming(&ctx, command).await {
        Ok(status) => check_status(&program, status),
        Err(e) => Err(e),
    };
    finish(
        &ctx,
        outcome,
        "SQL deployment completed successfully",
        "SQL deployment failed",
    )
}

pub async fn shell_command(
    ctx: JobContext,
    settings: Arc<ApiSettings>,
    inventory: Arc<Inventory>,
    job: ShellCommand,
) -> JobResult {
    ctx.log(format!(
        "Running command on {} VMs: {}",
        job.vms.len(),
        job.command
    ));
    let targets = resolve_targets(&ctx, &inventory, &job.vms)?;
    let yaml = playbook::shell_playbook(&job.command, job.sudo).map_err(render_error)?;

    let outcome = run_playbook(
        &ctx,
        &settings,
        playbook::COMMAND_GROUP,
        &targets,
        &yaml,
        "shell_command",
    )
    .await;
    finish(
        &ctx,
        outcome,
        "Shell command executed successfully",
        "Shell command execution failed",
    )
}

pub async fn systemd_operation(
    ctx: JobContext,
    settings: Arc<ApiSettings>,
    inventory: Arc<Inventory>,
    job: SystemdJob,
) -> JobResult {
    ctx.log(format!(
        "Starting systemd {} for {} on {} VMs",
        job.operation,
        job.service,
        job.vms.len()
    ));
    let targets = resolve_targets(&ctx, &inventory, &job.vms)?;
    let yaml = playbook::systemd_playbook(&job.service, job.operation).map_err(render_error)?;

    let outcome = run_playbook(
        &ctx,
        &settings,
        playbook::SYSTEMD_GROUP,
        &targets,
        &yaml,
        "systemd",
    )
    .await;
    finish(
        &ctx,
        outcome,
        &format!("Systemd {} operation completed successfully", job.operation),
        &format!("Systemd {} operation failed", job.operation),
    )
}

async fn ensure_exists(path: &Path, what: &str) -> Result<(), JobError> {
    if tokio::fs::try_exists(path).await? {
        Ok(())
    } else {
        Err(JobError::InvalidInput(format!(
            "{} not found: {}",
            what,
            path.display()
        )))
    }
}

fn resolve_targets(
    ctx: &JobContext,
    inventory: &Inventory,
    names: &[String],
) -> Result<Vec<Vm>, JobError> {
    let (targets, missing) = inventory.resolve(names);
    for name in missing {
        ctx.log(format!("WARNING: VM {} not found in inventory, skipping", name));
    }
    if targets.is_empty() {
        return Err(JobError::InvalidInput(
            "none of the requested VMs are in the inventory".to_string(),
        ));
    }
    Ok(targets)
}

fn render_error(e: serde_yaml_ng::Error) -> JobError {
    JobError::msg(format!("cannot render playbook: {}", e))
}

async fn scratch_file(
    dir: &Path,
    prefix: &str,
    suffix: &str,
    contents: &str,
) -> std::io::Result<NamedTempFile> {
    let file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)?;
    tokio::fs::write(file.path(), contents).await?;
    Ok(file)
}

/// Write the playbook and inventory, run ansible-playbook, stream its output.
/// Both files are removed when this returns.
async fn run_playbook(
    ctx: &JobContext,
    settings: &ApiSettings,
    group: &str,
    targets: &[Vm],
    yaml: &str,
    stem: &str,
) -> Result<(), JobError> {
    let dir = settings.scratch_dir();
    tokio::fs::create_dir_all(&dir).await?;

    let playbook_file = scratch_file(&dir, &format!("{}_{}_", stem, ctx.job_id()), ".yml", yaml).await?;
    let ini = playbook::inventory_ini(group, targets, &settings.ansible_user);
    let inventory_file = scratch_file(&dir, &format!("inventory_{}_", ctx.job_id()), ".ini", &ini).await?;

    let mut command = Command::new(&settings.ansible_playbook_bin);
    command
        .arg("-i")
        .arg(inventory_file.path())
        .arg(playbook_file.path())
        .arg("-v");
    ctx.log(format!("Executing: {}", describe(&command)));

    let program = program(&command);
    let status = run_streaming(ctx, command).await?;
    check_status(&program, status)
}

fn finish(ctx: &JobContext, outcome: Result<(), JobError>, success: &str, failure: &str) -> JobResult {
    match &outcome {
        Ok(()) => ctx.log(format!("SUCCESS: {}", success)),
        Err(_) => ctx.log(format!("ERROR: {}", failure)),
    }
    outcome
}
