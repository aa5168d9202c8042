//! Multi-step template deployments.
//!
//! A template is an ordered list of steps, each one a file, SQL or service
//! job. The steps run one after another inside a single job and share its
//! log; the first failing step ends the deployment.

use std::sync::Arc;
use std::time::Instant;

use jobs::{JobContext, JobError, JobResult, Metadata};
use serde::{Deserialize, Serialize};

use super::executors::{self, FileDeployment, SqlDeployment, SystemdJob};
use super::playbook::SystemdOperation;
use crate::inventory::Inventory;
use crate::settings::ApiSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentTemplate {
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub steps: Vec<TemplateStep>,
}

impl DeploymentTemplate {
    /// Steps in execution order. Steps sharing an order keep their listed order.
    pub fn ordered_steps(&self) -> Vec<&TemplateStep> {
        let mut steps: Vec<&TemplateStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    pub fn has_sql_steps(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.action, StepAction::SqlDeployment { .. }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateStep {
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub action: StepAction,
}

impl TemplateStep {
    fn describe(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| self.action.kind().replace('_', " "))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StepAction {
    FileDeployment {
        files: Vec<String>,
        #[serde(default = "default_target_path")]
        target_path: String,
        #[serde(default = "default_target_user")]
        target_user: String,
        #[serde(rename = "targetVMs")]
        target_vms: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ft_number: Option<String>,
    },
    SqlDeployment {
        files: Vec<String>,
        db_user: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ft_number: Option<String>,
    },
    ServiceRestart {
        service: String,
        #[serde(default = "default_operation")]
        operation: SystemdOperation,
        #[serde(rename = "targetVMs")]
        target_vms: Vec<String>,
    },
}

fn default_target_path() -> String {
    "/home/users/abpwrk1/pbin/app".to_string()
}

fn default_target_user() -> String {
    "abpwrk1".to_string()
}

fn default_operation() -> SystemdOperation {
    SystemdOperation::Restart
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::FileDeployment { .. } => "file_deployment",
            StepAction::SqlDeployment { .. } => "sql_deployment",
            StepAction::ServiceRestart { .. } => "service_restart",
        }
    }

    /// Fix files this step reads, with the ticket they come from.
    pub fn files<'a>(&'a self, default_ft: &'a str) -> Vec<(&'a str, &'a str)> {
        match self {
            StepAction::FileDeployment { files, ft_number, .. }
            | StepAction::SqlDeployment { files, ft_number, .. } => {
                let ft = ft_number.as_deref().unwrap_or(default_ft);
                files.iter().map(|f| (ft, f.as_str())).collect()
            }
            StepAction::ServiceRestart { .. } => Vec::new(),
        }
    }
}

/// Parameters of a template job, as stored in the record's metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDeployment {
    pub ft_number: String,
    pub template_name: String,
    pub steps_count: usize,
    pub template: DeploymentTemplate,
}

impl TemplateDeployment {
    pub fn new(ft_number: String, template_name: String, template: DeploymentTemplate) -> Self {
        Self {
            ft_number,
            template_name,
            steps_count: template.steps.len(),
            template,
        }
    }
}

pub async fn template_deployment(
    ctx: JobContext,
    settings: Arc<ApiSettings>,
    inventory: Arc<Inventory>,
    job: TemplateDeployment,
    db_password: Option<String>,
) -> JobResult {
    let steps = job.template.ordered_steps();
    let total = steps.len();
    ctx.log(format!(
        "Starting template deployment {} for {} ({} steps)",
        job.template_name, job.ft_number, total
    ));

    for (completed, step) in steps.into_iter().enumerate() {
        ctx.log(format!("=== STEP {}: {} ===", step.order, step.describe()));
        let started = Instant::now();
        let outcome = run_step(
            &ctx,
            &settings,
            &inventory,
            &job.ft_number,
            step,
            db_password.as_deref(),
        )
        .await;
        let secs = started.elapsed().as_secs_f64();
        if let Err(e) = outcome {
            ctx.log(format!("ERROR: Step {} failed after {:.2}s: {}", step.order, secs, e));
            ctx.log(format!("Steps completed: {}/{}", completed, total));
            return Err(e);
        }
        ctx.log(format!("Step {} completed successfully in {:.2}s", step.order, secs));
    }

    ctx.log(format!(
        "SUCCESS: Template deployment completed ({}/{} steps)",
        total, total
    ));
    Ok(())
}

async fn run_step(
    ctx: &JobContext,
    settings: &Arc<ApiSettings>,
    inventory: &Arc<Inventory>,
    default_ft: &str,
    step: &TemplateStep,
    db_password: Option<&str>,
) -> JobResult {
    match &step.action {
        StepAction::FileDeployment {
            target_path,
            target_user,
            target_vms,
            ..
        } => {
            for (ft, file) in step.action.files(default_ft) {
                let job = FileDeployment {
                    ft: ft.to_string(),
                    file: file.to_string(),
                    user: target_user.clone(),
                    target_path: target_path.clone(),
                    vms: target_vms.clone(),
                    sudo: true,
                };
                executors::file_deployment(ctx.clone(), settings.clone(), inventory.clone(), job).await?;
            }
            Ok(())
        }
        StepAction::SqlDeployment { db_user, .. } => {
            let password = db_password.ok_or_else(|| {
                JobError::InvalidInput("SQL steps need a database password".to_string())
            })?;
            for (ft, file) in step.action.files(default_ft) {
                let job = SqlDeployment {
                    ft: ft.to_string(),
                    file: file.to_string(),
                    db_user: db_user.clone(),
                };
                executors::sql_deployment(ctx.clone(), settings.clone(), job, password.to_string())
                    .await?;
            }
            Ok(())
        }
        StepAction::ServiceRestart {
            service,
            operation,
            target_vms,
        } => {
            let job = SystemdJob {
                service: service.clone(),
                operation: *operation,
                vms: target_vms.clone(),
            };
            executors::systemd_operation(ctx.clone(), settings.clone(), inventory.clone(), job).await
        }
    }
}
