//! Request and response bodies.

use chrono::{DateTime, Utc};
use jobs::{JobId, JobKind, JobRecord, JobStatus, Metadata, PoolStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deploy::{
    DeploymentTemplate, FileDeployment, ShellCommand, SqlDeployment, SystemdJob, SystemdOperation,
    TemplateDeployment, ValidationResult,
};
use crate::error::ApiError;

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>) -> Result<String, ApiError> {
    non_blank(value).ok_or_else(ApiError::missing_parameters)
}

fn required_list(value: Option<Vec<String>>) -> Result<Vec<String>, ApiError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(ApiError::missing_parameters)
}

/// A fix ticket or file name: one path component, nothing that walks out of the ticket dir.
pub fn path_component(value: String) -> Result<String, ApiError> {
    if value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(ApiError::BadRequest(format!("Invalid name: {}", value)));
    }
    Ok(value)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileDeployRequest {
    pub ft: Option<String>,
    pub file: Option<String>,
    pub user: Option<String>,
    pub target_path: Option<String>,
    pub vms: Option<Vec<String>>,
    pub sudo: bool,
}

impl FileDeployRequest {
    pub fn into_job(self) -> Result<FileDeployment, ApiError> {
        Ok(FileDeployment {
            ft: path_component(required(self.ft)?)?,
            file: path_component(required(self.file)?)?,
            user: required(self.user)?,
            target_path: required(self.target_path)?,
            vms: required_list(self.vms)?,
            sudo: self.sudo,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SqlDeployRequest {
    pub ft: Option<String>,
    pub file: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
}

impl SqlDeployRequest {
    /// The job parameters and, separately, the password.
    pub fn into_job(self) -> Result<(SqlDeployment, String), ApiError> {
        let job = SqlDeployment {
            ft: path_component(required(self.ft)?)?,
            file: path_component(required(self.file)?)?,
            db_user: required(self.db_user)?,
        };
        let password = self
            .db_password
            .filter(|p| !p.is_empty())
            .ok_or_else(ApiError::missing_parameters)?;
        Ok((job, password))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShellCommandRequest {
    pub command: Option<String>,
    pub vms: Option<Vec<String>>,
    pub sudo: bool,
}

impl ShellCommandRequest {
    pub fn into_job(self) -> Result<ShellCommand, ApiError> {
        Ok(ShellCommand {
            command: required(self.command)?,
            vms: required_list(self.vms)?,
            sudo: self.sudo,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SystemdRequest {
    pub service: Option<String>,
    pub operation: Option<String>,
    pub vms: Option<Vec<String>>,
}

impl SystemdRequest {
    pub fn into_job(self) -> Result<SystemdJob, ApiError> {
        let service = required(self.service)?;
        let operation = required(self.operation)?;
        let vms = required_list(self.vms)?;
        let operation = SystemdOperation::parse(&operation)
            .ok_or_else(|| ApiError::BadRequest("Invalid operation".to_string()))?;
        Ok(SystemdJob {
            service,
            operation,
            vms,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SaveTemplateRequest {
    pub name: Option<String>,
    pub template: Option<Value>,
}

impl SaveTemplateRequest {
    /// Name (default `template`) and the template with database passwords removed.
    pub fn into_parts(self) -> Result<(String, Value), ApiError> {
        let mut template = self
            .template
            .filter(|t| !t.is_null())
            .ok_or_else(|| ApiError::BadRequest("No template provided".to_string()))?;
        if let Some(steps) = template.get_mut("steps").and_then(Value::as_array_mut) {
            for step in steps.iter_mut().filter_map(Value::as_object_mut) {
                step.remove("dbPassword");
            }
        }
        let name = non_blank(self.name).unwrap_or_else(|| "template".to_string());
        Ok((name, template))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TemplateDeployRequest {
    #[serde(alias = "ft_number")]
    pub ft_number: Option<String>,
    /// Inline template. Takes precedence over `template_name`.
    pub template: Option<Value>,
    pub template_name: Option<String>,
    pub db_password: Option<String>,
}

impl TemplateDeployRequest {
    /// The saved template to load, when none is given inline.
    pub fn saved_template_name(&self) -> Option<&str> {
        match &self.template {
            Some(_) => None,
            None => self.template_name.as_deref(),
        }
    }

    /// The job parameters and, separately, the password. `saved` is the
    /// template loaded by name, if any.
    pub fn into_job(self, saved: Option<Value>) -> Result<(TemplateDeployment, Option<String>), ApiError> {
        let missing = || ApiError::BadRequest("Missing ft_number or template".to_string());
        let ft_number = path_component(non_blank(self.ft_number).ok_or_else(missing)?)?;
        let value = self.template.or(saved).ok_or_else(missing)?;
        let template: DeploymentTemplate = serde_json::from_value(value)
            .map_err(|e| ApiError::BadRequest(format!("Invalid template: {}", e)))?;

        if template.steps.is_empty() {
            return Err(ApiError::BadRequest("Template has no steps".to_string()));
        }
        for step in &template.steps {
            let files = step.action.files(&ft_number);
            if files.is_empty() && step.action.kind() != "service_restart" {
                return Err(ApiError::BadRequest(format!("Step {} has no files", step.order)));
            }
            for (ft, file) in files {
                path_component(ft.to_string())?;
                path_component(file.to_string())?;
            }
        }

        let password = self.db_password.filter(|p| !p.is_empty());
        if template.has_sql_steps() && password.is_none() {
            return Err(ApiError::BadRequest(
                "dbPassword is required for SQL steps".to_string(),
            ));
        }

        let template_name = non_blank(self.template_name)
            .or_else(|| {
                template
                    .metadata
                    .get("ft_number")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("Template_{}", ft_number));
        Ok((TemplateDeployment::new(ft_number, template_name, template), password))
    }
}

#[derive(Debug, Serialize)]
pub struct TemplateSaved {
    pub message: &'static str,
    pub path: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    pub older_than_hours: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct FtQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl FtQuery {
    pub fn sql_only(&self) -> bool {
        self.kind.as_deref() == Some("sql")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCreated {
    pub deployment_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<String>,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub results: Vec<ValidationResult>,
}

#[derive(Debug, Serialize)]
pub struct RemovedResponse {
    pub removed: usize,
}

/// One row of the deployment history: the record without logs, parameters inlined.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSummary {
    pub id: JobId,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(flatten)]
    pub params: Metadata,
}

impl From<JobRecord> for DeploymentSummary {
    fn from(record: JobRecord) -> Self {
        Self {
            duration_ms: record.duration_ms(),
            id: record.id,
            kind: record.kind,
            status: record.status,
            timestamp: record.created_at,
            finished_at: record.finished_at,
            params: record.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub jobs: usize,
    pub threading: PoolStatus,
}
