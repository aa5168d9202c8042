//! Routes that start jobs, plus post-deployment validation.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use jobs::{JobContext, JobId, JobKind, JobResult, Metadata};

use crate::deploy::executors::{self, to_metadata};
use crate::deploy::{FileDeployment, validate_file};
use crate::dto::{
    DeploymentCreated, FileDeployRequest, ShellCommandRequest, SqlDeployRequest, SystemdRequest,
    ValidateResponse,
};
use crate::error::ApiError;
use crate::state::AppState;

pub(crate) async fn submit<F, Fut>(
    state: &AppState,
    kind: JobKind,
    metadata: Metadata,
    job: F,
) -> Result<Json<DeploymentCreated>, ApiError>
where
    F: FnOnce(JobContext) -> Fut + Send + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    let deployment_id = JobId::new();
    let accepted = state
        .orchestrator
        .submit_job(deployment_id.clone(), kind, metadata, job)
        .await?;
    if !accepted {
        return Err(ApiError::Busy(
            "All workers are busy, try again later".to_string(),
        ));
    }
    tracing::info!("[{}-{}] Deployment accepted", kind.log_prefix(), deployment_id);
    Ok(Json(DeploymentCreated { deployment_id }))
}

/// POST /api/deploy/file
pub async fn deploy_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FileDeployRequest>,
) -> Result<Json<DeploymentCreated>, ApiError> {
    let job = req.into_job()?;
    let metadata = to_metadata(&job);
    let settings = state.settings.clone();
    let inventory = state.inventory.clone();
    submit(&state, JobKind::File, metadata, move |ctx| {
        executors::file_deployment(ctx, settings, inventory, job)
    })
    .await
}

/// POST /api/deploy/sql
pub async fn deploy_sql(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SqlDeployRequest>,
) -> Result<Json<DeploymentCreated>, ApiError> {
    let (job, password) = req.into_job()?;
    let metadata = to_metadata(&job);
    let settings = state.settings.clone();
    submit(&state, JobKind::Sql, metadata, move |ctx| {
        executors::sql_deployment(ctx, settings, job, password)
    })
    .await
}

/// POST /api/command/shell
pub async fn shell_command(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ShellCommandRequest>,
) -> Result<Json<DeploymentCreated>, ApiError> {
    let job = req.into_job()?;
    let metadata = to_metadata(&job);
    let settings = state.settings.clone();
    let inventory = state.inventory.clone();
    submit(&state, JobKind::Command, metadata, move |ctx| {
        executors::shell_command(ctx, settings, inventory, job)
    })
    .await
}

/// POST /api/systemd/operation
pub async fn systemd_operation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SystemdRequest>,
) -> Result<Json<DeploymentCreated>, ApiError> {
    let job = req.into_job()?;
    let metadata = to_metadata(&job);
    let settings = state.settings.clone();
    let inventory = state.inventory.clone();
    submit(&state, JobKind::Systemd, metadata, move |ctx| {
        executors::systemd_operation(ctx, settings, inventory, job)
    })
    .await
}

/// POST /api/deploy/{id}/validate
pub async fn validate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let job_id = JobId::from(id);
    let record = state
        .orchestrator
        .get_job(&job_id)
        .ok_or_else(|| ApiError::NotFound("Deployment not found".to_string()))?;
    if record.kind != JobKind::File {
        return Err(ApiError::BadRequest(
            "Only file deployments can be validated".to_string(),
        ));
    }

    let deployment: FileDeployment =
        serde_json::from_value(serde_json::Value::Object(record.metadata))
            .map_err(|e| ApiError::Internal(format!("Unreadable deployment parameters: {}", e)))?;

    let results = validate_file(
        &state.orchestrator,
        &state.settings,
        &state.inventory,
        &job_id,
        &deployment,
    )
    .await;
    Ok(Json(ValidateResponse { results }))
}
