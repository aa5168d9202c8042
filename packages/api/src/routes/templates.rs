//! Saved templates and template deployments.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use jobs::JobKind;
use serde_json::Value;

use super::deploy::submit;
use crate::deploy::executors::to_metadata;
use crate::deploy::template;
use crate::dto::{
    DeploymentCreated, MessageResponse, SaveTemplateRequest, TemplateDeployRequest, TemplateSaved,
};
use crate::error::ApiError;
use crate::state::AppState;

fn not_found() -> ApiError {
    ApiError::NotFound("Template not found".to_string())
}

/// POST /api/templates/save
pub async fn save(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveTemplateRequest>,
) -> Result<Json<TemplateSaved>, ApiError> {
    let (name, template) = req.into_parts()?;
    let (_, path) = state.templates.save(&name, &template).await?;
    Ok(Json(TemplateSaved {
        message: "Template saved successfully",
        path: path.to_string_lossy().into_owned(),
        name,
    }))
}

/// GET /api/templates/list
pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.templates.list().await?))
}

/// GET /api/templates/{name}
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .templates
        .get(&name)
        .await?
        .map(Json)
        .ok_or_else(not_found)
}

/// DELETE /api/templates/{name}
pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.templates.delete(&name).await? {
        return Err(not_found());
    }
    Ok(Json(MessageResponse {
        message: "Template deleted successfully",
    }))
}

/// POST /api/deploy/template
pub async fn deploy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TemplateDeployRequest>,
) -> Result<Json<DeploymentCreated>, ApiError> {
    let saved = match req.saved_template_name() {
        Some(name) => Some(state.templates.get(name).await?.ok_or_else(not_found)?),
        None => None,
    };
    let (job, password) = req.into_job(saved)?;
    let metadata = to_metadata(&job);
    let settings = state.settings.clone();
    let inventory = state.inventory.clone();
    submit(&state, JobKind::Template, metadata, move |ctx| {
        template::template_deployment(ctx, settings, inventory, job, password)
    })
    .await
}
