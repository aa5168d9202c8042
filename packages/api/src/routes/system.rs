//! Worker pool status and health.

use std::sync::Arc;

use axum::{Json, extract::State};
use jobs::PoolStatus;

use crate::dto::HealthResponse;
use crate::state::AppState;

/// GET /api/system/threads
pub async fn threads(State(state): State<Arc<AppState>>) -> Json<PoolStatus> {
    Json(state.orchestrator.pool_status())
}

/// GET /api/system/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        jobs: state.orchestrator.store().len(),
        threading: state.orchestrator.pool_status(),
    })
}
