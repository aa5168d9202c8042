//! Deployment history and retention.

use std::sync::Arc;
use std::time::Duration;

use axum::{Json, extract::State};

use crate::dto::{DeploymentSummary, PurgeRequest, RemovedResponse};
use crate::state::AppState;

/// GET /api/deployments/history
pub async fn history(State(state): State<Arc<AppState>>) -> Json<Vec<DeploymentSummary>> {
    let rows = state
        .orchestrator
        .list_jobs()
        .into_iter()
        .map(DeploymentSummary::from)
        .collect();
    Json(rows)
}

/// POST /api/deployments/purge
pub async fn purge(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PurgeRequest>,
) -> Json<RemovedResponse> {
    let age = Duration::from_secs(req.older_than_hours.saturating_mul(3600));
    let removed = state.orchestrator.purge_older_than(age).await;
    Json(RemovedResponse { removed })
}

/// DELETE /api/deployments
pub async fn clear(State(state): State<Arc<AppState>>) -> Json<RemovedResponse> {
    let removed = state.orchestrator.clear().await;
    Json(RemovedResponse { removed })
}
