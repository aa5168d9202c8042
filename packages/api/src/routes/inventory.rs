//! Inventory lookups.

use std::sync::Arc;

use axum::{Json, extract::State};

use crate::inventory::Vm;
use crate::state::AppState;

/// GET /api/vms
pub async fn vms(State(state): State<Arc<AppState>>) -> Json<Vec<Vm>> {
    Json(state.inventory.vms.clone())
}

/// GET /api/db/users
pub async fn db_users(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.inventory.db_users.clone())
}

/// GET /api/systemd/services
pub async fn systemd_services(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.inventory.systemd_services.clone())
}
