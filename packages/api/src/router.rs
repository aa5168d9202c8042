//! Axum router setup.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::routes;
use crate::state::AppState;

/// Create the router with every `/api` route.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/vms", get(routes::inventory::vms))
        .route("/db/users", get(routes::inventory::db_users))
        .route("/systemd/services", get(routes::inventory::systemd_services))
        .route("/fts", get(routes::fts::list_fts))
        .route("/fts/{ft}/files", get(routes::fts::list_ft_files))
        // Job submission
        .route("/deploy/file", post(routes::deploy::deploy_file))
        .route("/deploy/sql", post(routes::deploy::deploy_sql))
        .route("/command/shell", post(routes::deploy::shell_command))
        .route("/systemd/operation", post(routes::deploy::systemd_operation))
        .route("/deploy/{id}/validate", post(routes::deploy::validate))
        .route("/deploy/{id}/logs", get(routes::logs::logs))
        // Templates
        .route("/templates/save", post(routes::templates::save))
        .route("/templates/list", get(routes::templates::list))
        .route(
            "/templates/{name}",
            get(routes::templates::get).delete(routes::templates::delete),
        )
        .route("/deploy/template", post(routes::templates::deploy))
        .route("/deploy/template/{id}/logs", get(routes::logs::logs))
        // History and retention
        .route("/deployments/history", get(routes::history::history))
        .route("/deployments/purge", post(routes::history::purge))
        .route("/deployments", axum::routing::delete(routes::history::clear))
        .route("/system/threads", get(routes::system::threads))
        .route("/system/health", get(routes::system::health));

    Router::new()
        .nest("/api", api_routes)
        // TODO: restrict origins once the frontend host is configurable
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
