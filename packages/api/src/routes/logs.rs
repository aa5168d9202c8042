//! Deployment logs: a JSON snapshot or a live Server-Sent Events tail.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::StreamExt;
use jobs::{JobId, StreamEvent};
use serde_json::{Value, json};

use crate::dto::LogsResponse;
use crate::error::ApiError;
use crate::state::AppState;

fn wants_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains("text/event-stream"))
}

/// SSE payload: `{message}` per line, `{status, message}` at the end.
fn event_payload(event: &StreamEvent) -> Value {
    match event {
        StreamEvent::Line { message, .. } => json!({ "message": message }),
        StreamEvent::Status { status, message } => json!({ "status": status, "message": message }),
        StreamEvent::NotFound { .. } => {
            json!({ "status": "not_found", "message": "Deployment not found." })
        }
    }
}

/// GET /api/deploy/{id}/logs
pub async fn logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let job_id = JobId::from(id);
    let record = state
        .orchestrator
        .get_job(&job_id)
        .ok_or_else(|| ApiError::NotFound("Deployment not found".to_string()))?;

    if wants_event_stream(&headers) {
        tracing::debug!("Streaming logs of {}", job_id);
        let events = state
            .orchestrator
            .stream_job(job_id)
            .map(|event| Event::default().json_data(event_payload(&event)));
        return Ok(Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    Ok(Json(LogsResponse {
        logs: record.logs,
        status: record.status,
    })
    .into_response())
}
