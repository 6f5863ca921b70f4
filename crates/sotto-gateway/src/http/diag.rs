//! Liveness and fire-and-forget diagnostic sinks.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "env": state.config.env,
        "serverId": state.engine.server_id(),
        "activeTranscripts": state.engine.active_count(),
    }))
}

/// POST /logPresenceChunk — browser listeners report the presence frames
/// they saw; purely for operator debugging, always 204.
pub async fn log_presence_chunk(Json(body): Json<Value>) -> StatusCode {
    info!(target: "sotto_diag", kind = "presence", payload = %body);
    StatusCode::NO_CONTENT
}

/// POST /logAnomaly
pub async fn log_anomaly(Json(body): Json<Value>) -> StatusCode {
    info!(target: "sotto_diag", kind = "anomaly", payload = %body);
    StatusCode::NO_CONTENT
}

/// POST /logChannelEvent
pub async fn log_channel_event(Json(body): Json<Value>) -> StatusCode {
    info!(target: "sotto_diag", kind = "channel", payload = %body);
    StatusCode::NO_CONTENT
}
