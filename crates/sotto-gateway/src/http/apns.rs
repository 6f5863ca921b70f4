//! Client onboarding endpoints — POST /api/v2/apnsToken and
//! POST /api/v2/apnsReceivedNotification.
//!
//! The token POST drives the whole rotation protocol: detect drift, persist
//! the posted identity, rotate the secret, push it out of band. The
//! acknowledgment POST closes the rotation window.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::http::{base64_to_hex, require};
use sotto_auth::{apply_token_post, TokenPost};
use sotto_core::time::epoch_ms;
use sotto_registry::ClientRecord;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApnsTokenBody {
    client_id: String,
    /// Device push token, base64.
    token: String,
    /// The secret the client currently holds, base64.
    last_secret: String,
    #[serde(default)]
    user_name: Option<String>,
    #[serde(default)]
    app_info: Option<String>,
    /// The client's view of the presence-logging flag; informational. The
    /// server-side flag is what participates in change detection.
    #[serde(default)]
    #[allow(dead_code)]
    is_presence_logging: Option<bool>,
}

/// POST /api/v2/apnsToken — the launch handshake. Responds 204 always; a
/// duplicate within the suppression window is marked with
/// `X-Received-Earlier: 1` and has no side effects.
pub async fn apns_token(
    State(state): State<Arc<AppState>>,
    body: axum::Json<ApnsTokenBody>,
) -> ApiResult<(StatusCode, HeaderMap)> {
    let body = body.0;
    require("clientId", &body.client_id)?;
    let token_hex = base64_to_hex("token", require("token", &body.token)?)?;
    let last_secret_hex = base64_to_hex("lastSecret", &body.last_secret)?;

    let mut headers = HeaderMap::new();
    if state
        .clients
        .absorb_duplicate_post(&body.client_id, &token_hex)?
    {
        info!(client = %body.client_id, "duplicate token POST absorbed");
        headers.insert(
            "X-Received-Earlier",
            axum::http::HeaderValue::from_static("1"),
        );
        return Ok((StatusCode::NO_CONTENT, headers));
    }

    let mut record = state
        .clients
        .get(&body.client_id)?
        .unwrap_or_else(|| ClientRecord {
            id: body.client_id.clone(),
            ..Default::default()
        });

    let post = TokenPost {
        client_id: body.client_id.clone(),
        device_token: token_hex,
        last_secret: last_secret_hex,
        app_info: body.app_info.unwrap_or_default(),
        user_name: body.user_name,
        presence_logging: state.clients.presence_logging()?,
    };
    let outcome = apply_token_post(&mut record, &post, epoch_ms())?;
    // persist before pushing: a stored-but-unpushed secret self-heals on the
    // next launch, a pushed-but-unstored one cannot
    state.clients.put(&record)?;

    if outcome.did_rotate {
        let push = state.push.clone();
        let (device_token, secret, push_id) = (
            record.device_token.clone(),
            record.secret.clone(),
            record.push_request_id.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = push.push_secret(&device_token, &secret, &push_id).await {
                warn!(push_request = %push_id, error = %e, "secret push errored");
            }
        });
    }

    Ok((StatusCode::NO_CONTENT, headers))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApnsReceivedBody {
    client_id: String,
    /// The secret the client now holds (i.e. the one just delivered), base64.
    last_secret: String,
}

/// POST /api/v2/apnsReceivedNotification — the device confirms it holds the
/// pushed secret; the unacknowledged window closes.
pub async fn apns_received_notification(
    State(state): State<Arc<AppState>>,
    body: axum::Json<ApnsReceivedBody>,
) -> ApiResult<StatusCode> {
    let body = body.0;
    require("clientId", &body.client_id)?;
    let last_secret_hex = base64_to_hex("lastSecret", &body.last_secret)?;

    let mut record = state
        .clients
        .get(&body.client_id)?
        .ok_or_else(|| ApiError::NotFound(format!("client {}", body.client_id)))?;
    sotto_auth::rotation::acknowledge(&mut record, &last_secret_hex, epoch_ms());
    state.clients.put(&record)?;
    info!(client = %body.client_id, "secret acknowledged");
    Ok(StatusCode::NO_CONTENT)
}
