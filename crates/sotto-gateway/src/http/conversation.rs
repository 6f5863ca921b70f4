//! Conversation metadata and profile-name upserts.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::error::ApiResult;
use crate::http::{authenticate_client, require};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPost {
    client_id: String,
    conversation_id: String,
    #[serde(default)]
    name: String,
    owner_profile_id: String,
}

/// POST /api/v2/conversation — create or rename a conversation. A mismatched
/// owner is a 409 and changes nothing.
pub async fn conversation_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::Json<ConversationPost>,
) -> ApiResult<Json<Value>> {
    let body = body.0;
    require("clientId", &body.client_id)?;
    require("conversationId", &body.conversation_id)?;
    require("ownerProfileId", &body.owner_profile_id)?;
    authenticate_client(&state, &headers, &body.client_id)?;

    let record = state.conversations.upsert(
        &body.conversation_id,
        &body.name,
        &body.owner_profile_id,
    )?;
    Ok(Json(json!({
        "id": record.id,
        "name": record.name,
        "ownerProfileId": record.owner_profile_id,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernamePost {
    #[serde(default)]
    client_id: Option<String>,
    profile_id: String,
    username: String,
}

/// POST /api/v2/username — upsert a profile's display name (and mirror it on
/// the posting client when one is named).
pub async fn username_post(
    State(state): State<Arc<AppState>>,
    body: axum::Json<UsernamePost>,
) -> ApiResult<StatusCode> {
    let body = body.0;
    require("profileId", &body.profile_id)?;
    require("username", &body.username)?;
    state.profiles.set_name(&body.profile_id, &body.username)?;

    if let Some(client_id) = body.client_id.as_deref().filter(|c| !c.is_empty()) {
        if let Some(mut record) = state.clients.get(client_id)? {
            record.user_name = body.username.clone();
            record.profile_id = body.profile_id.clone();
            state.clients.put(&record)?;
            state.profiles.link_client(&body.profile_id, client_id)?;
        }
    }
    info!(profile = %body.profile_id, "username updated");
    Ok(StatusCode::NO_CONTENT)
}
