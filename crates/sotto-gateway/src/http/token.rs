//! Capability token issuance — POST /api/v2/pubSubTokenRequest and the
//! browser-side GET /api/v2/listenTokenRequest.
//!
//! A Whisperer's first publish request for a (client, conversation, content)
//! triple claims the conversation: the registry records ownership, the
//! Whisperer's profile name is saved, any prior transcript of the same
//! Whisperer is terminated, and (on request) a transcription worker spawns.
//! Renewals within the claim TTL just mint another token.

use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::http::{authenticate_client, require};
use crate::session::{cookie_value, SESSION_COOKIE};
use sotto_broker::Activity;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequestBody {
    client_id: String,
    /// "publish" (Whisperer), "subscribe" (Listener) or "whisper" (legacy
    /// one-to-one channel).
    activity: String,
    conversation_id: String,
    #[serde(default)]
    profile_id: String,
    #[serde(default)]
    conversation_name: Option<String>,
    #[serde(default)]
    content_id: Option<String>,
    #[serde(default)]
    username: Option<String>,
    /// "yes" opts the session into server-side transcription.
    #[serde(default)]
    transcribe: Option<String>,
    /// IANA zone used when rendering this session's transcript.
    #[serde(default)]
    tz_id: Option<String>,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub status: &'static str,
    /// Stringified signed token request the client trades with the broker.
    #[serde(rename = "tokenRequest")]
    pub token_request: String,
}

/// POST /api/v2/pubSubTokenRequest — requires `Authorization: Bearer
/// <client JWT>`.
pub async fn pub_sub_token_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::Json<TokenRequestBody>,
) -> ApiResult<Json<TokenResponse>> {
    let body = body.0;
    require("clientId", &body.client_id)?;
    require("conversationId", &body.conversation_id)?;
    authenticate_client(&state, &headers, &body.client_id)?;

    let activity = match body.activity.as_str() {
        "publish" => {
            let content_id = body
                .content_id
                .as_deref()
                .ok_or_else(|| ApiError::BadRequest("contentId is required to publish".into()))?;
            require("profileId", &body.profile_id)?;

            let is_new_session = state.authz.claim_whisper(
                &body.client_id,
                &body.conversation_id,
                content_id,
            )?;
            if is_new_session {
                begin_session(&state, &body, content_id).await?;
            } else {
                info!(
                    client = %body.client_id,
                    conversation = %body.conversation_id,
                    "publish renewal"
                );
            }
            Activity::Publish {
                conversation_id: body.conversation_id.clone(),
                content_id: content_id.to_string(),
            }
        }
        "subscribe" => {
            state
                .authz
                .mark_listen(&body.client_id, &body.conversation_id)?;
            Activity::Subscribe {
                conversation_id: body.conversation_id.clone(),
            }
        }
        "whisper" => Activity::Whisper {
            peer_id: body.conversation_id.clone(),
        },
        other => {
            return Err(ApiError::BadRequest(format!("unknown activity {other:?}")));
        }
    };

    let request = state.minter.mint(&body.client_id, &activity)?;
    Ok(Json(TokenResponse {
        status: "success",
        token_request: serde_json::to_string(&request)
            .map_err(|e| ApiError::Internal(e.to_string()))?,
    }))
}

/// First-publisher side effects: conversation ownership, profile name,
/// prior-session bracketing, optional transcription start.
async fn begin_session(
    state: &AppState,
    body: &TokenRequestBody,
    content_id: &str,
) -> ApiResult<()> {
    let name = body
        .conversation_name
        .clone()
        .or_else(|| {
            state
                .conversations
                .get(&body.conversation_id)
                .ok()
                .flatten()
                .map(|c| c.name)
        })
        .unwrap_or_default();
    state
        .conversations
        .upsert(&body.conversation_id, &name, &body.profile_id)?;

    if let Some(username) = body.username.as_deref().filter(|u| !u.is_empty()) {
        state.profiles.set_name(&body.profile_id, username)?;
    }
    state
        .profiles
        .link_client(&body.profile_id, &body.client_id)?;
    if let Some(mut client) = state.clients.get(&body.client_id)? {
        if client.profile_id != body.profile_id {
            client.profile_id = body.profile_id.clone();
            state.clients.put(&client)?;
        }
    }

    // one live transcript per Whisperer, across every client of the profile
    let mut whisperer_clients = state.profiles.clients_of(&body.profile_id)?;
    if !whisperer_clients.contains(&body.client_id) {
        whisperer_clients.push(body.client_id.clone());
    }
    for client in &whisperer_clients {
        state.engine.end_transcripts_for_whisperer(client).await?;
    }

    if body.transcribe.as_deref() == Some("yes") {
        let tz = body.tz_id.as_deref().unwrap_or("UTC");
        let transcript = state
            .engine
            .start_transcription(&body.client_id, &body.conversation_id, content_id, tz)
            .await?;
        info!(
            transcript = %transcript,
            conversation = %body.conversation_id,
            "transcription requested"
        );
    }

    info!(
        client = %body.client_id,
        conversation = %body.conversation_id,
        "new whisper session claimed"
    );
    Ok(())
}

/// GET /api/v2/listenTokenRequest — browser listeners authenticated by the
/// signed session cookie set by /listen/:conversationId.
pub async fn listen_token_request(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<TokenResponse>> {
    let cookie_header = headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let session = cookie_value(cookie_header, SESSION_COOKIE).ok_or(ApiError::Unauthorized)?;
    let claims = state.sessions.verify(session)?;

    state
        .authz
        .mark_listen(&claims.client_id, &claims.conversation_id)
        .unwrap_or_else(|e| warn!(error = %e, "listen mark failed"));

    let request = state.minter.mint(
        &claims.client_id,
        &Activity::Subscribe {
            conversation_id: claims.conversation_id.clone(),
        },
    )?;
    Ok(Json(TokenResponse {
        status: "success",
        token_request: serde_json::to_string(&request)
            .map_err(|e| ApiError::Internal(e.to_string()))?,
    }))
}
