//! Transcript listing/rendering and the browser listener landing page.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue},
    response::Html,
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::http::authenticate_client;
use crate::session::{SessionClaims, SESSION_COOKIE};
use sotto_core::time::new_id;
use sotto_transcribe::{render_transcript_html, transcripts_for_conversation, TranscriptSummary};

/// GET /api/v2/listTranscripts/:clientId/:conversationId — owner-only.
pub async fn list_transcripts(
    State(state): State<Arc<AppState>>,
    Path((client_id, conversation_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Vec<TranscriptSummary>>> {
    let client = authenticate_client(&state, &headers, &client_id)?;
    let conversation = state
        .conversations
        .get(&conversation_id)?
        .ok_or_else(|| ApiError::NotFound(format!("conversation {conversation_id}")))?;
    if conversation.owner_profile_id.is_empty()
        || conversation.owner_profile_id != client.profile_id
    {
        return Err(ApiError::Unauthorized);
    }

    let records = transcripts_for_conversation(
        state.engine.transcripts(),
        &conversation_id,
        state.config.transcription.lookback_days,
    )?;
    Ok(Json(records.iter().map(TranscriptSummary::from).collect()))
}

/// GET /transcript/:conversationId/:transcriptId — public HTML rendering;
/// 404 unless the transcript exists, is finalized, and belongs to the named
/// conversation.
pub async fn transcript_page(
    State(state): State<Arc<AppState>>,
    Path((conversation_id, transcript_id)): Path<(String, String)>,
) -> ApiResult<Html<String>> {
    let record = state
        .engine
        .transcripts()
        .get(&transcript_id)?
        .filter(|r| r.conversation_id == conversation_id && r.is_finalized())
        .ok_or_else(|| ApiError::NotFound(format!("transcript {transcript_id}")))?;
    let conversation_name = state
        .conversations
        .get(&conversation_id)?
        .map(|c| c.name)
        .unwrap_or_else(|| "Conversation".to_string());
    Ok(Html(render_transcript_html(&record, &conversation_name)))
}

static LISTEN_HTML: &str = include_str!("../../static/listen.html");

/// GET /listen/:conversationId — hands the browser its listener identity as
/// cookies plus a signed session, then serves the redirect page that loads
/// the listener app.
pub async fn listen_page(
    State(state): State<Arc<AppState>>,
    Path(params): Path<std::collections::HashMap<String, String>>,
) -> ApiResult<(HeaderMap, Html<&'static str>)> {
    let conversation_id = params
        .get("conversation_id")
        .cloned()
        .ok_or_else(|| ApiError::BadRequest("missing conversation id".into()))?;

    let conversation = state
        .conversations
        .get(&conversation_id)?
        .ok_or_else(|| ApiError::NotFound(format!("conversation {conversation_id}")))?;
    let whisperer_name = state
        .profiles
        .get(&conversation.owner_profile_id)?
        .map(|p| p.name)
        .unwrap_or_default();

    let client_id = new_id();
    let session = state.sessions.sign(&SessionClaims {
        client_id: client_id.clone(),
        conversation_id: conversation_id.clone(),
    })?;
    let presence_logging = state.clients.presence_logging()?;

    let mut headers = HeaderMap::new();
    for cookie in [
        format!("conversationId={conversation_id}; Path=/"),
        format!(
            "conversationName={}; Path=/",
            urlencode(&conversation.name)
        ),
        format!("whispererName={}; Path=/", urlencode(&whisperer_name)),
        format!("clientId={client_id}; Path=/"),
        // the listener app fills this in once the user picks a name
        "clientName=; Path=/".to_string(),
        format!("logPresenceChunks={presence_logging}; Path=/"),
        format!("{SESSION_COOKIE}={session}; Path=/; HttpOnly; SameSite=Lax"),
    ] {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            headers.append(header::SET_COOKIE, value);
        }
    }
    info!(conversation = %conversation_id, listener = %client_id, "browser listener session");
    Ok((headers, Html(LISTEN_HTML)))
}

/// Minimal percent-encoding for cookie values (space and separators).
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}
