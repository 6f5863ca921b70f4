//! Profile CRUD — /api/v2/{user,whisper,listen,settings,favorites}Profile.
//!
//! Thin handlers over the profile registry: timestamped last-write-wins for
//! whisper/listen/favorites, a version/ETag gate for settings, and an opaque
//! share password checked as a bearer credential on shared profiles.

use axum::{
    extract::{OriginalUri, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use crate::http::{bearer, require};
use sotto_core::time::new_id;
use sotto_registry::{ProfileRecord, ProfileSection};

/// Shared profiles demand the share password as a bearer credential; a
/// password presented against an unshared profile is a 404 (there is nothing
/// shared there to access).
fn check_profile_access(
    state: &AppState,
    headers: &HeaderMap,
    profile: &ProfileRecord,
) -> ApiResult<()> {
    let offered = bearer(headers).ok();
    match (profile.is_shared(), offered) {
        (true, Some(password)) => {
            if state.profiles.check_password(&profile.id, password)? {
                Ok(())
            } else {
                Err(ApiError::Unauthorized)
            }
        }
        (true, None) => Err(ApiError::Unauthorized),
        (false, Some(_)) => Err(ApiError::NotFound(format!(
            "shared profile {}",
            profile.id
        ))),
        (false, None) => Ok(()),
    }
}

fn load_profile(state: &AppState, profile_id: &str) -> ApiResult<ProfileRecord> {
    state
        .profiles
        .get(profile_id)?
        .ok_or_else(|| ApiError::NotFound(format!("profile {profile_id}")))
}

/// Which timestamped section a request addresses, from the route path.
fn section_from_uri(uri: &OriginalUri) -> ApiResult<ProfileSection> {
    let path = uri.0.path();
    if path.contains("/whisperProfile/") {
        Ok(ProfileSection::Whisper)
    } else if path.contains("/listenProfile/") {
        Ok(ProfileSection::Listen)
    } else if path.contains("/favoritesProfile/") {
        Ok(ProfileSection::Favorites)
    } else {
        Err(ApiError::BadRequest("unknown profile section".into()))
    }
}

// ── userProfile ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct UserProfilePost {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    /// Presence of a password shares the profile.
    #[serde(default)]
    pub password: Option<String>,
}

/// POST /api/v2/userProfile — create (or share) a profile.
pub async fn user_profile_post(
    State(state): State<Arc<AppState>>,
    body: axum::Json<UserProfilePost>,
) -> ApiResult<Json<Value>> {
    let body = body.0;
    require("name", &body.name)?;
    let id = body.id.unwrap_or_else(new_id);
    let password = body.password.as_deref().filter(|p| !p.is_empty());

    // a duplicate share must conflict before anything is written
    if password.is_some() {
        if let Some(existing) = state.profiles.get(&id)? {
            if existing.is_shared() {
                return Err(ApiError::Conflict(format!("profile {id} is already shared")));
            }
        }
    }

    state.profiles.set_name(&id, &body.name)?;
    if let Some(password) = password {
        state.profiles.set_password(&id, password)?;
        info!(profile = %id, "profile shared");
    }
    Ok(Json(json!({ "id": id })))
}

/// GET /api/v2/userProfile/:profileId
pub async fn user_profile_get(
    State(state): State<Arc<AppState>>,
    Path(profile_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let profile = load_profile(&state, &profile_id)?;
    check_profile_access(&state, &headers, &profile)?;
    Ok(Json(json!({ "id": profile.id, "name": profile.name })))
}

#[derive(Deserialize)]
pub struct UserProfilePut {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// PUT /api/v2/userProfile/:profileId — rename and/or share.
pub async fn user_profile_put(
    State(state): State<Arc<AppState>>,
    Path(profile_id): Path<String>,
    headers: HeaderMap,
    body: axum::Json<UserProfilePut>,
) -> ApiResult<StatusCode> {
    let body = body.0;
    let profile = load_profile(&state, &profile_id)?;
    check_profile_access(&state, &headers, &profile)?;
    if let Some(name) = body.name.as_deref().filter(|n| !n.is_empty()) {
        state.profiles.set_name(&profile_id, name)?;
    }
    if let Some(password) = body.password.as_deref().filter(|p| !p.is_empty()) {
        state.profiles.set_password(&profile_id, password)?;
    }
    Ok(StatusCode::NO_CONTENT)
}

// ── whisper / listen / favorites sections ─────────────────────────────────────

#[derive(Serialize)]
pub struct SectionResponse {
    pub timestamp: i64,
    pub body: String,
}

/// GET — current section body plus its last-write timestamp.
pub async fn section_get(
    State(state): State<Arc<AppState>>,
    uri: OriginalUri,
    Path(profile_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<SectionResponse>> {
    let section = section_from_uri(&uri)?;
    let profile = load_profile(&state, &profile_id)?;
    check_profile_access(&state, &headers, &profile)?;
    let (timestamp, body) = state.profiles.get_section(&profile_id, section)?;
    Ok(Json(SectionResponse { timestamp, body }))
}

#[derive(Deserialize)]
pub struct SectionPut {
    pub timestamp: i64,
    pub body: String,
}

/// POST|PUT — write a section; a stale timestamp is a 409 and writes
/// nothing.
pub async fn section_put(
    State(state): State<Arc<AppState>>,
    uri: OriginalUri,
    Path(profile_id): Path<String>,
    headers: HeaderMap,
    body: axum::Json<SectionPut>,
) -> ApiResult<StatusCode> {
    let section = section_from_uri(&uri)?;
    let payload = body.0;
    let profile = load_profile(&state, &profile_id)?;
    check_profile_access(&state, &headers, &profile)?;
    state
        .profiles
        .put_section(&profile_id, section, payload.timestamp, &payload.body)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── settings (versioned, ETag) ────────────────────────────────────────────────

/// GET /api/v2/settingsProfile/:profileId — 412 when If-None-Match already
/// names the current version, otherwise the body with its ETag.
pub async fn settings_get(
    State(state): State<Arc<AppState>>,
    Path(profile_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<(HeaderMap, Json<Value>)> {
    let profile = load_profile(&state, &profile_id)?;
    check_profile_access(&state, &headers, &profile)?;

    let etag = profile.settings_etag();
    if let Some(seen) = headers.get("if-none-match").and_then(|v| v.to_str().ok()) {
        if seen == etag {
            return Err(ApiError::PreconditionFailed);
        }
    }

    let mut out = HeaderMap::new();
    if let Ok(value) = etag.parse() {
        out.insert("etag", value);
    }
    Ok((
        out,
        Json(json!({
            "version": profile.settings_version,
            "body": profile.settings_body,
        })),
    ))
}

#[derive(Deserialize)]
pub struct SettingsPut {
    /// The version the writer last saw; anything else conflicts.
    pub version: i64,
    pub body: String,
}

/// PUT /api/v2/settingsProfile/:profileId
pub async fn settings_put(
    State(state): State<Arc<AppState>>,
    Path(profile_id): Path<String>,
    headers: HeaderMap,
    body: axum::Json<SettingsPut>,
) -> ApiResult<(HeaderMap, StatusCode)> {
    let payload = body.0;
    let profile = load_profile(&state, &profile_id)?;
    check_profile_access(&state, &headers, &profile)?;
    let next = state
        .profiles
        .put_settings(&profile_id, payload.version, &payload.body)?;
    let mut out = HeaderMap::new();
    if let Ok(value) = format!("\"{next}\"").parse() {
        out.insert("etag", value);
    }
    Ok((out, StatusCode::NO_CONTENT))
}
