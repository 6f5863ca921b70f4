pub mod apns;
pub mod conversation;
pub mod diag;
pub mod profile;
pub mod token;
pub mod transcripts;

use axum::http::HeaderMap;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};
use sotto_registry::ClientRecord;

/// Pull the value of `Authorization: Bearer <value>`.
pub fn bearer(headers: &HeaderMap) -> ApiResult<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)
}

/// Authenticate a request as `client_id`: the bearer token must be a client
/// JWT verifying under the client's two-secret window.
pub fn authenticate_client(
    state: &AppState,
    headers: &HeaderMap,
    client_id: &str,
) -> ApiResult<ClientRecord> {
    let token = bearer(headers)?;
    let record = state
        .clients
        .get(client_id)?
        .ok_or(ApiError::Unauthorized)?;
    sotto_auth::verify_client_token(token, &record)?;
    Ok(record)
}

/// Transport fields arrive base64; the store speaks lowercase hex.
pub fn base64_to_hex(field: &str, value: &str) -> ApiResult<String> {
    let bytes = BASE64
        .decode(value)
        .map_err(|_| ApiError::BadRequest(format!("{field} is not valid base64")))?;
    Ok(hex::encode(bytes))
}

pub fn require<'a>(field: &str, value: &'a str) -> ApiResult<&'a str> {
    if value.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} is required")));
    }
    Ok(value)
}
