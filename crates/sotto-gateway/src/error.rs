use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// The request failure taxonomy. Every handler returns
/// `Result<_, ApiError>`, so an error anywhere in a handler still produces a
/// well-formed status + JSON reason.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Precondition failed")]
    PreconditionFailed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = match &self {
            ApiError::BadRequest(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            ApiError::Unauthorized => (StatusCode::FORBIDDEN, "unauthorized".to_string()),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what.clone()),
            ApiError::Conflict(reason) => (StatusCode::CONFLICT, reason.clone()),
            ApiError::PreconditionFailed => {
                (StatusCode::PRECONDITION_FAILED, "precondition failed".to_string())
            }
            ApiError::Internal(reason) => {
                error!(%reason, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, reason.clone())
            }
        };
        (status, Json(json!({ "error": reason }))).into_response()
    }
}

impl From<sotto_registry::RegistryError> for ApiError {
    fn from(e: sotto_registry::RegistryError) -> Self {
        use sotto_registry::RegistryError;
        match e {
            RegistryError::NotFound { kind, id } => ApiError::NotFound(format!("{kind} {id}")),
            RegistryError::Conflict(reason) => ApiError::Conflict(reason),
            RegistryError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<sotto_store::StoreError> for ApiError {
    fn from(e: sotto_store::StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<sotto_auth::AuthError> for ApiError {
    fn from(e: sotto_auth::AuthError) -> Self {
        use sotto_auth::AuthError;
        match e {
            AuthError::AuthFailed | AuthError::Jwt(_) => ApiError::Unauthorized,
            AuthError::MissingDeviceToken => {
                ApiError::BadRequest("client has no device token".to_string())
            }
            AuthError::BadSecretHex(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<sotto_broker::BrokerError> for ApiError {
    fn from(e: sotto_broker::BrokerError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<sotto_transcribe::TranscribeError> for ApiError {
    fn from(e: sotto_transcribe::TranscribeError) -> Self {
        use sotto_transcribe::TranscribeError;
        match e {
            TranscribeError::NotFound(id) => ApiError::NotFound(format!("transcript {id}")),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
