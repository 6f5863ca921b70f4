use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AuthError, Result};
use sotto_registry::ClientRecord;

#[derive(Debug, Serialize, Deserialize)]
struct ClientClaims {
    iss: String,
    iat: i64,
}

/// Which of the client's two secrets verified the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedSecret {
    Current,
    /// The prior secret. Accepted as a one-time fallback while the client
    /// catches up to a rotation it has not acknowledged yet.
    Last,
}

/// Sign a client token: HS256 over the raw bytes of the hex-decoded secret,
/// claims `{iss: client_id, iat}`. Client tokens carry no expiry; secrets
/// rotate instead.
pub fn issue_client_token(client_id: &str, secret_hex: &str) -> Result<String> {
    let key = EncodingKey::from_secret(&hex::decode(secret_hex)?);
    let claims = ClientClaims {
        iss: client_id.to_string(),
        iat: Utc::now().timestamp(),
    };
    Ok(encode(&Header::new(Algorithm::HS256), &claims, &key)?)
}

/// Verify a client token against the client's current secret, then the prior
/// one. An invalid signature under both fails authentication; any other
/// verification error is re-raised unchanged.
pub fn verify_client_token(token: &str, record: &ClientRecord) -> Result<VerifiedSecret> {
    match verify_with(token, &record.secret, &record.id) {
        Ok(()) => return Ok(VerifiedSecret::Current),
        Err(AuthError::AuthFailed) => {}
        Err(other) => return Err(other),
    }
    if record.last_secret.is_empty() {
        return Err(AuthError::AuthFailed);
    }
    match verify_with(token, &record.last_secret, &record.id) {
        Ok(()) => {
            debug!(client = %record.id, "token verified with prior secret");
            Ok(VerifiedSecret::Last)
        }
        Err(e) => Err(e),
    }
}

fn verify_with(token: &str, secret_hex: &str, client_id: &str) -> Result<()> {
    if secret_hex.is_empty() {
        return Err(AuthError::AuthFailed);
    }
    let key = DecodingKey::from_secret(&hex::decode(secret_hex)?);
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    let data = match decode::<ClientClaims>(token, &key, &validation) {
        Ok(data) => data,
        Err(e) if matches!(e.kind(), ErrorKind::InvalidSignature) => {
            return Err(AuthError::AuthFailed)
        }
        Err(e) => return Err(AuthError::Jwt(e)),
    };
    if data.claims.iss != client_id {
        return Err(AuthError::AuthFailed);
    }
    Ok(())
}
