//! Signed browser sessions for the listener landing page.
//!
//! `GET /listen/:conversationId` hands the browser a signed session cookie;
//! `GET /api/v2/listenTokenRequest` accepts only requests that present it.
//! Signing keys live in the store (`sessionKeys` list) so every process in a
//! deployment verifies every other process's cookies.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sotto_store::Store;
use tracing::info;

use crate::error::{ApiError, ApiResult};

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "sottoSession";
const SESSION_KEYS: &str = "sessionKeys";

/// What a listener session asserts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
}

pub struct SessionSigner {
    store: Arc<Store>,
}

impl SessionSigner {
    /// Ensure at least one signing key exists, minting the first on a fresh
    /// deployment.
    pub fn new(store: Arc<Store>) -> ApiResult<Self> {
        if store.llen(SESSION_KEYS)? == 0 {
            let mut key = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut key);
            store.lpush(SESSION_KEYS, &hex::encode(key))?;
            info!("minted initial browser session key");
        }
        Ok(Self { store })
    }

    fn keys(&self) -> ApiResult<Vec<String>> {
        Ok(self.store.lrange(SESSION_KEYS, 0, -1)?)
    }

    /// Cookie value: `base64(claims).hex(mac)` signed with the newest key.
    pub fn sign(&self, claims: &SessionClaims) -> ApiResult<String> {
        let key = self
            .keys()?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Internal("no session keys".to_string()))?;
        let payload = B64.encode(
            serde_json::to_vec(claims).map_err(|e| ApiError::Internal(e.to_string()))?,
        );
        let mac = sign_payload(&key, &payload)?;
        Ok(format!("{payload}.{mac}"))
    }

    /// Verify against every stored key so sessions survive key rotation.
    pub fn verify(&self, cookie_value: &str) -> ApiResult<SessionClaims> {
        let (payload, mac) = cookie_value
            .split_once('.')
            .ok_or(ApiError::Unauthorized)?;
        let valid = self
            .keys()?
            .iter()
            .any(|key| sign_payload(key, payload).is_ok_and(|expected| expected == mac));
        if !valid {
            return Err(ApiError::Unauthorized);
        }
        let bytes = B64.decode(payload).map_err(|_| ApiError::Unauthorized)?;
        serde_json::from_slice(&bytes).map_err(|_| ApiError::Unauthorized)
    }
}

fn sign_payload(key_hex: &str, payload: &str) -> ApiResult<String> {
    let key = hex::decode(key_hex).map_err(|e| ApiError::Internal(e.to_string()))?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Pull a named cookie out of a `Cookie:` header line.
pub fn cookie_value<'a>(cookie_header: &'a str, name: &str) -> Option<&'a str> {
    cookie_header.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then_some(v)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> (tempfile::TempDir, SessionSigner) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = Arc::new(Store::open(path.to_str().unwrap(), "t").unwrap());
        (dir, SessionSigner::new(store).unwrap())
    }

    #[test]
    fn sign_verify_round_trip() {
        let (_dir, signer) = signer();
        let claims = SessionClaims {
            client_id: "c1".into(),
            conversation_id: "conv".into(),
        };
        let cookie = signer.sign(&claims).unwrap();
        assert_eq!(signer.verify(&cookie).unwrap(), claims);
    }

    #[test]
    fn tampered_cookie_is_rejected() {
        let (_dir, signer) = signer();
        let claims = SessionClaims {
            client_id: "c1".into(),
            conversation_id: "conv".into(),
        };
        let cookie = signer.sign(&claims).unwrap();
        let forged = SessionClaims {
            client_id: "c1".into(),
            conversation_id: "other".into(),
        };
        let forged_payload = B64.encode(serde_json::to_vec(&forged).unwrap());
        let (_, mac) = cookie.split_once('.').unwrap();
        assert!(matches!(
            signer.verify(&format!("{forged_payload}.{mac}")).unwrap_err(),
            ApiError::Unauthorized
        ));
        assert!(signer.verify("no-dot-here").is_err());
    }

    #[test]
    fn cookie_header_parsing() {
        let header = "a=1; sottoSession=abc.def; b=2";
        assert_eq!(cookie_value(header, "sottoSession"), Some("abc.def"));
        assert_eq!(cookie_value(header, "missing"), None);
    }
}
