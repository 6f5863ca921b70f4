//! Capability token-request minting.
//!
//! The server never hands clients the broker key. It signs a token request
//! scoped to exactly the channels the caller may use; the client trades the
//! request with the broker for a short-lived access token bearing the same
//! `client_id`.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{BrokerError, Result};
use sotto_core::time::epoch_ms;

type HmacSha256 = Hmac<Sha256>;

/// What the caller wants to do in the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    /// Whisperer: full control-channel rights plus publish on its own
    /// content channel.
    Publish {
        conversation_id: String,
        content_id: String,
    },
    /// Listener: control-channel rights plus subscribe on every channel of
    /// the conversation.
    Subscribe { conversation_id: String },
    /// Legacy one-to-one whisper channel.
    Whisper { peer_id: String },
}

impl Activity {
    /// The broker capability map: channel name → allowed operations.
    /// BTreeMap keeps the serialized form stable, which the MAC depends on.
    pub fn capability(&self) -> BTreeMap<String, Vec<&'static str>> {
        let mut map = BTreeMap::new();
        match self {
            Activity::Publish {
                conversation_id,
                content_id,
            } => {
                map.insert(
                    format!("{conversation_id}:control"),
                    vec!["publish", "subscribe", "presence"],
                );
                map.insert(format!("{conversation_id}:{content_id}"), vec!["publish"]);
            }
            Activity::Subscribe { conversation_id } => {
                map.insert(
                    format!("{conversation_id}:control"),
                    vec!["publish", "subscribe", "presence"],
                );
                map.insert(format!("{conversation_id}:*"), vec!["subscribe"]);
            }
            Activity::Whisper { peer_id } => {
                map.insert(
                    format!("{peer_id}:whisper"),
                    vec!["publish", "subscribe", "presence"],
                );
            }
        }
        map
    }
}

/// A signed token request, serialized to the broker's expected field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub key_name: String,
    pub client_id: String,
    /// JSON-encoded capability map.
    pub capability: String,
    pub ttl: i64,
    pub timestamp: i64,
    pub nonce: String,
    pub mac: String,
}

pub struct TokenMinter {
    key_name: String,
    key_secret: String,
    ttl_ms: i64,
}

impl TokenMinter {
    /// `publish_key` is `name:secret` as issued by the broker dashboard.
    pub fn from_key(publish_key: &str, ttl_ms: i64) -> Result<Self> {
        let (name, secret) = publish_key.split_once(':').ok_or(BrokerError::BadKey)?;
        if name.is_empty() || secret.is_empty() {
            return Err(BrokerError::BadKey);
        }
        Ok(Self {
            key_name: name.to_string(),
            key_secret: secret.to_string(),
            ttl_ms,
        })
    }

    /// Mint a signed request binding `client_id` to the activity's channels.
    pub fn mint(&self, client_id: &str, activity: &Activity) -> Result<TokenRequest> {
        let capability = serde_json::to_string(&activity.capability())?;
        let timestamp = epoch_ms();
        let nonce = make_nonce();

        let canonical = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.key_name, self.ttl_ms, capability, client_id, timestamp, nonce
        );
        let mut mac = HmacSha256::new_from_slice(self.key_secret.as_bytes())
            .map_err(|e| BrokerError::Transport(e.to_string()))?;
        mac.update(canonical.as_bytes());
        let mac = BASE64.encode(mac.finalize().into_bytes());

        Ok(TokenRequest {
            key_name: self.key_name.clone(),
            client_id: client_id.to_string(),
            capability,
            ttl: self.ttl_ms,
            timestamp,
            nonce,
            mac,
        })
    }
}

fn make_nonce() -> String {
    let mut buf = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minter() -> TokenMinter {
        TokenMinter::from_key("app.key:sekrit", 3_600_000).unwrap()
    }

    #[test]
    fn publish_capability_scopes_control_and_content() {
        let activity = Activity::Publish {
            conversation_id: "conv".into(),
            content_id: "feed".into(),
        };
        let cap = serde_json::to_string(&activity.capability()).unwrap();
        assert_eq!(
            cap,
            r#"{"conv:control":["publish","subscribe","presence"],"conv:feed":["publish"]}"#
        );
    }

    #[test]
    fn subscribe_capability_uses_wildcard() {
        let activity = Activity::Subscribe {
            conversation_id: "conv".into(),
        };
        let cap = serde_json::to_string(&activity.capability()).unwrap();
        assert_eq!(
            cap,
            r#"{"conv:*":["subscribe"],"conv:control":["publish","subscribe","presence"]}"#
        );
    }

    #[test]
    fn whisper_capability_targets_peer_channel() {
        let activity = Activity::Whisper {
            peer_id: "peer-1".into(),
        };
        let cap = serde_json::to_string(&activity.capability()).unwrap();
        assert_eq!(cap, r#"{"peer-1:whisper":["publish","subscribe","presence"]}"#);
    }

    #[test]
    fn token_request_binds_client_and_verifies() {
        let minter = minter();
        let request = minter
            .mint(
                "client-1",
                &Activity::Subscribe {
                    conversation_id: "conv".into(),
                },
            )
            .unwrap();
        assert_eq!(request.client_id, "client-1");
        assert_eq!(request.key_name, "app.key");
        assert_eq!(request.ttl, 3_600_000);
        assert_eq!(request.nonce.len(), 32);

        // recompute the MAC the way the broker would
        let canonical = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            request.key_name,
            request.ttl,
            request.capability,
            request.client_id,
            request.timestamp,
            request.nonce
        );
        let mut mac = HmacSha256::new_from_slice(b"sekrit").unwrap();
        mac.update(canonical.as_bytes());
        assert_eq!(request.mac, BASE64.encode(mac.finalize().into_bytes()));
    }

    #[test]
    fn serialized_field_names_are_camel_case() {
        let request = minter()
            .mint(
                "c",
                &Activity::Whisper {
                    peer_id: "p".into(),
                },
            )
            .unwrap();
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains(r#""keyName":"app.key""#));
        assert!(json.contains(r#""clientId":"c""#));
        assert!(!json.contains("key_name"));
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(TokenMinter::from_key("no-colon", 1000).is_err());
        assert!(TokenMinter::from_key(":missing-name", 1000).is_err());
        assert!(TokenMinter::from_key("missing-secret:", 1000).is_err());
    }
}
