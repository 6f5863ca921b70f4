//! Background-push delivery of rotated secrets over APNS.
//!
//! One HTTP/2 POST per rotation: `POST /3/device/{hex token}` with a
//! provider JWT, the configured topic, and a content-available background
//! payload carrying the new secret. Delivery failures are recorded on the
//! push-request hash and otherwise absorbed — the client retries on its next
//! launch and the server re-pushes naturally.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::json;
use tracing::{info, warn};

use crate::error::Result;
use sotto_auth::ApnsSigner;
use sotto_core::config::ApnsConfig;
use sotto_core::time::epoch_ms;
use sotto_store::Store;

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushDelivery {
    /// APNS accepted the notification (2xx).
    Accepted { provider_unique_id: String },
    /// APNS rejected it (4xx/5xx) with its reason body.
    Rejected { status: u16, reason: String },
    /// The request never completed (DNS, TLS, connection loss).
    Failed { reason: String },
}

#[derive(Clone)]
pub struct PushClient {
    http: reqwest::Client,
    server: String,
    topic: String,
    signer: Arc<ApnsSigner>,
    store: Arc<Store>,
}

impl PushClient {
    pub fn new(config: &ApnsConfig, signer: Arc<ApnsSigner>, store: Arc<Store>) -> Self {
        Self {
            http: reqwest::Client::new(),
            server: config.server.clone(),
            topic: config.topic.clone(),
            signer,
            store,
        }
    }

    /// Deliver the current secret to a device. Always writes a
    /// `req:{push_request_id}` record; never propagates transport failures.
    pub async fn push_secret(
        &self,
        device_token_hex: &str,
        secret_hex: &str,
        push_request_id: &str,
    ) -> Result<PushDelivery> {
        let payload = secret_payload(secret_hex)?;
        let jwt = self.signer.token()?;
        let url = format!("https://{}/3/device/{}", self.server, device_token_hex);

        let response = self
            .http
            .post(&url)
            .header("authorization", format!("Bearer {jwt}"))
            .header("apns-id", push_request_id)
            .header("apns-push-type", "background")
            .header("apns-priority", "5")
            .header("apns-topic", &self.topic)
            .json(&payload)
            .send()
            .await;

        let delivery = match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if (200..300).contains(&status) {
                    let provider_unique_id = resp
                        .headers()
                        .get("apns-unique-id")
                        .or_else(|| resp.headers().get("apns-id"))
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    info!(push_request = %push_request_id, "push accepted");
                    PushDelivery::Accepted { provider_unique_id }
                } else {
                    let reason = resp.text().await.unwrap_or_default();
                    warn!(push_request = %push_request_id, status, %reason, "push rejected");
                    PushDelivery::Rejected { status, reason }
                }
            }
            Err(e) => {
                warn!(push_request = %push_request_id, error = %e, "push failed");
                PushDelivery::Failed {
                    reason: e.to_string(),
                }
            }
        };

        self.record(push_request_id, &delivery)?;
        Ok(delivery)
    }

    fn record(&self, push_request_id: &str, delivery: &PushDelivery) -> Result<()> {
        let key = format!("req:{push_request_id}");
        let (status, provider_unique_id, failure_reason) = match delivery {
            PushDelivery::Accepted { provider_unique_id } => {
                ("accepted", provider_unique_id.clone(), String::new())
            }
            PushDelivery::Rejected { status, reason } => {
                ("rejected", format!("http:{status}"), reason.clone())
            }
            PushDelivery::Failed { reason } => ("failed", String::new(), reason.clone()),
        };
        self.store.hset_all(
            &key,
            &[
                ("status", status.to_string()),
                ("providerUniqueId", provider_unique_id),
                ("failureReason", failure_reason),
                ("timestamp", epoch_ms().to_string()),
            ],
        )?;
        Ok(())
    }
}

/// The APNS payload: a silent background wake carrying the secret as base64
/// of the raw (hex-decoded) bytes.
fn secret_payload(secret_hex: &str) -> Result<serde_json::Value> {
    let raw = hex::decode(secret_hex)?;
    Ok(json!({
        "aps": { "content-available": 1 },
        "secret": BASE64.encode(raw),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_base64_of_raw_secret_bytes() {
        let payload = secret_payload("00ff10").unwrap();
        assert_eq!(payload["aps"]["content-available"], 1);
        assert_eq!(payload["secret"], BASE64.encode([0x00u8, 0xff, 0x10]));
    }

    #[test]
    fn payload_rejects_non_hex_secret() {
        assert!(secret_payload("zz").is_err());
    }
}
