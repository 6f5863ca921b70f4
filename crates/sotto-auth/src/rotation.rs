//! The client-secret rotation state machine.
//!
//! Pure functions over a [`ClientRecord`]: the HTTP layer loads the record,
//! applies the posted fields, and persists whatever comes back before
//! pushing. Drift of any kind (reinstall, dev/prod push environment change,
//! flipped presence-logging) makes the launch look "changed", which forces a
//! rotation — the protocol is self-correcting by construction.

use rand::RngCore;
use tracing::info;

use crate::error::{AuthError, Result};
use sotto_core::config::SECRET_BYTES;
use sotto_core::time::new_id;
use sotto_registry::ClientRecord;

/// The fields of a `POST apnsToken` after transport decoding (hex, not
/// base64) plus the server-side presence-logging flag at receipt time.
#[derive(Debug, Clone)]
pub struct TokenPost {
    pub client_id: String,
    pub device_token: String,
    pub last_secret: String,
    pub app_info: String,
    pub user_name: Option<String>,
    pub presence_logging: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationOutcome {
    /// A secret (fresh or reused-unacknowledged) must be pushed to the device.
    pub did_rotate: bool,
    /// The pending secret was re-sent instead of minting a new one.
    pub reused_unacknowledged: bool,
}

/// A launch is "changed" when any identity-bearing field differs from what
/// the registry holds.
pub fn is_changed(stored: Option<&ClientRecord>, post: &TokenPost) -> bool {
    match stored {
        None => true,
        Some(rec) => {
            post.last_secret != rec.last_secret
                || post.device_token != rec.device_token
                || post.app_info != rec.app_info
                || post.presence_logging != rec.presence_logging
        }
    }
}

/// Apply a token POST to the record: copy the received fields, then rotate
/// if the launch was changed (or the record has no usable secret). The caller
/// persists the record in either case, then pushes when `did_rotate`.
pub fn apply_token_post(
    record: &mut ClientRecord,
    post: &TokenPost,
    now_ms: i64,
) -> Result<RotationOutcome> {
    let changed = is_changed(Some(record), post);

    record.device_token = post.device_token.clone();
    record.last_secret = post.last_secret.clone();
    record.app_info = post.app_info.clone();
    if let Some(name) = &post.user_name {
        record.user_name = name.clone();
    }
    record.presence_logging = post.presence_logging;
    record.last_launch = now_ms;

    rotate(record, changed)
}

/// Rotate the client's secret. With `force`, or when the record has no
/// current secret, or when the current secret was never acknowledged.
pub fn rotate(record: &mut ClientRecord, force: bool) -> Result<RotationOutcome> {
    if record.device_token.is_empty() {
        return Err(AuthError::MissingDeviceToken);
    }
    if !(force || record.secret.is_empty() || record.secret_issued_at == 0) {
        return Ok(RotationOutcome {
            did_rotate: false,
            reused_unacknowledged: false,
        });
    }

    if !record.secret.is_empty() && record.secret_issued_at == 0 {
        // The pending secret was pushed but never acknowledged — APNS may
        // have duplicated the original notification, so re-send it under the
        // same push request id rather than racing the device with a new one.
        info!(client = %record.id, "re-sending unacknowledged secret");
        return Ok(RotationOutcome {
            did_rotate: true,
            reused_unacknowledged: true,
        });
    }

    record.secret = mint_secret();
    record.secret_issued_at = 0;
    record.push_request_id = new_id();
    info!(client = %record.id, push_request = %record.push_request_id, "minted fresh secret");
    Ok(RotationOutcome {
        did_rotate: true,
        reused_unacknowledged: false,
    })
}

/// Record the device's acknowledgment: the rotation window closes and the
/// acknowledged secret becomes the prior one for the two-secret window.
pub fn acknowledge(record: &mut ClientRecord, received_last_secret: &str, now_ms: i64) {
    record.secret_issued_at = now_ms;
    record.last_secret = received_last_secret.to_string();
}

/// 32 random bytes as lowercase hex.
fn mint_secret() -> String {
    let mut buf = [0u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(last_secret: &str, token: &str) -> TokenPost {
        TokenPost {
            client_id: "c1".into(),
            device_token: token.into(),
            last_secret: last_secret.into(),
            app_info: "ios|2.1".into(),
            user_name: None,
            presence_logging: false,
        }
    }

    #[test]
    fn fresh_client_rotates_and_awaits_ack() {
        let mut rec = ClientRecord {
            id: "c1".into(),
            ..Default::default()
        };
        let outcome = apply_token_post(&mut rec, &post("s0", "t1"), 1_000).unwrap();
        assert!(outcome.did_rotate);
        assert!(!outcome.reused_unacknowledged);
        assert_eq!(rec.secret.len(), SECRET_BYTES * 2);
        assert_eq!(rec.secret_issued_at, 0);
        assert_eq!(rec.last_secret, "s0");
        assert!(!rec.push_request_id.is_empty());

        // acknowledgment closes the window
        let minted = rec.secret.clone();
        acknowledge(&mut rec, &minted, 2_000);
        assert_eq!(rec.secret_issued_at, 2_000);
        assert_eq!(rec.last_secret, minted);
    }

    #[test]
    fn unacknowledged_secret_is_reused_with_same_push_id() {
        let mut rec = ClientRecord {
            id: "c1".into(),
            ..Default::default()
        };
        apply_token_post(&mut rec, &post("s0", "t1"), 1_000).unwrap();
        let (secret, push_id) = (rec.secret.clone(), rec.push_request_id.clone());

        // identical re-POST before the device acknowledged
        let outcome = apply_token_post(&mut rec, &post("s0", "t1"), 1_500).unwrap();
        assert!(outcome.did_rotate);
        assert!(outcome.reused_unacknowledged);
        assert_eq!(rec.secret, secret);
        assert_eq!(rec.push_request_id, push_id);
    }

    #[test]
    fn drift_rotates_again_until_stable() {
        // stored state: acknowledged secret A
        let mut rec = ClientRecord {
            id: "c1".into(),
            device_token: "t1".into(),
            secret: "aa".into(),
            last_secret: "aa".into(),
            secret_issued_at: 500,
            app_info: "ios|2.1".into(),
            ..Default::default()
        };

        // device token changed (dev → prod push environment)
        let outcome = apply_token_post(&mut rec, &post("aa", "t2"), 1_000).unwrap();
        assert!(outcome.did_rotate);
        let secret_b = rec.secret.clone();
        assert_ne!(secret_b, "aa");
        assert_eq!(rec.last_secret, "aa");

        acknowledge(&mut rec, &secret_b, 1_100);

        // client now launches with the new secret: lastSecret differs from
        // nothing — the state is stable, no rotation
        let outcome = apply_token_post(&mut rec, &post(&secret_b, "t2"), 2_000).unwrap();
        assert!(!outcome.did_rotate);
        assert_eq!(rec.secret, secret_b);
    }

    #[test]
    fn unchanged_launch_does_not_rotate() {
        let mut rec = ClientRecord {
            id: "c1".into(),
            device_token: "t1".into(),
            secret: "aa".into(),
            last_secret: "s0".into(),
            secret_issued_at: 500,
            app_info: "ios|2.1".into(),
            ..Default::default()
        };
        let outcome = apply_token_post(&mut rec, &post("s0", "t1"), 1_000).unwrap();
        assert!(!outcome.did_rotate);
        assert_eq!(rec.last_launch, 1_000);
    }

    #[test]
    fn presence_logging_flip_counts_as_changed() {
        let rec = ClientRecord {
            id: "c1".into(),
            device_token: "t1".into(),
            secret: "aa".into(),
            last_secret: "s0".into(),
            secret_issued_at: 500,
            app_info: "ios|2.1".into(),
            presence_logging: false,
            ..Default::default()
        };
        let mut flipped = post("s0", "t1");
        flipped.presence_logging = true;
        assert!(is_changed(Some(&rec), &flipped));
    }

    #[test]
    fn rotation_requires_a_device_token() {
        let mut rec = ClientRecord {
            id: "c1".into(),
            ..Default::default()
        };
        assert!(matches!(
            rotate(&mut rec, true).unwrap_err(),
            AuthError::MissingDeviceToken
        ));
    }
}
