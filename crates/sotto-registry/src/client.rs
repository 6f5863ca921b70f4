use std::collections::HashMap;
use std::sync::Arc;

use sotto_core::config::DUPLICATE_POST_TTL_MS;
use sotto_core::time::epoch_ms;
use sotto_store::Store;

use crate::codec::{get_bool, get_i64, get_str};
use crate::error::Result;

/// One mobile client installation. `secret`/`last_secret` are lowercase hex;
/// `secret_issued_at == 0` means the current secret has not been acknowledged
/// by the device yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientRecord {
    pub id: String,
    pub device_token: String,
    pub secret: String,
    pub last_secret: String,
    pub secret_issued_at: i64,
    pub push_request_id: String,
    pub app_info: String,
    pub user_name: String,
    pub profile_id: String,
    pub last_launch: i64,
    pub presence_logging: bool,
}

impl ClientRecord {
    pub fn from_map(id: &str, map: &HashMap<String, String>) -> Self {
        Self {
            id: id.to_string(),
            device_token: get_str(map, "token"),
            secret: get_str(map, "secret"),
            last_secret: get_str(map, "lastSecret"),
            secret_issued_at: get_i64(map, "secretIssuedAt"),
            push_request_id: get_str(map, "pushRequestId"),
            app_info: get_str(map, "appInfo"),
            user_name: get_str(map, "userName"),
            profile_id: get_str(map, "profileId"),
            last_launch: get_i64(map, "lastLaunch"),
            presence_logging: get_bool(map, "presenceLogging"),
        }
    }

    fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("token", self.device_token.clone()),
            ("secret", self.secret.clone()),
            ("lastSecret", self.last_secret.clone()),
            ("secretIssuedAt", self.secret_issued_at.to_string()),
            ("pushRequestId", self.push_request_id.clone()),
            ("appInfo", self.app_info.clone()),
            ("userName", self.user_name.clone()),
            ("profileId", self.profile_id.clone()),
            ("lastLaunch", self.last_launch.to_string()),
            ("presenceLogging", self.presence_logging.to_string()),
        ]
    }
}

/// Store-backed registry of client records plus the duplicate-POST
/// suppression marks that absorb APNS re-delivery.
pub struct ClientRegistry {
    store: Arc<Store>,
}

fn key(id: &str) -> String {
    format!("cli:{id}")
}

impl ClientRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &str) -> Result<Option<ClientRecord>> {
        let map = self.store.hget_all(&key(id))?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(ClientRecord::from_map(id, &map)))
    }

    /// Persist all known fields. Writes merge field-by-field, so fields this
    /// build does not know about survive a write-through.
    pub fn put(&self, record: &ClientRecord) -> Result<()> {
        Ok(self.store.hset_all(&key(&record.id), &record.to_fields())?)
    }

    pub fn touch_last_launch(&self, id: &str) -> Result<()> {
        Ok(self
            .store
            .hset_all(&key(id), &[("lastLaunch", epoch_ms().to_string())])?)
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.del(&key(id))?;
        Ok(())
    }

    pub fn ids(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys_with_prefix("cli:")?
            .into_iter()
            .filter_map(|k| k.strip_prefix("cli:").map(String::from))
            .collect())
    }

    /// Duplicate-POST suppression: returns true when an identical
    /// (client, device-token) POST was seen within the last 250 ms. APNS
    /// sometimes re-delivers, and the client re-posts on each delivery.
    pub fn absorb_duplicate_post(&self, client_id: &str, token_hex: &str) -> Result<bool> {
        let mark = format!("apns:{client_id}|{token_hex}");
        let prior = self
            .store
            .get_and_set(&mark, "1", Some(DUPLICATE_POST_TTL_MS))?;
        Ok(prior.is_some())
    }

    /// The server-wide presence-logging flag; flipping it makes every client
    /// look "changed" on its next launch.
    pub fn presence_logging(&self) -> Result<bool> {
        Ok(self.store.get("presenceLogging")?.as_deref() == Some("true"))
    }

    pub fn set_presence_logging(&self, on: bool) -> Result<()> {
        Ok(self
            .store
            .set("presenceLogging", if on { "true" } else { "false" })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, ClientRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = Arc::new(Store::open(path.to_str().unwrap(), "t").unwrap());
        (dir, ClientRegistry::new(store))
    }

    #[test]
    fn round_trip_record() {
        let (_dir, reg) = registry();
        let record = ClientRecord {
            id: "c1".into(),
            device_token: "aabb".into(),
            secret: "00ff".into(),
            last_secret: "00ee".into(),
            secret_issued_at: 1234,
            push_request_id: "p1".into(),
            app_info: "ios|2.1".into(),
            user_name: "Ann".into(),
            profile_id: "pr1".into(),
            last_launch: 99,
            presence_logging: true,
        };
        reg.put(&record).unwrap();
        assert_eq!(reg.get("c1").unwrap().unwrap(), record);
        assert_eq!(reg.get("missing").unwrap(), None);
    }

    #[test]
    fn duplicate_post_absorbed_within_window() {
        let (_dir, reg) = registry();
        assert!(!reg.absorb_duplicate_post("c1", "aabb").unwrap());
        assert!(reg.absorb_duplicate_post("c1", "aabb").unwrap());
        // different token is a different mark
        assert!(!reg.absorb_duplicate_post("c1", "ccdd").unwrap());
    }

    #[test]
    fn presence_logging_flag_round_trip() {
        let (_dir, reg) = registry();
        assert!(!reg.presence_logging().unwrap());
        reg.set_presence_logging(true).unwrap();
        assert!(reg.presence_logging().unwrap());
    }
}
