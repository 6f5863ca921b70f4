use std::collections::HashMap;
use std::sync::Arc;

use sotto_core::time::epoch_ms;
use sotto_store::Store;

use crate::codec::{get_i64, get_opt, get_str};
use crate::error::{RegistryError, Result};

/// The four synchronized sub-profiles. Whisper/listen/favorites use
/// last-write-wins timestamps; settings uses a monotonic version that doubles
/// as the HTTP ETag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSection {
    Whisper,
    Listen,
    Settings,
    Favorites,
}

impl ProfileSection {
    pub fn field_prefix(&self) -> &'static str {
        match self {
            ProfileSection::Whisper => "whisper",
            ProfileSection::Listen => "listen",
            ProfileSection::Settings => "settings",
            ProfileSection::Favorites => "favorites",
        }
    }
}

/// A user's synchronized preference profile. A non-empty `password` marks the
/// profile as shared: further share attempts conflict, and PUT/GET of the
/// profile body require the password as a bearer credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileRecord {
    pub id: String,
    pub name: String,
    pub password: Option<String>,
    pub whisper_timestamp: i64,
    pub whisper_body: String,
    pub listen_timestamp: i64,
    pub listen_body: String,
    pub settings_version: i64,
    pub settings_body: String,
    pub favorites_timestamp: i64,
    pub favorites_body: String,
    pub last_used: i64,
}

impl ProfileRecord {
    pub fn from_map(id: &str, map: &HashMap<String, String>) -> Self {
        Self {
            id: id.to_string(),
            name: get_str(map, "name"),
            password: get_opt(map, "password"),
            whisper_timestamp: get_i64(map, "whisperTimestamp"),
            whisper_body: get_str(map, "whisperBody"),
            listen_timestamp: get_i64(map, "listenTimestamp"),
            listen_body: get_str(map, "listenBody"),
            settings_version: get_i64(map, "settingsVersion"),
            settings_body: get_str(map, "settingsBody"),
            favorites_timestamp: get_i64(map, "favoritesTimestamp"),
            favorites_body: get_str(map, "favoritesBody"),
            last_used: get_i64(map, "lastUsed"),
        }
    }

    pub fn is_shared(&self) -> bool {
        self.password.is_some()
    }

    /// Quoted HTTP entity tag for the settings sub-profile.
    pub fn settings_etag(&self) -> String {
        format!("\"{}\"", self.settings_version)
    }
}

pub struct ProfileRegistry {
    store: Arc<Store>,
}

fn key(id: &str) -> String {
    format!("pro:{id}")
}

fn clients_key(id: &str) -> String {
    format!("pro-clients:{id}")
}

impl ProfileRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &str) -> Result<Option<ProfileRecord>> {
        let map = self.store.hget_all(&key(id))?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(ProfileRecord::from_map(id, &map)))
    }

    fn require(&self, id: &str) -> Result<ProfileRecord> {
        self.get(id)?.ok_or_else(|| RegistryError::NotFound {
            kind: "profile",
            id: id.to_string(),
        })
    }

    /// Upsert the display name; creates the profile on first use.
    pub fn set_name(&self, id: &str, name: &str) -> Result<()> {
        self.store.hset_all(
            &key(id),
            &[
                ("name", name.to_string()),
                ("lastUsed", epoch_ms().to_string()),
            ],
        )?;
        Ok(())
    }

    /// Share a profile by attaching its password. A profile can be shared
    /// exactly once; repeats conflict so a second device cannot silently
    /// overwrite the credential.
    pub fn set_password(&self, id: &str, password: &str) -> Result<()> {
        let existing = self.require(id)?;
        if existing.is_shared() {
            return Err(RegistryError::Conflict(format!(
                "profile {id} is already shared"
            )));
        }
        self.store
            .hset_all(&key(id), &[("password", password.to_string())])?;
        Ok(())
    }

    /// Compare an offered password against the stored one. Unshared profiles
    /// never verify.
    pub fn check_password(&self, id: &str, offered: &str) -> Result<bool> {
        let record = self.require(id)?;
        Ok(record.password.as_deref() == Some(offered))
    }

    /// Write a timestamped sub-profile (whisper/listen/favorites). A received
    /// timestamp older than the stored one is a stale write and conflicts
    /// without changing anything.
    pub fn put_section(
        &self,
        id: &str,
        section: ProfileSection,
        timestamp: i64,
        body: &str,
    ) -> Result<()> {
        if section == ProfileSection::Settings {
            return Err(RegistryError::Conflict(
                "settings writes are versioned, not timestamped".to_string(),
            ));
        }
        let prefix = section.field_prefix();
        let stored = self
            .store
            .hget(&key(id), &format!("{prefix}Timestamp"))?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        if timestamp < stored {
            return Err(RegistryError::Conflict(format!(
                "stale {prefix} write: {timestamp} < {stored}"
            )));
        }
        self.store.hset_all(
            &key(id),
            &[
                (ts_field(section), timestamp.to_string()),
                (body_field(section), body.to_string()),
                ("lastUsed", epoch_ms().to_string()),
            ],
        )?;
        Ok(())
    }

    pub fn get_section(&self, id: &str, section: ProfileSection) -> Result<(i64, String)> {
        let record = self.require(id)?;
        Ok(match section {
            ProfileSection::Whisper => (record.whisper_timestamp, record.whisper_body),
            ProfileSection::Listen => (record.listen_timestamp, record.listen_body),
            ProfileSection::Settings => (record.settings_version, record.settings_body),
            ProfileSection::Favorites => (record.favorites_timestamp, record.favorites_body),
        })
    }

    /// Versioned settings write. The caller sends the version it last saw;
    /// anything but the stored version conflicts. Returns the new version.
    pub fn put_settings(&self, id: &str, seen_version: i64, body: &str) -> Result<i64> {
        let stored = self
            .store
            .hget(&key(id), "settingsVersion")?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        if seen_version != stored {
            return Err(RegistryError::Conflict(format!(
                "settings version {seen_version} does not match {stored}"
            )));
        }
        let next = stored + 1;
        self.store.hset_all(
            &key(id),
            &[
                ("settingsVersion", next.to_string()),
                ("settingsBody", body.to_string()),
                ("lastUsed", epoch_ms().to_string()),
            ],
        )?;
        Ok(next)
    }

    pub fn touch_last_used(&self, id: &str) -> Result<()> {
        self.store
            .hset_all(&key(id), &[("lastUsed", epoch_ms().to_string())])?;
        Ok(())
    }

    // ── client attachment (orphan detection) ─────────────────────────────────

    pub fn link_client(&self, profile_id: &str, client_id: &str) -> Result<()> {
        self.store.sadd(&clients_key(profile_id), client_id)?;
        Ok(())
    }

    pub fn unlink_client(&self, profile_id: &str, client_id: &str) -> Result<()> {
        self.store.srem(&clients_key(profile_id), client_id)?;
        Ok(())
    }

    pub fn client_count(&self, profile_id: &str) -> Result<i64> {
        Ok(self.store.scard(&clients_key(profile_id))?)
    }

    pub fn clients_of(&self, profile_id: &str) -> Result<Vec<String>> {
        Ok(self.store.smembers(&clients_key(profile_id))?)
    }

    pub fn ids(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys_with_prefix("pro:")?
            .into_iter()
            .filter_map(|k| k.strip_prefix("pro:").map(String::from))
            .collect())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.del(&key(id))?;
        self.store.del(&clients_key(id))?;
        Ok(())
    }
}

fn ts_field(section: ProfileSection) -> &'static str {
    match section {
        ProfileSection::Whisper => "whisperTimestamp",
        ProfileSection::Listen => "listenTimestamp",
        ProfileSection::Settings => "settingsVersion",
        ProfileSection::Favorites => "favoritesTimestamp",
    }
}

fn body_field(section: ProfileSection) -> &'static str {
    match section {
        ProfileSection::Whisper => "whisperBody",
        ProfileSection::Listen => "listenBody",
        ProfileSection::Settings => "settingsBody",
        ProfileSection::Favorites => "favoritesBody",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, ProfileRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = Arc::new(Store::open(path.to_str().unwrap(), "t").unwrap());
        (dir, ProfileRegistry::new(store))
    }

    #[test]
    fn name_upsert_creates_profile() {
        let (_dir, reg) = registry();
        reg.set_name("p1", "Ann").unwrap();
        let record = reg.get("p1").unwrap().unwrap();
        assert_eq!(record.name, "Ann");
        assert!(!record.is_shared());
    }

    #[test]
    fn stale_section_write_conflicts_and_does_not_write() {
        let (_dir, reg) = registry();
        reg.set_name("p1", "Ann").unwrap();
        reg.put_section("p1", ProfileSection::Whisper, 100, "body-a")
            .unwrap();
        let err = reg
            .put_section("p1", ProfileSection::Whisper, 50, "body-b")
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
        let (ts, body) = reg.get_section("p1", ProfileSection::Whisper).unwrap();
        assert_eq!((ts, body.as_str()), (100, "body-a"));
    }

    #[test]
    fn settings_version_gates_writes() {
        let (_dir, reg) = registry();
        reg.set_name("p1", "Ann").unwrap();
        let v1 = reg.put_settings("p1", 0, "{\"font\":12}").unwrap();
        assert_eq!(v1, 1);
        // a writer that never saw v1 conflicts
        assert!(matches!(
            reg.put_settings("p1", 0, "{\"font\":13}").unwrap_err(),
            RegistryError::Conflict(_)
        ));
        let v2 = reg.put_settings("p1", 1, "{\"font\":13}").unwrap();
        assert_eq!(v2, 2);
        let record = reg.get("p1").unwrap().unwrap();
        assert_eq!(record.settings_etag(), "\"2\"");
    }

    #[test]
    fn second_share_conflicts() {
        let (_dir, reg) = registry();
        reg.set_name("p1", "Ann").unwrap();
        reg.set_password("p1", "hunter2").unwrap();
        assert!(matches!(
            reg.set_password("p1", "other").unwrap_err(),
            RegistryError::Conflict(_)
        ));
        assert!(reg.check_password("p1", "hunter2").unwrap());
        assert!(!reg.check_password("p1", "wrong").unwrap());
    }

    #[test]
    fn client_links_count_for_orphan_detection() {
        let (_dir, reg) = registry();
        reg.set_name("p1", "Ann").unwrap();
        reg.link_client("p1", "c1").unwrap();
        reg.link_client("p1", "c2").unwrap();
        reg.link_client("p1", "c1").unwrap();
        assert_eq!(reg.client_count("p1").unwrap(), 2);
        reg.unlink_client("p1", "c1").unwrap();
        assert_eq!(reg.client_count("p1").unwrap(), 1);
    }
}
