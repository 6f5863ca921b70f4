use std::collections::HashMap;
use std::sync::Arc;

use sotto_store::Store;
use tracing::warn;

use crate::codec::get_str;
use crate::error::{RegistryError, Result};

/// A named whisper session. The owner is fixed at first registration; a
/// conversation can be renamed by its owner but never re-homed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationRecord {
    pub id: String,
    pub name: String,
    pub owner_profile_id: String,
}

impl ConversationRecord {
    pub fn from_map(id: &str, map: &HashMap<String, String>) -> Self {
        Self {
            id: id.to_string(),
            name: get_str(map, "name"),
            owner_profile_id: get_str(map, "ownerProfileId"),
        }
    }
}

pub struct ConversationRegistry {
    store: Arc<Store>,
}

fn key(id: &str) -> String {
    format!("con:{id}")
}

impl ConversationRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn get(&self, id: &str) -> Result<Option<ConversationRecord>> {
        let map = self.store.hget_all(&key(id))?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(ConversationRecord::from_map(id, &map)))
    }

    /// Create or update conversation metadata. The owner id is immutable:
    /// an update naming a different owner conflicts and writes nothing.
    pub fn upsert(&self, id: &str, name: &str, owner_profile_id: &str) -> Result<ConversationRecord> {
        if let Some(existing) = self.get(id)? {
            if existing.owner_profile_id != owner_profile_id {
                warn!(
                    conversation = %id,
                    stored_owner = %existing.owner_profile_id,
                    "rejected conversation update with mismatched owner"
                );
                return Err(RegistryError::Conflict(format!(
                    "conversation {id} is owned by another profile"
                )));
            }
        }
        self.store.hset_all(
            &key(id),
            &[
                ("name", name.to_string()),
                ("ownerProfileId", owner_profile_id.to_string()),
            ],
        )?;
        Ok(ConversationRecord {
            id: id.to_string(),
            name: name.to_string(),
            owner_profile_id: owner_profile_id.to_string(),
        })
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        self.store.del(&key(id))?;
        Ok(())
    }
}
