use std::sync::Arc;

use sotto_core::config::{LISTEN_MARK_TTL_MS, WHISPER_MARK_TTL_MS};
use sotto_store::Store;

use crate::error::Result;

/// Short-TTL authorization marks. The whisper mark doubles as the
/// first-publisher-wins latch: among concurrent claims for the same
/// (client, conversation, content) triple, exactly one sees no prior value
/// and runs the new-session side effects.
pub struct AuthzCache {
    store: Arc<Store>,
}

impl AuthzCache {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Claim a conversation for publishing. Returns true when this is a new
    /// session (no live mark existed), false on renewal within the TTL.
    pub fn claim_whisper(
        &self,
        client_id: &str,
        conversation_id: &str,
        content_id: &str,
    ) -> Result<bool> {
        let mark = format!("ccc:{client_id}|{conversation_id}|{content_id}");
        let prior = self
            .store
            .get_and_set(&mark, "whisper", Some(WHISPER_MARK_TTL_MS))?;
        Ok(prior.is_none())
    }

    /// Record a listener joining. Purely informational; the prior value is
    /// irrelevant.
    pub fn mark_listen(&self, client_id: &str, conversation_id: &str) -> Result<()> {
        let mark = format!("ccc:{client_id}|{conversation_id}");
        self.store
            .get_and_set(&mark, "listen", Some(LISTEN_MARK_TTL_MS))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claim_wins_then_renews() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = Arc::new(Store::open(path.to_str().unwrap(), "t").unwrap());
        let cache = AuthzCache::new(store);
        assert!(cache.claim_whisper("c1", "conv", "feed").unwrap());
        assert!(!cache.claim_whisper("c1", "conv", "feed").unwrap());
        // a different content id is a separate session
        assert!(cache.claim_whisper("c1", "conv", "feed2").unwrap());
    }
}
