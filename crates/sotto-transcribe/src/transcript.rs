use std::collections::HashMap;
use std::sync::Arc;

use sotto_core::time::{epoch_ms, new_id};
use sotto_store::Store;

use crate::error::Result;

/// One Whisperer session's server-side recording. `transcription` and
/// `error_count` are both unset while the session is live and both set once
/// finalized — that pair is the liveness test everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptRecord {
    pub id: String,
    pub whisperer_client_id: String,
    pub conversation_id: String,
    pub content_channel_id: String,
    pub time_zone_id: String,
    pub start_time: i64,
    pub duration: i64,
    pub content_list_key: String,
    pub transcription: Option<String>,
    pub error_count: Option<i64>,
    pub ttl_seconds: i64,
}

impl TranscriptRecord {
    pub fn is_finalized(&self) -> bool {
        self.transcription.is_some() && self.error_count.is_some()
    }

    pub fn from_map(id: &str, map: &HashMap<String, String>) -> Self {
        let get = |f: &str| map.get(f).cloned().unwrap_or_default();
        let get_i64 = |f: &str| map.get(f).and_then(|v| v.parse().ok()).unwrap_or(0);
        Self {
            id: id.to_string(),
            whisperer_client_id: get("whispererClientId"),
            conversation_id: get("conversationId"),
            content_channel_id: get("contentChannelId"),
            time_zone_id: get("timeZoneId"),
            start_time: get_i64("startTime"),
            duration: get_i64("duration"),
            content_list_key: get("contentListKey"),
            transcription: map.get("transcription").cloned(),
            error_count: map.get("errorCount").and_then(|v| v.parse().ok()),
            ttl_seconds: get_i64("ttlSeconds"),
        }
    }
}

pub fn transcript_key(id: &str) -> String {
    format!("tra:{id}")
}

pub fn conversation_transcripts_key(conversation_id: &str) -> String {
    format!("cts:{conversation_id}")
}

/// Store codec for transcript records and their content lists.
pub struct TranscriptStore {
    store: Arc<Store>,
}

impl TranscriptStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create and persist a fresh live record with its own content list key.
    /// Both keys expire together after `ttl_seconds`.
    pub fn create(
        &self,
        whisperer_client_id: &str,
        conversation_id: &str,
        content_channel_id: &str,
        time_zone_id: &str,
        ttl_seconds: i64,
    ) -> Result<TranscriptRecord> {
        let record = TranscriptRecord {
            id: new_id(),
            whisperer_client_id: whisperer_client_id.to_string(),
            conversation_id: conversation_id.to_string(),
            content_channel_id: content_channel_id.to_string(),
            time_zone_id: time_zone_id.to_string(),
            start_time: epoch_ms(),
            duration: 0,
            content_list_key: format!("tcp:{}", new_id()),
            transcription: None,
            error_count: None,
            ttl_seconds,
        };
        let key = transcript_key(&record.id);
        self.store.hset_all(
            &key,
            &[
                ("whispererClientId", record.whisperer_client_id.clone()),
                ("conversationId", record.conversation_id.clone()),
                ("contentChannelId", record.content_channel_id.clone()),
                ("timeZoneId", record.time_zone_id.clone()),
                ("startTime", record.start_time.to_string()),
                ("contentListKey", record.content_list_key.clone()),
                ("ttlSeconds", record.ttl_seconds.to_string()),
            ],
        )?;
        self.store.expire_ms(&key, ttl_seconds * 1000)?;
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Result<Option<TranscriptRecord>> {
        let map = self.store.hget_all(&transcript_key(id))?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(TranscriptRecord::from_map(id, &map)))
    }

    /// Append one raw entry (chunk payload or id marker) to the content
    /// list, newest first. Write failures are the caller's to log — a
    /// missing chunk surfaces as an error count at finalize, never a crash.
    pub fn push_content(&self, record: &TranscriptRecord, entry: &str) -> Result<()> {
        self.store.lpush(&record.content_list_key, entry)?;
        self.store
            .expire_ms(&record.content_list_key, record.ttl_seconds * 1000)?;
        Ok(())
    }

    /// Append an id marker and its chunk as one atomic pair. Used during
    /// overlap windows, where a peer is writing the same messages and the
    /// marker must stay adjacent to its payload for the finalize de-dup.
    pub fn push_content_pair(
        &self,
        record: &TranscriptRecord,
        marker: &str,
        entry: &str,
    ) -> Result<()> {
        self.store
            .lpush_many(&record.content_list_key, &[marker, entry])?;
        self.store
            .expire_ms(&record.content_list_key, record.ttl_seconds * 1000)?;
        Ok(())
    }

    /// Full content list, newest first.
    pub fn content_entries(&self, record: &TranscriptRecord) -> Result<Vec<String>> {
        Ok(self.store.lrange(&record.content_list_key, 0, -1)?)
    }

    pub fn drop_content(&self, record: &TranscriptRecord) -> Result<()> {
        self.store.del(&record.content_list_key)?;
        Ok(())
    }

    /// Write the finalization triple.
    pub fn finalize(
        &self,
        id: &str,
        transcription: &str,
        error_count: i64,
        duration: i64,
    ) -> Result<()> {
        self.store.hset_all(
            &transcript_key(id),
            &[
                ("transcription", transcription.to_string()),
                ("errorCount", error_count.to_string()),
                ("duration", duration.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Prepend a finalized transcript onto its conversation's list.
    pub fn add_to_conversation(&self, record: &TranscriptRecord) -> Result<()> {
        self.store.lpush(
            &conversation_transcripts_key(&record.conversation_id),
            &record.id,
        )?;
        Ok(())
    }

    /// Remove the record and its content list entirely (empty, error-free
    /// sessions leave no trace).
    pub fn delete(&self, record: &TranscriptRecord) -> Result<()> {
        self.store.del(&transcript_key(&record.id))?;
        self.store.del(&record.content_list_key)?;
        Ok(())
    }

    /// Ids of every transcript in the store, live or finalized.
    pub fn all_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .keys_with_prefix("tra:")?
            .into_iter()
            .filter_map(|k| k.strip_prefix("tra:").map(String::from))
            .collect())
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcripts() -> (tempfile::TempDir, TranscriptStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = Arc::new(Store::open(path.to_str().unwrap(), "t").unwrap());
        (dir, TranscriptStore::new(store))
    }

    #[test]
    fn create_then_load_is_live() {
        let (_dir, ts) = transcripts();
        let record = ts.create("c1", "conv", "feed", "America/New_York", 3600).unwrap();
        let loaded = ts.get(&record.id).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(!loaded.is_finalized());
        assert!(loaded.content_list_key.starts_with("tcp:"));
    }

    #[test]
    fn finalize_sets_the_triple() {
        let (_dir, ts) = transcripts();
        let record = ts.create("c1", "conv", "feed", "UTC", 3600).unwrap();
        ts.finalize(&record.id, "Hello world", 0, 120_000).unwrap();
        let loaded = ts.get(&record.id).unwrap().unwrap();
        assert!(loaded.is_finalized());
        assert_eq!(loaded.transcription.as_deref(), Some("Hello world"));
        assert_eq!(loaded.error_count, Some(0));
        assert_eq!(loaded.duration, 120_000);
    }

    #[test]
    fn content_entries_come_back_newest_first() {
        let (_dir, ts) = transcripts();
        let record = ts.create("c1", "conv", "feed", "UTC", 3600).unwrap();
        ts.push_content(&record, "0|Hello").unwrap();
        ts.push_content(&record, "5| wor").unwrap();
        assert_eq!(ts.content_entries(&record).unwrap(), ["5| wor", "0|Hello"]);
    }
}
