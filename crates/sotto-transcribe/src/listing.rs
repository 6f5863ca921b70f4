use serde::Serialize;
use sotto_core::time::epoch_ms;
use tracing::debug;

use crate::error::Result;
use crate::transcript::{conversation_transcripts_key, TranscriptRecord, TranscriptStore};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// What `listTranscripts` returns per entry.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptSummary {
    pub id: String,
    #[serde(rename = "startTime")]
    pub start_time: i64,
    pub duration: i64,
    pub length: usize,
}

impl From<&TranscriptRecord> for TranscriptSummary {
    fn from(record: &TranscriptRecord) -> Self {
        Self {
            id: record.id.clone(),
            start_time: record.start_time,
            duration: record.duration,
            length: record
                .transcription
                .as_deref()
                .map(|t| t.chars().count())
                .unwrap_or(0),
        }
    }
}

/// Live transcripts of a conversation, newest first.
///
/// Entries whose record has expired are dropped; scanning stops at the first
/// entry older than the look-back horizon. The stored list is rewritten to
/// exactly the surviving ids so it never retains dangling entries.
pub fn transcripts_for_conversation(
    transcripts: &TranscriptStore,
    conversation_id: &str,
    lookback_days: i64,
) -> Result<Vec<TranscriptRecord>> {
    let store = transcripts.store();
    let key = conversation_transcripts_key(conversation_id);
    let ids = store.lrange(&key, 0, -1)?;
    let horizon = epoch_ms() - lookback_days * DAY_MS;

    let mut live: Vec<TranscriptRecord> = Vec::new();
    for id in &ids {
        match transcripts.get(id)? {
            None => {
                debug!(transcript = %id, "dropping expired transcript from listing");
            }
            Some(record) => {
                if record.start_time < horizon {
                    break;
                }
                live.push(record);
            }
        }
    }
    live.sort_by(|a, b| b.start_time.cmp(&a.start_time));

    if live.len() != ids.len() {
        store.del(&key)?;
        for record in &live {
            store.rpush(&key, &record.id)?;
        }
    }
    Ok(live)
}
