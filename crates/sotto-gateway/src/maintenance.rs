//! Out-of-band maintenance jobs — `sotto-gateway maintenance <job>`.
//!
//! Jobs run against the store directly and never touch the request path.
//! Process exit is non-zero on any failure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use clap::Subcommand;
use tracing::info;

use sotto_core::config::SottoConfig;
use sotto_core::time::epoch_ms;
use sotto_registry::{ClientRegistry, ProfileRegistry};
use sotto_store::Store;
use sotto_transcribe::{transcripts_for_conversation, TranscriptStore};

const IDLE_CLIENT_MS: i64 = 30 * 24 * 60 * 60 * 1000;

#[derive(Debug, Subcommand)]
pub enum MaintenanceJob {
    /// Toggle the server-wide presence-logging flag. Every client re-rotates
    /// on its next launch.
    PresenceLogging {
        #[arg(value_parser = ["on", "off"])]
        setting: String,
    },
    /// Count clients idle for more than 30 days; delete them with --delete.
    IdleClients {
        #[arg(long)]
        delete: bool,
    },
    /// Count profiles no client references; delete them with --delete.
    OrphanProfiles {
        #[arg(long)]
        delete: bool,
    },
    /// Print a conversation's live transcripts.
    ListTranscripts { conversation_id: String },
    /// Rewrite a conversation's transcript list to live entries only.
    PruneTranscripts { conversation_id: String },
    /// Arm the TTL on any transcript key that lost it.
    EnsureTranscriptTtls,
    /// Rebuild every conversation's transcript list by scanning all
    /// transcripts.
    ReassignTranscripts,
    /// Sweep expired keys out of the store.
    PurgeExpired,
}

pub fn run(config: &SottoConfig, job: MaintenanceJob) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(&config.store.url, &config.store.key_prefix)?);
    let clients = ClientRegistry::new(Arc::clone(&store));
    let profiles = ProfileRegistry::new(Arc::clone(&store));
    let transcripts = TranscriptStore::new(Arc::clone(&store));

    match job {
        MaintenanceJob::PresenceLogging { setting } => {
            let on = setting == "on";
            clients.set_presence_logging(on)?;
            println!("presenceLogging = {on}");
        }

        MaintenanceJob::IdleClients { delete } => {
            let horizon = epoch_ms() - IDLE_CLIENT_MS;
            let mut idle = Vec::new();
            for id in clients.ids()? {
                if let Some(record) = clients.get(&id)? {
                    if record.last_launch < horizon {
                        idle.push(record);
                    }
                }
            }
            println!("{} idle clients", idle.len());
            if delete {
                for record in idle {
                    if !record.profile_id.is_empty() {
                        profiles.unlink_client(&record.profile_id, &record.id)?;
                    }
                    clients.delete(&record.id)?;
                    info!(client = %record.id, "deleted idle client");
                }
            }
        }

        MaintenanceJob::OrphanProfiles { delete } => {
            let mut referenced = HashSet::new();
            for id in clients.ids()? {
                if let Some(record) = clients.get(&id)? {
                    if !record.profile_id.is_empty() {
                        referenced.insert(record.profile_id);
                    }
                }
            }
            let mut orphans = Vec::new();
            for id in profiles.ids()? {
                if !referenced.contains(&id) && profiles.client_count(&id)? == 0 {
                    orphans.push(id);
                }
            }
            println!("{} orphan profiles", orphans.len());
            if delete {
                for id in orphans {
                    profiles.delete(&id)?;
                    info!(profile = %id, "deleted orphan profile");
                }
            }
        }

        MaintenanceJob::ListTranscripts { conversation_id } => {
            let records = transcripts_for_conversation(
                &transcripts,
                &conversation_id,
                config.transcription.lookback_days,
            )?;
            for record in &records {
                println!(
                    "{}  start={}  duration={}ms  errors={}  chars={}",
                    record.id,
                    record.start_time,
                    record.duration,
                    record.error_count.unwrap_or(0),
                    record
                        .transcription
                        .as_deref()
                        .map(|t| t.chars().count())
                        .unwrap_or(0),
                );
            }
            println!("{} transcripts", records.len());
        }

        MaintenanceJob::PruneTranscripts { conversation_id } => {
            let key = format!("cts:{conversation_id}");
            let before = store.llen(&key)?;
            let live = transcripts_for_conversation(
                &transcripts,
                &conversation_id,
                config.transcription.lookback_days,
            )?;
            println!("pruned {} of {} entries", before - live.len() as i64, before);
        }

        MaintenanceJob::EnsureTranscriptTtls => {
            let mut armed = 0;
            for id in transcripts.all_ids()? {
                let Some(record) = transcripts.get(&id)? else {
                    continue;
                };
                let ttl_seconds = if record.ttl_seconds > 0 {
                    record.ttl_seconds
                } else {
                    config.transcription.ttl_seconds
                };
                let key = format!("tra:{id}");
                if store.ttl_remaining_ms(&key)?.is_none() {
                    store.expire_ms(&key, ttl_seconds * 1000)?;
                    armed += 1;
                }
                if store.llen(&record.content_list_key)? > 0
                    && store.ttl_remaining_ms(&record.content_list_key)?.is_none()
                {
                    store.expire_ms(&record.content_list_key, ttl_seconds * 1000)?;
                }
            }
            println!("armed TTLs on {armed} transcripts");
        }

        MaintenanceJob::ReassignTranscripts => {
            let mut by_conversation: HashMap<String, Vec<(i64, String)>> = HashMap::new();
            for id in transcripts.all_ids()? {
                let Some(record) = transcripts.get(&id)? else {
                    continue;
                };
                if !record.is_finalized() {
                    continue;
                }
                by_conversation
                    .entry(record.conversation_id.clone())
                    .or_default()
                    .push((record.start_time, id));
            }
            for (conversation_id, mut entries) in by_conversation {
                entries.sort_by(|a, b| b.0.cmp(&a.0));
                let key = format!("cts:{conversation_id}");
                store.del(&key)?;
                for (_, id) in &entries {
                    store.rpush(&key, id)?;
                }
                println!("{conversation_id}: {} transcripts", entries.len());
            }
        }

        MaintenanceJob::PurgeExpired => {
            let purged = store.purge_expired()?;
            println!("purged {purged} expired keys");
        }
    }
    Ok(())
}
