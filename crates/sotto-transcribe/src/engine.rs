//! The per-process transcription worker pool.
//!
//! Each opted-in Whisperer session gets a long-lived worker task subscribed
//! to the conversation's content and control channels through its own broker
//! connection. Workers persist every content chunk to the transcript's
//! content list, terminate when the Whisperer drops, and survive process
//! restarts by handing their transcripts to a peer through two shared store
//! queues with a bounded overlap window.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sotto_broker::{Attachment, Broker, BrokerConnection};
use sotto_core::config::TranscriptionConfig;
use sotto_core::time::epoch_ms;
use sotto_protocol::{ControlChunk, ControlVerb};
use sotto_store::{Store, SUSPENDED_TRANSCRIPTS, TRANSCRIBING_SERVERS};

use crate::error::{Result, TranscribeError};
use crate::fold::{fold_chunks, ID_MARKER};
use crate::transcript::{TranscriptRecord, TranscriptStore};

struct WorkerHandle {
    /// Finalize the transcript and stop (Whisperer gone, or bracketing a new
    /// session for the same Whisperer).
    stop: CancellationToken,
    /// Detach without finalizing — a peer process resumes the transcript.
    detach: CancellationToken,
    task: JoinHandle<()>,
}

pub struct TranscriptionEngine {
    store: Arc<Store>,
    transcripts: TranscriptStore,
    broker: Arc<dyn Broker>,
    config: TranscriptionConfig,
    server_id: String,
    active: Mutex<HashMap<String, WorkerHandle>>,
    suspend_in_progress: AtomicBool,
}

impl TranscriptionEngine {
    pub fn new(
        store: Arc<Store>,
        broker: Arc<dyn Broker>,
        config: TranscriptionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            transcripts: TranscriptStore::new(Arc::clone(&store)),
            store,
            broker,
            config,
            server_id: sotto_core::time::new_id(),
            active: Mutex::new(HashMap::new()),
            suspend_in_progress: AtomicBool::new(false),
        })
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn transcripts(&self) -> &TranscriptStore {
        &self.transcripts
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Create a transcript for a new Whisperer session and attach a local
    /// worker. The caller has already terminated the Whisperer's prior
    /// sessions via [`end_transcripts_for_whisperer`].
    ///
    /// [`end_transcripts_for_whisperer`]: Self::end_transcripts_for_whisperer
    pub async fn start_transcription(
        self: &Arc<Self>,
        whisperer_client_id: &str,
        conversation_id: &str,
        content_id: &str,
        time_zone_id: &str,
    ) -> Result<String> {
        let record = self.transcripts.create(
            whisperer_client_id,
            conversation_id,
            content_id,
            time_zone_id,
            self.config.ttl_seconds,
        )?;
        info!(
            transcript = %record.id,
            conversation = %conversation_id,
            "starting transcription"
        );
        let id = record.id.clone();
        self.attach_worker(record).await;
        Ok(id)
    }

    /// Finalize every live transcript this Whisperer client still has — the
    /// session-bracketing rule: one live transcript per Whisperer.
    pub async fn end_transcripts_for_whisperer(&self, client_id: &str) -> Result<()> {
        for id in self.transcripts.all_ids()? {
            let Some(record) = self.transcripts.get(&id)? else {
                continue;
            };
            if record.is_finalized() || record.whisperer_client_id != client_id {
                continue;
            }
            info!(transcript = %id, client = %client_id, "terminating prior transcript");
            self.stop_worker(&id).await;
        }
        Ok(())
    }

    /// Attach a local worker for a live transcript. Subscribe failures
    /// abandon the worker and finalize with whatever chunks already arrived.
    pub async fn attach_worker(self: &Arc<Self>, record: TranscriptRecord) {
        if record.is_finalized() {
            return;
        }
        if self.active.lock().unwrap().contains_key(&record.id) {
            debug!(transcript = %record.id, "worker already attached");
            return;
        }

        let mut conn = match self.broker.connect(&self.server_id).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(transcript = %record.id, error = %e, "broker connect failed; finalizing");
                if let Err(e) = self.end_transcription(&record.id) {
                    error!(transcript = %record.id, error = %e, "finalize after connect failure");
                }
                return;
            }
        };

        let content_channel = format!("{}:{}", record.conversation_id, record.content_channel_id);
        let control_channel = format!("{}:control", record.conversation_id);
        let attached = async {
            let content = conn.attach(&content_channel).await?;
            let control = conn.attach(&control_channel).await?;
            Ok::<_, sotto_broker::BrokerError>((content, control))
        }
        .await;
        let (content, control) = match attached {
            Ok(pair) => pair,
            Err(e) => {
                warn!(transcript = %record.id, error = %e, "channel attach failed; finalizing");
                conn.close().await;
                if let Err(e) = self.end_transcription(&record.id) {
                    error!(transcript = %record.id, error = %e, "finalize after attach failure");
                }
                return;
            }
        };

        let stop = CancellationToken::new();
        let detach = CancellationToken::new();
        let task = tokio::spawn(run_worker(
            Arc::clone(self),
            record.clone(),
            conn,
            content,
            control,
            stop.clone(),
            detach.clone(),
        ));
        self.active
            .lock()
            .unwrap()
            .insert(record.id.clone(), WorkerHandle { stop, detach, task });
    }

    /// Stop the local worker for `id` (finalizing), or force-finalize an
    /// orphaned transcript that has no live worker here.
    pub async fn stop_worker(&self, id: &str) {
        let handle = self.active.lock().unwrap().remove(id);
        match handle {
            Some(handle) => {
                handle.stop.cancel();
                let _ = handle.task.await;
            }
            None => {
                // forced-end path: no live worker anywhere we can see
                if let Err(e) = self.end_transcription(id) {
                    warn!(transcript = %id, error = %e, "forced end failed");
                }
            }
        }
    }

    /// Fold the content list into final text and settle the record:
    /// duration, transcription, error count; the conversation listing gains
    /// the id unless the session was empty and clean, in which case the
    /// transcript vanishes entirely.
    pub fn end_transcription(&self, id: &str) -> Result<()> {
        let record = self
            .transcripts
            .get(id)?
            .ok_or_else(|| TranscribeError::NotFound(id.to_string()))?;
        if record.is_finalized() {
            debug!(transcript = %id, "already finalized");
            return Ok(());
        }

        let duration = epoch_ms() - record.start_time;
        let newest_first = self.transcripts.content_entries(&record)?;
        let outcome = fold_chunks(newest_first.iter().rev());

        if outcome.error_count == 0 {
            self.transcripts.drop_content(&record)?;
        }

        if outcome.transcription.is_empty() && outcome.error_count == 0 {
            info!(transcript = %id, "empty clean session; deleting transcript");
            self.transcripts.delete(&record)?;
            return Ok(());
        }

        info!(
            transcript = %id,
            chars = outcome.transcription.chars().count(),
            errors = outcome.error_count,
            "finalized transcript"
        );
        self.transcripts
            .finalize(id, &outcome.transcription, outcome.error_count, duration)?;
        self.transcripts.add_to_conversation(&record)?;
        Ok(())
    }

    // ── cross-process handoff ─────────────────────────────────────────────────

    /// Shutdown half of the handoff: stop advertising, queue live
    /// transcripts for pickup, keep recording (with id markers) through the
    /// overlap window, then detach without finalizing.
    pub async fn suspend_transcriptions(&self) -> Result<()> {
        self.suspend_in_progress.store(true, Ordering::SeqCst);
        self.store.lrem(TRANSCRIBING_SERVERS, &self.server_id)?;
        self.store.wake_blockers();

        let ids: Vec<String> = self.active.lock().unwrap().keys().cloned().collect();
        if ids.is_empty() {
            info!("no local transcripts to hand off");
            return Ok(());
        }

        match self
            .store
            .blocking_head(
                TRANSCRIBING_SERVERS,
                Duration::from_secs(self.config.suspend_wait_secs),
            )
            .await?
        {
            Some(peer) => info!(peer = %peer, count = ids.len(), "handing transcripts to peer"),
            None => warn!(
                count = ids.len(),
                "no peer advertising; queued transcripts wait for the next process"
            ),
        }

        for id in &ids {
            let Some(record) = self.transcripts.get(id)? else {
                continue;
            };
            if record.is_finalized() {
                continue;
            }
            self.store.lpush(SUSPENDED_TRANSCRIPTS, id)?;
        }

        // both sides record id-marked chunks while this sleeps
        tokio::time::sleep(Duration::from_millis(self.config.overlap_ms)).await;

        let handles: Vec<WorkerHandle> = {
            let mut active = self.active.lock().unwrap();
            ids.iter().filter_map(|id| active.remove(id)).collect()
        };
        for handle in handles {
            handle.detach.cancel();
            let _ = handle.task.await;
        }
        info!("suspend complete");
        Ok(())
    }

    /// Startup half of the handoff: advertise this process, then drain the
    /// suspended queue with a bounded blocking pop per iteration. Runs until
    /// a suspend begins; an in-flight pop observed during suspend is pushed
    /// back for someone else.
    pub async fn resume_loop(self: Arc<Self>) {
        if let Err(e) = self.store.lpush(TRANSCRIBING_SERVERS, &self.server_id) {
            error!(error = %e, "could not advertise transcription server");
            return;
        }
        // dedicated connection: the blocking pop must never contend with
        // request-path store traffic
        let pop_store = match self.store.sibling() {
            Ok(store) => store,
            Err(e) => {
                error!(error = %e, "could not open resume-loop store handle");
                return;
            }
        };
        let timeout = Duration::from_secs(self.config.resume_pop_secs);
        info!(server = %self.server_id, "resume loop started");

        loop {
            if self.suspend_in_progress.load(Ordering::SeqCst) {
                break;
            }
            let popped = match pop_store.brpop(SUSPENDED_TRANSCRIPTS, timeout).await {
                Ok(popped) => popped,
                Err(e) => {
                    error!(error = %e, "resume pop failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            if self.suspend_in_progress.load(Ordering::SeqCst) {
                if let Some(id) = popped {
                    let _ = self.store.lpush(SUSPENDED_TRANSCRIPTS, &id);
                }
                break;
            }
            let Some(id) = popped else { continue };

            match self.transcripts.get(&id) {
                Ok(Some(record)) if record.is_finalized() => {
                    info!(transcript = %id, "picked up already-finalized transcript; skipping");
                }
                Ok(Some(record)) => {
                    info!(transcript = %id, "resuming transcript from peer");
                    self.attach_worker(record).await;
                }
                Ok(None) => warn!(transcript = %id, "suspended transcript no longer exists"),
                Err(e) => error!(transcript = %id, error = %e, "loading suspended transcript"),
            }
        }
        info!("resume loop stopped");
    }
}

/// The per-transcript worker. Lives until the Whisperer drops, the broker
/// connection dies, or the engine cancels it.
async fn run_worker(
    engine: Arc<TranscriptionEngine>,
    record: TranscriptRecord,
    mut conn: Box<dyn BrokerConnection>,
    mut content: Attachment,
    mut control: Attachment,
    stop: CancellationToken,
    detach: CancellationToken,
) {
    let attach_time = Instant::now();
    let overlap = Duration::from_millis(engine.config.overlap_ms);
    let mut subscribed = true;
    let mut finalize = true;

    loop {
        tokio::select! {
            message = content.next() => {
                let Some(message) = message else {
                    warn!(transcript = %record.id, "content channel ended; abandoning worker");
                    break;
                };
                // During the initial window this worker may be the resuming
                // side of a handoff; during a suspend it is the leaving
                // side. Either way chunks get id markers so the finalize
                // fold can collapse the duplicates.
                let in_overlap = attach_time.elapsed() < overlap
                    || engine.suspend_in_progress.load(Ordering::SeqCst);
                let written = if in_overlap {
                    engine.transcripts.push_content_pair(
                        &record,
                        &format!("{ID_MARKER}{}", message.id),
                        &message.data,
                    )
                } else {
                    engine.transcripts.push_content(&record, &message.data)
                };
                if let Err(e) = written {
                    warn!(transcript = %record.id, error = %e, "chunk write failed");
                }
            }
            message = control.next() => {
                let Some(message) = message else {
                    warn!(transcript = %record.id, "control channel ended; abandoning worker");
                    break;
                };
                match ControlChunk::parse(&message.data) {
                    Ok(chunk)
                        if chunk.verb == ControlVerb::Dropping
                            && chunk.client_id == record.whisperer_client_id =>
                    {
                        if !subscribed {
                            continue; // duplicate leave
                        }
                        subscribed = false;
                        info!(transcript = %record.id, "whisperer dropped; terminating worker");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(transcript = %record.id, error = %e, "malformed control chunk");
                    }
                }
            }
            _ = stop.cancelled() => {
                info!(transcript = %record.id, "worker stopped");
                break;
            }
            _ = detach.cancelled() => {
                info!(transcript = %record.id, "worker detached for handoff");
                finalize = false;
                break;
            }
        }
    }

    conn.close().await;
    engine.active.lock().unwrap().remove(&record.id);
    if finalize {
        if let Err(e) = engine.end_transcription(&record.id) {
            error!(transcript = %record.id, error = %e, "finalize failed");
        }
    }
}
