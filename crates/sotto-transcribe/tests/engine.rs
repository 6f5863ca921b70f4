// End-to-end engine behavior over the loopback broker: worker lifecycle,
// Whisperer-leave termination, and the suspend/resume handoff between two
// engine instances sharing one store.

use std::sync::Arc;
use std::time::Duration;

use sotto_broker::LoopbackBroker;
use sotto_core::config::TranscriptionConfig;
use sotto_store::{Store, SUSPENDED_TRANSCRIPTS, TRANSCRIBING_SERVERS};
use sotto_transcribe::{TranscriptRecord, TranscriptionEngine};

fn test_config() -> TranscriptionConfig {
    TranscriptionConfig {
        overlap_ms: 800,
        ttl_seconds: 3600,
        lookback_days: 30,
        resume_pop_secs: 1,
        suspend_wait_secs: 2,
    }
}

fn open_store(dir: &tempfile::TempDir) -> Arc<Store> {
    let path = dir.path().join("store.db");
    Arc::new(Store::open(path.to_str().unwrap(), "t").unwrap())
}

fn dropping_chunk(client_id: &str) -> String {
    format!("-25|conv|Kitchen|{client_id}|pro-1|Ann|feed")
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_finalized(
    engine: &Arc<TranscriptionEngine>,
    id: &str,
) -> Option<TranscriptRecord> {
    for _ in 0..100 {
        match engine.transcripts().get(id).unwrap() {
            Some(record) if record.is_finalized() => return Some(record),
            Some(_) => {}
            None => return None, // deleted (empty clean session)
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("transcript {id} never finalized");
}

#[tokio::test]
async fn whisperer_leave_finalizes_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let broker = LoopbackBroker::new();
    let engine = TranscriptionEngine::new(store.clone(), Arc::new(broker.clone()), test_config());

    let id = engine
        .start_transcription("cli-1", "conv", "feed", "UTC")
        .await
        .unwrap();
    assert_eq!(engine.active_count(), 1);

    broker.publish_raw("conv:feed", "chunk", "0|Hello");
    broker.publish_raw("conv:feed", "chunk", "5| world");
    tokio::time::sleep(Duration::from_millis(100)).await;
    broker.publish_raw("conv:control", "chunk", &dropping_chunk("cli-1"));

    let record = wait_for_finalized(&engine, &id).await.unwrap();
    assert_eq!(record.transcription.as_deref(), Some("Hello world"));
    assert_eq!(record.error_count, Some(0));
    assert!(record.duration >= 0);
    assert_eq!(engine.active_count(), 0);

    // listed on the conversation
    let listed = store.lrange("cts:conv", 0, -1).unwrap();
    assert_eq!(listed, [id]);
}

#[tokio::test]
async fn dropping_from_other_clients_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let broker = LoopbackBroker::new();
    let engine = TranscriptionEngine::new(store, Arc::new(broker.clone()), test_config());

    let id = engine
        .start_transcription("cli-1", "conv", "feed", "UTC")
        .await
        .unwrap();

    broker.publish_raw("conv:control", "chunk", &dropping_chunk("someone-else"));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.active_count(), 1);

    broker.publish_raw("conv:control", "chunk", &dropping_chunk("cli-1"));
    wait_for("worker exit", || engine.active_count() == 0).await;
    // empty and clean: the transcript was deleted outright
    assert!(engine.transcripts().get(&id).unwrap().is_none());
}

#[tokio::test]
async fn malformed_chunks_raise_error_count_and_keep_content_list() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let broker = LoopbackBroker::new();
    let engine = TranscriptionEngine::new(store.clone(), Arc::new(broker.clone()), test_config());

    let id = engine
        .start_transcription("cli-1", "conv", "feed", "UTC")
        .await
        .unwrap();
    let content_list_key = engine
        .transcripts()
        .get(&id)
        .unwrap()
        .unwrap()
        .content_list_key;

    broker.publish_raw("conv:feed", "chunk", "0|ok");
    broker.publish_raw("conv:feed", "chunk", "not-a-chunk");
    tokio::time::sleep(Duration::from_millis(100)).await;
    broker.publish_raw("conv:control", "chunk", &dropping_chunk("cli-1"));

    let record = wait_for_finalized(&engine, &id).await.unwrap();
    assert_eq!(record.transcription.as_deref(), Some("ok"));
    assert_eq!(record.error_count, Some(1));
    // errored sessions keep their content list for debugging
    assert!(store.llen(&content_list_key).unwrap() > 0);
}

#[tokio::test]
async fn new_session_for_same_whisperer_ends_the_prior_one() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let broker = LoopbackBroker::new();
    let engine = TranscriptionEngine::new(store, Arc::new(broker.clone()), test_config());

    let first = engine
        .start_transcription("cli-1", "conv", "feed", "UTC")
        .await
        .unwrap();
    broker.publish_raw("conv:feed", "chunk", "0|first session");
    wait_for("first chunk recorded", || {
        let record = engine.transcripts().get(&first).unwrap().unwrap();
        engine.transcripts().content_entries(&record).unwrap().len() >= 1
    })
    .await;

    engine.end_transcripts_for_whisperer("cli-1").await.unwrap();
    let second = engine
        .start_transcription("cli-1", "conv", "feed2", "UTC")
        .await
        .unwrap();

    let old = wait_for_finalized(&engine, &first).await.unwrap();
    assert_eq!(old.transcription.as_deref(), Some("first session"));
    assert_eq!(engine.active_count(), 1);
    assert!(!engine.transcripts().get(&second).unwrap().unwrap().is_finalized());
}

#[tokio::test]
async fn suspend_resume_hands_off_without_loss_or_duplication() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let broker = LoopbackBroker::new();

    let leaving =
        TranscriptionEngine::new(store.sibling().map(Arc::new).unwrap(), Arc::new(broker.clone()), test_config());
    let arriving =
        TranscriptionEngine::new(store.sibling().map(Arc::new).unwrap(), Arc::new(broker.clone()), test_config());

    // the arriving process is already advertising and draining the queue
    let resume = tokio::spawn(Arc::clone(&arriving).resume_loop());
    wait_for("peer advertised", || {
        store.llen(TRANSCRIBING_SERVERS).unwrap() == 1
    })
    .await;

    let id = leaving
        .start_transcription("cli-1", "conv", "feed", "UTC")
        .await
        .unwrap();
    broker.publish_raw("conv:feed", "chunk", "0|Hel");
    tokio::time::sleep(Duration::from_millis(200)).await;

    // begin the handoff; while it overlaps, publish more content
    let leaving_clone = Arc::clone(&leaving);
    let suspend = tokio::spawn(async move { leaving_clone.suspend_transcriptions().await });

    wait_for("arriving worker attached", || arriving.active_count() == 1).await;
    // both processes are subscribed right now
    assert_eq!(leaving.active_count(), 1);
    broker.publish_raw("conv:feed", "chunk", "3|lo there");
    tokio::time::sleep(Duration::from_millis(50)).await;

    suspend.await.unwrap().unwrap();
    assert_eq!(leaving.active_count(), 0);
    assert_eq!(arriving.active_count(), 1);

    // only the arriving process is attached now; finish the session
    broker.publish_raw("conv:control", "chunk", &dropping_chunk("cli-1"));
    let record = wait_for_finalized(&arriving, &id).await.unwrap();
    assert_eq!(record.transcription.as_deref(), Some("Hello there"));
    assert_eq!(record.error_count, Some(0));

    resume.abort();
}

#[tokio::test]
async fn resume_skips_transcripts_finalized_while_queued() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let broker = LoopbackBroker::new();
    let engine = TranscriptionEngine::new(store.clone(), Arc::new(broker.clone()), test_config());

    // a finalized transcript sitting in the handoff queue
    let record = engine
        .transcripts()
        .create("cli-1", "conv", "feed", "UTC", 3600)
        .unwrap();
    engine
        .transcripts()
        .finalize(&record.id, "done", 0, 100)
        .unwrap();
    store.lpush(SUSPENDED_TRANSCRIPTS, &record.id).unwrap();

    let resume = tokio::spawn(Arc::clone(&engine).resume_loop());
    wait_for("queue drained", || {
        store.llen(SUSPENDED_TRANSCRIPTS).unwrap() == 0
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.active_count(), 0);
    resume.abort();
}

#[tokio::test]
async fn suspend_with_no_workers_returns_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let broker = LoopbackBroker::new();
    let engine = TranscriptionEngine::new(store.clone(), Arc::new(broker), test_config());

    store.lpush(TRANSCRIBING_SERVERS, engine.server_id()).unwrap();
    engine.suspend_transcriptions().await.unwrap();
    // removed itself from the advertising list
    assert_eq!(store.llen(TRANSCRIBING_SERVERS).unwrap(), 0);
    assert_eq!(store.llen(SUSPENDED_TRANSCRIPTS).unwrap(), 0);
}

#[tokio::test]
async fn forced_end_settles_an_orphaned_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let broker = LoopbackBroker::new();
    let engine = TranscriptionEngine::new(store.clone(), Arc::new(broker), test_config());

    // record exists, content recorded by some defunct process, no worker
    let record = engine
        .transcripts()
        .create("cli-1", "conv", "feed", "UTC", 3600)
        .unwrap();
    engine.transcripts().push_content(&record, "0|orphan").unwrap();

    engine.stop_worker(&record.id).await;
    let settled = engine.transcripts().get(&record.id).unwrap().unwrap();
    assert!(settled.is_finalized());
    assert_eq!(settled.transcription.as_deref(), Some("orphan"));
}
