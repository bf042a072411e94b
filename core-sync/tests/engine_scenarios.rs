//! End-to-end scenarios for the sync engine
//!
//! A scripted relay stands in for the remote service; time is driven by a
//! `ManualClock` for throttling windows and by paused tokio time for the
//! settle delay and deadlines.

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, BridgeError, FileRecord, HttpClient, HttpRequest, HttpResponse,
    InMemoryKeyValueStore, KeyValueStore, ListFilter, ManualClock, RemoteFileService, StaticCredential,
    StorageClass, UploadPayload, UploadReceipt,
};
use core_runtime::config::EngineConfig;
use core_runtime::events::{CoreEvent, EventBus, UploadEvent};
use core_sync::{
    FailureCategory, RefreshOutcome, RejectReason, Severity, SkipReason, SyncEngine, UploadFile,
    UploadOutcome,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test Doubles
// ============================================================================

struct UnusedHttpClient;

#[async_trait]
impl HttpClient for UnusedHttpClient {
    async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
        Err(BridgeError::NotAvailable("not used by engine tests".to_string()))
    }
}

/// Scripted relay
#[derive(Default)]
struct FakeRelay {
    listing: Mutex<Vec<FileRecord>>,
    list_calls: AtomicUsize,
    fail_list: AtomicBool,
    list_delay: Mutex<Option<Duration>>,
    uploads: Mutex<Vec<UploadPayload>>,
    upload_rejection: Mutex<Option<(u16, String)>>,
    upload_delay: Mutex<Option<Duration>>,
    report_duplicate: AtomicBool,
    deletes: Mutex<Vec<String>>,
    healthy: AtomicBool,
}

impl FakeRelay {
    fn with_listing(records: Vec<FileRecord>) -> Arc<Self> {
        let relay = Arc::new(Self::default());
        relay.set_listing(records);
        relay.healthy.store(true, Ordering::SeqCst);
        relay
    }

    fn set_listing(&self, records: Vec<FileRecord>) {
        *self.listing.lock().unwrap() = records;
    }

    fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn upload_calls(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteFileService for FakeRelay {
    async fn list(&self, _filter: &ListFilter) -> BridgeResult<Vec<FileRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(BridgeError::Network("connection refused".to_string()));
        }
        let records = self.listing.lock().unwrap().clone();
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(records)
    }

    async fn upload(&self, payload: UploadPayload) -> BridgeResult<UploadReceipt> {
        let delay = *self.upload_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let record = FileRecord::new(
            format!("id-{}", self.upload_calls() + 1),
            payload
                .custom_name
                .clone()
                .unwrap_or_else(|| payload.filename.clone()),
            payload
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            payload.data.len() as u64,
            1,
        );
        self.uploads.lock().unwrap().push(payload);

        if let Some((status, message)) = self.upload_rejection.lock().unwrap().clone() {
            return Err(BridgeError::Rejected { status, message });
        }

        let is_duplicate = self.report_duplicate.load(Ordering::SeqCst);
        Ok(UploadReceipt {
            existing_file: is_duplicate.then(|| record.clone()),
            record,
            is_duplicate,
        })
    }

    async fn delete(&self, id: &str) -> BridgeResult<()> {
        self.deletes.lock().unwrap().push(id.to_string());
        let mut listing = self.listing.lock().unwrap();
        listing.retain(|r| r.id != id);
        Ok(())
    }

    async fn pin(&self, _hash: &str) -> BridgeResult<()> {
        Ok(())
    }

    async fn unpin(&self, _hash: &str) -> BridgeResult<()> {
        Err(BridgeError::Rejected {
            status: 404,
            message: "Hash is not pinned".to_string(),
        })
    }

    async fn health(&self) -> BridgeResult<bool> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }
}

struct Setup {
    engine: SyncEngine,
    relay: Arc<FakeRelay>,
    clock: Arc<ManualClock>,
    store: InMemoryKeyValueStore,
    bus: Arc<EventBus>,
}

fn setup_on(store: InMemoryKeyValueStore, relay: Arc<FakeRelay>) -> Setup {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let config = EngineConfig::builder()
        .base_url("https://relay.example.com")
        .http_client(Arc::new(UnusedHttpClient))
        .key_value_store(Arc::new(store.clone()))
        .credential_provider(Arc::new(StaticCredential::new("token")))
        .clock(clock.clone())
        .build()
        .unwrap();
    let bus = Arc::new(EventBus::new(config.event_buffer_size));
    let engine = SyncEngine::new(&config, relay.clone(), Arc::clone(&bus));
    Setup {
        engine,
        relay,
        clock,
        store,
        bus,
    }
}

fn setup(records: Vec<FileRecord>) -> Setup {
    setup_on(InMemoryKeyValueStore::new(), FakeRelay::with_listing(records))
}

fn text(id: &str, name: &str, size: u64, created: i64) -> FileRecord {
    FileRecord::new(id, name, "text/plain", size, created)
}

fn ten_bytes(name: &str) -> UploadFile {
    UploadFile::new(name, b"0123456789".to_vec(), 1_000).with_mime_type("text/plain")
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_refresh_collapses_same_content_under_two_ids() {
    let s = setup(vec![text("a", "x.txt", 100, 10), text("b", "x.txt", 100, 20)]);

    s.engine.scheduler.request_refresh(None).await;

    let snapshot = s.engine.cache.read();
    let ids: Vec<&str> = snapshot.records().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["b"]);
}

#[tokio::test]
async fn test_two_requests_200ms_apart_fetch_once() {
    let s = setup(vec![text("a", "a.txt", 1, 1)]);

    assert!(s.engine.scheduler.request_refresh(None).await.fetched());
    s.clock.advance(Duration::from_millis(200));
    assert_eq!(
        s.engine.scheduler.request_refresh(None).await,
        RefreshOutcome::Skipped(SkipReason::Throttled)
    );

    assert_eq!(s.relay.list_calls(), 1);
}

#[tokio::test]
async fn test_refresh_failure_clears_list_and_reports() {
    let s = setup(vec![text("a", "a.txt", 1, 1)]);
    s.engine.scheduler.request_refresh(None).await;
    assert_eq!(s.engine.cache.read().len(), 1);

    s.relay.fail_list.store(true, Ordering::SeqCst);
    s.clock.advance(Duration::from_secs(2));
    let outcome = s.engine.scheduler.request_refresh(None).await;

    assert!(matches!(outcome, RefreshOutcome::Failed { .. }));
    assert!(s.engine.cache.read().is_empty());
    let errors: Vec<_> = s
        .engine
        .notifications
        .active()
        .into_iter()
        .filter(|n| n.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_auto_refresh_runs_through_guards() {
    let s = setup(vec![text("a", "a.txt", 1, 1)]);
    let handle = s
        .engine
        .scheduler
        .spawn_auto_refresh(Duration::from_secs(30));

    for _ in 0..50 {
        if s.relay.list_calls() == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(s.relay.list_calls(), 1);

    s.clock.advance(Duration::from_secs(30));
    tokio::time::advance(Duration::from_secs(30)).await;
    for _ in 0..50 {
        if s.relay.list_calls() == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(s.relay.list_calls(), 2);

    assert!(handle.is_running());
    drop(handle);
}

// ============================================================================
// Uploads
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_same_file_key_twice_uploads_once() {
    let s = setup(Vec::new());

    let first = s.engine.uploads.submit(ten_bytes("a.txt"), None).await;
    let second = s.engine.uploads.submit(ten_bytes("a.txt"), None).await;

    assert!(first.is_accepted());
    assert_eq!(second.reason(), Some(&RejectReason::RecentDuplicate));
    assert_eq!(s.relay.upload_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_upload_success_then_listing_without_file() {
    let s = setup(vec![text("old", "old.txt", 3, 1)]);
    s.engine.scheduler.request_refresh(None).await;

    // Relay still processing: listing does not show the new file yet.
    let outcome = s.engine.uploads.submit(ten_bytes("a.txt"), None).await;

    assert!(matches!(outcome, UploadOutcome::Accepted { ref record } if record.size_bytes == 10));
    let snapshot = s.engine.cache.read();
    assert!(snapshot.contains("old"));
    assert!(snapshot.records().iter().all(|r| r.display_name != "a.txt"));
    // One refresh before, one forced after settling.
    assert_eq!(s.relay.list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_upload_refresh_picks_up_new_file() {
    let s = setup(Vec::new());
    s.relay.set_listing(vec![text("id-1", "a.txt", 10, 5)]);

    let outcome = s.engine.uploads.submit(ten_bytes("a.txt"), None).await;

    assert!(outcome.is_accepted());
    assert!(s.engine.cache.read().contains("id-1"));
    let payload = s.relay.uploads.lock().unwrap()[0].clone();
    assert_eq!(payload.idempotency_key.len(), 32);
}

#[tokio::test(start_paused = true)]
async fn test_same_bytes_under_new_name_is_duplicate_content() {
    let s = setup(Vec::new());

    assert!(s.engine.uploads.submit(ten_bytes("a.txt"), None).await.is_accepted());
    s.clock.advance(Duration::from_secs(15));
    let renamed = s.engine.uploads.submit(ten_bytes("copy of a.txt"), None).await;

    assert_eq!(renamed.reason(), Some(&RejectReason::DuplicateContent));
    assert_eq!(s.relay.upload_calls(), 1);

    s.clock.advance(Duration::from_secs(61));
    assert!(s
        .engine
        .uploads
        .submit(ten_bytes("copy of a.txt"), None)
        .await
        .is_accepted());
    assert_eq!(s.relay.upload_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_second_upload_while_settling_is_busy() {
    let s = setup(Vec::new());
    *s.relay.upload_delay.lock().unwrap() = Some(Duration::from_secs(3));

    let uploads = Arc::clone(&s.engine.uploads);
    let first = tokio::spawn(async move { uploads.submit(ten_bytes("a.txt"), None).await });
    while !s.engine.session.is_uploading() {
        tokio::task::yield_now().await;
    }

    let other = UploadFile::new("b.txt", b"different".to_vec(), 5);
    let second = s.engine.uploads.submit(other, None).await;
    assert_eq!(second.reason(), Some(&RejectReason::Busy));

    assert!(first.await.unwrap().is_accepted());
    assert!(!s.engine.session.is_uploading());
    assert_eq!(s.relay.upload_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_upload_is_categorised_and_retryable() {
    let s = setup(vec![text("keep", "keep.txt", 1, 1)]);
    s.engine.scheduler.request_refresh(None).await;
    *s.relay.upload_rejection.lock().unwrap() = Some((413, "File too large".to_string()));

    let mut events = s.bus.subscribe();
    let outcome = s.engine.uploads.submit(ten_bytes("big.txt"), None).await;

    assert!(matches!(
        outcome.reason(),
        Some(RejectReason::Failed {
            category: FailureCategory::Size,
            ..
        })
    ));
    assert_eq!(s.engine.cache.read().len(), 1);
    assert_eq!(s.relay.list_calls(), 1);

    let mut saw_failed = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Upload(UploadEvent::Failed { category, .. }) = event {
            assert_eq!(category, "size");
            saw_failed = true;
        }
    }
    assert!(saw_failed);

    // A failed ticket does not block a retry of the same file.
    *s.relay.upload_rejection.lock().unwrap() = None;
    assert!(s.engine.uploads.submit(ten_bytes("big.txt"), None).await.is_accepted());
    assert_eq!(s.relay.upload_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_server_duplicate_is_informational() {
    let s = setup(Vec::new());
    s.relay.report_duplicate.store(true, Ordering::SeqCst);

    let outcome = s
        .engine
        .uploads
        .submit(ten_bytes("a.txt"), Some("renamed.txt".to_string()))
        .await;

    assert!(outcome.is_accepted());
    let messages: Vec<String> = s
        .engine
        .notifications
        .active()
        .into_iter()
        .map(|n| n.message)
        .collect();
    assert!(messages.contains(&"Uploaded renamed.txt".to_string()));
    assert!(messages.iter().any(|m| m.ends_with("already exists on the relay")));
}

#[tokio::test]
async fn test_empty_file_is_rejected_without_network() {
    let s = setup(Vec::new());
    let outcome = s
        .engine
        .uploads
        .submit(UploadFile::new("empty.txt", Vec::new(), 0), None)
        .await;
    assert!(matches!(outcome.reason(), Some(RejectReason::Invalid(_))));
    assert_eq!(s.relay.upload_calls(), 0);
}

// ============================================================================
// File Actions
// ============================================================================

#[tokio::test]
async fn test_delete_removes_record_and_confirms() {
    let s = setup(vec![text("a", "a.txt", 1, 1), text("b", "b.txt", 2, 2)]);
    s.engine.scheduler.request_refresh(None).await;

    assert!(s.engine.actions.delete("a").await);

    assert!(!s.engine.cache.read().contains("a"));
    assert!(s.engine.cache.read().contains("b"));
    assert_eq!(*s.relay.deletes.lock().unwrap(), vec!["a".to_string()]);
    assert_eq!(s.relay.list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_listed_before_delete_does_not_restore_record() {
    let s = setup(vec![text("a", "a.txt", 1, 1), text("b", "b.txt", 2, 2)]);
    s.engine.scheduler.force_refresh(None).await;
    *s.relay.list_delay.lock().unwrap() = Some(Duration::from_secs(3));

    let in_flight = {
        let scheduler = Arc::clone(&s.engine.scheduler);
        tokio::spawn(async move { scheduler.force_refresh(None).await })
    };
    tokio::task::yield_now().await;
    assert_eq!(s.relay.list_calls(), 2);

    assert!(s.engine.actions.delete("a").await);
    assert!(!s.engine.cache.read().contains("a"));

    assert_eq!(in_flight.await.unwrap(), RefreshOutcome::Superseded);
    assert!(!s.engine.cache.read().contains("a"));
    assert!(s.engine.cache.read().contains("b"));
}

#[tokio::test]
async fn test_pin_refresh_lands_remote_hash() {
    let s = setup(vec![text("a", "a.txt", 1, 1)]);
    s.engine.scheduler.request_refresh(None).await;
    assert_eq!(
        s.engine.cache.read().find("a").unwrap().storage_class,
        StorageClass::LocalOnly
    );

    s.relay.set_listing(vec![text("a", "a.txt", 1, 1).with_remote_hash("bafy")]);
    assert!(s.engine.actions.pin("bafy").await);

    let cached = s.engine.cache.read().find("a").cloned().unwrap();
    assert_eq!(cached.remote_hash.as_deref(), Some("bafy"));
    assert_eq!(cached.storage_class, StorageClass::LocalWithRemote);
}

#[tokio::test]
async fn test_unpin_failure_reports_error() {
    let s = setup(Vec::new());
    assert!(s.engine.actions.pin("bafy").await);
    assert!(!s.engine.actions.unpin("bafy").await);

    let active = s.engine.notifications.active();
    assert!(active
        .iter()
        .any(|n| n.severity == Severity::Error && n.message.contains("Hash is not pinned")));
}

#[tokio::test]
async fn test_health_probe() {
    let s = setup(Vec::new());
    assert!(s.engine.actions.check_health().await);
    s.relay.healthy.store(false, Ordering::SeqCst);
    assert!(!s.engine.actions.check_health().await);
}

// ============================================================================
// Notifications & Persistence
// ============================================================================

#[tokio::test]
async fn test_notification_capacity_plus_k() {
    let s = setup(Vec::new());
    for i in 0..8 {
        s.engine.notifications.info(format!("n{}", i)).await;
    }
    let active = s.engine.notifications.active();
    assert_eq!(active.len(), 5);
    assert_eq!(active[0].message, "n3");
}

#[tokio::test]
async fn test_restart_restores_cache_and_notifications() {
    let store = InMemoryKeyValueStore::new();
    let relay = FakeRelay::with_listing(vec![text("a", "a.txt", 1, 1)]);

    let first = setup_on(store.clone(), relay.clone());
    first.engine.scheduler.request_refresh(None).await;
    first.engine.notifications.warning("Relay is slow").await;

    let second = setup_on(store, relay);
    assert_eq!(second.engine.restore().await, 1);
    assert!(second.engine.cache.read().contains("a"));
    assert_eq!(second.engine.notifications.active().len(), 1);
}

#[tokio::test]
async fn test_second_context_sees_first_context_writes() {
    let store = InMemoryKeyValueStore::new();
    let relay = FakeRelay::with_listing(vec![text("a", "a.txt", 1, 1), text("b", "b.txt", 2, 2)]);

    let first = setup_on(store.clone(), relay.clone());
    let second = setup_on(store.attach(), relay);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _watch = second.engine.cache.subscribe(move |snapshot| {
        tx.send(snapshot.len()).ok();
    });

    first.engine.scheduler.request_refresh(None).await;

    let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap();
    assert_eq!(seen, Some(2));
    assert_eq!(second.engine.cache.read().len(), 2);
    assert_eq!(second.relay.list_calls(), 1);
    assert!(second.store.get("relay-dashboard.files").await.unwrap().is_some());
}
