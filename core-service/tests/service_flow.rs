//! Service-level flows through the relay connector
//!
//! A scripted HTTP client plays the relay so requests travel the whole stack:
//! façade, engine, connector and wire parsing.

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, HttpClient, HttpMethod, HttpRequest, HttpResponse,
    InMemoryKeyValueStore, ManualClock, StaticCredential,
};
use bytes::Bytes;
use core_runtime::config::EngineConfig;
use core_runtime::events::{CoreEvent, RefreshEvent};
use core_service::{CoreError, DashboardService};
use core_sync::{RefreshOutcome, Severity, UploadFile, UploadOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const BASE_URL: &str = "https://relay.example.com";

fn wire_file(id: &str, name: &str, size: u64, created_at: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "displayName": name,
        "mimeType": "text/plain",
        "size": size,
        "createdAt": created_at,
    })
}

/// Minimal relay keyed on method and path
struct ScriptedRelay {
    files: Mutex<Vec<serde_json::Value>>,
    requests: Mutex<Vec<(HttpMethod, String)>>,
    healthy: AtomicBool,
}

impl ScriptedRelay {
    fn with_files(files: Vec<serde_json::Value>) -> Arc<Self> {
        Arc::new(Self {
            files: Mutex::new(files),
            requests: Mutex::new(Vec::new()),
            healthy: AtomicBool::new(true),
        })
    }

    fn requests_to(&self, method: HttpMethod, path: &str) -> usize {
        let url = format!("{}{}", BASE_URL, path);
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, u)| *m == method && *u == url)
            .count()
    }
}

fn respond(status: u16, body: serde_json::Value) -> BridgeResult<HttpResponse> {
    Ok(HttpResponse {
        status,
        headers: Default::default(),
        body: Bytes::from(body.to_string()),
    })
}

#[async_trait]
impl HttpClient for ScriptedRelay {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((request.method, request.url.clone()));

        let path = request.url.trim_start_matches(BASE_URL).to_string();
        match (request.method, path.as_str()) {
            (HttpMethod::Get, "/api/files") => {
                let files = self.files.lock().unwrap().clone();
                respond(200, serde_json::json!({ "success": true, "files": files }))
            }
            (HttpMethod::Post, "/api/upload") => {
                let form = request.multipart.as_ref().expect("multipart upload");
                let name = form
                    .text_value("customName")
                    .unwrap_or("upload.txt")
                    .to_string();
                let created = wire_file("srv-1", &name, 5, 1_700_000_000_500);
                self.files.lock().unwrap().push(created.clone());
                respond(200, serde_json::json!({ "success": true, "file": created }))
            }
            (HttpMethod::Delete, p) if p.starts_with("/api/files/") => {
                respond(200, serde_json::json!({ "success": true }))
            }
            (HttpMethod::Get, "/api/health") => {
                let status = if self.healthy.load(Ordering::SeqCst) { 200 } else { 503 };
                respond(status, serde_json::json!({}))
            }
            _ => respond(404, serde_json::json!({ "error": "Not found" })),
        }
    }
}

fn service_for(relay: Arc<ScriptedRelay>) -> DashboardService {
    let config = EngineConfig::builder()
        .base_url(BASE_URL)
        .http_client(relay)
        .key_value_store(Arc::new(InMemoryKeyValueStore::new()))
        .credential_provider(Arc::new(StaticCredential::new("secret-token")))
        .clock(Arc::new(ManualClock::new(1_700_000_000_000)))
        .build()
        .unwrap();
    DashboardService::new(config).unwrap()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_start_reconciles_listing_and_announces_it() {
    let relay = ScriptedRelay::with_files(vec![
        wire_file("a", "a.txt", 3, 1),
        wire_file("b", "b.txt", 4, 2),
    ]);
    let service = service_for(Arc::clone(&relay));
    let mut events = service
        .events()
        .filter(|event| matches!(event, CoreEvent::Refresh(RefreshEvent::Reconciled { .. })));

    let outcome = service.start().await;

    assert_eq!(outcome, RefreshOutcome::Reconciled { record_count: 2 });
    assert_eq!(service.files().len(), 2);
    assert_eq!(service.file("b").unwrap().display_name, "b.txt");
    assert!(matches!(
        events.try_recv(),
        Some(Ok(CoreEvent::Refresh(RefreshEvent::Reconciled { record_count: 2 })))
    ));
    assert!(service.is_running());

    service.shutdown();
    assert!(!service.is_running());
}

#[tokio::test]
async fn test_missing_store_surfaces_as_capability_error() {
    let result = EngineConfig::builder()
        .base_url(BASE_URL)
        .http_client(ScriptedRelay::with_files(Vec::new()))
        .credential_provider(Arc::new(StaticCredential::new("secret-token")))
        .build()
        .map_err(CoreError::from);

    assert!(matches!(
        result,
        Err(CoreError::CapabilityMissing { capability, .. }) if capability == "KeyValueStore"
    ));
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_upload_is_listed_after_the_settle_refresh() {
    let relay = ScriptedRelay::with_files(vec![wire_file("a", "a.txt", 3, 1)]);
    let service = service_for(Arc::clone(&relay));
    service.force_refresh(None).await;

    let outcome = service
        .upload(
            UploadFile::new("notes.txt", Bytes::from_static(b"hello"), 42),
            Some("renamed.txt".to_string()),
        )
        .await;

    assert!(outcome.is_accepted());
    let UploadOutcome::Accepted { record } = outcome else {
        unreachable!()
    };
    assert_eq!(record.id, "srv-1");
    assert!(service.files().contains("srv-1"));
    assert_eq!(relay.requests_to(HttpMethod::Post, "/api/upload"), 1);
    assert!(service
        .notifications()
        .iter()
        .any(|n| n.severity == Severity::Success && n.message == "Uploaded renamed.txt"));
    assert!(!service.is_uploading());
}

#[tokio::test(start_paused = true)]
async fn test_delete_sends_encoded_id_and_drops_record() {
    let relay = ScriptedRelay::with_files(vec![wire_file("dir/a b", "a.txt", 3, 1)]);
    let service = service_for(Arc::clone(&relay));
    service.force_refresh(None).await;
    assert!(service.files().contains("dir/a b"));

    relay.files.lock().unwrap().clear();
    assert!(service.delete("dir/a b").await);

    assert_eq!(relay.requests_to(HttpMethod::Delete, "/api/files/dir%2Fa%20b"), 1);
    assert!(service.files().is_empty());
}

#[tokio::test]
async fn test_health_follows_relay_status() {
    let relay = ScriptedRelay::with_files(Vec::new());
    let service = service_for(Arc::clone(&relay));

    assert!(service.check_health().await);

    relay.healthy.store(false, Ordering::SeqCst);
    assert!(!service.check_health().await);
}

#[tokio::test]
async fn test_dismissed_notification_is_gone() {
    let relay = ScriptedRelay::with_files(Vec::new());
    let service = service_for(relay);

    let id = service.engine().notifications.info("Welcome back").await;
    assert_eq!(service.notifications().len(), 1);

    assert!(service.dismiss_notification(&id).await);
    assert!(service.notifications().is_empty());

    service.engine().notifications.warning("Quota at 90%").await;
    service.clear_notifications().await;
    assert!(service.notifications().is_empty());
}
