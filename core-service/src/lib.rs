//! Dashboard service façade and bootstrap helpers.
//!
//! This crate wires a validated [`EngineConfig`] to the relay connector and
//! the sync engine, and exposes the operations a dashboard host calls. Desktop
//! hosts typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) and start from [`bootstrap_desktop`]; other hosts inject
//! their own bridges through [`EngineConfig::builder`].

pub mod error;

pub use error::{CoreError, Result};

use std::sync::{Arc, Mutex};

use bridge_traits::{FileRecord, ListFilter, RemoteFileService};
use core_runtime::config::EngineConfig;
use core_runtime::events::{EventBus, EventStream};
use core_sync::{
    AutoRefreshHandle, CacheSnapshot, CacheSubscription, Notification, NotificationId,
    RefreshOutcome, SyncEngine, UploadFile, UploadOutcome,
};
use provider_relay::RelayConnector;
use tracing::{debug, info};

#[cfg(feature = "desktop-shims")]
use bridge_desktop::SqliteKeyValueStore;
#[cfg(feature = "desktop-shims")]
use bridge_traits::StaticCredential;

/// Background tasks owned by a started service
#[derive(Default)]
struct Background {
    auto_refresh: Option<AutoRefreshHandle>,
    cache_watch: Option<CacheSubscription>,
}

/// Primary façade exposed to host applications.
///
/// Cloning is cheap; clones share the engine, the event bus and the
/// background tasks.
#[derive(Clone)]
pub struct DashboardService {
    config: Arc<EngineConfig>,
    event_bus: Arc<EventBus>,
    engine: SyncEngine,
    background: Arc<Mutex<Background>>,
}

impl DashboardService {
    /// Create a service that talks to the relay named in `config`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let remote: Arc<dyn RemoteFileService> = Arc::new(RelayConnector::from_config(&config));
        Ok(Self::assemble(config, remote))
    }

    /// Create a service backed by a caller-provided remote.
    pub fn with_remote(config: EngineConfig, remote: Arc<dyn RemoteFileService>) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, remote))
    }

    fn assemble(config: EngineConfig, remote: Arc<dyn RemoteFileService>) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));
        let engine = SyncEngine::new(&config, remote, Arc::clone(&event_bus));

        Self {
            config: Arc::new(config),
            event_bus,
            engine,
            background: Arc::new(Mutex::new(Background::default())),
        }
    }

    /// Restore persisted state, start background work and run the first refresh.
    ///
    /// Calling `start` again restarts the background tasks.
    pub async fn start(&self) -> RefreshOutcome {
        let restored = self.engine.restore().await;
        info!(restored, base_url = %self.config.base_url, "Dashboard service starting");

        let outcome = self.engine.scheduler.request_refresh(None).await;

        // The timer's immediate first tick lands inside the refresh interval.
        let cache_watch = self.engine.cache.subscribe(|snapshot| {
            debug!(records = snapshot.len(), "Adopted file list from another context");
        });
        let auto_refresh = self
            .engine
            .scheduler
            .spawn_auto_refresh(self.config.timings.auto_refresh_interval);

        let mut background = self.background.lock().unwrap_or_else(|p| p.into_inner());
        background.cache_watch = Some(cache_watch);
        background.auto_refresh = Some(auto_refresh);
        outcome
    }

    /// Stop the background refresh timer and the cross-context watch.
    pub fn shutdown(&self) {
        let mut background = self.background.lock().unwrap_or_else(|p| p.into_inner());
        background.auto_refresh = None;
        background.cache_watch = None;
        info!("Dashboard service stopped");
    }

    /// Whether the background refresh timer is running
    pub fn is_running(&self) -> bool {
        self.background
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .auto_refresh
            .as_ref()
            .is_some_and(AutoRefreshHandle::is_running)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub fn files(&self) -> Arc<CacheSnapshot> {
        self.engine.cache.read()
    }

    pub fn file(&self, id: &str) -> Option<FileRecord> {
        self.engine.cache.read().find(id).cloned()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.engine.notifications.active()
    }

    pub fn is_refreshing(&self) -> bool {
        self.engine.session.is_refreshing()
    }

    pub fn is_uploading(&self) -> bool {
        self.engine.session.is_uploading()
    }

    /// Subscribe to every engine event.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Throttled refresh; `filter` replaces the remembered one when given.
    pub async fn refresh(&self, filter: Option<ListFilter>) -> RefreshOutcome {
        self.engine.scheduler.request_refresh(filter).await
    }

    /// Refresh that bypasses the interval and no-op checks.
    pub async fn force_refresh(&self, filter: Option<ListFilter>) -> RefreshOutcome {
        self.engine.scheduler.force_refresh(filter).await
    }

    pub async fn upload(&self, file: UploadFile, custom_name: Option<String>) -> UploadOutcome {
        self.engine.uploads.submit(file, custom_name).await
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.engine.actions.delete(id).await
    }

    pub async fn pin(&self, hash: &str) -> bool {
        self.engine.actions.pin(hash).await
    }

    pub async fn unpin(&self, hash: &str) -> bool {
        self.engine.actions.unpin(hash).await
    }

    pub async fn check_health(&self) -> bool {
        self.engine.actions.check_health().await
    }

    pub async fn dismiss_notification(&self, id: &NotificationId) -> bool {
        self.engine.notifications.dismiss(id).await
    }

    pub async fn clear_notifications(&self) {
        self.engine.notifications.clear().await
    }
}

/// Convenience bootstrapper for desktop hosts.
///
/// Uses the reqwest HTTP client and the SQLite key-value store under the
/// platform data directory.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// let service = core_service::bootstrap_desktop("https://relay.example.com", "token").await?;
/// service.start().await;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(
    base_url: impl Into<String>,
    token: impl Into<String>,
) -> Result<DashboardService> {
    let store = SqliteKeyValueStore::open_default()
        .await
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;

    let config = EngineConfig::builder()
        .base_url(base_url)
        .key_value_store(Arc::new(store))
        .credential_provider(Arc::new(StaticCredential::new(token)))
        .build()?;

    DashboardService::new(config)
}
