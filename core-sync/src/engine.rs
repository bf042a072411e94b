//! # Sync Engine Assembly
//!
//! Wires every component around one [`SessionContext`] and one cache.

use bridge_traits::RemoteFileService;
use core_runtime::config::EngineConfig;
use core_runtime::events::EventBus;
use std::sync::Arc;

use crate::actions::FileActions;
use crate::cache_store::CacheStore;
use crate::notifications::NotificationQueue;
use crate::scheduler::RefreshScheduler;
use crate::session::SessionContext;
use crate::upload::UploadCoordinator;

/// All engine components for one session
///
/// Fields are shared handles; clone what you need and drop the rest.
#[derive(Clone)]
pub struct SyncEngine {
    pub session: Arc<SessionContext>,
    pub cache: Arc<CacheStore>,
    pub notifications: Arc<NotificationQueue>,
    pub scheduler: Arc<RefreshScheduler>,
    pub uploads: Arc<UploadCoordinator>,
    pub actions: Arc<FileActions>,
}

impl SyncEngine {
    pub fn new(
        config: &EngineConfig,
        remote: Arc<dyn RemoteFileService>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let session = Arc::new(SessionContext::new());

        let cache = Arc::new(CacheStore::new(
            Arc::clone(&config.key_value_store),
            config.storage_keys.files.clone(),
            Arc::clone(&event_bus),
        ));

        let notifications = Arc::new(NotificationQueue::new(
            config.notifications,
            Arc::clone(&config.clock),
            Arc::clone(&config.key_value_store),
            config.storage_keys.notifications.clone(),
            Arc::clone(&event_bus),
        ));

        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::clone(&remote),
            Arc::clone(&cache),
            Arc::clone(&notifications),
            Arc::clone(&session),
            Arc::clone(&config.clock),
            Arc::clone(&event_bus),
            config.timings,
            config.timeouts.list,
        ));

        let uploads = Arc::new(UploadCoordinator::new(
            Arc::clone(&remote),
            Arc::clone(&scheduler),
            Arc::clone(&notifications),
            Arc::clone(&session),
            Arc::clone(&config.clock),
            Arc::clone(&event_bus),
            config.timings,
            config.timeouts.upload,
            config.digest_prefix_len,
        ));

        let actions = Arc::new(FileActions::new(
            remote,
            Arc::clone(&cache),
            Arc::clone(&scheduler),
            Arc::clone(&notifications),
            event_bus,
            config.timeouts,
        ));

        Self {
            session,
            cache,
            notifications,
            scheduler,
            uploads,
            actions,
        }
    }

    /// Hydrate the cache and notifications from storage
    pub async fn restore(&self) -> usize {
        self.notifications.restore().await;
        self.cache.load().await.len()
    }
}
