//! # File Actions
//!
//! Delete, pin, unpin and the relay health probe. Each call is bounded by
//! its own deadline and reports the result through the notification queue.

use bridge_traits::{BridgeError, RemoteFileService};
use core_runtime::config::CallTimeouts;
use core_runtime::events::{CoreEvent, EventBus, FileEvent};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::cache_store::CacheStore;
use crate::error::{Result, SyncError};
use crate::notifications::NotificationQueue;
use crate::scheduler::RefreshScheduler;

pub struct FileActions {
    remote: Arc<dyn RemoteFileService>,
    cache: Arc<CacheStore>,
    scheduler: Arc<RefreshScheduler>,
    notifications: Arc<NotificationQueue>,
    event_bus: Arc<EventBus>,
    timeouts: CallTimeouts,
}

impl FileActions {
    pub fn new(
        remote: Arc<dyn RemoteFileService>,
        cache: Arc<CacheStore>,
        scheduler: Arc<RefreshScheduler>,
        notifications: Arc<NotificationQueue>,
        event_bus: Arc<EventBus>,
        timeouts: CallTimeouts,
    ) -> Self {
        Self {
            remote,
            cache,
            scheduler,
            notifications,
            event_bus,
            timeouts,
        }
    }

    /// Delete a file; returns whether the relay accepted it
    ///
    /// On success the record is removed from the cache immediately, then a
    /// forced refresh confirms the server's view.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> bool {
        let name = self
            .cache
            .read()
            .find(id)
            .map(|r| r.display_name.clone())
            .unwrap_or_else(|| id.to_string());

        if let Err(error) = bounded(self.timeouts.delete, self.remote.delete(id)).await {
            self.action_failed("delete", format!("Could not delete {}: {}", name, error.user_message()))
                .await;
            return false;
        }

        let remaining: Vec<_> = self
            .cache
            .read()
            .records()
            .iter()
            .filter(|r| r.id != id)
            .cloned()
            .collect();
        self.cache.replace(remaining).await;

        info!("File deleted");
        self.emit(FileEvent::Deleted {
            file_id: id.to_string(),
        });
        self.notifications.success(format!("Deleted {}", name)).await;

        let refresh = self.scheduler.force_refresh(None).await;
        debug!(?refresh, "Post-delete refresh finished");
        true
    }

    #[instrument(skip(self))]
    pub async fn pin(&self, hash: &str) -> bool {
        self.set_pinned(hash, true).await
    }

    #[instrument(skip(self))]
    pub async fn unpin(&self, hash: &str) -> bool {
        self.set_pinned(hash, false).await
    }

    async fn set_pinned(&self, hash: &str, pinned: bool) -> bool {
        let (action, result) = if pinned {
            ("pin", bounded(self.timeouts.pin, self.remote.pin(hash)).await)
        } else {
            ("unpin", bounded(self.timeouts.pin, self.remote.unpin(hash)).await)
        };

        if let Err(error) = result {
            self.action_failed(action, format!("Could not {} content: {}", action, error.user_message()))
                .await;
            return false;
        }

        self.emit(FileEvent::PinChanged {
            hash: hash.to_string(),
            pinned,
        });
        let message = if pinned { "Content pinned" } else { "Content unpinned" };
        self.notifications.success(message).await;

        // Pinning changes record metadata, not ids, so only a forced refresh lands it.
        let refresh = self.scheduler.force_refresh(None).await;
        debug!(?refresh, "Post-{} refresh finished", action);
        true
    }

    /// Whether the relay answers its health endpoint in time
    pub async fn check_health(&self) -> bool {
        match bounded(self.timeouts.health, self.remote.health()).await {
            Ok(healthy) => healthy,
            Err(error) => {
                debug!(error = %error, "Health probe failed");
                false
            }
        }
    }

    async fn action_failed(&self, action: &str, message: String) {
        warn!(action, message = %message, "File action failed");
        self.emit(FileEvent::ActionFailed {
            action: action.to_string(),
            message: message.clone(),
        });
        self.notifications.error(message).await;
    }

    fn emit(&self, event: FileEvent) {
        self.event_bus.emit(CoreEvent::File(event)).ok();
    }
}

async fn bounded<T, F>(deadline: Duration, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, BridgeError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SyncError::Remote(BridgeError::Timeout(deadline))),
    }
}
