//! # Notification Queue
//!
//! Bounded, rate-limited list of user-visible status messages.
//!
//! - Capacity is a FIFO bound: the oldest entry is evicted to make room.
//! - An `error` identical to one pushed less than the suppression window ago
//!   is dropped and the existing id returned. Other severities are never
//!   suppressed.
//! - Entries expire lazily after their ttl; `active()` prunes them.
//!
//! The queue mirrors itself into the key-value store so pending messages
//! survive a reload. A stored list that cannot be parsed resets to empty.

use bridge_traits::{Clock, KeyValueStore};
use core_runtime::config::NotificationConfig;
use core_runtime::events::{CoreEvent, EventBus, NotificationEvent};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub message: String,
    pub severity: Severity,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

impl Notification {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

// ============================================================================
// Queue
// ============================================================================

pub struct NotificationQueue {
    config: NotificationConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    key: String,
    event_bus: Arc<EventBus>,
    entries: Mutex<VecDeque<Notification>>,
    /// Serializes writes to the store
    persist_lock: tokio::sync::Mutex<()>,
}

impl NotificationQueue {
    pub fn new(
        config: NotificationConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
        key: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            clock,
            store,
            key: key.into(),
            event_bus,
            entries: Mutex::new(VecDeque::with_capacity(config.capacity)),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<Notification>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Show a message; `ttl` defaults to the configured lifetime
    pub async fn push(
        &self,
        message: impl Into<String>,
        severity: Severity,
        ttl: Option<Duration>,
    ) -> NotificationId {
        let message = message.into();
        let now = self.clock.unix_timestamp_millis();
        let ttl_ms = ttl.unwrap_or(self.config.default_ttl).as_millis() as i64;
        let window_ms = self.config.error_suppression_window.as_millis() as i64;
        let mut events = Vec::new();

        let id = {
            let mut entries = self.entries();
            prune_expired(&mut entries, now, &mut events);

            let duplicate = (severity == Severity::Error)
                .then(|| {
                    entries.iter().find(|n| {
                        n.severity == severity
                            && n.message == message
                            && now.saturating_sub(n.created_at_ms) < window_ms
                    })
                })
                .flatten()
                .map(|n| n.id.clone());

            if let Some(existing) = duplicate {
                debug!(id = %existing, "Suppressing repeated error notification");
                events.push(NotificationEvent::Suppressed {
                    id: existing.to_string(),
                });
                drop(entries);
                self.emit_all(events);
                return existing;
            }

            while entries.len() >= self.config.capacity {
                match entries.pop_front() {
                    Some(evicted) => events.push(NotificationEvent::Evicted {
                        id: evicted.id.to_string(),
                    }),
                    None => break,
                }
            }

            let notification = Notification {
                id: NotificationId::new(),
                message,
                severity,
                created_at_ms: now,
                expires_at_ms: now.saturating_add(ttl_ms),
            };
            events.push(NotificationEvent::Pushed {
                id: notification.id.to_string(),
                message: notification.message.clone(),
                severity: severity.as_str().to_string(),
            });
            let id = notification.id.clone();
            entries.push_back(notification);
            id
        };

        self.emit_all(events);
        self.persist_logged().await;
        id
    }

    pub async fn info(&self, message: impl Into<String>) -> NotificationId {
        self.push(message, Severity::Info, None).await
    }

    pub async fn success(&self, message: impl Into<String>) -> NotificationId {
        self.push(message, Severity::Success, None).await
    }

    pub async fn warning(&self, message: impl Into<String>) -> NotificationId {
        self.push(message, Severity::Warning, None).await
    }

    pub async fn error(&self, message: impl Into<String>) -> NotificationId {
        self.push(message, Severity::Error, None).await
    }

    /// Unexpired notifications, oldest first
    pub fn active(&self) -> Vec<Notification> {
        let now = self.clock.unix_timestamp_millis();
        let mut events = Vec::new();
        let active = {
            let mut entries = self.entries();
            prune_expired(&mut entries, now, &mut events);
            entries.iter().cloned().collect()
        };
        self.emit_all(events);
        active
    }

    pub async fn dismiss(&self, id: &NotificationId) -> bool {
        let removed = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|n| &n.id != id);
            before != entries.len()
        };

        if removed {
            self.emit_all(vec![NotificationEvent::Dismissed { id: id.to_string() }]);
            self.persist_logged().await;
        }
        removed
    }

    pub async fn clear(&self) {
        let dismissed: Vec<Notification> = self.entries().drain(..).collect();
        self.emit_all(
            dismissed
                .into_iter()
                .map(|n| NotificationEvent::Dismissed { id: n.id.to_string() })
                .collect(),
        );
        self.persist_logged().await;
    }

    /// Reload pending notifications from the store
    ///
    /// Expired entries are dropped and the newest `capacity` kept. A stored
    /// list that cannot be parsed is reset to empty.
    pub async fn restore(&self) -> usize {
        let raw = match self.store.get(&self.key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Stored notifications could not be read");
                None
            }
        };

        let mut restored: Vec<Notification> = match raw.as_deref().map(serde_json::from_str) {
            Some(Ok(list)) => list,
            Some(Err(e)) => {
                warn!(error = %e, "Stored notifications are unreadable; resetting");
                if let Err(e) = self.store.remove(&self.key).await {
                    warn!(error = %e, "Could not reset stored notifications");
                }
                Vec::new()
            }
            None => Vec::new(),
        };

        let now = self.clock.unix_timestamp_millis();
        restored.retain(|n| !n.is_expired(now));
        let overflow = restored.len().saturating_sub(self.config.capacity);
        restored.drain(..overflow);

        let count = restored.len();
        *self.entries() = restored.into();
        debug!(count, "Restored notifications");
        count
    }

    async fn persist(&self) -> Result<()> {
        let _write = self.persist_lock.lock().await;
        let encoded = {
            let entries = self.entries();
            serde_json::to_string(&*entries)?
        };
        self.store
            .set(&self.key, &encoded)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Notifications could not be persisted");
        }
    }

    fn emit_all(&self, events: Vec<NotificationEvent>) {
        for event in events {
            self.event_bus.emit(CoreEvent::Notification(event)).ok();
        }
    }
}

fn prune_expired(
    entries: &mut VecDeque<Notification>,
    now_ms: i64,
    events: &mut Vec<NotificationEvent>,
) {
    entries.retain(|n| {
        let expired = n.is_expired(now_ms);
        if expired {
            events.push(NotificationEvent::Expired { id: n.id.to_string() });
        }
        !expired
    });
}
