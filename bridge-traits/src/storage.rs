//! Key-Value Storage Abstraction
//!
//! Durable string key-value storage scoped to a user profile, plus change
//! notification across every context (window, process) attached to the same
//! backing medium.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{BridgeError, Result};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// A committed write observed on the backing medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    /// Key that changed
    pub key: String,
    /// New value, `None` when the key was removed
    pub value: Option<String>,
    /// Context that performed the write
    pub origin: Uuid,
}

/// Key-value storage trait
///
/// Abstracts the profile-scoped persistence medium:
/// - Desktop: SQLite file
/// - Web: localStorage
/// - Tests: in-memory map
///
/// Every handle has an [`origin`](KeyValueStore::origin). Handles sharing a
/// medium see each other's writes through [`subscribe`](KeyValueStore::subscribe);
/// consumers filter out changes carrying their own origin.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
///
/// async fn remember(store: &dyn KeyValueStore) -> Result<()> {
///     store.set("dashboard.files", "[]").await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Storage`] when the medium refuses the write
    /// (quota exhausted, read-only profile).
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// List all stored keys
    async fn keys(&self) -> Result<Vec<String>>;

    /// Identifier of this handle, stamped on the changes it produces
    fn origin(&self) -> Uuid;

    /// Receive every change committed to the medium, including our own
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

struct SharedMedium {
    entries: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
    fail_writes: AtomicBool,
}

/// In-memory [`KeyValueStore`] for tests and ephemeral sessions
///
/// [`attach`](InMemoryKeyValueStore::attach) creates a second handle on the
/// same medium with its own origin, which is how a second browser tab or
/// window is modelled.
#[derive(Clone)]
pub struct InMemoryKeyValueStore {
    medium: Arc<SharedMedium>,
    origin: Uuid,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            medium: Arc::new(SharedMedium {
                entries: Mutex::new(HashMap::new()),
                changes,
                fail_writes: AtomicBool::new(false),
            }),
            origin: Uuid::new_v4(),
        }
    }

    /// Open another context on the same medium
    pub fn attach(&self) -> Self {
        Self {
            medium: Arc::clone(&self.medium),
            origin: Uuid::new_v4(),
        }
    }

    /// Make every subsequent write fail as if the quota were exhausted
    pub fn set_fail_writes(&self, fail: bool) {
        self.medium.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Write a raw value without change notification
    pub fn seed(&self, key: &str, value: &str) {
        self.entries().insert(key.to_string(), value.to_string());
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.medium
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, key: &str, value: Option<String>) {
        // No receivers is fine.
        let _ = self.medium.changes.send(StorageChange {
            key: key.to_string(),
            value,
            origin: self.origin,
        });
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.medium.fail_writes.load(Ordering::SeqCst) {
            return Err(BridgeError::Storage(format!(
                "quota exceeded while writing '{}'",
                key
            )));
        }
        self.entries().insert(key.to_string(), value.to_string());
        self.publish(key, Some(value.to_string()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if self.entries().remove(key).is_some() {
            self.publish(key, None);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn origin(&self) -> Uuid {
        self.origin
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.medium.changes.subscribe()
    }
}
