//! # Local Cache Store
//!
//! Durable mirror of the reconciled file list.
//!
//! ## Overview
//!
//! The store keeps the current [`CacheSnapshot`] in memory behind an `Arc`
//! swap, so `read()` is synchronous and always sees one complete snapshot.
//! `replace()` is the only mutator: it runs the [`DuplicateResolver`], swaps
//! the snapshot in, then writes it to the [`KeyValueStore`] as versioned JSON.
//!
//! Persistence never fails the caller. A refused write is logged and reported
//! as [`CacheEvent::PersistFailed`]; the in-memory snapshot stays current.
//! Unreadable persisted state is treated as an empty list.
//!
//! ## Cross-context propagation
//!
//! Other contexts attached to the same medium publish their writes through
//! [`KeyValueStore::subscribe`]. [`CacheStore::subscribe`] adopts those
//! snapshots and hands them to the caller's handler.

use bridge_traits::{FileRecord, KeyValueStore, StorageChange};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::models::CacheSnapshot;
use crate::resolver::DuplicateResolver;

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// On-disk layout of a snapshot
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSnapshot {
    version: u32,
    last_loaded_count: u64,
    records: Vec<FileRecord>,
}

pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
    resolver: DuplicateResolver,
    event_bus: Arc<EventBus>,
    snapshot: RwLock<Arc<CacheSnapshot>>,
    /// Serializes swap + persist so storage never lags behind an older snapshot
    write_lock: Mutex<()>,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, event_bus: Arc<EventBus>) -> Self {
        Self {
            store,
            key: key.into(),
            resolver: DuplicateResolver::new(),
            event_bus,
            snapshot: RwLock::new(Arc::new(CacheSnapshot::empty())),
            write_lock: Mutex::new(()),
        }
    }

    /// Current snapshot
    pub fn read(&self) -> Arc<CacheSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn install(&self, snapshot: Arc<CacheSnapshot>) {
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    fn next_count(&self) -> u64 {
        self.read().last_loaded_count() + 1
    }

    /// Hydrate from storage, resetting unreadable state to empty
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn load(&self) -> Arc<CacheSnapshot> {
        let _write = self.write_lock.lock().await;

        let (records, stored_count) = match self.store.get(&self.key).await {
            Ok(Some(raw)) => match decode(&raw) {
                Ok(persisted) => (persisted.records, persisted.last_loaded_count),
                Err(e) => {
                    warn!(error = %e, "Persisted file list is unreadable; resetting");
                    if let Err(e) = self.store.remove(&self.key).await {
                        warn!(error = %e, "Could not reset persisted file list");
                    }
                    (Vec::new(), 0)
                }
            },
            Ok(None) => (Vec::new(), 0),
            Err(e) => {
                warn!(error = %e, "Persisted file list could not be read");
                (Vec::new(), 0)
            }
        };

        let records = self.resolver.resolve(records);
        let count = stored_count.max(self.next_count());
        let snapshot = Arc::new(CacheSnapshot::new(records, count));
        self.install(Arc::clone(&snapshot));

        info!(records = snapshot.len(), "Loaded cached file list");
        self.emit(CacheEvent::Loaded {
            record_count: snapshot.len(),
            revision: snapshot.last_loaded_count(),
        });
        snapshot
    }

    /// Replace the whole list
    ///
    /// Candidates pass through the resolver first; the resulting snapshot is
    /// visible to `read()` before the write to storage begins.
    #[instrument(skip(self, records), fields(candidates = records.len()))]
    pub async fn replace(&self, records: Vec<FileRecord>) -> Arc<CacheSnapshot> {
        let _write = self.write_lock.lock().await;

        let (resolved, report) = self.resolver.resolve_with_report(records);
        let snapshot = Arc::new(CacheSnapshot::new(resolved, self.next_count()));
        self.install(Arc::clone(&snapshot));

        if let Err(e) = self.persist(&snapshot).await {
            warn!(error = %e, "File list could not be persisted");
            self.emit(CacheEvent::PersistFailed {
                message: e.to_string(),
            });
        }

        debug!(
            records = snapshot.len(),
            revision = snapshot.last_loaded_count(),
            "Replaced file list"
        );
        self.emit(CacheEvent::Replaced {
            record_count: snapshot.len(),
            revision: snapshot.last_loaded_count(),
            dropped: report.dropped(),
        });
        snapshot
    }

    pub async fn clear(&self) -> Arc<CacheSnapshot> {
        self.replace(Vec::new()).await
    }

    /// Watch writes made by other contexts sharing the storage medium
    ///
    /// The handler runs after the external snapshot has been adopted. Dropping
    /// the returned subscription stops the watch.
    pub fn subscribe<F>(self: &Arc<Self>, handler: F) -> CacheSubscription
    where
        F: Fn(Arc<CacheSnapshot>) + Send + Sync + 'static,
    {
        let mut changes = self.store.subscribe();
        let own_origin = self.store.origin();
        let weak: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => change,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Cache change feed lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(cache) = weak.upgrade() else { break };
                if change.origin == own_origin || change.key != cache.key {
                    continue;
                }

                let snapshot = cache.adopt_external(change).await;
                handler(snapshot);
            }
        });

        CacheSubscription { handle }
    }

    async fn adopt_external(&self, change: StorageChange) -> Arc<CacheSnapshot> {
        let _write = self.write_lock.lock().await;

        let records = match change.value.as_deref().map(decode) {
            Some(Ok(persisted)) => persisted.records,
            Some(Err(e)) => {
                warn!(error = %e, "Another window stored an unreadable file list; treating as empty");
                Vec::new()
            }
            None => Vec::new(),
        };

        let snapshot = Arc::new(CacheSnapshot::new(
            self.resolver.resolve(records),
            self.next_count(),
        ));
        self.install(Arc::clone(&snapshot));

        debug!(records = snapshot.len(), "Adopted file list from another context");
        self.emit(CacheEvent::ExternalChange {
            record_count: snapshot.len(),
            revision: snapshot.last_loaded_count(),
        });
        snapshot
    }

    async fn persist(&self, snapshot: &CacheSnapshot) -> Result<()> {
        let encoded = serde_json::to_string(&PersistedSnapshot {
            version: SNAPSHOT_FORMAT_VERSION,
            last_loaded_count: snapshot.last_loaded_count(),
            records: snapshot.records().to_vec(),
        })?;

        self.store
            .set(&self.key, &encoded)
            .await
            .map_err(|e| SyncError::Storage(e.to_string()))
    }

    fn emit(&self, event: CacheEvent) {
        self.event_bus.emit(CoreEvent::Cache(event)).ok();
    }
}

fn decode(raw: &str) -> Result<PersistedSnapshot> {
    let persisted: PersistedSnapshot = serde_json::from_str(raw)?;
    if persisted.version != SNAPSHOT_FORMAT_VERSION {
        return Err(SyncError::Storage(format!(
            "unsupported snapshot version {}",
            persisted.version
        )));
    }
    Ok(persisted)
}

/// Handle for a cross-context watch; aborts the watcher on drop
pub struct CacheSubscription {
    handle: JoinHandle<()>,
}

impl CacheSubscription {
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for CacheSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
