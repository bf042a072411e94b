//! # Fetch/Reconcile Scheduler
//!
//! Throttles and de-overlaps refreshes of the file list.
//!
//! ## State Machine
//!
//! ```text
//! Idle ──request──> Loading ──ok──> Idle
//!                      │
//!                      └──error──> Idle (cache cleared, error shown)
//! ```
//!
//! - A request while `Loading` is dropped.
//! - A request less than the minimum interval after the previous accepted
//!   start is dropped, even when idle.
//! - A request carrying a different filter is not held back by the interval.
//! - A resolved listing whose id set matches the cache is not written.
//! - If the cache moved while the listing was in flight, the listing is
//!   discarded as superseded, forced or not.
//!
//! `force_refresh` skips the interval and the no-op check, but never runs
//! alongside another refresh.

use bridge_traits::{BridgeError, Clock, FileRecord, ListFilter, RemoteFileService};
use core_runtime::config::SyncTimings;
use core_runtime::events::{CoreEvent, EventBus, RefreshEvent};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::cache_store::CacheStore;
use crate::error::{Result, SyncError};
use crate::models::RefreshOutcome;
use crate::notifications::NotificationQueue;
use crate::resolver::DuplicateResolver;
use crate::session::SessionContext;

pub struct RefreshScheduler {
    remote: Arc<dyn RemoteFileService>,
    cache: Arc<CacheStore>,
    notifications: Arc<NotificationQueue>,
    session: Arc<SessionContext>,
    clock: Arc<dyn Clock>,
    event_bus: Arc<EventBus>,
    resolver: DuplicateResolver,
    min_interval: Duration,
    list_timeout: Duration,
    filter: Mutex<ListFilter>,
}

impl RefreshScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        remote: Arc<dyn RemoteFileService>,
        cache: Arc<CacheStore>,
        notifications: Arc<NotificationQueue>,
        session: Arc<SessionContext>,
        clock: Arc<dyn Clock>,
        event_bus: Arc<EventBus>,
        timings: SyncTimings,
        list_timeout: Duration,
    ) -> Self {
        Self {
            remote,
            cache,
            notifications,
            session,
            clock,
            event_bus,
            resolver: DuplicateResolver::new(),
            min_interval: timings.min_refresh_interval,
            list_timeout,
            filter: Mutex::new(ListFilter::all()),
        }
    }

    /// Filter applied when a request does not carry its own
    pub fn current_filter(&self) -> ListFilter {
        self.filter.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn changes_filter(&self, filter: Option<&ListFilter>) -> bool {
        filter.is_some_and(|filter| *filter != self.current_filter())
    }

    fn adopt_filter(&self, filter: Option<ListFilter>) -> ListFilter {
        let mut current = self.filter.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(filter) = filter {
            *current = filter;
        }
        current.clone()
    }

    /// Throttled refresh; `filter` replaces the remembered filter once the
    /// refresh is accepted
    pub async fn request_refresh(&self, filter: Option<ListFilter>) -> RefreshOutcome {
        self.run(filter, false).await
    }

    /// Refresh that must observe the server now (after deletes and uploads)
    pub async fn force_refresh(&self, filter: Option<ListFilter>) -> RefreshOutcome {
        self.run(filter, true).await
    }

    #[instrument(skip(self, filter))]
    async fn run(&self, filter: Option<ListFilter>, forced: bool) -> RefreshOutcome {
        let now = self.clock.unix_timestamp_millis();
        let throttled = !forced && !self.changes_filter(filter.as_ref());
        let interval = throttled.then_some(self.min_interval);

        let _loading = match self.session.try_begin_refresh(now, interval) {
            Ok(guard) => guard,
            Err(reason) => {
                debug!(reason = reason.as_str(), "Refresh skipped");
                self.emit(RefreshEvent::Skipped {
                    reason: reason.as_str().to_string(),
                });
                return RefreshOutcome::Skipped(reason);
            }
        };

        let filter = self.adopt_filter(filter);
        self.emit(RefreshEvent::Started { forced });
        let revision_before = self.cache.read().last_loaded_count();

        let records = match self.fetch(&filter).await {
            Ok(records) => records,
            Err(e) => return self.fail(e).await,
        };

        // Re-read after resuming; another writer may have replaced the cache.
        let resolved = self.resolver.resolve(records);
        let current = self.cache.read();

        if current.last_loaded_count() != revision_before {
            debug!(forced, "Cache changed while listing; discarding result");
            self.emit(RefreshEvent::Superseded);
            return RefreshOutcome::Superseded;
        }

        if !forced {
            let ids: BTreeSet<&str> = resolved.iter().map(|r| r.id.as_str()).collect();
            if ids.len() == current.last_reconciled_ids().len()
                && current.last_reconciled_ids().iter().all(|id| ids.contains(id.as_str()))
            {
                debug!(records = resolved.len(), "Listing unchanged");
                self.emit(RefreshEvent::Unchanged {
                    record_count: resolved.len(),
                });
                return RefreshOutcome::Unchanged {
                    record_count: resolved.len(),
                };
            }
        }

        let snapshot = self.cache.replace(resolved).await;
        info!(records = snapshot.len(), forced, "File list reconciled");
        self.emit(RefreshEvent::Reconciled {
            record_count: snapshot.len(),
        });
        RefreshOutcome::Reconciled {
            record_count: snapshot.len(),
        }
    }

    async fn fetch(&self, filter: &ListFilter) -> Result<Vec<FileRecord>> {
        match tokio::time::timeout(self.list_timeout, self.remote.list(filter)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SyncError::Remote(BridgeError::Timeout(self.list_timeout))),
        }
    }

    /// The listing cannot be trusted, so the cache is cleared rather than kept
    async fn fail(&self, error: SyncError) -> RefreshOutcome {
        warn!(error = %error, "Refresh failed; clearing file list");
        self.cache.clear().await;

        let message = error.user_message();
        self.notifications
            .error(format!("Failed to load files: {}", message))
            .await;
        self.emit(RefreshEvent::Failed {
            message: message.clone(),
        });
        RefreshOutcome::Failed { message }
    }

    /// Refresh periodically through the normal guards
    ///
    /// The first tick fires immediately. Dropping the handle stops the timer.
    pub fn spawn_auto_refresh(self: &Arc<Self>, interval: Duration) -> AutoRefreshHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(scheduler) = weak.upgrade() else { break };
                let outcome = scheduler.request_refresh(None).await;
                debug!(?outcome, "Auto-refresh tick");
            }
        });
        AutoRefreshHandle { handle }
    }

    fn emit(&self, event: RefreshEvent) {
        self.event_bus.emit(CoreEvent::Refresh(event)).ok();
    }
}

pub struct AutoRefreshHandle {
    handle: JoinHandle<()>,
}

impl AutoRefreshHandle {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for AutoRefreshHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SkipReason;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{InMemoryKeyValueStore, ManualClock, UploadPayload, UploadReceipt};
    use core_runtime::config::NotificationConfig;
    use mockall::mock;

    mock! {
        Remote {}

        #[async_trait]
        impl RemoteFileService for Remote {
            async fn list(&self, filter: &ListFilter) -> BridgeResult<Vec<FileRecord>>;
            async fn upload(&self, payload: UploadPayload) -> BridgeResult<UploadReceipt>;
            async fn delete(&self, id: &str) -> BridgeResult<()>;
            async fn pin(&self, hash: &str) -> BridgeResult<()>;
            async fn unpin(&self, hash: &str) -> BridgeResult<()>;
            async fn health(&self) -> BridgeResult<bool>;
        }
    }

    struct Harness {
        scheduler: RefreshScheduler,
        cache: Arc<CacheStore>,
        notifications: Arc<NotificationQueue>,
        clock: Arc<ManualClock>,
    }

    fn harness(remote: MockRemote) -> Harness {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(InMemoryKeyValueStore::new());
        let bus = Arc::new(EventBus::new(64));
        let cache = Arc::new(CacheStore::new(store.clone(), "files", Arc::clone(&bus)));
        let notifications = Arc::new(NotificationQueue::new(
            NotificationConfig::default(),
            clock.clone(),
            store,
            "notifications",
            Arc::clone(&bus),
        ));
        let scheduler = RefreshScheduler::new(
            Arc::new(remote),
            Arc::clone(&cache),
            Arc::clone(&notifications),
            Arc::new(SessionContext::new()),
            clock.clone(),
            bus,
            SyncTimings::default(),
            Duration::from_secs(15),
        );
        Harness {
            scheduler,
            cache,
            notifications,
            clock,
        }
    }

    fn listing() -> Vec<FileRecord> {
        vec![
            FileRecord::new("a", "x.txt", "text/plain", 100, 10),
            FileRecord::new("b", "x.txt", "text/plain", 100, 20),
            FileRecord::new("c", "y.txt", "text/plain", 5, 30),
        ]
    }

    #[tokio::test]
    async fn test_refresh_reconciles_resolved_listing() {
        let mut remote = MockRemote::new();
        remote.expect_list().times(1).returning(|_| Ok(listing()));
        let h = harness(remote);

        let outcome = h.scheduler.request_refresh(None).await;
        assert_eq!(outcome, RefreshOutcome::Reconciled { record_count: 2 });
        let snapshot = h.cache.read();
        assert!(!snapshot.contains("a"));
        assert!(snapshot.contains("b"));
    }

    #[tokio::test]
    async fn test_second_request_inside_interval_is_dropped() {
        let mut remote = MockRemote::new();
        remote.expect_list().times(1).returning(|_| Ok(listing()));
        let h = harness(remote);

        assert!(h.scheduler.request_refresh(None).await.fetched());
        h.clock.advance(Duration::from_millis(200));
        assert_eq!(
            h.scheduler.request_refresh(None).await,
            RefreshOutcome::Skipped(SkipReason::Throttled)
        );
    }

    #[tokio::test]
    async fn test_unchanged_listing_is_not_written() {
        let mut remote = MockRemote::new();
        remote.expect_list().times(2).returning(|_| Ok(listing()));
        let h = harness(remote);

        h.scheduler.request_refresh(None).await;
        let revision = h.cache.read().last_loaded_count();

        h.clock.advance(Duration::from_secs(2));
        assert_eq!(
            h.scheduler.request_refresh(None).await,
            RefreshOutcome::Unchanged { record_count: 2 }
        );
        assert_eq!(h.cache.read().last_loaded_count(), revision);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_interval_and_noop() {
        let mut remote = MockRemote::new();
        remote.expect_list().times(2).returning(|_| Ok(listing()));
        let h = harness(remote);

        h.scheduler.request_refresh(None).await;
        let revision = h.cache.read().last_loaded_count();

        assert_eq!(
            h.scheduler.force_refresh(None).await,
            RefreshOutcome::Reconciled { record_count: 2 }
        );
        assert!(h.cache.read().last_loaded_count() > revision);
    }

    #[tokio::test]
    async fn test_failure_clears_cache_and_notifies() {
        let mut remote = MockRemote::new();
        let mut calls = 0;
        remote.expect_list().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(listing())
            } else {
                Err(BridgeError::Network("connection refused".to_string()))
            }
        });
        let h = harness(remote);

        h.scheduler.request_refresh(None).await;
        assert_eq!(h.cache.read().len(), 2);

        h.clock.advance(Duration::from_secs(2));
        let outcome = h.scheduler.request_refresh(None).await;
        assert!(matches!(outcome, RefreshOutcome::Failed { .. }));
        assert!(h.cache.read().is_empty());

        let active = h.notifications.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].message, "Failed to load files: The relay could not be reached");
    }

    #[tokio::test]
    async fn test_filter_is_remembered() {
        let mut remote = MockRemote::new();
        remote
            .expect_list()
            .withf(|filter| filter.search.as_deref() == Some("report"))
            .times(2)
            .returning(|_| Ok(Vec::new()));
        let h = harness(remote);

        h.scheduler
            .request_refresh(Some(ListFilter::all().search("report")))
            .await;
        h.scheduler.force_refresh(None).await;
        assert_eq!(h.scheduler.current_filter().search.as_deref(), Some("report"));
    }

    #[tokio::test]
    async fn test_new_filter_is_fetched_inside_interval() {
        let mut remote = MockRemote::new();
        remote.expect_list().times(2).returning(|_| Ok(listing()));
        let h = harness(remote);

        h.scheduler.request_refresh(None).await;
        h.clock.advance(Duration::from_millis(200));

        let report = ListFilter::all().search("report");
        assert!(h.scheduler.request_refresh(Some(report.clone())).await.fetched());
        assert_eq!(h.scheduler.current_filter(), report);

        h.clock.advance(Duration::from_millis(200));
        assert_eq!(
            h.scheduler.request_refresh(Some(report)).await,
            RefreshOutcome::Skipped(SkipReason::Throttled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_of_skipped_request_is_not_adopted() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(InMemoryKeyValueStore::new());
        let bus = Arc::new(EventBus::new(64));
        let cache = Arc::new(CacheStore::new(store.clone(), "files", Arc::clone(&bus)));
        let notifications = Arc::new(NotificationQueue::new(
            NotificationConfig::default(),
            clock.clone(),
            store,
            "notifications",
            Arc::clone(&bus),
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::new(StalledRemote),
            cache,
            notifications,
            Arc::new(SessionContext::new()),
            clock,
            bus,
            SyncTimings::default(),
            Duration::from_secs(15),
        ));

        let background = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.force_refresh(None).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(
            scheduler
                .request_refresh(Some(ListFilter::all().search("report")))
                .await,
            RefreshOutcome::Skipped(SkipReason::InFlight)
        );
        assert_eq!(scheduler.current_filter(), ListFilter::all());
        background.abort();
    }

    struct StalledRemote;

    #[async_trait]
    impl RemoteFileService for StalledRemote {
        async fn list(&self, _filter: &ListFilter) -> BridgeResult<Vec<FileRecord>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
        async fn upload(&self, _payload: UploadPayload) -> BridgeResult<UploadReceipt> {
            Err(BridgeError::NotAvailable("upload".into()))
        }
        async fn delete(&self, _id: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn pin(&self, _hash: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn unpin(&self, _hash: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn health(&self) -> BridgeResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_request_drops_overlap_and_times_out() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(InMemoryKeyValueStore::new());
        let bus = Arc::new(EventBus::new(64));
        let cache = Arc::new(CacheStore::new(store.clone(), "files", Arc::clone(&bus)));
        let notifications = Arc::new(NotificationQueue::new(
            NotificationConfig::default(),
            clock.clone(),
            store,
            "notifications",
            Arc::clone(&bus),
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            Arc::new(StalledRemote),
            cache,
            notifications,
            Arc::new(SessionContext::new()),
            clock,
            bus,
            SyncTimings::default(),
            Duration::from_secs(15),
        ));

        let background = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.force_refresh(None).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(
            scheduler.force_refresh(None).await,
            RefreshOutcome::Skipped(SkipReason::InFlight)
        );

        let outcome = background.await.unwrap();
        assert!(matches!(outcome, RefreshOutcome::Failed { message } if message.contains("15s")));
    }
}
