//! # Session Context
//!
//! All mutable engine state for one dashboard session, injected into each
//! component instead of living in globals.
//!
//! Guards returned by `try_begin_*` release their flag when dropped, so a
//! refresh or upload that errors, panics or is cancelled mid-await still
//! returns the session to idle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::models::{FileKey, SkipReason, TicketStatus, UploadTicket};

#[derive(Debug, Default)]
struct RefreshState {
    loading: bool,
    last_started_ms: Option<i64>,
}

#[derive(Debug, Default)]
pub struct SessionContext {
    refresh: Mutex<RefreshState>,
    upload_in_progress: AtomicBool,
    tickets: Mutex<TicketBook>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn refresh_state(&self) -> MutexGuard<'_, RefreshState> {
        self.refresh.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Enter `Loading`
    ///
    /// `min_interval` is measured from the previous accepted start; pass
    /// `None` to bypass it. A refresh already loading always wins.
    pub fn try_begin_refresh(
        &self,
        now_ms: i64,
        min_interval: Option<Duration>,
    ) -> Result<RefreshGuard<'_>, SkipReason> {
        let mut state = self.refresh_state();
        if state.loading {
            return Err(SkipReason::InFlight);
        }
        if let (Some(interval), Some(last)) = (min_interval, state.last_started_ms) {
            if now_ms.saturating_sub(last) < interval.as_millis() as i64 {
                return Err(SkipReason::Throttled);
            }
        }

        state.loading = true;
        state.last_started_ms = Some(now_ms);
        Ok(RefreshGuard { session: self })
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_state().loading
    }

    pub fn last_refresh_started_ms(&self) -> Option<i64> {
        self.refresh_state().last_started_ms
    }

    pub fn try_begin_upload(&self) -> Option<UploadGuard<'_>> {
        self.upload_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| UploadGuard { session: self })
    }

    pub fn is_uploading(&self) -> bool {
        self.upload_in_progress.load(Ordering::Acquire)
    }

    /// Exclusive access to the ticket book; never hold across an await
    pub fn tickets(&self) -> MutexGuard<'_, TicketBook> {
        self.tickets.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[must_use = "the refresh is idle again as soon as the guard is dropped"]
pub struct RefreshGuard<'a> {
    session: &'a SessionContext,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.session.refresh_state().loading = false;
    }
}

#[must_use = "the upload flag clears as soon as the guard is dropped"]
pub struct UploadGuard<'a> {
    session: &'a SessionContext,
}

impl Drop for UploadGuard<'_> {
    fn drop(&mut self) {
        self.session.upload_in_progress.store(false, Ordering::Release);
    }
}

// ============================================================================
// Ticket Book
// ============================================================================

/// Recent upload tickets and the content digests they claimed
#[derive(Debug, Default)]
pub struct TicketBook {
    tickets: HashMap<FileKey, UploadTicket>,
    /// Digest prefix -> submission time
    content: HashMap<String, i64>,
}

impl TicketBook {
    /// Drop finished tickets older than `cooldown` and content entries older than `content_cooldown`
    pub fn prune(&mut self, now_ms: i64, cooldown: Duration, content_cooldown: Duration) -> usize {
        let before = self.tickets.len() + self.content.len();
        let cooldown_ms = cooldown.as_millis() as i64;
        let content_ms = content_cooldown.as_millis() as i64;

        self.tickets.retain(|_, ticket| {
            ticket.status == TicketStatus::Pending
                || now_ms.saturating_sub(ticket.submitted_at_ms) < cooldown_ms
        });
        self.content
            .retain(|_, submitted| now_ms.saturating_sub(*submitted) < content_ms);

        before - (self.tickets.len() + self.content.len())
    }

    /// Ticket for `key` that blocks resubmission at `now_ms`
    pub fn blocking(&self, key: &FileKey, now_ms: i64, cooldown: Duration) -> Option<&UploadTicket> {
        self.tickets.get(key).filter(|ticket| {
            ticket.status.blocks_resubmit()
                && now_ms.saturating_sub(ticket.submitted_at_ms) < cooldown.as_millis() as i64
        })
    }

    pub fn content_seen(&self, prefix: &str, now_ms: i64, content_cooldown: Duration) -> bool {
        self.content
            .get(prefix)
            .is_some_and(|submitted| now_ms.saturating_sub(*submitted) < content_cooldown.as_millis() as i64)
    }

    /// Record a new pending ticket, returning the one it supersedes
    pub fn open(&mut self, ticket: UploadTicket) -> Option<UploadTicket> {
        if let Some(prefix) = &ticket.content_digest_prefix {
            self.content.insert(prefix.clone(), ticket.submitted_at_ms);
        }
        self.tickets
            .insert(ticket.file_key.clone(), ticket)
            .map(|mut previous| {
                previous.status = TicketStatus::Superseded;
                previous
            })
    }

    pub fn finish(&mut self, key: &FileKey, status: TicketStatus) {
        if let Some(ticket) = self.tickets.get_mut(key) {
            ticket.status = status;
        }
    }

    /// Release a content claim so the same bytes may be retried
    pub fn forget_content(&mut self, prefix: &str) {
        self.content.remove(prefix);
    }

    pub fn get(&self, key: &FileKey) -> Option<&UploadTicket> {
        self.tickets.get(key)
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}
