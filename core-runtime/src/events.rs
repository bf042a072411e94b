//! # Event Bus System
//!
//! Provides an event-driven architecture for the sync engine using `tokio::sync::broadcast`.
//! Components publish typed events; views and diagnostics subscribe without the
//! publishers knowing about them.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Cache Store  ├──────────────>│           │
//! └──────────────┘               │           │
//!                                │ EventBus  │
//! ┌──────────────┐     emit      │ (broadcast│     subscribe    ┌────────────┐
//! │ Scheduler    ├──────────────>│  channel) ├─────────────────>│ Dashboard  │
//! └──────────────┘               │           │                  └────────────┘
//!                                │           │
//! ┌──────────────┐     emit      │           │     subscribe    ┌────────────┐
//! │ Uploads      ├──────────────>│           ├─────────────────>│ Toasts     │
//! └──────────────┘               └───────────┘                  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut stream = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Cache(CacheEvent::Replaced {
//!         record_count: 3,
//!         revision: 1,
//!         dropped: 0,
//!     }))
//!     .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "File list replaced");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   The subscriber can continue; the cache itself remains the source of truth.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emitting with no subscribers returns an error; publishers ignore it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Local cache store changes
    Cache(CacheEvent),
    /// List refresh lifecycle
    Refresh(RefreshEvent),
    /// Upload lifecycle
    Upload(UploadEvent),
    /// Delete and pin actions
    File(FileEvent),
    /// User-visible notification queue changes
    Notification(NotificationEvent),
}

impl CoreEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Refresh(e) => e.description(),
            CoreEvent::Upload(e) => e.description(),
            CoreEvent::File(e) => e.description(),
            CoreEvent::Notification(e) => e.description(),
        }
    }

    /// Get the severity level of the event
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Refresh(RefreshEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Upload(UploadEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::File(FileEvent::ActionFailed { .. }) => EventSeverity::Error,
            CoreEvent::Cache(CacheEvent::PersistFailed { .. }) => EventSeverity::Warning,
            CoreEvent::Upload(UploadEvent::Rejected { .. }) => EventSeverity::Info,
            CoreEvent::Upload(UploadEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Refresh(RefreshEvent::Reconciled { .. }) => EventSeverity::Info,
            CoreEvent::File(FileEvent::Deleted { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Cache Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Snapshot hydrated from persistent storage
    Loaded { record_count: usize, revision: u64 },
    /// Snapshot replaced by this context
    Replaced {
        record_count: usize,
        revision: u64,
        /// Candidates the resolver discarded
        dropped: usize,
    },
    /// Snapshot replaced by another context sharing the store
    ExternalChange { record_count: usize, revision: u64 },
    /// Snapshot could not be written; memory copy is still current
    PersistFailed { message: String },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::Loaded { .. } => "File list loaded from storage",
            CacheEvent::Replaced { .. } => "File list replaced",
            CacheEvent::ExternalChange { .. } => "File list changed in another window",
            CacheEvent::PersistFailed { .. } => "File list could not be persisted",
        }
    }
}

// ============================================================================
// Refresh Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RefreshEvent {
    Started { forced: bool },
    Skipped { reason: String },
    Reconciled { record_count: usize },
    Unchanged { record_count: usize },
    /// Result discarded because the cache moved while the fetch was in flight
    Superseded,
    Failed { message: String },
}

impl RefreshEvent {
    fn description(&self) -> &str {
        match self {
            RefreshEvent::Started { .. } => "Refresh started",
            RefreshEvent::Skipped { .. } => "Refresh skipped",
            RefreshEvent::Reconciled { .. } => "Refresh reconciled",
            RefreshEvent::Unchanged { .. } => "Refresh found no changes",
            RefreshEvent::Superseded => "Refresh result superseded",
            RefreshEvent::Failed { .. } => "Refresh failed",
        }
    }
}

// ============================================================================
// Upload Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum UploadEvent {
    Submitted {
        file_key: String,
        size_bytes: u64,
    },
    Rejected {
        file_key: String,
        reason: String,
    },
    Completed {
        file_key: String,
        file_id: String,
        is_duplicate: bool,
    },
    Failed {
        file_key: String,
        category: String,
        message: String,
    },
}

impl UploadEvent {
    fn description(&self) -> &str {
        match self {
            UploadEvent::Submitted { .. } => "Upload submitted",
            UploadEvent::Rejected { .. } => "Upload rejected",
            UploadEvent::Completed { .. } => "Upload completed",
            UploadEvent::Failed { .. } => "Upload failed",
        }
    }
}

// ============================================================================
// File Action Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum FileEvent {
    Deleted { file_id: String },
    PinChanged { hash: String, pinned: bool },
    ActionFailed { action: String, message: String },
}

impl FileEvent {
    fn description(&self) -> &str {
        match self {
            FileEvent::Deleted { .. } => "File deleted",
            FileEvent::PinChanged { .. } => "Pin state changed",
            FileEvent::ActionFailed { .. } => "File action failed",
        }
    }
}

// ============================================================================
// Notification Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum NotificationEvent {
    Pushed {
        id: String,
        message: String,
        severity: String,
    },
    /// Identical error inside the suppression window
    Suppressed { id: String },
    Evicted { id: String },
    Expired { id: String },
    Dismissed { id: String },
}

impl NotificationEvent {
    fn description(&self) -> &str {
        match self {
            NotificationEvent::Pushed { .. } => "Notification shown",
            NotificationEvent::Suppressed { .. } => "Duplicate notification suppressed",
            NotificationEvent::Evicted { .. } => "Notification evicted",
            NotificationEvent::Expired { .. } => "Notification expired",
            NotificationEvent::Dismissed { .. } => "Notification dismissed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all active subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// when nobody is listening.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver wrapper that skips events rejected by a predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(10);
/// let stream = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Notification(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receive the next matching event.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking receive; `None` when no matching event is queued.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
