//! # File Sync & Deduplication Engine
//!
//! Reconciles the relay's authoritative file listing with a persisted local
//! cache.
//!
//! ## Overview
//!
//! This module manages:
//! - Fingerprinting upload candidates by content
//! - Resolving duplicate records that arrive under different ids
//! - Mirroring the reconciled list into a key-value store, across contexts
//! - Throttling and de-overlapping list refreshes
//! - Coordinating idempotent uploads and the refresh that follows them
//! - Surfacing outcomes through a bounded notification queue
//!
//! ## Components
//!
//! - **Fingerprinter** (`fingerprint`): SHA-256 digests with an `Unknown` fallback
//! - **Duplicate Resolver** (`resolver`): The single definition of "same file"
//! - **Cache Store** (`cache_store`): Atomic snapshot with `read`/`replace`/`subscribe`
//! - **Refresh Scheduler** (`scheduler`): `Idle → Loading → Idle` with interval and no-op guards
//! - **Upload Coordinator** (`upload`): Cooldowns, busy guard, settle-then-refresh
//! - **File Actions** (`actions`): Delete, pin, unpin, health
//! - **Notification Queue** (`notifications`): FIFO-bounded, error spam suppression
//! - **Session Context** (`session`): All mutable per-session state and its guards

pub mod actions;
pub mod cache_store;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod notifications;
pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod upload;

pub use actions::FileActions;
pub use cache_store::{CacheStore, CacheSubscription};
pub use engine::SyncEngine;
pub use error::{Result, SyncError};
pub use fingerprint::{digest, digest_reader, Digest};
pub use models::{
    CacheSnapshot, FailureCategory, FileKey, RefreshOutcome, RejectReason, SkipReason,
    TicketStatus, UploadFile, UploadOutcome, UploadTicket,
};
pub use notifications::{Notification, NotificationId, NotificationQueue, Severity};
pub use resolver::{DuplicateResolver, ResolveReport};
pub use scheduler::{AutoRefreshHandle, RefreshScheduler};
pub use session::{SessionContext, TicketBook};
pub use upload::UploadCoordinator;
