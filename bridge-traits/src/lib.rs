//! # Host Bridge Traits
//!
//! Capability traits the sync engine needs from its host, plus the shared
//! file model that crosses the provider boundary.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Single-attempt async HTTP with per-request deadlines
//! - [`RemoteFileService`](remote::RemoteFileService) - The relay file API (list, upload, delete, pin)
//! - [`CredentialProvider`](auth::CredentialProvider) - Bearer token supply
//!
//! ### Storage
//! - [`KeyValueStore`](storage::KeyValueStore) - Profile-scoped persistence with cross-context change feed
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | Web      | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Adapters
//! should map transport expiry to `Timeout`, connection failures to `Network`
//! and refused writes to `Storage` so the engine can categorise failures
//! without inspecting platform errors.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent usage
//! across async tasks.

pub mod auth;
pub mod error;
pub mod http;
pub mod remote;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use auth::{CredentialProvider, StaticCredential};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartForm, MultipartPart};
pub use remote::{
    FileRecord, ListFilter, RemoteFileService, StorageClass, UploadPayload, UploadReceipt,
};
pub use storage::{InMemoryKeyValueStore, KeyValueStore, StorageChange};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
