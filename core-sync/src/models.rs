//! # Engine Models
//!
//! Value types shared by the cache store, scheduler and upload coordinator.

use bridge_traits::FileRecord;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Cache Snapshot
// ============================================================================

/// Immutable view of the reconciled file list
///
/// Only [`CacheStore`](crate::cache_store::CacheStore) builds snapshots; everyone
/// else receives them through `read()`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    records: Vec<FileRecord>,
    last_loaded_count: u64,
    last_reconciled_ids: BTreeSet<String>,
}

impl CacheSnapshot {
    pub(crate) fn new(records: Vec<FileRecord>, last_loaded_count: u64) -> Self {
        let last_reconciled_ids = records.iter().map(|r| r.id.clone()).collect();
        Self {
            records,
            last_loaded_count,
            last_reconciled_ids,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Records in reconciled order
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Monotonic counter bumped by every replace, local or external
    pub fn last_loaded_count(&self) -> u64 {
        self.last_loaded_count
    }

    /// Id set used to detect no-op refreshes
    pub fn last_reconciled_ids(&self) -> &BTreeSet<String> {
        &self.last_reconciled_ids
    }

    pub fn find(&self, id: &str) -> Option<&FileRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.last_reconciled_ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of record sizes
    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.size_bytes).sum()
    }
}

// ============================================================================
// Upload Input
// ============================================================================

/// Identity of a submitted file derived from name, size and modification time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey(String);

impl FileKey {
    pub fn new(name: &str, size_bytes: u64, last_modified_ms: i64) -> Self {
        Self(format!("{}|{}|{}", name, size_bytes, last_modified_ms))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file picked by the user for upload
#[derive(Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Bytes,
    pub last_modified_ms: i64,
    pub mime_type: Option<String>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>, last_modified_ms: i64) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
            last_modified_ms,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn file_key(&self) -> FileKey {
        FileKey::new(&self.name, self.size_bytes(), self.last_modified_ms)
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("name", &self.name)
            .field("size_bytes", &self.bytes.len())
            .field("last_modified_ms", &self.last_modified_ms)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

// ============================================================================
// Upload Tickets
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Succeeded,
    Failed,
    /// Replaced by a newer ticket for the same file key
    Superseded,
}

impl TicketStatus {
    /// Whether a ticket in this state blocks resubmission inside the cooldown
    pub fn blocks_resubmit(&self) -> bool {
        matches!(self, TicketStatus::Pending | TicketStatus::Succeeded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket {
    pub file_key: FileKey,
    /// `None` when the content digest could not be computed
    pub content_digest_prefix: Option<String>,
    pub submitted_at_ms: i64,
    pub status: TicketStatus,
}

impl UploadTicket {
    pub fn pending(
        file_key: FileKey,
        content_digest_prefix: Option<String>,
        submitted_at_ms: i64,
    ) -> Self {
        Self {
            file_key,
            content_digest_prefix,
            submitted_at_ms,
            status: TicketStatus::Pending,
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Coarse cause of a failed upload, used to pick the notification text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    Size,
    Type,
    Network,
    Server,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Size => "size",
            FailureCategory::Type => "type",
            FailureCategory::Network => "network",
            FailureCategory::Server => "server",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Same file key uploaded or uploading inside the cooldown window
    RecentDuplicate,
    /// Same bytes submitted inside the content cooldown window
    DuplicateContent,
    /// Another upload is still running its settle-and-refresh sequence
    Busy,
    /// The file cannot be uploaded as given
    Invalid(String),
    /// The relay refused the upload or could not be reached
    Failed {
        category: FailureCategory,
        message: String,
    },
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::RecentDuplicate => "recent-duplicate",
            RejectReason::DuplicateContent => "duplicate-content",
            RejectReason::Busy => "busy",
            RejectReason::Invalid(_) => "invalid",
            RejectReason::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Accepted { record: FileRecord },
    Rejected { reason: RejectReason },
}

impl UploadOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UploadOutcome::Accepted { .. })
    }

    pub fn reason(&self) -> Option<&RejectReason> {
        match self {
            UploadOutcome::Rejected { reason } => Some(reason),
            UploadOutcome::Accepted { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A refresh is already loading
    InFlight,
    /// The previous refresh started less than the minimum interval ago
    Throttled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InFlight => "in-flight",
            SkipReason::Throttled => "throttled",
        }
    }
}

/// What a refresh request ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The cache was replaced with the resolved listing
    Reconciled { record_count: usize },
    /// The resolved id set matched the cache; nothing was written
    Unchanged { record_count: usize },
    Skipped(SkipReason),
    /// Another writer replaced the cache while the listing was in flight
    Superseded,
    /// The listing failed and the cache was cleared
    Failed { message: String },
}

impl RefreshOutcome {
    pub fn fetched(&self) -> bool {
        !matches!(self, RefreshOutcome::Skipped(_))
    }
}
