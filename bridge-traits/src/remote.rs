//! Remote File Service Abstraction
//!
//! The relay's file API as seen by the engine: list, upload, delete,
//! pin/unpin and a health probe. Providers translate their wire format into
//! [`FileRecord`] so nothing above this trait knows about JSON field names.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Where a file's bytes currently live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageClass {
    #[default]
    LocalOnly,
    LocalWithRemote,
    RemoteOnly,
}

impl StorageClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageClass::LocalOnly => "local-only",
            StorageClass::LocalWithRemote => "local-with-remote",
            StorageClass::RemoteOnly => "remote-only",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local-only" | "local" => Some(StorageClass::LocalOnly),
            "local-with-remote" | "both" => Some(StorageClass::LocalWithRemote),
            "remote-only" | "remote" => Some(StorageClass::RemoteOnly),
            _ => None,
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for one stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub display_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at_ms: i64,
    #[serde(default)]
    pub storage_class: StorageClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_hash: Option<String>,
}

impl FileRecord {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
        created_at_ms: i64,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            mime_type: mime_type.into(),
            size_bytes,
            created_at_ms,
            storage_class: StorageClass::LocalOnly,
            remote_hash: None,
        }
    }

    /// Mark the record as replicated to the content-addressed network
    pub fn with_remote_hash(mut self, hash: impl Into<String>) -> Self {
        self.remote_hash = Some(hash.into());
        if self.storage_class == StorageClass::LocalOnly {
            self.storage_class = StorageClass::LocalWithRemote;
        }
        self
    }

    pub fn with_storage_class(mut self, storage_class: StorageClass) -> Self {
        self.storage_class = storage_class;
        self
    }

    pub fn is_replicated(&self) -> bool {
        self.remote_hash.is_some()
    }
}

/// Server-side listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub storage_class: Option<StorageClass>,
    pub mime_prefix: Option<String>,
    pub search: Option<String>,
}

impl ListFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn storage_class(mut self, storage_class: StorageClass) -> Self {
        self.storage_class = Some(storage_class);
        self
    }

    pub fn mime_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mime_prefix = Some(prefix.into());
        self
    }

    pub fn search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    /// Query parameters in a stable order
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(class) = self.storage_class {
            pairs.push(("storage".to_string(), class.as_str().to_string()));
        }
        if let Some(prefix) = self.mime_prefix.as_deref().filter(|p| !p.is_empty()) {
            pairs.push(("type".to_string(), prefix.to_string()));
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            pairs.push(("q".to_string(), search.to_string()));
        }
        pairs
    }
}

/// Everything needed to upload one file
#[derive(Clone)]
pub struct UploadPayload {
    pub filename: String,
    pub mime_type: Option<String>,
    pub data: Bytes,
    pub custom_name: Option<String>,
    pub idempotency_key: String,
}

impl fmt::Debug for UploadPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadPayload")
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("size", &self.data.len())
            .field("custom_name", &self.custom_name)
            .field("idempotency_key", &self.idempotency_key)
            .finish()
    }
}

/// What the server said about an accepted upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub record: FileRecord,
    /// Server recognised the content as already stored
    pub is_duplicate: bool,
    pub existing_file: Option<FileRecord>,
}

/// Relay file API
///
/// Every method performs exactly one remote call bounded by the provider's
/// timeout for that call type.
///
/// # Errors
///
/// - [`BridgeError::Timeout`](crate::BridgeError::Timeout) when the deadline expires
/// - [`BridgeError::Network`](crate::BridgeError::Network) for transport failures
/// - [`BridgeError::Rejected`](crate::BridgeError::Rejected) for non-2xx
///   responses and `success: false` bodies
/// - [`BridgeError::OperationFailed`](crate::BridgeError::OperationFailed) for
///   unparseable bodies
#[async_trait]
pub trait RemoteFileService: Send + Sync {
    /// Fetch the authoritative listing
    async fn list(&self, filter: &ListFilter) -> Result<Vec<FileRecord>>;

    /// Upload one file
    async fn upload(&self, payload: UploadPayload) -> Result<UploadReceipt>;

    /// Delete a file by id
    async fn delete(&self, id: &str) -> Result<()>;

    /// Pin content on the remote network
    async fn pin(&self, hash: &str) -> Result<()>;

    /// Release a pin
    async fn unpin(&self, hash: &str) -> Result<()>;

    /// `Ok(true)` when the service answered with any 2xx
    async fn health(&self) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_class_wire_names() {
        let json = serde_json::to_string(&StorageClass::LocalWithRemote).unwrap();
        assert_eq!(json, "\"local-with-remote\"");
        assert_eq!(StorageClass::parse("remote"), Some(StorageClass::RemoteOnly));
        assert_eq!(StorageClass::parse("tape"), None);
    }

    #[test]
    fn test_remote_hash_promotes_storage_class() {
        let record = FileRecord::new("a", "x.txt", "text/plain", 10, 1).with_remote_hash("bafy");
        assert_eq!(record.storage_class, StorageClass::LocalWithRemote);
        assert!(record.is_replicated());

        let remote = FileRecord::new("b", "y.txt", "text/plain", 10, 1)
            .with_storage_class(StorageClass::RemoteOnly)
            .with_remote_hash("bafy");
        assert_eq!(remote.storage_class, StorageClass::RemoteOnly);
    }

    #[test]
    fn test_file_record_serde_shape() {
        let record = FileRecord::new("a", "x.txt", "text/plain", 10, 42);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["displayName"], "x.txt");
        assert_eq!(value["storageClass"], "local-only");
        assert!(value.get("remoteHash").is_none());
    }

    #[test]
    fn test_list_filter_query_pairs() {
        assert!(ListFilter::all().query_pairs().is_empty());

        let pairs = ListFilter::all()
            .storage_class(StorageClass::RemoteOnly)
            .mime_prefix("image/")
            .search("  cat  ")
            .query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("storage".to_string(), "remote-only".to_string()),
                ("type".to_string(), "image/".to_string()),
                ("q".to_string(), "cat".to_string()),
            ]
        );
    }

    #[test]
    fn test_upload_payload_debug_hides_bytes() {
        let payload = UploadPayload {
            filename: "a.txt".into(),
            mime_type: None,
            data: Bytes::from_static(b"secret-bytes"),
            custom_name: None,
            idempotency_key: "k".into(),
        };
        let rendered = format!("{:?}", payload);
        assert!(rendered.contains("size: 12"));
        assert!(!rendered.contains("secret-bytes"));
    }
}
