//! Relay API wire types
//!
//! Field names follow the relay's camelCase JSON. Several fields have been
//! renamed across server versions, so aliases are accepted. Missing or
//! malformed values decode to empty/zero so the duplicate resolver can drop
//! the record instead of failing the whole listing.

use chrono::DateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

fn default_true() -> bool {
    true
}

/// Non-negative integer from a number or numeric string; anything else is 0.
fn lenient_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Millisecond timestamp from a number, numeric string or RFC 3339 string.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| {
                DateTime::parse_from_rfc3339(s.trim())
                    .ok()
                    .map(|dt| dt.timestamp_millis())
            })
            .unwrap_or(0),
        _ => 0,
    })
}

/// File resource as returned by list and upload endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFile {
    #[serde(default, alias = "_id", alias = "fileId")]
    pub id: String,

    #[serde(default, alias = "name", alias = "filename", alias = "originalName")]
    pub display_name: String,

    #[serde(default, alias = "contentType", alias = "mimetype")]
    pub mime_type: String,

    #[serde(default, alias = "sizeBytes", deserialize_with = "lenient_size")]
    pub size: u64,

    #[serde(
        default,
        alias = "createdAtMs",
        alias = "uploadedAt",
        deserialize_with = "lenient_timestamp"
    )]
    pub created_at: i64,

    #[serde(default, alias = "storage")]
    pub storage_class: Option<String>,

    #[serde(default, alias = "cid", alias = "ipfsHash")]
    pub remote_hash: Option<String>,
}

/// `GET <list-endpoint>` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse {
    #[serde(default = "default_true")]
    pub success: bool,

    #[serde(default)]
    pub files: Option<Vec<WireFile>>,

    /// Older servers name the list `results`
    #[serde(default)]
    pub results: Option<Vec<WireFile>>,

    #[serde(default)]
    pub error: Option<String>,
}

impl ListResponse {
    pub fn into_files(self) -> Option<Vec<WireFile>> {
        self.files.or(self.results)
    }
}

/// `POST <upload-endpoint>` response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub file: Option<WireFile>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub is_duplicate: bool,

    #[serde(default)]
    pub existing_file: Option<WireFile>,
}

/// Delete, pin and unpin response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    #[serde(default = "default_true")]
    pub success: bool,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

/// Body sent to the pin endpoints
#[derive(Debug, Serialize)]
pub struct PinRequest<'a> {
    pub hash: &'a str,
}

/// Error envelope of non-2xx responses
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
