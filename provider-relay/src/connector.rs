//! Relay API connector implementation
//!
//! Implements the `RemoteFileService` trait over the host `HttpClient`.

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartForm};
use bridge_traits::remote::{
    FileRecord, ListFilter, RemoteFileService, StorageClass, UploadPayload, UploadReceipt,
};
use bridge_traits::{Clock, CredentialProvider};
use core_runtime::config::{CallTimeouts, EndpointConfig, EngineConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{RelayError, Result};
use crate::types::{ActionResponse, ErrorBody, ListResponse, PinRequest, UploadResponse, WireFile};

/// Query parameter that defeats intermediary caches on GETs
const CACHE_BUSTER_PARAM: &str = "_";

/// Longest server error text carried into user-facing messages
const MAX_ERROR_MESSAGE_LEN: usize = 200;

/// Relay API connector
///
/// Every call:
/// - carries `Authorization: Bearer <token>` from the credential provider
/// - sends `Cache-Control: no-cache, no-store` and `Pragma: no-cache`
/// - is attempted once and bounded by the deadline for its call type
///
/// # Example
///
/// ```ignore
/// use provider_relay::RelayConnector;
/// use bridge_traits::{ListFilter, RemoteFileService};
///
/// let connector = RelayConnector::from_config(&config);
/// let files = connector.list(&ListFilter::all()).await?;
/// ```
pub struct RelayConnector {
    http_client: Arc<dyn HttpClient>,
    credentials: Arc<dyn CredentialProvider>,
    clock: Arc<dyn Clock>,
    base_url: String,
    endpoints: EndpointConfig,
    timeouts: CallTimeouts,
}

impl RelayConnector {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        credentials: Arc<dyn CredentialProvider>,
        clock: Arc<dyn Clock>,
        base_url: impl Into<String>,
        endpoints: EndpointConfig,
        timeouts: CallTimeouts,
    ) -> Self {
        Self {
            http_client,
            credentials,
            clock,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            endpoints,
            timeouts,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Arc::clone(&config.http_client),
            Arc::clone(&config.credential_provider),
            Arc::clone(&config.clock),
            config.base_url.clone(),
            config.endpoints.clone(),
            config.timeouts,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Authorized, uncached request skeleton
    async fn request(&self, method: HttpMethod, url: String, timeout: Duration) -> Result<HttpRequest> {
        let token = self.credentials.bearer_token().await?;
        let mut request = HttpRequest::new(method, url)
            .bearer_token(token)
            .no_cache()
            .header("Accept", "application/json")
            .timeout(timeout);

        if method == HttpMethod::Get {
            request = request.query_param(
                CACHE_BUSTER_PARAM,
                self.clock.unix_timestamp_millis().to_string(),
            );
        }
        Ok(request)
    }

    /// Execute once, enforcing the deadline even if the client ignores it
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let deadline = request.timeout.unwrap_or(self.timeouts.list);
        match tokio::time::timeout(deadline, self.http_client.execute(request)).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(RelayError::Timeout(deadline)),
        }
    }

    /// Turn non-2xx responses into [`RelayError::Api`]
    fn check_status(response: HttpResponse) -> Result<HttpResponse> {
        if response.is_success() {
            return Ok(response);
        }

        let body: ErrorBody = serde_json::from_slice(&response.body).unwrap_or_default();
        let message = body
            .error
            .or(body.message)
            .unwrap_or_else(|| String::from_utf8_lossy(&response.body).trim().to_string());
        let message = if message.is_empty() {
            format!("HTTP {}", response.status)
        } else {
            truncate(message)
        };

        warn!(status = response.status, message = %message, "Relay request failed");
        Err(RelayError::Api {
            status: response.status,
            message,
        })
    }

    fn parse<T: serde::de::DeserializeOwned>(response: &HttpResponse, what: &str) -> Result<T> {
        serde_json::from_slice(&response.body)
            .map_err(|e| RelayError::Parse(format!("Failed to parse {} response: {}", what, e)))
    }

    /// Convert a wire file, normalizing the storage class against the hash
    fn convert_file(wire: WireFile) -> FileRecord {
        let remote_hash = wire.remote_hash.filter(|hash| !hash.trim().is_empty());
        let declared = wire.storage_class.as_deref().and_then(StorageClass::parse);

        let storage_class = match (declared, remote_hash.is_some()) {
            (Some(StorageClass::LocalOnly), true) | (None, true) => StorageClass::LocalWithRemote,
            (Some(class), _) => class,
            (None, false) => StorageClass::LocalOnly,
        };

        FileRecord {
            id: wire.id,
            display_name: wire.display_name,
            mime_type: wire.mime_type,
            size_bytes: wire.size,
            created_at_ms: wire.created_at,
            storage_class,
            remote_hash,
        }
    }

    fn check_action(response: &HttpResponse, what: &str) -> Result<()> {
        // Empty 2xx bodies count as success.
        if response.body.is_empty() {
            return Ok(());
        }
        let body: ActionResponse = Self::parse(response, what)?;
        if body.success {
            Ok(())
        } else {
            Err(RelayError::Rejected(truncate(
                body.error
                    .or(body.message)
                    .unwrap_or_else(|| format!("{} was refused", what)),
            )))
        }
    }

    async fn list_files(&self, filter: &ListFilter) -> Result<Vec<FileRecord>> {
        let mut request = self
            .request(HttpMethod::Get, self.url(&self.endpoints.list), self.timeouts.list)
            .await?;
        for (key, value) in filter.query_pairs() {
            request = request.query_param(key, value);
        }

        let response = Self::check_status(self.send(request).await?)?;
        let body: ListResponse = Self::parse(&response, "list")?;

        if !body.success {
            return Err(RelayError::Rejected(truncate(
                body.error
                    .clone()
                    .unwrap_or_else(|| "Listing was refused".to_string()),
            )));
        }

        let files = body
            .into_files()
            .ok_or_else(|| RelayError::Parse("list response has neither files nor results".to_string()))?;

        Ok(files.into_iter().map(Self::convert_file).collect())
    }

    async fn upload_file(&self, payload: UploadPayload) -> Result<UploadReceipt> {
        let mut form = MultipartForm::new()
            .file(
                "file",
                payload.filename.clone(),
                payload.mime_type.clone(),
                payload.data.clone(),
            )
            .text("idempotencyKey", payload.idempotency_key.clone());
        if let Some(custom) = payload.custom_name.as_deref().filter(|n| !n.trim().is_empty()) {
            form = form.text("customName", custom.trim());
        }

        let request = self
            .request(HttpMethod::Post, self.url(&self.endpoints.upload), self.timeouts.upload)
            .await?
            .header("Idempotency-Key", payload.idempotency_key.clone())
            .multipart(form);

        let response = Self::check_status(self.send(request).await?)?;
        let body: UploadResponse = Self::parse(&response, "upload")?;

        if !body.success {
            return Err(RelayError::Rejected(truncate(
                body.error.unwrap_or_else(|| "Upload was refused".to_string()),
            )));
        }

        let file = body
            .file
            .ok_or_else(|| RelayError::Parse("upload response has no file".to_string()))?;

        Ok(UploadReceipt {
            record: Self::convert_file(file),
            is_duplicate: body.is_duplicate,
            existing_file: body.existing_file.map(Self::convert_file),
        })
    }

    async fn post_pin(&self, path: &str, hash: &str, what: &str) -> Result<()> {
        let request = self
            .request(HttpMethod::Post, self.url(path), self.timeouts.pin)
            .await?
            .json(&PinRequest { hash })?;

        let response = Self::check_status(self.send(request).await?)?;
        Self::check_action(&response, what)
    }
}

fn truncate(mut message: String) -> String {
    if message.chars().count() > MAX_ERROR_MESSAGE_LEN {
        message = message.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        message.push('…');
    }
    message
}

#[async_trait]
impl RemoteFileService for RelayConnector {
    #[instrument(skip(self))]
    async fn list(&self, filter: &ListFilter) -> BridgeResult<Vec<FileRecord>> {
        let files = self.list_files(filter).await?;
        info!(count = files.len(), "Listed files from relay");
        Ok(files)
    }

    #[instrument(skip(self, payload), fields(filename = %payload.filename, size = payload.data.len()))]
    async fn upload(&self, payload: UploadPayload) -> BridgeResult<UploadReceipt> {
        let receipt = self.upload_file(payload).await?;
        info!(
            file_id = %receipt.record.id,
            is_duplicate = receipt.is_duplicate,
            "Uploaded file to relay"
        );
        Ok(receipt)
    }

    #[instrument(skip(self), fields(file_id = %id))]
    async fn delete(&self, id: &str) -> BridgeResult<()> {
        let url = format!(
            "{}/{}",
            self.url(&self.endpoints.item),
            urlencoding::encode(id)
        );
        let request = self
            .request(HttpMethod::Delete, url, self.timeouts.delete)
            .await?;

        let response = Self::check_status(self.send(request).await?)?;
        Self::check_action(&response, "delete")?;
        info!("Deleted file from relay");
        Ok(())
    }

    #[instrument(skip(self), fields(hash = %hash))]
    async fn pin(&self, hash: &str) -> BridgeResult<()> {
        self.post_pin(&self.endpoints.pin, hash, "pin").await?;
        debug!("Pinned content");
        Ok(())
    }

    #[instrument(skip(self), fields(hash = %hash))]
    async fn unpin(&self, hash: &str) -> BridgeResult<()> {
        self.post_pin(&self.endpoints.unpin, hash, "unpin").await?;
        debug!("Unpinned content");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn health(&self) -> BridgeResult<bool> {
        let request = self
            .request(HttpMethod::Get, self.url(&self.endpoints.health), self.timeouts.health)
            .await?;
        let response = self.send(request).await?;
        debug!(status = response.status, "Health probe answered");
        Ok(response.is_success())
    }
}
