//! # Engine Configuration Module
//!
//! Provides configuration management for the relay dashboard sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! [`EngineConfig`] that holds every bridge the engine talks to plus the
//! timing knobs that govern throttling, cooldowns and deadlines. It enforces
//! fail-fast validation so a misconfigured engine never starts.
//!
//! ## Required Dependencies
//!
//! - `base_url` - Relay API origin (e.g. `https://relay.example.com`)
//! - `KeyValueStore` - Persistence for the file list and notifications
//! - `CredentialProvider` - Bearer token supply
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - HTTP operations (desktop default: reqwest)
//! - `Clock` - Time source (default: system clock)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::EngineConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = EngineConfig::builder()
//!     .base_url("https://relay.example.com")
//!     .key_value_store(Arc::new(store))
//!     .credential_provider(Arc::new(StaticCredential::new(token)))
//!     .min_refresh_interval(Duration::from_secs(2))
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! Missing bridges produce [`Error::CapabilityMissing`] with a message naming
//! what to inject; invalid values produce [`Error::Config`].

use crate::error::{Error, Result};
use bridge_traits::{Clock, CredentialProvider, HttpClient, KeyValueStore, SystemClock};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Sections
// ============================================================================

/// Relay API paths, joined onto `base_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub list: String,
    pub upload: String,
    /// Prefix for `DELETE <item>/{id}`
    pub item: String,
    pub pin: String,
    pub unpin: String,
    pub health: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            list: "/api/files".to_string(),
            upload: "/api/upload".to_string(),
            item: "/api/files".to_string(),
            pin: "/api/pin".to_string(),
            unpin: "/api/unpin".to_string(),
            health: "/api/health".to_string(),
        }
    }
}

/// Windows that govern refresh throttling and upload deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    /// Minimum gap between accepted non-forced refresh starts
    pub min_refresh_interval: Duration,
    /// Same file key inside this window is rejected
    pub upload_cooldown: Duration,
    /// Same content digest inside this window is rejected
    pub content_cooldown: Duration,
    /// Pause between a successful upload and the reconciling refresh
    pub settle_delay: Duration,
    /// Period of the background refresh timer
    pub auto_refresh_interval: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            min_refresh_interval: Duration::from_millis(1_000),
            upload_cooldown: Duration::from_secs(10),
            content_cooldown: Duration::from_secs(60),
            settle_delay: Duration::from_millis(1_500),
            auto_refresh_interval: Duration::from_secs(30),
        }
    }
}

/// Fixed deadline per remote call type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub list: Duration,
    pub upload: Duration,
    pub delete: Duration,
    pub pin: Duration,
    pub health: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            list: Duration::from_secs(15),
            upload: Duration::from_secs(120),
            delete: Duration::from_secs(15),
            pin: Duration::from_secs(20),
            health: Duration::from_secs(5),
        }
    }
}

/// Notification queue bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationConfig {
    pub capacity: usize,
    pub default_ttl: Duration,
    /// Identical errors younger than this are merged
    pub error_suppression_window: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            default_ttl: Duration::from_millis(5_000),
            error_suppression_window: Duration::from_millis(2_000),
        }
    }
}

/// Keys under which engine state is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub files: String,
    pub notifications: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            files: "relay-dashboard.files".to_string(),
            notifications: "relay-dashboard.notifications".to_string(),
        }
    }
}

// ============================================================================
// EngineConfig
// ============================================================================

/// Everything the sync engine needs. Build with [`EngineConfig::builder`].
#[derive(Clone)]
pub struct EngineConfig {
    pub base_url: String,
    pub endpoints: EndpointConfig,
    pub http_client: Arc<dyn HttpClient>,
    pub key_value_store: Arc<dyn KeyValueStore>,
    pub credential_provider: Arc<dyn CredentialProvider>,
    pub clock: Arc<dyn Clock>,
    pub timings: SyncTimings,
    pub timeouts: CallTimeouts,
    pub notifications: NotificationConfig,
    pub storage_keys: StorageKeys,
    /// Hex characters of the content digest kept on upload tickets
    pub digest_prefix_len: usize,
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("base_url", &self.base_url)
            .field("endpoints", &self.endpoints)
            .field("http_client", &"HttpClient { ... }")
            .field("key_value_store", &"KeyValueStore { ... }")
            .field("credential_provider", &"CredentialProvider { ... }")
            .field("timings", &self.timings)
            .field("timeouts", &self.timeouts)
            .field("notifications", &self.notifications)
            .field("storage_keys", &self.storage_keys)
            .field("digest_prefix_len", &self.digest_prefix_len)
            .finish()
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Absolute URL for an endpoint path.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "Base URL must start with http:// or https:// (got '{}')",
                self.base_url
            )));
        }

        for (name, path) in [
            ("list", &self.endpoints.list),
            ("upload", &self.endpoints.upload),
            ("item", &self.endpoints.item),
            ("pin", &self.endpoints.pin),
            ("unpin", &self.endpoints.unpin),
            ("health", &self.endpoints.health),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "Endpoint '{}' must be an absolute path starting with '/' (got '{}')",
                    name, path
                )));
            }
        }

        if self.timings.min_refresh_interval.is_zero() {
            return Err(Error::Config(
                "Minimum refresh interval must be greater than zero".to_string(),
            ));
        }

        if self.timings.content_cooldown < self.timings.upload_cooldown {
            return Err(Error::Config(
                "Content cooldown must not be shorter than the upload cooldown".to_string(),
            ));
        }

        if self.timings.auto_refresh_interval < self.timings.min_refresh_interval {
            return Err(Error::Config(
                "Auto-refresh interval must not be shorter than the minimum refresh interval"
                    .to_string(),
            ));
        }

        for (name, timeout) in [
            ("list", self.timeouts.list),
            ("upload", self.timeouts.upload),
            ("delete", self.timeouts.delete),
            ("pin", self.timeouts.pin),
            ("health", self.timeouts.health),
        ] {
            if timeout.is_zero() {
                return Err(Error::Config(format!(
                    "Timeout for '{}' calls must be greater than zero",
                    name
                )));
            }
        }

        if self.notifications.capacity == 0 || self.notifications.capacity > 100 {
            return Err(Error::Config(
                "Notification capacity must be between 1 and 100".to_string(),
            ));
        }

        if self.notifications.default_ttl.is_zero() {
            return Err(Error::Config(
                "Notification TTL must be greater than zero".to_string(),
            ));
        }

        if !(8..=64).contains(&self.digest_prefix_len) {
            return Err(Error::Config(
                "Digest prefix length must be between 8 and 64 hex characters".to_string(),
            ));
        }

        if self.storage_keys.files.is_empty()
            || self.storage_keys.notifications.is_empty()
            || self.storage_keys.files == self.storage_keys.notifications
        {
            return Err(Error::Config(
                "Storage keys must be non-empty and distinct".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn key_value_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "KeyValueStore".to_string(),
        message: "A KeyValueStore is required to persist the file list and notifications. \
                 Desktop: open bridge_desktop::SqliteKeyValueStore. \
                 Tests: use bridge_traits::InMemoryKeyValueStore."
            .to_string(),
    }
}

fn credential_provider_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "CredentialProvider".to_string(),
        message: "A CredentialProvider is required to authorize relay calls. \
                 Inject the host's session token source, or StaticCredential for CLIs."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::new().map_err(|e| {
        Error::Internal(format!("Failed to initialize default HttpClient: {}", e))
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "No HTTP client implementation provided. \
                 Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                 Other hosts: inject a platform-native adapter."
            .to_string(),
    })
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for constructing [`EngineConfig`] instances.
#[derive(Default)]
pub struct EngineConfigBuilder {
    base_url: Option<String>,
    endpoints: EndpointConfig,
    http_client: Option<Arc<dyn HttpClient>>,
    key_value_store: Option<Arc<dyn KeyValueStore>>,
    credential_provider: Option<Arc<dyn CredentialProvider>>,
    clock: Option<Arc<dyn Clock>>,
    timings: SyncTimings,
    timeouts: CallTimeouts,
    notifications: NotificationConfig,
    storage_keys: StorageKeys,
    digest_prefix_len: Option<usize>,
    event_buffer_size: Option<usize>,
}

impl EngineConfigBuilder {
    /// Sets the relay origin, e.g. `https://relay.example.com`.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn endpoints(mut self, endpoints: EndpointConfig) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn key_value_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.key_value_store = Some(store);
        self
    }

    pub fn credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credential_provider = Some(provider);
        self
    }

    /// Overrides the time source. Tests inject a `ManualClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn timings(mut self, timings: SyncTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
        self.timings.min_refresh_interval = interval;
        self
    }

    pub fn upload_cooldown(mut self, cooldown: Duration) -> Self {
        self.timings.upload_cooldown = cooldown;
        self
    }

    pub fn content_cooldown(mut self, cooldown: Duration) -> Self {
        self.timings.content_cooldown = cooldown;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.timings.settle_delay = delay;
        self
    }

    pub fn auto_refresh_interval(mut self, interval: Duration) -> Self {
        self.timings.auto_refresh_interval = interval;
        self
    }

    pub fn timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn notifications(mut self, notifications: NotificationConfig) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn storage_keys(mut self, keys: StorageKeys) -> Self {
        self.storage_keys = keys;
        self
    }

    pub fn digest_prefix_len(mut self, len: usize) -> Self {
        self.digest_prefix_len = Some(len);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `EngineConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when `base_url` is missing or a value is out of range
    /// - [`Error::CapabilityMissing`] when a required bridge was not injected
    pub fn build(self) -> Result<EngineConfig> {
        let base_url = self.base_url.ok_or_else(|| {
            Error::Config("Base URL is required. Use .base_url() to set it.".to_string())
        })?;

        let key_value_store = self
            .key_value_store
            .ok_or_else(key_value_store_missing_error)?;

        let credential_provider = self
            .credential_provider
            .ok_or_else(credential_provider_missing_error)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let config = EngineConfig {
            base_url,
            endpoints: self.endpoints,
            http_client,
            key_value_store,
            credential_provider,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            timings: self.timings,
            timeouts: self.timeouts,
            notifications: self.notifications,
            storage_keys: self.storage_keys,
            digest_prefix_len: self.digest_prefix_len.unwrap_or(16),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}
