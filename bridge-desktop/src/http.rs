//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, MultipartForm, MultipartPart},
};
use reqwest::{multipart, Client};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Reqwest-based HTTP client implementation
///
/// Provides HTTP operations with:
/// - Connection pooling via reqwest
/// - One attempt per request; failures surface immediately
/// - Per-request deadlines mapped to [`BridgeError::Timeout`]
/// - `multipart/form-data` bodies
pub struct ReqwestHttpClient {
    client: Client,
    default_timeout: Duration,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a new HTTP client whose requests default to `timeout`
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("relay-dashboard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                BridgeError::NotAvailable(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
        })
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    fn convert_form(form: MultipartForm) -> Result<multipart::Form> {
        let mut out = multipart::Form::new();
        for part in form.parts {
            out = match part {
                MultipartPart::Text { name, value } => out.text(name, value),
                MultipartPart::File {
                    name,
                    filename,
                    mime_type,
                    data,
                } => {
                    let mut file = multipart::Part::bytes(data.to_vec()).file_name(filename);
                    if let Some(mime) = mime_type {
                        file = file.mime_str(&mime).map_err(|e| {
                            BridgeError::OperationFailed(format!(
                                "Invalid MIME type '{}': {}",
                                mime, e
                            ))
                        })?;
                    }
                    out.part(name, file)
                }
            };
        }
        Ok(out)
    }

    /// Build reqwest request from bridge request
    fn build_request(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder> {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if !request.query.is_empty() {
            req = req.query(&request.query);
        }

        if let Some(form) = request.multipart {
            req = req.multipart(Self::convert_form(form)?);
        } else if let Some(body) = request.body {
            req = req.body(body);
        }

        req = req.timeout(request.timeout.unwrap_or(self.default_timeout));

        Ok(req)
    }

    fn map_send_error(error: reqwest::Error, deadline: Duration) -> BridgeError {
        if error.is_timeout() {
            BridgeError::Timeout(deadline)
        } else if error.is_connect() || error.is_request() {
            BridgeError::Network(format!("Connection failed: {}", error))
        } else {
            BridgeError::OperationFailed(error.to_string())
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let deadline = request.timeout.unwrap_or(self.default_timeout);
        let url = request.url.clone();
        debug!(url = %url, method = ?request.method, timeout_ms = deadline.as_millis() as u64, "Executing HTTP request");

        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "HTTP request failed");
                Self::map_send_error(e, deadline)
            })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::map_send_error(e, deadline))?;

        debug!(url = %url, status, bytes = body.len(), "HTTP response received");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
