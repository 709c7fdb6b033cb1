//! Base API client
//!
//! Wraps a `reqwest::Client` with:
//! - Linear backoff retry (`retry_delay * (attempt + 1)`) gated by a
//!   retry predicate (default: network errors, timeouts, 5xx)
//! - Uniform response/error shapes ([`ApiResponse`], [`ApiError`])
//! - Client-wide defaults (base URL, headers, auth) that can be changed at
//!   runtime and apply to every subsequent request
//!
//! In-flight retries are not cancellable; a request keeps retrying until it
//! succeeds or the retry budget is exhausted.

use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use super::ApiError;
use crate::metrics::MetricsState;

/// Decides whether a failed attempt is retried
pub type RetryCondition = Arc<dyn Fn(&ApiError) -> bool + Send + Sync>;

/// Client construction settings
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Prefix for relative request paths
    pub base_url: String,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Additional attempts after the first failure
    pub retries: u32,
    /// Base delay for linear backoff
    pub retry_delay: Duration,
    /// Headers sent with every request
    pub default_headers: HeaderMap,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(30),
            retries: 3,
            retry_delay: Duration::from_millis(1000),
            default_headers: HeaderMap::new(),
        }
    }
}

/// Normalized successful response
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    pub data: T,
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
}

/// Mutable client-wide defaults
struct ClientDefaults {
    base_url: String,
    headers: HeaderMap,
}

/// Generic HTTP client used by the price API clients
pub struct ApiClient {
    http: reqwest::Client,
    defaults: RwLock<ClientDefaults>,
    retries: u32,
    retry_delay: Duration,
    retry_condition: RetryCondition,
    metrics: Option<Arc<MetricsState>>,
}

impl ApiClient {
    /// Create a new client
    pub fn new(config: ApiClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::invalid(format!("Failed to create HTTP client: {}", e)))?;

        let mut headers = config.default_headers;
        headers
            .entry(reqwest::header::ACCEPT)
            .or_insert(HeaderValue::from_static("application/json"));

        Ok(Self {
            http,
            defaults: RwLock::new(ClientDefaults {
                base_url: config.base_url,
                headers,
            }),
            retries: config.retries,
            retry_delay: config.retry_delay,
            retry_condition: Arc::new(ApiError::is_retryable),
            metrics: None,
        })
    }

    /// Replace the retry predicate
    pub fn with_retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&ApiError) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Arc::new(condition);
        self
    }

    /// Attach a metrics sink
    pub fn with_metrics(mut self, metrics: Arc<MetricsState>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn base_url(&self) -> String {
        self.defaults.read().base_url.clone()
    }

    /// Override the base URL for all subsequent requests
    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.defaults.write().base_url = base_url.into();
    }

    /// Send `Authorization: Bearer <token>` with all subsequent requests
    pub fn set_auth_token(&self, token: &str) -> Result<(), ApiError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ApiError::invalid(format!("Invalid auth token: {}", e)))?;
        value.set_sensitive(true);
        self.defaults.write().headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Stop sending the `Authorization` header
    pub fn clear_auth_token(&self) {
        self.defaults.write().headers.remove(AUTHORIZATION);
    }

    /// Set a single default header
    pub fn set_header(&self, name: &str, value: &str) -> Result<(), ApiError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::invalid(format!("Invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::invalid(format!("Invalid header value: {}", e)))?;
        self.defaults.write().headers.insert(name, value);
        Ok(())
    }

    /// Remove a default header
    pub fn remove_header(&self, name: &str) {
        self.defaults.write().headers.remove(name);
    }

    /// Merge headers into the defaults, replacing existing values
    pub fn merge_default_headers(&self, headers: HeaderMap) {
        let mut defaults = self.defaults.write();
        for (name, value) in headers.iter() {
            defaults.headers.insert(name.clone(), value.clone());
        }
    }

    pub fn default_headers(&self) -> HeaderMap {
        self.defaults.read().headers.clone()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ApiError> {
        self.request(Method::GET, path, &[], None).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<ApiResponse<T>, ApiError> {
        self.request(Method::GET, path, query, None).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = to_body(body)?;
        self.request(Method::POST, path, &[], Some(&body)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = to_body(body)?;
        self.request(Method::PUT, path, &[], Some(&body)).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<ApiResponse<T>, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = to_body(body)?;
        self.request(Method::PATCH, path, &[], Some(&body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ApiError> {
        self.request(Method::DELETE, path, &[], None).await
    }

    /// Execute a request with retry
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let mut attempt: u32 = 0;

        loop {
            let result = self.send_once(method.clone(), path, query, body).await;
            self.record_outcome(&method, result.is_ok());

            match result {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.retries && (self.retry_condition)(&e) => {
                    let delay = self.retry_delay * (attempt + 1);
                    tracing::warn!(
                        method = %method,
                        path = path,
                        attempt = attempt + 1,
                        max_retries = self.retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    if let Some(ref metrics) = self.metrics {
                        metrics.http_retries.inc();
                    }
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::debug!(
                        method = %method,
                        path = path,
                        attempts = attempt + 1,
                        code = e.code(),
                        error = %e,
                        "Request failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn send_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<ApiResponse<T>, ApiError> {
        let (url, headers) = {
            let defaults = self.defaults.read();
            (join_url(&defaults.base_url, path), defaults.headers.clone())
        };

        let mut request = self.http.request(method, &url).headers(headers);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ApiError::from_reqwest)?;

        let status = response.status();
        let status_text = status.canonical_reason().unwrap_or("").to_string();
        let headers = response.headers().clone();
        let bytes = response.bytes().await.map_err(ApiError::from_reqwest)?;

        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), &status_text, &bytes));
        }

        let payload: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
        let data = serde_json::from_slice(payload).map_err(|e| ApiError::Decode {
            message: format!("{} ({})", e, url),
        })?;

        Ok(ApiResponse {
            data,
            status: status.as_u16(),
            status_text,
            headers,
        })
    }

    fn record_outcome(&self, method: &Method, success: bool) {
        if let Some(ref metrics) = self.metrics {
            let outcome = if success { "success" } else { "error" };
            metrics
                .http_requests
                .with_label_values(&[method.as_str(), outcome])
                .inc();
        }
    }
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::invalid(format!("Failed to serialize body: {}", e)))
}

/// Resolve `path` against `base_url`; absolute URLs are used as-is
fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") || base_url.is_empty() {
        return path.to_string();
    }
    if path.is_empty() {
        return base_url.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
