//! Client and per-call configuration.

use crate::retry::{BackoffStrategy, RetryConfig};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// Default path of the token refresh endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// API client configuration.
///
/// Immutable once handed to [`ApiClient`](crate::ApiClient).
#[derive(Debug, Clone)]
pub struct ApiClientConfig {
    /// Base URL every request path is resolved against.
    pub base_url: String,
    /// Timeout for a single attempt.
    pub timeout: Duration,
    /// Connection timeout used by the default transport.
    pub connect_timeout: Duration,
    /// Retry configuration for transient failures.
    pub retry: RetryConfig,
    /// Path of the token refresh endpoint, relative to `base_url`.
    pub refresh_path: String,
    /// Default headers for all requests.
    pub default_headers: Vec<(String, String)>,
    /// User agent string.
    pub user_agent: String,
}

impl Default for ApiClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            default_headers: Vec::new(),
            user_agent: format!("armature-api-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ApiClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ApiClientConfigBuilder {
        ApiClientConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `ARMATURE_API_BASE_URL`, `ARMATURE_API_TIMEOUT_MS`,
    /// `ARMATURE_API_MAX_RETRIES` and `ARMATURE_API_REFRESH_PATH`. Unset or
    /// unparsable variables keep their defaults.
    pub fn from_env() -> ApiClientConfigBuilder {
        let mut builder = ApiClientConfigBuilder::default();

        if let Ok(url) = std::env::var("ARMATURE_API_BASE_URL") {
            builder = builder.base_url(url);
        }
        if let Some(ms) = std::env::var("ARMATURE_API_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if let Some(retries) = std::env::var("ARMATURE_API_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            builder = builder.max_retries(retries);
        }
        if let Ok(path) = std::env::var("ARMATURE_API_REFRESH_PATH") {
            builder = builder.refresh_path(path);
        }

        builder
    }
}

/// Builder for API client configuration.
#[derive(Debug, Default)]
pub struct ApiClientConfigBuilder {
    config: ApiClientConfig,
}

impl ApiClientConfigBuilder {
    /// Set the base URL for all requests.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the maximum number of retries for transient failures.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.retry.max_retries = max_retries;
        self
    }

    /// Set the backoff strategy.
    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.config.retry.backoff = backoff;
        self
    }

    /// Replace the whole retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the token refresh endpoint path.
    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.config.refresh_path = path.into();
        self
    }

    /// Add a default header for all requests.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ApiClientConfig {
        self.config
    }
}

/// Representation the response body is parsed into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    /// JSON document (default).
    #[default]
    Json,
    /// UTF-8 text.
    Text,
    /// Raw bytes, for file downloads.
    Binary,
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    pub(crate) headers: HeaderMap,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) response_type: ResponseType,
    pub(crate) timeout: Option<Duration>,
}

impl RequestConfig {
    /// Create an empty per-call configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header, overriding defaults of the same name.
    ///
    /// Invalid header names or values are skipped.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::try_from(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                tracing::warn!(header = name.as_ref(), "Skipping invalid per-call header");
            }
        }
        self
    }

    /// Merge a header map, overriding defaults of the same name.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set how the response body is parsed.
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Override the per-attempt timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
