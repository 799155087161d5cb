//! Request descriptors and the pipeline that builds them.

use crate::config::{ApiClientConfig, RequestConfig, ResponseType};
use crate::credentials::{ACCESS_TOKEN_KEY, CredentialStore};
use crate::{ApiClientError, InterceptorRegistry, Result};
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Request body before serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// JSON document, sent as `application/json`.
    Json(serde_json::Value),
    /// UTF-8 text.
    Text(String),
    /// URL-encoded form fields.
    Form(Vec<(String, String)>),
    /// Pre-encoded bytes (files, multipart). No content type is forced.
    Binary(Bytes),
}

impl RequestBody {
    /// Build a JSON body from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Build a form body.
    pub fn form<K: Into<String>, V: Into<String>>(
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    fn default_content_type(&self) -> Option<&'static str> {
        match self {
            Self::Json(_) => Some("application/json"),
            Self::Text(_) => Some("text/plain; charset=utf-8"),
            Self::Form(_) => Some("application/x-www-form-urlencoded"),
            Self::Binary(_) => None,
        }
    }

    fn into_bytes(self) -> Result<Bytes> {
        match self {
            Self::Json(value) => Ok(serde_json::to_vec(&value)?.into()),
            Self::Text(text) => Ok(text.into()),
            Self::Form(fields) => serde_urlencoded::to_string(&fields)
                .map(Bytes::from)
                .map_err(|e| ApiClientError::Serialization(e.to_string())),
            Self::Binary(bytes) => Ok(bytes),
        }
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes.into())
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// A fully built outgoing call.
///
/// Built once per logical call. Retries and the post-refresh resubmission
/// reuse it as-is, so request interceptors and body serialization never run
/// twice for the same call.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the base URL, or an absolute URL.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Merged request headers.
    pub headers: HeaderMap,
    /// Serialized body.
    pub body: Option<Bytes>,
    /// How the response body is parsed.
    pub response_type: ResponseType,
    /// Per-call timeout override.
    pub timeout: Option<Duration>,
    pub(crate) url: Option<Url>,
    pub(crate) retry_count: u32,
    pub(crate) retried_after_refresh: bool,
}

impl RequestDescriptor {
    /// Create a bare descriptor with no headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            response_type: ResponseType::default(),
            timeout: None,
            url: None,
            retry_count: 0,
            retried_after_refresh: false,
        }
    }

    /// Number of transient retries performed so far.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether this call has already been resubmitted after a token refresh.
    pub fn retried_after_refresh(&self) -> bool {
        self.retried_after_refresh
    }

    /// Bearer token currently carried by the `Authorization` header.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    /// Set `Authorization: Bearer <token>`.
    pub fn set_bearer_token(&mut self, token: &str) -> Result<()> {
        let value = HeaderValue::try_from(format!("Bearer {token}"))
            .map_err(|e| ApiClientError::InvalidHeader(e.to_string()))?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Resolved URL. Available once the pipeline has finished building.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    fn resolve_url(&self, base_url: &str) -> Result<Url> {
        let mut url = if self.path.starts_with("http://") || self.path.starts_with("https://") {
            Url::parse(&self.path)?
        } else {
            let base = base_url.trim_end_matches('/');
            let path = self.path.trim_start_matches('/');
            Url::parse(&format!("{base}/{path}"))?
        };

        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }
}

/// Assembles request descriptors.
pub(crate) struct RequestPipeline {
    config: Arc<ApiClientConfig>,
    credentials: Arc<dyn CredentialStore>,
    interceptors: InterceptorRegistry,
}

impl RequestPipeline {
    pub(crate) fn new(
        config: Arc<ApiClientConfig>,
        credentials: Arc<dyn CredentialStore>,
        interceptors: InterceptorRegistry,
    ) -> Self {
        Self {
            config,
            credentials,
            interceptors,
        }
    }

    /// Build a descriptor and run every request interceptor over it.
    pub(crate) async fn build(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        overrides: RequestConfig,
    ) -> Result<RequestDescriptor> {
        let mut descriptor = RequestDescriptor::new(method, path);
        descriptor.query = overrides.query;
        descriptor.response_type = overrides.response_type;
        descriptor.timeout = overrides.timeout;

        for (name, value) in &self.config.default_headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| ApiClientError::InvalidHeader(e.to_string()))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| ApiClientError::InvalidHeader(e.to_string()))?;
            descriptor.headers.insert(name, value);
        }

        let body = match body {
            Some(_) if matches!(descriptor.method, Method::GET | Method::HEAD | Method::DELETE) => {
                tracing::debug!(
                    method = %descriptor.method,
                    path,
                    "Dropping body supplied to a bodiless method"
                );
                None
            }
            body => body,
        };

        let content_type = match &body {
            Some(body) => body.default_content_type(),
            None => Some("application/json"),
        };
        if let Some(content_type) = content_type {
            descriptor
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }

        if let Some(token) = self.credentials.get(ACCESS_TOKEN_KEY) {
            descriptor.set_bearer_token(&token)?;
        }

        for name in overrides.headers.keys() {
            descriptor.headers.remove(name);
        }
        for (name, value) in &overrides.headers {
            descriptor.headers.append(name.clone(), value.clone());
        }

        descriptor.body = body.map(RequestBody::into_bytes).transpose()?;

        for interceptor in self.interceptors.request_interceptors() {
            descriptor = interceptor.intercept(descriptor).await?;
        }

        descriptor.url = Some(descriptor.resolve_url(&self.config.base_url)?);
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{MemoryCredentialStore, TokenPair};

    fn pipeline(credentials: MemoryCredentialStore) -> (RequestPipeline, InterceptorRegistry) {
        let config = ApiClientConfig::builder()
            .base_url("https://admin.example.com/api/")
            .default_header("X-Client", "admin")
            .build();
        let registry = InterceptorRegistry::new();
        let pipeline =
            RequestPipeline::new(Arc::new(config), Arc::new(credentials), registry.clone());
        (pipeline, registry)
    }

    #[tokio::test]
    async fn test_build_merges_headers_and_serializes_json() {
        let store = MemoryCredentialStore::with_tokens(&TokenPair::new("T1", "R1"));
        let (pipeline, _) = pipeline(store);

        let descriptor = pipeline
            .build(
                Method::POST,
                "/orders",
                Some(serde_json::json!({"id": 1}).into()),
                RequestConfig::new()
                    .header("X-Client", "kiosk")
                    .query("dry_run", "true"),
            )
            .await
            .unwrap();

        assert_eq!(descriptor.headers["content-type"], "application/json");
        assert_eq!(descriptor.headers["x-client"], "kiosk");
        assert_eq!(descriptor.bearer_token(), Some("T1"));
        assert_eq!(descriptor.body.as_deref(), Some(&br#"{"id":1}"#[..]));
        assert_eq!(
            descriptor.url().map(Url::as_str),
            Some("https://admin.example.com/api/orders?dry_run=true")
        );
        assert_eq!(descriptor.retry_count(), 0);
        assert!(!descriptor.retried_after_refresh());
    }

    #[tokio::test]
    async fn test_get_and_delete_drop_body() {
        let (pipeline, _) = pipeline(MemoryCredentialStore::new());

        for method in [Method::GET, Method::DELETE] {
            let descriptor = pipeline
                .build(
                    method,
                    "widgets",
                    Some("ignored".into()),
                    RequestConfig::new(),
                )
                .await
                .unwrap();
            assert!(descriptor.body.is_none());
            assert!(descriptor.bearer_token().is_none());
        }
    }

    #[tokio::test]
    async fn test_binary_body_has_no_forced_content_type() {
        let (pipeline, _) = pipeline(MemoryCredentialStore::new());

        let descriptor = pipeline
            .build(
                Method::PUT,
                "/files/1",
                Some(vec![0u8, 159, 146, 150].into()),
                RequestConfig::new(),
            )
            .await
            .unwrap();
        assert!(descriptor.headers.get(CONTENT_TYPE).is_none());

        let descriptor = pipeline
            .build(
                Method::POST,
                "/files",
                Some(Bytes::from_static(b"--b\r\n").into()),
                RequestConfig::new().header("Content-Type", "multipart/form-data; boundary=b"),
            )
            .await
            .unwrap();
        assert_eq!(
            descriptor.headers["content-type"],
            "multipart/form-data; boundary=b"
        );
    }

    #[tokio::test]
    async fn test_form_body() {
        let (pipeline, _) = pipeline(MemoryCredentialStore::new());

        let descriptor = pipeline
            .build(
                Method::POST,
                "/login",
                Some(RequestBody::form([("user", "ada"), ("remember", "1")])),
                RequestConfig::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            descriptor.headers["content-type"],
            "application/x-www-form-urlencoded"
        );
        assert_eq!(descriptor.body.as_deref(), Some(&b"user=ada&remember=1"[..]));
    }

    #[tokio::test]
    async fn test_interceptors_apply_in_order_before_url_resolution() {
        let (pipeline, registry) = pipeline(MemoryCredentialStore::new());
        registry.add_request_fn(|mut d| {
            d.path = format!("/v2{}", d.path);
            d
        });
        registry.add_request_fn(|mut d| {
            d.query.push(("locale".into(), "en".into()));
            d
        });

        let descriptor = pipeline
            .build(Method::GET, "/widgets", None, RequestConfig::new())
            .await
            .unwrap();
        assert_eq!(descriptor.path, "/v2/widgets");
        assert_eq!(
            descriptor.url().map(Url::as_str),
            Some("https://admin.example.com/api/v2/widgets?locale=en")
        );
    }

    #[tokio::test]
    async fn test_absolute_path_bypasses_base_url() {
        let (pipeline, _) = pipeline(MemoryCredentialStore::new());
        let descriptor = pipeline
            .build(
                Method::GET,
                "https://cdn.example.com/qr.png",
                None,
                RequestConfig::new(),
            )
            .await
            .unwrap();
        assert_eq!(
            descriptor.url().map(Url::as_str),
            Some("https://cdn.example.com/qr.png")
        );
    }
}
