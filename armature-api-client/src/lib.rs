//! # Armature API Client
//!
//! Resilient client for JSON APIs consumed by Armature front-ends.
//!
//! ## Features
//!
//! - **Timeouts**: Every attempt runs under its own deadline
//! - **Retry with Backoff**: Bounded retries for transport failures and 5xx responses
//! - **Token Refresh**: A 401 triggers one shared refresh call for all concurrent
//!   requests, then each challenged request is resubmitted once
//! - **Interceptors**: Ordered request transforms and response success/error hooks
//! - **Pluggable Storage**: Credentials live in an injected [`CredentialStore`]
//!
//! Request interceptors run exactly once per call. Retries and the
//! resubmission after a refresh reuse the descriptor they produced.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use armature_api_client::{ApiClient, ApiClientConfig, RequestConfig, TokenPair};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ApiClientConfig::builder()
//!         .base_url("https://admin.example.com/api")
//!         .timeout(Duration::from_secs(10))
//!         .max_retries(3)
//!         .refresh_path("/auth/refresh")
//!         .build();
//!
//!     let client = ApiClient::builder(config)
//!         .on_auth_failure(|err| eprintln!("session expired: {err}"))
//!         .build()?;
//!     client.login(&TokenPair::new("access", "refresh"));
//!
//!     let classes = client.get("/classes", RequestConfig::new()).await?;
//!     println!("{classes:?}");
//!
//!     client
//!         .post(
//!             "/bookings",
//!             serde_json::json!({"class_id": 7, "member_id": 42}),
//!             RequestConfig::new(),
//!         )
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Interceptors
//!
//! ```rust,no_run
//! use armature_api_client::{ApiClient, ApiClientConfig, LoggingInterceptor};
//!
//! # fn main() -> armature_api_client::Result<()> {
//! let client = ApiClient::new(ApiClientConfig::from_env().build())?;
//! client.interceptors().add_request(LoggingInterceptor::new());
//! client.interceptors().add_request_fn(|mut request| {
//!     request.query.push(("locale".into(), "en".into()));
//!     request
//! });
//! client
//!     .interceptors()
//!     .add_error_fn(|err| tracing::warn!(status = ?err.status_code(), "request failed"));
//! # Ok(())
//! # }
//! ```

mod auth;
mod client;
mod config;
mod credentials;
mod error;
mod interceptor;
mod request;
mod response;
mod retry;
mod transport;

pub use auth::{AuthCoordinator, AuthFailureCallbackFn};
pub use client::{ApiClient, ApiClientBuilder};
pub use config::{
    ApiClientConfig, ApiClientConfigBuilder, DEFAULT_REFRESH_PATH, RequestConfig, ResponseType,
};
pub use credentials::{
    ACCESS_TOKEN_KEY, CredentialStore, MemoryCredentialStore, REFRESH_TOKEN_KEY, TokenPair,
};
pub use error::{ApiClientError, ErrorEnvelope, ErrorKind, Result, TransportErrorKind};
pub use interceptor::{
    HeaderInterceptor, InterceptorId, InterceptorRegistry, LoggingInterceptor,
    RequestInterceptor, ResponseInterceptor,
};
pub use request::{RequestBody, RequestDescriptor};
pub use response::{Payload, Response};
pub use retry::{BackoffStrategy, DEFAULT_RETRY_STATUS_CODES, RetryConfig};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportRequest};

// Re-export common types
pub use bytes::Bytes;
pub use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
pub use url::Url;

/// Prelude for common imports.
///
/// ```
/// use armature_api_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::client::{ApiClient, ApiClientBuilder};
    pub use crate::config::{ApiClientConfig, RequestConfig, ResponseType};
    pub use crate::credentials::{CredentialStore, MemoryCredentialStore, TokenPair};
    pub use crate::error::{ApiClientError, ErrorEnvelope, ErrorKind, Result};
    pub use crate::interceptor::{InterceptorRegistry, RequestInterceptor, ResponseInterceptor};
    pub use crate::request::{RequestBody, RequestDescriptor};
    pub use crate::response::Payload;
    pub use crate::retry::{BackoffStrategy, RetryConfig};
    pub use http::{Method, StatusCode};
}
