//! Network transport and the retrying executor on top of it.

use crate::auth::AuthCoordinator;
use crate::error::TransportErrorKind;
use crate::{ApiClientConfig, ApiClientError, RequestDescriptor, Response, Result, RetryConfig};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// One attempt's worth of request data.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Serialized body.
    pub body: Option<Bytes>,
}

/// Transport-level failure of a single attempt.
#[derive(Debug, Clone, Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    /// Failure category.
    pub kind: TransportErrorKind,
    /// Failure description.
    pub message: String,
}

impl TransportError {
    /// Create a transport error.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else {
            TransportErrorKind::Io
        };
        Self::new(kind, err.to_string())
    }
}

/// Issues a single HTTP exchange. Implementations must not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and read the full response.
    async fn send(&self, request: TransportRequest) -> std::result::Result<Response, TransportError>;
}

/// Default transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport from the client configuration.
    ///
    /// Attempt deadlines are enforced by the executor, so only the
    /// connection timeout is handed to reqwest.
    pub fn new(config: &ApiClientConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| ApiClientError::Configuration(e.to_string()))?;

        Ok(Self { inner })
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> std::result::Result<Response, TransportError> {
        let mut builder = self
            .inner
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        Ok(Response::from_reqwest(response).await?)
    }
}

/// Send one request under a deadline.
///
/// The timer lives inside the `timeout` future and is dropped with it, so it
/// never outlives the attempt.
pub(crate) async fn send_with_timeout(
    transport: &dyn Transport,
    request: TransportRequest,
    timeout: Duration,
) -> std::result::Result<Response, TransportError> {
    match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::new(
            TransportErrorKind::Timeout,
            format!("request timed out after {timeout:?}"),
        )),
    }
}

/// Runs attempts for one descriptor: deadline, bounded retry, 401 routing.
pub(crate) struct TransportExecutor {
    transport: Arc<dyn Transport>,
    auth: Arc<AuthCoordinator>,
    retry: RetryConfig,
    timeout: Duration,
}

impl TransportExecutor {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        auth: Arc<AuthCoordinator>,
        config: &ApiClientConfig,
    ) -> Self {
        Self {
            transport,
            auth,
            retry: config.retry.clone(),
            timeout: config.timeout,
        }
    }

    /// Execute until a response that is not retried or resubmitted.
    ///
    /// Returns the final response, which may still be a non-ok status
    /// (exhausted 5xx, 4xx, or a 401 after the one permitted refresh).
    pub(crate) async fn execute(&self, descriptor: &mut RequestDescriptor) -> Result<Response> {
        let url = descriptor
            .url
            .clone()
            .ok_or_else(|| ApiClientError::InvalidUrl(descriptor.path.clone()))?;
        let timeout = descriptor.timeout.unwrap_or(self.timeout);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let request = TransportRequest {
                method: descriptor.method.clone(),
                url: url.clone(),
                headers: descriptor.headers.clone(),
                body: descriptor.body.clone(),
            };

            match send_with_timeout(self.transport.as_ref(), request, timeout).await {
                Ok(response) => {
                    let status = response.status();

                    if self.retry.should_retry_status(status.as_u16())
                        && self.retry.can_retry(descriptor.retry_count)
                    {
                        debug!(
                            attempt = attempts,
                            status = %status,
                            path = %descriptor.path,
                            "Retrying request due to status code"
                        );
                        self.backoff(descriptor).await;
                        continue;
                    }

                    if status == StatusCode::UNAUTHORIZED && !descriptor.retried_after_refresh {
                        debug!(path = %descriptor.path, "Authorization challenge, refreshing token");
                        self.auth.resolve_challenge(descriptor).await?;
                        continue;
                    }

                    return Ok(response);
                }
                Err(error) => {
                    if self.retry.can_retry(descriptor.retry_count) {
                        debug!(
                            attempt = attempts,
                            error = %error,
                            path = %descriptor.path,
                            "Retrying request due to transport error"
                        );
                        self.backoff(descriptor).await;
                        continue;
                    }

                    return Err(ApiClientError::Network {
                        kind: error.kind,
                        message: error.message,
                        attempts,
                    });
                }
            }
        }
    }

    async fn backoff(&self, descriptor: &mut RequestDescriptor) {
        let delay = self.retry.delay_for_attempt(descriptor.retry_count);
        descriptor.retry_count += 1;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
