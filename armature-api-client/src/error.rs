//! API client error types.

use http::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Result type for API client operations.
pub type Result<T> = std::result::Result<T, ApiClientError>;

/// Structured description of a non-ok HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEnvelope {
    /// HTTP status code.
    pub status: StatusCode,
    /// Canonical reason phrase for the status.
    pub status_text: String,
    /// Parsed error body, or a synthesized `{"message": ...}` object.
    pub body: Value,
}

impl ErrorEnvelope {
    /// Build an envelope from a status and raw body bytes.
    ///
    /// A body that is not valid JSON is replaced by `{"message": <text>}`,
    /// where the text is the raw body if non-empty, otherwise the status text.
    pub fn from_parts(status: StatusCode, body: &[u8]) -> Self {
        let status_text = status.canonical_reason().unwrap_or("Unknown").to_string();
        let body = match serde_json::from_slice::<Value>(body) {
            Ok(value) => value,
            Err(_) => {
                let text = String::from_utf8_lossy(body);
                let message = if text.trim().is_empty() {
                    status_text.clone()
                } else {
                    text.trim().to_string()
                };
                serde_json::json!({ "message": message })
            }
        };

        Self {
            status,
            status_text,
            body,
        }
    }

    /// Best-effort human readable message extracted from the body.
    pub fn message(&self) -> String {
        ["message", "error", "detail"]
            .iter()
            .find_map(|key| self.body.get(key).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| self.status_text.clone())
    }
}

impl std::fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.status.as_u16(), self.status_text, self.message())
    }
}

/// Transport-level failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The attempt did not complete within its timeout window.
    Timeout,
    /// Connection could not be established (DNS, refused, TLS).
    Connect,
    /// The connection failed mid-exchange (reset, broken pipe, body read).
    Io,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Io => "io",
        };
        f.write_str(name)
    }
}

/// Classification of an [`ApiClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport or timeout failure.
    Network,
    /// 5xx response.
    Server,
    /// 4xx response other than 401.
    Client,
    /// 401 that survived one refresh and resubmission.
    Auth,
    /// Token refresh failed or no refresh token was available.
    Refresh,
    /// Final status outside 2xx/4xx/5xx (1xx, or a 3xx reqwest did not follow).
    Unexpected,
    /// Failure raised locally before or after the exchange.
    Local,
}

/// API client errors.
#[derive(Debug, Clone, Error)]
pub enum ApiClientError {
    /// Transport failed on every permitted attempt.
    #[error("Network error after {attempts} attempts ({kind}): {message}")]
    Network {
        /// Failure category of the last attempt.
        kind: TransportErrorKind,
        /// Last error message.
        message: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// Server responded with a 5xx status.
    #[error("Server error: {0}")]
    Server(ErrorEnvelope),

    /// Server rejected the request with a 4xx status.
    #[error("Client error: {0}")]
    Client(ErrorEnvelope),

    /// Authorization could not be resolved.
    #[error("Authorization error: {0}")]
    Auth(ErrorEnvelope),

    /// Final status that is neither success nor an HTTP error class.
    #[error("Unexpected status: {0}")]
    UnexpectedStatus(ErrorEnvelope),

    /// Token refresh failed; stored credentials have been cleared.
    #[error("Token refresh failed: {message}")]
    Refresh {
        /// Status returned by the refresh endpoint, if it answered.
        status: Option<u16>,
        /// Failure description.
        message: String,
    },

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid header name or value.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Request body could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Interceptor error.
    #[error("Interceptor error: {0}")]
    Interceptor(String),

    /// Client could not be constructed.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ApiClientError {
    /// Create a refresh error without a status.
    pub fn refresh(message: impl Into<String>) -> Self {
        Self::Refresh {
            status: None,
            message: message.into(),
        }
    }

    /// Classify a non-ok response envelope.
    pub fn from_envelope(envelope: ErrorEnvelope) -> Self {
        match envelope.status {
            StatusCode::UNAUTHORIZED => Self::Auth(envelope),
            s if s.is_server_error() => Self::Server(envelope),
            s if s.is_client_error() => Self::Client(envelope),
            _ => Self::UnexpectedStatus(envelope),
        }
    }

    /// Get the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Server(_) => ErrorKind::Server,
            Self::Client(_) => ErrorKind::Client,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Refresh { .. } => ErrorKind::Refresh,
            Self::UnexpectedStatus(_) => ErrorKind::Unexpected,
            _ => ErrorKind::Local,
        }
    }

    /// Check if this error class is retried locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network | ErrorKind::Server)
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Network {
                kind: TransportErrorKind::Timeout,
                ..
            }
        )
    }

    /// Get the HTTP status code if a response was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Refresh { status, .. } => *status,
            _ => self.envelope().map(|e| e.status.as_u16()),
        }
    }

    /// Get the response envelope, if any.
    pub fn envelope(&self) -> Option<&ErrorEnvelope> {
        match self {
            Self::Server(e) | Self::Client(e) | Self::Auth(e) | Self::UnexpectedStatus(e) => Some(e),
            _ => None,
        }
    }
}

impl From<url::ParseError> for ApiClientError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for ApiClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
