//! HTTP responses, parsed payloads, and the pipeline between them.

use crate::config::ResponseType;
use crate::{ApiClientError, ErrorEnvelope, InterceptorRegistry, Result};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Raw HTTP response as returned by a [`Transport`](crate::Transport).
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// Create a response from its parts.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Create a response with a JSON body.
    pub fn json(status: StatusCode, value: &Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        Self::new(status, headers, value.to_string())
    }

    /// Create a response from a reqwest response, reading the full body.
    pub(crate) async fn from_reqwest(
        response: reqwest::Response,
    ) -> std::result::Result<Self, reqwest::Error> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Check if the response was successful (2xx).
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get the response body as bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Parse the response body as JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| ApiClientError::Decode(e.to_string()))
    }

    /// Convert into an error envelope.
    pub fn into_envelope(self) -> ErrorEnvelope {
        ErrorEnvelope::from_parts(self.status, &self.body)
    }

    fn into_payload(self, response_type: ResponseType) -> Result<Payload> {
        match response_type {
            ResponseType::Json if self.body.iter().all(u8::is_ascii_whitespace) => {
                Ok(Payload::Empty)
            }
            ResponseType::Json => serde_json::from_slice(&self.body)
                .map(Payload::Json)
                .map_err(|e| ApiClientError::Decode(e.to_string())),
            ResponseType::Text => String::from_utf8(self.body.to_vec())
                .map(Payload::Text)
                .map_err(|e| ApiClientError::Decode(e.to_string())),
            ResponseType::Binary => Ok(Payload::Binary(self.body)),
        }
    }
}

/// Parsed response payload handed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// JSON document.
    Json(Value),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Bytes),
    /// Empty body (e.g. `204 No Content`).
    Empty,
}

impl Payload {
    /// Short name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Empty => "empty",
        }
    }

    /// Borrow the JSON value, if any.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Borrow the text, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Deserialize the payload into a typed value.
    ///
    /// `Empty` deserializes from `null`; text is tried as a JSON document.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T> {
        let decoded = match self {
            Self::Json(value) => serde_json::from_value(value),
            Self::Empty => serde_json::from_value(Value::Null),
            Self::Text(text) => serde_json::from_str(&text),
            Self::Binary(bytes) => serde_json::from_slice(&bytes),
        };
        decoded.map_err(|e| ApiClientError::Decode(e.to_string()))
    }

    /// Consume the payload and return raw bytes.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Json(value) => Bytes::from(value.to_string()),
            Self::Text(text) => Bytes::from(text),
            Self::Binary(bytes) => bytes,
            Self::Empty => Bytes::new(),
        }
    }
}

/// Turns completed exchanges into payloads or errors.
pub(crate) struct ResponsePipeline {
    interceptors: InterceptorRegistry,
}

impl ResponsePipeline {
    pub(crate) fn new(interceptors: InterceptorRegistry) -> Self {
        Self { interceptors }
    }

    /// Classify and parse a final response, then run success interceptors.
    pub(crate) async fn handle(
        &self,
        response: Response,
        response_type: ResponseType,
    ) -> Result<Payload> {
        if !response.is_success() {
            let error = ApiClientError::from_envelope(response.into_envelope());
            return self.reject(error).await;
        }

        let mut payload = match response.into_payload(response_type) {
            Ok(payload) => payload,
            Err(error) => return self.reject(error).await,
        };

        for interceptor in self.interceptors.response_interceptors() {
            payload = match interceptor.on_success(payload).await {
                Ok(payload) => payload,
                Err(error) => return self.reject(error).await,
            };
        }

        Ok(payload)
    }

    /// Run every error interceptor, then return the error.
    pub(crate) async fn reject<T>(&self, error: ApiClientError) -> Result<T> {
        for interceptor in self.interceptors.response_interceptors() {
            interceptor.on_error(&error).await;
        }
        Err(error)
    }
}
