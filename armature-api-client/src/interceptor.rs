//! Request and response interceptors.

use crate::{ApiClientError, Payload, RequestDescriptor, Result};
use async_trait::async_trait;
use http::{HeaderName, HeaderValue};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Request interceptor, run once per logical call after the descriptor is built.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// Return the descriptor to use from here on, modified or not.
    async fn intercept(&self, request: RequestDescriptor) -> Result<RequestDescriptor>;
}

/// Paired success/error response handler.
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    /// Intercept and optionally replace a successful payload.
    async fn on_success(&self, payload: Payload) -> Result<Payload> {
        Ok(payload)
    }

    /// Observe an error before it is returned to the caller.
    async fn on_error(&self, _error: &ApiClientError) {}
}

#[async_trait]
impl<T: RequestInterceptor + ?Sized> RequestInterceptor for Arc<T> {
    async fn intercept(&self, request: RequestDescriptor) -> Result<RequestDescriptor> {
        (**self).intercept(request).await
    }
}

#[async_trait]
impl<T: ResponseInterceptor + ?Sized> ResponseInterceptor for Arc<T> {
    async fn on_success(&self, payload: Payload) -> Result<Payload> {
        (**self).on_success(payload).await
    }

    async fn on_error(&self, error: &ApiClientError) {
        (**self).on_error(error).await
    }
}

/// Handle returned on registration, used to remove an interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    request: RwLock<Vec<(InterceptorId, Arc<dyn RequestInterceptor>)>>,
    response: RwLock<Vec<(InterceptorId, Arc<dyn ResponseInterceptor>)>>,
}

/// Ordered interceptor lists shared by one client and its clones.
///
/// Registration order is execution order.
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    inner: Arc<RegistryInner>,
}

impl InterceptorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> InterceptorId {
        InterceptorId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Append a request interceptor.
    pub fn add_request<I: RequestInterceptor + 'static>(&self, interceptor: I) -> InterceptorId {
        let id = self.next_id();
        self.inner.request.write().push((id, Arc::new(interceptor)));
        id
    }

    /// Append a response interceptor.
    pub fn add_response<I: ResponseInterceptor + 'static>(&self, interceptor: I) -> InterceptorId {
        let id = self.next_id();
        self.inner.response.write().push((id, Arc::new(interceptor)));
        id
    }

    /// Append a synchronous request transform.
    pub fn add_request_fn<F>(&self, f: F) -> InterceptorId
    where
        F: Fn(RequestDescriptor) -> RequestDescriptor + Send + Sync + 'static,
    {
        self.add_request(FnRequestInterceptor(f))
    }

    /// Append a synchronous success transform.
    pub fn add_success_fn<F>(&self, f: F) -> InterceptorId
    where
        F: Fn(Payload) -> Payload + Send + Sync + 'static,
    {
        self.add_response(FnResponseInterceptor {
            on_success: f,
            on_error: |_: &ApiClientError| {},
        })
    }

    /// Append a synchronous error observer.
    pub fn add_error_fn<F>(&self, f: F) -> InterceptorId
    where
        F: Fn(&ApiClientError) + Send + Sync + 'static,
    {
        self.add_response(FnResponseInterceptor {
            on_success: |payload: Payload| payload,
            on_error: f,
        })
    }

    /// Remove an interceptor. Returns `false` if the id is unknown.
    pub fn remove(&self, id: InterceptorId) -> bool {
        let mut request = self.inner.request.write();
        if let Some(pos) = request.iter().position(|(entry, _)| *entry == id) {
            request.remove(pos);
            return true;
        }
        drop(request);

        let mut response = self.inner.response.write();
        if let Some(pos) = response.iter().position(|(entry, _)| *entry == id) {
            response.remove(pos);
            return true;
        }
        false
    }

    /// Remove every interceptor.
    pub fn clear(&self) {
        self.inner.request.write().clear();
        self.inner.response.write().clear();
    }

    /// Number of registered request interceptors.
    pub fn request_len(&self) -> usize {
        self.inner.request.read().len()
    }

    /// Number of registered response interceptors.
    pub fn response_len(&self) -> usize {
        self.inner.response.read().len()
    }

    // Snapshots are taken so no lock is held across an await.

    pub(crate) fn request_interceptors(&self) -> Vec<Arc<dyn RequestInterceptor>> {
        self.inner
            .request
            .read()
            .iter()
            .map(|(_, i)| Arc::clone(i))
            .collect()
    }

    pub(crate) fn response_interceptors(&self) -> Vec<Arc<dyn ResponseInterceptor>> {
        self.inner
            .response
            .read()
            .iter()
            .map(|(_, i)| Arc::clone(i))
            .collect()
    }
}

impl std::fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorRegistry")
            .field("request", &self.request_len())
            .field("response", &self.response_len())
            .finish()
    }
}

struct FnRequestInterceptor<F>(F);

#[async_trait]
impl<F> RequestInterceptor for FnRequestInterceptor<F>
where
    F: Fn(RequestDescriptor) -> RequestDescriptor + Send + Sync,
{
    async fn intercept(&self, request: RequestDescriptor) -> Result<RequestDescriptor> {
        Ok((self.0)(request))
    }
}

struct FnResponseInterceptor<S, E> {
    on_success: S,
    on_error: E,
}

#[async_trait]
impl<S, E> ResponseInterceptor for FnResponseInterceptor<S, E>
where
    S: Fn(Payload) -> Payload + Send + Sync,
    E: Fn(&ApiClientError) + Send + Sync,
{
    async fn on_success(&self, payload: Payload) -> Result<Payload> {
        Ok((self.on_success)(payload))
    }

    async fn on_error(&self, error: &ApiClientError) {
        (self.on_error)(error)
    }
}

/// Logging interceptor that logs requests and responses.
pub struct LoggingInterceptor {
    log_headers: bool,
}

impl LoggingInterceptor {
    /// Create a new logging interceptor.
    pub fn new() -> Self {
        Self { log_headers: false }
    }

    /// Enable logging of request headers. `Authorization` is redacted.
    pub fn with_headers(mut self) -> Self {
        self.log_headers = true;
        self
    }
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestInterceptor for LoggingInterceptor {
    async fn intercept(&self, request: RequestDescriptor) -> Result<RequestDescriptor> {
        tracing::debug!(
            method = %request.method,
            path = %request.path,
            "Sending API request"
        );

        if self.log_headers {
            for (name, value) in &request.headers {
                if *name == http::header::AUTHORIZATION {
                    tracing::trace!(header = %name, "Request header <redacted>");
                } else {
                    tracing::trace!(header = %name, value = ?value, "Request header");
                }
            }
        }

        Ok(request)
    }
}

#[async_trait]
impl ResponseInterceptor for LoggingInterceptor {
    async fn on_success(&self, payload: Payload) -> Result<Payload> {
        tracing::debug!(kind = payload.kind(), "Received API response");
        Ok(payload)
    }

    async fn on_error(&self, error: &ApiClientError) {
        tracing::warn!(
            kind = ?error.kind(),
            status = ?error.status_code(),
            error = %error,
            "API request failed"
        );
    }
}

/// Adds a fixed set of headers to every request.
#[derive(Debug, Clone, Default)]
pub struct HeaderInterceptor {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl HeaderInterceptor {
    /// Create an empty header interceptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header, failing on an invalid name or value.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::try_from(name)
            .map_err(|e| ApiClientError::InvalidHeader(e.to_string()))?;
        let value = HeaderValue::try_from(value)
            .map_err(|e| ApiClientError::InvalidHeader(e.to_string()))?;
        self.headers.push((name, value));
        Ok(self)
    }
}

#[async_trait]
impl RequestInterceptor for HeaderInterceptor {
    async fn intercept(&self, mut request: RequestDescriptor) -> Result<RequestDescriptor> {
        for (name, value) in &self.headers {
            request.headers.insert(name.clone(), value.clone());
        }
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn descriptor() -> RequestDescriptor {
        RequestDescriptor::new(Method::GET, "/widgets")
    }

    #[tokio::test]
    async fn test_fn_interceptors_run_in_registration_order() {
        let registry = InterceptorRegistry::new();
        registry.add_request_fn(|mut d| {
            d.path.push_str("/a");
            d
        });
        registry.add_request_fn(|mut d| {
            d.path.push_str("/b");
            d
        });

        let mut request = descriptor();
        for interceptor in registry.request_interceptors() {
            request = interceptor.intercept(request).await.unwrap();
        }
        assert_eq!(request.path, "/widgets/a/b");
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let registry = InterceptorRegistry::new();
        let first = registry.add_request_fn(|d| d);
        let second = registry.add_success_fn(|p| p);
        registry.add_error_fn(|_| {});

        assert_eq!(registry.request_len(), 1);
        assert_eq!(registry.response_len(), 2);

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        assert!(registry.remove(second));
        assert_eq!(registry.request_len(), 0);
        assert_eq!(registry.response_len(), 1);

        registry.clear();
        assert_eq!(registry.response_len(), 0);
    }

    #[test]
    fn test_header_interceptor() {
        let interceptor = HeaderInterceptor::new()
            .header("X-Tenant", "north")
            .unwrap();
        let request = tokio_test::block_on(interceptor.intercept(descriptor())).unwrap();
        assert_eq!(request.headers["x-tenant"], "north");

        assert!(HeaderInterceptor::new().header("bad name", "x").is_err());
    }

    #[tokio::test]
    async fn test_shared_interceptor_through_arc() {
        let shared = Arc::new(LoggingInterceptor::new().with_headers());
        let registry = InterceptorRegistry::new();
        registry.add_request(Arc::clone(&shared));
        registry.add_response(shared);

        let payload = registry.response_interceptors()[0]
            .on_success(Payload::Text("ok".into()))
            .await
            .unwrap();
        assert_eq!(payload, Payload::Text("ok".into()));
    }
}
