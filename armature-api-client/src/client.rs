//! API client implementation.

use crate::auth::{AuthCoordinator, AuthFailureCallbackFn};
use crate::credentials::{CredentialStore, MemoryCredentialStore, TokenPair};
use crate::request::RequestPipeline;
use crate::response::ResponsePipeline;
use crate::transport::{ReqwestTransport, Transport, TransportExecutor};
use crate::{
    ApiClientConfig, ApiClientError, InterceptorRegistry, Payload, RequestBody, RequestConfig,
    Result,
};
use http::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Resilient API client.
///
/// Cheap to clone; clones share configuration, credentials, interceptors and
/// the in-flight refresh.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Arc<ApiClientConfig>,
    credentials: Arc<dyn CredentialStore>,
    interceptors: InterceptorRegistry,
    auth: Arc<AuthCoordinator>,
    requests: RequestPipeline,
    executor: TransportExecutor,
    responses: ResponsePipeline,
}

impl ApiClient {
    /// Create a client with an in-memory credential store and the reqwest transport.
    pub fn new(config: ApiClientConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Create a client builder.
    pub fn builder(config: ApiClientConfig) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            credentials: None,
            transport: None,
            on_auth_failure: None,
        }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ApiClientConfig {
        &self.inner.config
    }

    /// Interceptors registered on this client.
    pub fn interceptors(&self) -> &InterceptorRegistry {
        &self.inner.interceptors
    }

    /// Credential store read before every call.
    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.credentials
    }

    /// Auth coordinator owning the credentials.
    pub fn auth(&self) -> &AuthCoordinator {
        &self.inner.auth
    }

    /// Store tokens obtained from a login exchange.
    pub fn login(&self, tokens: &TokenPair) {
        self.inner.auth.login(tokens);
    }

    /// Erase stored credentials.
    pub fn logout(&self) {
        self.inner.auth.logout();
    }

    /// Issue a GET request.
    pub async fn get(&self, path: &str, config: RequestConfig) -> Result<Payload> {
        self.request(Method::GET, path, None, config).await
    }

    /// Issue a POST request.
    pub async fn post(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        config: RequestConfig,
    ) -> Result<Payload> {
        self.request(Method::POST, path, Some(body.into()), config)
            .await
    }

    /// Issue a PUT request.
    pub async fn put(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        config: RequestConfig,
    ) -> Result<Payload> {
        self.request(Method::PUT, path, Some(body.into()), config)
            .await
    }

    /// Issue a PATCH request.
    pub async fn patch(
        &self,
        path: &str,
        body: impl Into<RequestBody>,
        config: RequestConfig,
    ) -> Result<Payload> {
        self.request(Method::PATCH, path, Some(body.into()), config)
            .await
    }

    /// Issue a DELETE request.
    pub async fn delete(&self, path: &str, config: RequestConfig) -> Result<Payload> {
        self.request(Method::DELETE, path, None, config).await
    }

    /// GET and deserialize a JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get(path, RequestConfig::default()).await?.into_json()
    }

    /// POST a serializable body and deserialize the JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = RequestBody::json(body)?;
        self.post(path, body, RequestConfig::default())
            .await?
            .into_json()
    }

    /// Issue a request with any method.
    ///
    /// The descriptor is built and intercepted once; transient retries and the
    /// post-refresh resubmission reuse it.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody>,
        config: RequestConfig,
    ) -> Result<Payload> {
        let inner = &self.inner;

        let mut descriptor = match inner.requests.build(method, path, body, config).await {
            Ok(descriptor) => descriptor,
            Err(error) => return inner.responses.reject(error).await,
        };

        let response = match inner.executor.execute(&mut descriptor).await {
            Ok(response) => response,
            Err(error) => return inner.responses.reject(error).await,
        };

        inner
            .responses
            .handle(response, descriptor.response_type)
            .await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url)
            .field("interceptors", &self.inner.interceptors)
            .finish()
    }
}

/// Builder wiring the client's injected collaborators.
pub struct ApiClientBuilder {
    config: ApiClientConfig,
    credentials: Option<Arc<dyn CredentialStore>>,
    transport: Option<Arc<dyn Transport>>,
    on_auth_failure: Option<AuthFailureCallbackFn>,
}

impl ApiClientBuilder {
    /// Use a custom credential store.
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Use a custom transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Callback invoked when a token refresh fails for good.
    pub fn on_auth_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ApiClientError) + Send + Sync + 'static,
    {
        self.on_auth_failure = Some(Arc::new(callback));
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<ApiClient> {
        let config = Arc::new(self.config);
        let credentials: Arc<dyn CredentialStore> = match self.credentials {
            Some(credentials) => credentials,
            None => Arc::new(MemoryCredentialStore::new()),
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config)?),
        };

        let interceptors = InterceptorRegistry::new();
        let auth = Arc::new(AuthCoordinator::new(
            &config,
            Arc::clone(&credentials),
            Arc::clone(&transport),
            self.on_auth_failure,
        )?);

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                requests: RequestPipeline::new(
                    Arc::clone(&config),
                    Arc::clone(&credentials),
                    interceptors.clone(),
                ),
                executor: TransportExecutor::new(transport, Arc::clone(&auth), &config),
                responses: ResponsePipeline::new(interceptors.clone()),
                config,
                credentials,
                interceptors,
                auth,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_client_creation() {
        let client = ApiClient::new(ApiClientConfig::default()).unwrap();
        assert_eq!(client.config().retry.max_retries, 3);
        assert_eq!(
            client.auth().refresh_url().as_str(),
            "http://localhost:8080/auth/refresh"
        );
    }

    #[test]
    fn test_client_with_config() {
        let config = ApiClientConfig::builder()
            .timeout(Duration::from_secs(60))
            .base_url("https://api.example.com/v1/")
            .refresh_path("token/refresh")
            .build();

        let client = ApiClient::new(config).unwrap();
        assert_eq!(client.config().timeout, Duration::from_secs(60));
        assert_eq!(
            client.auth().refresh_url().as_str(),
            "https://api.example.com/v1/token/refresh"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ApiClientConfig::builder().base_url("not a url").build();
        let err = ApiClient::new(config).unwrap_err();
        assert!(matches!(err, ApiClientError::InvalidUrl(_)));
    }

    #[test]
    fn test_login_logout() {
        let client = ApiClient::new(ApiClientConfig::default()).unwrap();
        client.login(&TokenPair::new("T1", "R1"));
        assert_eq!(client.auth().access_token().as_deref(), Some("T1"));

        client.logout();
        assert!(client.auth().access_token().is_none());
        assert!(client.credentials().get("refresh_token").is_none());
    }
}
