//! Credential ownership and single-flight token refresh.

use crate::credentials::{self, ACCESS_TOKEN_KEY, CredentialStore, REFRESH_TOKEN_KEY, TokenPair};
use crate::transport::{Transport, TransportRequest, send_with_timeout};
use crate::{ApiClientConfig, ApiClientError, RequestDescriptor, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Callback invoked when a refresh fails and ends a session, after its
/// credentials are cleared. A refresh with nothing left to clear stays silent.
pub type AuthFailureCallbackFn = Arc<dyn Fn(&ApiClientError) + Send + Sync>;

type RefreshFuture = Shared<BoxFuture<'static, Result<String>>>;

#[derive(Default)]
struct RefreshSlot {
    generation: u64,
    in_flight: Option<(u64, RefreshFuture)>,
}

struct RefreshContext {
    credentials: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    refresh_url: Url,
    timeout: Duration,
    on_failure: Option<AuthFailureCallbackFn>,
}

/// Resolves authorization challenges.
///
/// Sole writer of the credential store. Concurrent challenges share one
/// refresh call; each challenged request is resubmitted at most once.
pub struct AuthCoordinator {
    context: Arc<RefreshContext>,
    slot: Arc<Mutex<RefreshSlot>>,
}

impl AuthCoordinator {
    pub(crate) fn new(
        config: &ApiClientConfig,
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        on_failure: Option<AuthFailureCallbackFn>,
    ) -> Result<Self> {
        let base = config.base_url.trim_end_matches('/');
        let path = config.refresh_path.trim_start_matches('/');
        let refresh_url = Url::parse(&format!("{base}/{path}"))?;

        Ok(Self {
            context: Arc::new(RefreshContext {
                credentials,
                transport,
                refresh_url,
                timeout: config.timeout,
                on_failure,
            }),
            slot: Arc::new(Mutex::new(RefreshSlot::default())),
        })
    }

    /// URL of the refresh endpoint.
    pub fn refresh_url(&self) -> &Url {
        &self.context.refresh_url
    }

    /// Current access token.
    pub fn access_token(&self) -> Option<String> {
        self.context.credentials.get(ACCESS_TOKEN_KEY)
    }

    /// Store a freshly issued token pair.
    pub fn login(&self, tokens: &TokenPair) {
        tokens.save(self.context.credentials.as_ref());
    }

    /// Erase stored credentials.
    pub fn logout(&self) {
        credentials::clear(self.context.credentials.as_ref());
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.slot.lock().in_flight.is_some()
    }

    /// Make a challenged request resumable with a fresh token.
    ///
    /// Sets the new bearer header and marks the descriptor as retried after
    /// refresh, so a repeated 401 becomes terminal.
    pub(crate) async fn resolve_challenge(&self, descriptor: &mut RequestDescriptor) -> Result<()> {
        let current = self.access_token();
        let token = match current {
            // Someone else refreshed after this request was sent.
            Some(current) if descriptor.bearer_token() != Some(current.as_str()) => {
                debug!(path = %descriptor.path, "Token already refreshed, resubmitting");
                current
            }
            _ => self.refresh().await?,
        };

        descriptor.set_bearer_token(&token)?;
        descriptor.retried_after_refresh = true;
        Ok(())
    }

    /// Refresh the access token, joining an in-flight refresh if there is one.
    ///
    /// The refresh runs on its own task, so it settles and leaves the slot
    /// even when every caller waiting on it has been dropped.
    pub async fn refresh(&self) -> Result<String> {
        let refresh = {
            let mut slot = self.slot.lock();
            if let Some((_, refresh)) = &slot.in_flight {
                debug!("Joining in-flight token refresh");
                refresh.clone()
            } else {
                slot.generation += 1;
                let generation = slot.generation;
                let task = tokio::spawn(settle_refresh(
                    Arc::clone(&self.context),
                    Arc::clone(&self.slot),
                    generation,
                ));
                let refresh = task
                    .map(|joined| {
                        joined.unwrap_or_else(|e| {
                            Err(ApiClientError::refresh(format!("refresh task failed: {e}")))
                        })
                    })
                    .boxed()
                    .shared();
                slot.in_flight = Some((generation, refresh.clone()));
                refresh
            }
        };

        refresh.await
    }
}

impl std::fmt::Debug for AuthCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCoordinator")
            .field("refresh_url", &self.context.refresh_url.as_str())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

async fn settle_refresh(
    context: Arc<RefreshContext>,
    slot: Arc<Mutex<RefreshSlot>>,
    generation: u64,
) -> Result<String> {
    let result = run_refresh(&context).await;

    let mut slot = slot.lock();
    if matches!(&slot.in_flight, Some((current, _)) if *current == generation) {
        slot.in_flight = None;
    }

    result
}

async fn run_refresh(context: &RefreshContext) -> Result<String> {
    match request_tokens(context).await {
        Ok(tokens) => {
            // Latest server-issued refresh token wins; otherwise keep the old one.
            tokens.save(context.credentials.as_ref());
            info!(
                rotated = tokens.refresh_token.is_some(),
                "Access token refreshed"
            );
            Ok(tokens.access_token)
        }
        Err(error) => {
            let store = context.credentials.as_ref();
            // Only a session that still held credentials ends here; later
            // challenges from the same expired session stay silent.
            let had_session =
                store.get(ACCESS_TOKEN_KEY).is_some() || store.get(REFRESH_TOKEN_KEY).is_some();
            credentials::clear(store);
            warn!(error = %error, had_session, "Token refresh failed, credentials cleared");
            if had_session && let Some(callback) = &context.on_failure {
                callback(&error);
            }
            Err(error)
        }
    }
}

async fn request_tokens(context: &RefreshContext) -> Result<TokenPair> {
    let refresh_token = context
        .credentials
        .get(REFRESH_TOKEN_KEY)
        .ok_or_else(|| ApiClientError::refresh("no refresh token available"))?;

    let body = serde_json::to_vec(&serde_json::json!({ "refresh_token": refresh_token }))
        .map_err(|e| ApiClientError::refresh(e.to_string()))?;
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let request = TransportRequest {
        method: Method::POST,
        url: context.refresh_url.clone(),
        headers,
        body: Some(body.into()),
    };

    let response = send_with_timeout(context.transport.as_ref(), request, context.timeout)
        .await
        .map_err(|e| ApiClientError::refresh(e.to_string()))?;

    if !response.is_success() {
        let status = response.status().as_u16();
        let envelope = response.into_envelope();
        return Err(ApiClientError::Refresh {
            status: Some(status),
            message: envelope.message(),
        });
    }

    response
        .decode_json::<TokenPair>()
        .map_err(|e| ApiClientError::Refresh {
            status: None,
            message: format!("invalid refresh response: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::error::ErrorKind;
    use crate::transport::TransportError;
    use crate::Response;
    use async_trait::async_trait;
    use http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RefreshEndpoint {
        calls: AtomicUsize,
        status: StatusCode,
        body: serde_json::Value,
    }

    #[async_trait]
    impl Transport for RefreshEndpoint {
        async fn send(
            &self,
            request: TransportRequest,
        ) -> std::result::Result<Response, TransportError> {
            assert_eq!(request.method, Method::POST);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Response::json(self.status, &self.body))
        }
    }

    fn coordinator(
        endpoint: Arc<RefreshEndpoint>,
        store: Arc<MemoryCredentialStore>,
        failures: Arc<AtomicUsize>,
    ) -> AuthCoordinator {
        let config = ApiClientConfig::builder()
            .base_url("https://admin.example.com/api")
            .build();
        let callback: AuthFailureCallbackFn = Arc::new(move |_: &ApiClientError| {
            failures.fetch_add(1, Ordering::SeqCst);
        });
        AuthCoordinator::new(&config, store, endpoint, Some(callback)).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_refreshes_share_one_call() {
        let endpoint = Arc::new(RefreshEndpoint {
            calls: AtomicUsize::new(0),
            status: StatusCode::OK,
            body: serde_json::json!({"access_token": "T2"}),
        });
        let store = Arc::new(MemoryCredentialStore::with_tokens(&TokenPair::new(
            "T1", "R1",
        )));
        let failures = Arc::new(AtomicUsize::new(0));
        let auth = coordinator(endpoint.clone(), store.clone(), failures.clone());

        let (a, b, c) = tokio::join!(auth.refresh(), auth.refresh(), auth.refresh());
        assert_eq!(a.unwrap(), "T2");
        assert_eq!(b.unwrap(), "T2");
        assert_eq!(c.unwrap(), "T2");

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert!(!auth.is_refreshing());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("T2"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("R1"));
        assert_eq!(failures.load(Ordering::SeqCst), 0);

        // Settled operations are discarded; the next challenge refreshes again.
        auth.refresh().await.unwrap();
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotated_refresh_token_is_persisted() {
        let endpoint = Arc::new(RefreshEndpoint {
            calls: AtomicUsize::new(0),
            status: StatusCode::OK,
            body: serde_json::json!({"accessToken": "T2", "refreshToken": "R2"}),
        });
        let store = Arc::new(MemoryCredentialStore::with_tokens(&TokenPair::new(
            "T1", "R1",
        )));
        let auth = coordinator(endpoint, store.clone(), Arc::new(AtomicUsize::new(0)));

        auth.refresh().await.unwrap();
        assert_eq!(store.get(REFRESH_TOKEN_KEY).as_deref(), Some("R2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_clears_credentials_once() {
        let endpoint = Arc::new(RefreshEndpoint {
            calls: AtomicUsize::new(0),
            status: StatusCode::UNAUTHORIZED,
            body: serde_json::json!({"message": "refresh token revoked"}),
        });
        let store = Arc::new(MemoryCredentialStore::with_tokens(&TokenPair::new(
            "T1", "R1",
        )));
        let failures = Arc::new(AtomicUsize::new(0));
        let auth = coordinator(endpoint.clone(), store.clone(), failures.clone());

        let (a, b) = tokio::join!(auth.refresh(), auth.refresh());
        for result in [a, b] {
            match result.unwrap_err() {
                ApiClientError::Refresh { status, message } => {
                    assert_eq!(status, Some(401));
                    assert_eq!(message, "refresh token revoked");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(store.get(ACCESS_TOKEN_KEY).is_none());
        assert!(store.get(REFRESH_TOKEN_KEY).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_settles_after_leader_is_cancelled() {
        let endpoint = Arc::new(RefreshEndpoint {
            calls: AtomicUsize::new(0),
            status: StatusCode::OK,
            body: serde_json::json!({"access_token": "T2"}),
        });
        let store = Arc::new(MemoryCredentialStore::with_tokens(&TokenPair::new(
            "T1", "R1",
        )));
        let auth = coordinator(endpoint.clone(), store.clone(), Arc::new(AtomicUsize::new(0)));

        let cancelled = tokio::time::timeout(Duration::from_millis(10), auth.refresh()).await;
        assert!(cancelled.is_err());
        assert!(auth.is_refreshing());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!auth.is_refreshing());
        assert_eq!(store.get(ACCESS_TOKEN_KEY).as_deref(), Some("T2"));

        // A later challenge starts a new refresh instead of joining the old one.
        auth.login(&TokenPair::new("T5", "R5"));
        auth.refresh().await.unwrap();
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_callback_fires_once_per_session() {
        let endpoint = Arc::new(RefreshEndpoint {
            calls: AtomicUsize::new(0),
            status: StatusCode::UNAUTHORIZED,
            body: serde_json::json!({"message": "refresh token revoked"}),
        });
        let store = Arc::new(MemoryCredentialStore::with_tokens(&TokenPair::new(
            "T1", "R1",
        )));
        let failures = Arc::new(AtomicUsize::new(0));
        let auth = coordinator(endpoint.clone(), store, failures.clone());

        assert!(auth.refresh().await.is_err());
        // Late challenges from the expired session find nothing to clear.
        let err = auth.refresh().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Refresh);

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_skips_network() {
        let endpoint = Arc::new(RefreshEndpoint {
            calls: AtomicUsize::new(0),
            status: StatusCode::OK,
            body: serde_json::json!({"access_token": "T2"}),
        });
        let store = Arc::new(MemoryCredentialStore::new());
        store.set(ACCESS_TOKEN_KEY, "T1");
        let failures = Arc::new(AtomicUsize::new(0));
        let auth = coordinator(endpoint.clone(), store.clone(), failures.clone());

        let err = auth.refresh().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Refresh);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(auth.access_token().is_none());
    }

    #[tokio::test]
    async fn test_stale_challenge_reuses_current_token() {
        let endpoint = Arc::new(RefreshEndpoint {
            calls: AtomicUsize::new(0),
            status: StatusCode::OK,
            body: serde_json::json!({"access_token": "T3"}),
        });
        let store = Arc::new(MemoryCredentialStore::with_tokens(&TokenPair::new(
            "T2", "R1",
        )));
        let auth = coordinator(endpoint.clone(), store, Arc::new(AtomicUsize::new(0)));

        let mut descriptor = RequestDescriptor::new(Method::GET, "/widgets");
        descriptor.set_bearer_token("T1").unwrap();
        auth.resolve_challenge(&mut descriptor).await.unwrap();

        assert_eq!(descriptor.bearer_token(), Some("T2"));
        assert!(descriptor.retried_after_refresh());
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }
}
