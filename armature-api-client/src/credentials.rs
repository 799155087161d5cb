//! Credential storage capability.

use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;

/// Store key of the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Store key of the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Key-value store holding the client's credentials.
///
/// The client only ever writes through the auth coordinator; any number of
/// readers may share the store.
pub trait CredentialStore: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value.
    fn set(&self, key: &str, value: &str);

    /// Remove a value.
    fn remove(&self, key: &str);
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a token pair.
    pub fn with_tokens(tokens: &TokenPair) -> Self {
        let store = Self::new();
        tokens.save(&store);
        store
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values.write().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }
}

/// Access token with an optional refresh token.
///
/// Also the shape of a refresh endpoint response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    /// Bearer access token.
    #[serde(alias = "accessToken", alias = "token")]
    pub access_token: String,
    /// Refresh token; `None` when the server did not rotate it.
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
}

impl TokenPair {
    /// Create a token pair.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
        }
    }

    /// Persist into a store.
    ///
    /// A missing refresh token leaves the stored one untouched.
    pub(crate) fn save(&self, store: &dyn CredentialStore) {
        store.set(ACCESS_TOKEN_KEY, &self.access_token);
        if let Some(refresh) = &self.refresh_token {
            store.set(REFRESH_TOKEN_KEY, refresh);
        }
    }
}

/// Erase both tokens.
pub(crate) fn clear(store: &dyn CredentialStore) {
    store.remove(ACCESS_TOKEN_KEY);
    store.remove(REFRESH_TOKEN_KEY);
}
