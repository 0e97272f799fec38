//! In-memory token store.

use super::TokenStore;
use crate::auth::error::AuthError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::instrument;

/// In-memory token store.
///
/// Uses `Arc<RwLock<HashMap>>` for thread-safe access. Useful for
/// testing and ephemeral sessions. The store is Clone and clones
/// share the same underlying map.
#[derive(Debug, Clone)]
pub struct MemoryTokenStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for MemoryTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTokenStore {
    /// Create a new empty MemoryTokenStore.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a MemoryTokenStore with an initial token for an account.
    pub fn with_token(account: impl Into<String>, token: impl Into<String>) -> Self {
        let mut map = HashMap::new();
        map.insert(account.into(), token.into());
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Get the number of stored tokens.
    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().expect("lock poisoned").is_empty()
    }

    /// Clear all stored tokens.
    pub fn clear(&self) {
        self.inner.write().expect("lock poisoned").clear();
    }
}

impl TokenStore for MemoryTokenStore {
    #[instrument(skip(self))]
    fn get(&self, account: &str) -> Result<Option<String>, AuthError> {
        let guard = self.inner.read().expect("lock poisoned");
        Ok(guard.get(account).cloned())
    }

    #[instrument(skip(self, token))]
    fn put(&self, account: &str, token: &str) -> Result<(), AuthError> {
        let mut guard = self.inner.write().expect("lock poisoned");
        guard.insert(account.to_string(), token.to_string());
        Ok(())
    }

    #[instrument(skip(self))]
    fn delete(&self, account: &str) -> Result<(), AuthError> {
        let mut guard = self.inner.write().expect("lock poisoned");
        guard.remove(account);
        Ok(())
    }

    fn exists(&self, account: &str) -> Result<bool, AuthError> {
        let guard = self.inner.read().expect("lock poisoned");
        Ok(guard.contains_key(account))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
