//! Token store trait.

use crate::auth::error::AuthError;
use std::sync::Arc;

/// Trait for token store backends.
///
/// All store implementations must be thread-safe (`Send + Sync`).
/// Operations take an `account` parameter (e.g., "jwt_token") so one store
/// can hold credentials for multiple accounts. The token itself is an
/// opaque string; nothing here inspects or decodes it.
pub trait TokenStore: Send + Sync {
    /// Get the stored token for an account, if any.
    fn get(&self, account: &str) -> Result<Option<String>, AuthError>;

    /// Put a token for an account into the store.
    fn put(&self, account: &str, token: &str) -> Result<(), AuthError>;

    /// Delete the stored token for an account.
    fn delete(&self, account: &str) -> Result<(), AuthError>;

    /// Check if a token exists in the store for an account.
    fn exists(&self, account: &str) -> Result<bool, AuthError> {
        Ok(self.get(account)?.is_some())
    }

    /// Get the name of this store backend.
    fn name(&self) -> &str;
}

// Blanket implementation for Arc<T>
impl<T: TokenStore + ?Sized> TokenStore for Arc<T> {
    fn get(&self, account: &str) -> Result<Option<String>, AuthError> {
        (**self).get(account)
    }
    fn put(&self, account: &str, token: &str) -> Result<(), AuthError> {
        (**self).put(account, token)
    }
    fn delete(&self, account: &str) -> Result<(), AuthError> {
        (**self).delete(account)
    }
    fn exists(&self, account: &str) -> Result<bool, AuthError> {
        (**self).exists(account)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

// Blanket implementation for Box<T>
impl<T: TokenStore + ?Sized> TokenStore for Box<T> {
    fn get(&self, account: &str) -> Result<Option<String>, AuthError> {
        (**self).get(account)
    }
    fn put(&self, account: &str, token: &str) -> Result<(), AuthError> {
        (**self).put(account, token)
    }
    fn delete(&self, account: &str) -> Result<(), AuthError> {
        (**self).delete(account)
    }
    fn exists(&self, account: &str) -> Result<bool, AuthError> {
        (**self).exists(account)
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}
