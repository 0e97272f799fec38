//! Authentication error types.

use thiserror::Error;

/// Errors from the authentication flow.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The local callback listener could not be started.
    #[error("Callback listener failed: {0}")]
    ListenerFailed(String),

    /// No token arrived before the configured deadline.
    #[error("Authentication timed out")]
    TimedOut,

    /// The flow was cancelled before a token arrived.
    #[error("Authentication cancelled")]
    Cancelled,

    /// The backend rejected the token even after a fresh sign-in.
    #[error("Token rejected after re-authentication")]
    TokenInvalid,

    /// Token storage error.
    #[error("Storage error: {0}")]
    Storage(String),
}
