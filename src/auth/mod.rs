//! Browser-assisted authentication.
//!
//! The flow: check the token store, and on a miss stand up a short-lived
//! local HTTP listener, send the user to the frontend login page with the
//! listener's address as the redirect target, and wait for the frontend to
//! deliver a token to the callback.

pub mod error;
pub mod listener;
pub mod session;
pub mod store;
pub mod validator;

// Re-exports
pub use error::AuthError;
pub use listener::{CallbackState, RedirectListener};
pub use session::{AuthSession, CancelToken};
pub use store::{store_from_config, TokenStore};
pub use validator::TokenValidator;
