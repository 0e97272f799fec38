//! Interactive authentication session.
//!
//! Ties the token store, the callback listener, and the browser handoff
//! together: cached tokens short-circuit the flow, otherwise the user signs
//! in through the frontend and the token comes back via the local listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::auth::error::AuthError;
use crate::auth::listener::{CallbackState, RedirectListener};
use crate::auth::store::TokenStore;
use crate::auth::validator::TokenValidator;
use crate::config::AuthConfig;

/// How long to wait for the callback listener to come up.
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Polling interval while waiting for the callback.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Cooperative cancellation handle for a pending sign-in.
///
/// Clones share the same flag, so one handle can be parked in a signal
/// handler while another is passed into the session.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why the callback wait loop returned.
enum WaitOutcome {
    Succeeded,
    TimedOut,
    Cancelled,
}

/// One authentication session against the frontend.
///
/// The session owns no global state; everything it needs is captured at
/// construction, so independent sessions can coexist in one process.
pub struct AuthSession {
    store: Arc<dyn TokenStore>,
    account: String,
    frontend_url: String,
    callback_port: u16,
    callback_path: String,
    timeout: Duration,
    open_browser: bool,
}

impl AuthSession {
    pub fn new(config: &AuthConfig, store: Arc<dyn TokenStore>) -> Self {
        Self {
            store,
            account: config.account.clone(),
            frontend_url: config.frontend_url.clone(),
            callback_port: config.callback_port,
            callback_path: config.callback_path.clone(),
            timeout: config.timeout(),
            open_browser: true,
        }
    }

    /// Print the sign-in URL without launching the system browser.
    /// For headless environments (and tests).
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    /// Return a token, interactively signing in if the store has none.
    ///
    /// A cached token is returned as-is; whether the backend still accepts
    /// it is [`ensure_valid_token`](Self::ensure_valid_token)'s concern.
    /// Otherwise a local listener is stood up, the sign-in URL printed and
    /// handed to the browser, and the call waits until the callback fires,
    /// the deadline passes, or `cancel` trips. The listener is torn down on
    /// every exit path.
    pub async fn ensure_authenticated(&self, cancel: &CancelToken) -> Result<String, AuthError> {
        // 1. Cached token wins; no validation here.
        if let Some(token) = self.store.get(&self.account)? {
            debug!("Using cached token");
            return Ok(token);
        }

        if cancel.is_cancelled() {
            return Err(AuthError::Cancelled);
        }

        // 2. Stand up the callback listener.
        let state = Arc::new(CallbackState::new(self.store.clone(), &self.account));
        let listener = timeout(
            READY_TIMEOUT,
            RedirectListener::start(self.callback_port, &self.callback_path, state.clone()),
        )
        .await
        .map_err(|_| {
            AuthError::ListenerFailed(
                "Timed out waiting for the callback listener to start".to_string(),
            )
        })??;

        // 3. Hand the sign-in URL to the user. The frontend redirects the
        //    browser back to our listener once the user is signed in.
        let redirect_url = format!("http://127.0.0.1:{}{}", listener.port(), self.callback_path);
        let auth_url = format!(
            "{}?provider={}",
            self.frontend_url,
            urlencoding::encode(&redirect_url)
        );

        println!();
        println!("To authenticate, open this URL in your browser:");
        println!("  {auth_url}");
        println!();
        if self.open_browser {
            if let Err(e) = open::that(&auth_url) {
                warn!(error = %e, "Browser did not open automatically, use the URL above");
            }
        }

        // 4. Wait, then tear down the listener whatever the outcome was.
        let outcome = self.wait_for_callback(&state, cancel).await;
        listener.shutdown().await;

        match outcome {
            WaitOutcome::Succeeded => {
                info!("Authentication complete");
                self.store.get(&self.account)?.ok_or_else(|| {
                    AuthError::Storage(
                        "Callback signalled success but no token was stored".to_string(),
                    )
                })
            }
            WaitOutcome::TimedOut => Err(AuthError::TimedOut),
            WaitOutcome::Cancelled => Err(AuthError::Cancelled),
        }
    }

    /// Poll until the callback succeeds, the deadline passes, or the token
    /// is cancelled. Sleeps shrink near the deadline so a timeout is never
    /// reported early and at most one interval late.
    async fn wait_for_callback(&self, state: &CallbackState, cancel: &CancelToken) -> WaitOutcome {
        let deadline = Instant::now() + self.timeout;
        loop {
            if state.succeeded() {
                return WaitOutcome::Succeeded;
            }
            if cancel.is_cancelled() {
                return WaitOutcome::Cancelled;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return WaitOutcome::TimedOut;
            }
            tokio::time::sleep(remaining.min(POLL_INTERVAL)).await;
        }
    }

    /// Return a token the backend actually accepts.
    ///
    /// Retries exactly once: a rejected token is cleared from the store and
    /// the interactive flow runs again. A second rejection is fatal rather
    /// than looping the user through endless sign-ins.
    pub async fn ensure_valid_token(
        &self,
        validator: &TokenValidator,
        cancel: &CancelToken,
    ) -> Result<String, AuthError> {
        let token = self.ensure_authenticated(cancel).await?;
        if validator.validate(&token).await {
            return Ok(token);
        }

        warn!("Stored token rejected by backend, re-authenticating");
        self.store.delete(&self.account)?;

        let token = self.ensure_authenticated(cancel).await?;
        if validator.validate(&token).await {
            Ok(token)
        } else {
            Err(AuthError::TokenInvalid)
        }
    }
}
