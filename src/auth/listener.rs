//! Ephemeral local callback listener.
//!
//! Receives the browser redirect at the end of the sign-in flow. The
//! frontend appends `?token=...` to the redirect, and the handler stores
//! the token and flips a success flag the session loop polls. The listener
//! binds to loopback only and lives for one authentication attempt.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::auth::error::AuthError;
use crate::auth::store::TokenStore;

/// How long `shutdown` waits for the server task before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Query parameters from the sign-in redirect.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub token: Option<String>,
}

/// Shared state between the callback handler and the waiting session.
pub struct CallbackState {
    store: Arc<dyn TokenStore>,
    account: String,
    success: AtomicBool,
}

impl CallbackState {
    pub fn new(store: Arc<dyn TokenStore>, account: impl Into<String>) -> Self {
        Self {
            store,
            account: account.into(),
            success: AtomicBool::new(false),
        }
    }

    /// Whether a token has been received and stored.
    pub fn succeeded(&self) -> bool {
        self.success.load(Ordering::SeqCst)
    }
}

/// Handle the browser redirect.
///
/// A non-empty `token` parameter is stored and acknowledged with a success
/// page; anything else gets a 400 so a stray probe or a broken redirect
/// never signals success.
async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<String>) {
    match params.token.as_deref() {
        Some(token) if !token.is_empty() => {
            if let Err(e) = state.store.put(&state.account, token) {
                error!(error = %e, "Failed to store received token");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Html(error_page("The token could not be saved on this machine.")),
                );
            }
            // swap so repeated redirects log the arrival only once
            if !state.success.swap(true, Ordering::SeqCst) {
                info!("Received token on callback listener");
            }
            (StatusCode::OK, Html(success_page()))
        }
        _ => {
            warn!("Callback request without a token");
            (
                StatusCode::BAD_REQUEST,
                Html(error_page("The sign-in response did not include a token.")),
            )
        }
    }
}

/// The running callback listener.
///
/// Serves exactly one route on a loopback port until `shutdown` is called.
/// If the preferred port is taken, an OS-assigned port is used instead; the
/// actual port is available via [`port`](Self::port) for building the
/// redirect URL.
pub struct RedirectListener {
    port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RedirectListener {
    /// Bind and start serving the callback route.
    pub async fn start(
        preferred_port: u16,
        path: &str,
        state: Arc<CallbackState>,
    ) -> Result<Self, AuthError> {
        let listener = match TcpListener::bind(("127.0.0.1", preferred_port)).await {
            Ok(l) => l,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                warn!(
                    port = preferred_port,
                    "Preferred callback port in use, falling back to an OS-assigned port"
                );
                TcpListener::bind(("127.0.0.1", 0)).await.map_err(|e| {
                    AuthError::ListenerFailed(format!("Failed to bind callback listener: {e}"))
                })?
            }
            Err(e) => {
                return Err(AuthError::ListenerFailed(format!(
                    "Failed to bind callback listener on port {preferred_port}: {e}"
                )));
            }
        };

        let port = listener
            .local_addr()
            .map_err(|e| AuthError::ListenerFailed(format!("Failed to read local address: {e}")))?
            .port();

        let app = Router::new().route(path, get(handle_callback)).with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                error!(error = %e, "Callback listener error");
            }
        });

        info!(port, "Callback listener started");
        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    /// The port actually bound, for building the redirect URL.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop the listener and wait for the server task to finish.
    ///
    /// Completes even if no request ever arrived. A task that does not stop
    /// within the grace period is aborted.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task)
            .await
            .is_err()
        {
            warn!("Callback listener did not stop in time, aborting");
            self.task.abort();
        }
    }
}

// =============================================================================
// HTML Response Generation
// =============================================================================

/// Generate the success page shown in the browser after sign-in.
fn success_page() -> String {
    r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Sign-in Complete</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: linear-gradient(135deg, #1a1a2e 0%, #16213e 100%);
            color: #e0e0e0;
        }
        .container {
            text-align: center;
            padding: 2rem;
            max-width: 400px;
        }
        .success-icon {
            font-size: 4rem;
            margin-bottom: 1rem;
        }
        h1 {
            color: #34d399;
            margin-bottom: 1rem;
        }
        p {
            color: #9ca3af;
            margin-bottom: 1.5rem;
        }
        .close-hint {
            font-size: 0.875rem;
            color: #6b7280;
        }
    </style>
    <script>
        setTimeout(function() {
            window.close();
        }, 3000);
    </script>
</head>
<body>
    <div class="container">
        <div class="success-icon">&#x2705;</div>
        <h1>Authentication Successful!</h1>
        <p>Your health dashboard is connected. You can return to the terminal.</p>
        <p class="close-hint">This window will close automatically...</p>
    </div>
</body>
</html>"#
        .to_string()
}

/// Generate the error page shown when the redirect carried no usable token.
fn error_page(reason: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Sign-in Failed</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
            margin: 0;
            background: linear-gradient(135deg, #1a1a2e 0%, #16213e 100%);
            color: #e0e0e0;
        }}
        .container {{
            text-align: center;
            padding: 2rem;
            max-width: 500px;
        }}
        .error-icon {{
            font-size: 4rem;
            margin-bottom: 1rem;
        }}
        h1 {{
            color: #f87171;
            margin-bottom: 1rem;
        }}
        p {{
            color: #9ca3af;
            margin-bottom: 1rem;
        }}
        .error-details {{
            background: rgba(248, 113, 113, 0.1);
            border: 1px solid rgba(248, 113, 113, 0.3);
            border-radius: 8px;
            padding: 1rem;
            margin-top: 1rem;
            text-align: left;
        }}
    </style>
</head>
<body>
    <div class="container">
        <div class="error-icon">&#x274C;</div>
        <h1>Authentication Failed</h1>
        <div class="error-details">
            <p>{reason}</p>
        </div>
        <p>Please close this window and try again.</p>
    </div>
</body>
</html>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryTokenStore;

    async fn start_test_listener(
        preferred: u16,
    ) -> (RedirectListener, Arc<CallbackState>, MemoryTokenStore) {
        let store = MemoryTokenStore::new();
        let state = Arc::new(CallbackState::new(Arc::new(store.clone()), "jwt_token"));
        let listener = RedirectListener::start(preferred, "/callback", state.clone())
            .await
            .unwrap();
        (listener, state, store)
    }

    #[tokio::test]
    async fn test_callback_with_token_stores_and_signals() {
        let (listener, state, store) = start_test_listener(0).await;

        let url = format!("http://127.0.0.1:{}/callback?token=abc123", listener.port());
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body = resp.text().await.unwrap();
        assert!(body.contains("Authentication Successful"));

        assert!(state.succeeded());
        assert_eq!(store.get("jwt_token").unwrap().unwrap(), "abc123");
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn test_callback_without_token_is_rejected() {
        let (listener, state, store) = start_test_listener(0).await;
        let base = format!("http://127.0.0.1:{}/callback", listener.port());

        let resp = reqwest::get(&base).await.unwrap();
        assert_eq!(resp.status(), 400);

        let resp = reqwest::get(format!("{base}?token=")).await.unwrap();
        assert_eq!(resp.status(), 400);

        assert!(!state.succeeded());
        assert!(store.get("jwt_token").unwrap().is_none());
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn test_repeated_token_hits_are_idempotent() {
        let (listener, state, store) = start_test_listener(0).await;
        let url = format!("http://127.0.0.1:{}/callback?token=tok", listener.port());

        for _ in 0..3 {
            let resp = reqwest::get(&url).await.unwrap();
            assert_eq!(resp.status(), 200);
        }

        assert!(state.succeeded());
        assert_eq!(store.get("jwt_token").unwrap().unwrap(), "tok");
        listener.shutdown().await;
    }

    #[tokio::test]
    async fn test_port_conflict_falls_back_to_os_assigned() {
        let (first, _, _) = start_test_listener(0).await;
        let occupied = first.port();

        let (second, _, _) = start_test_listener(occupied).await;
        assert_ne!(second.port(), occupied);
        assert_ne!(second.port(), 0);

        second.shutdown().await;
        first.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_with_no_requests() {
        let (listener, _, _) = start_test_listener(0).await;
        listener.shutdown().await;
    }
}
