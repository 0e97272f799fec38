//! Backend token validation.

use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for the health probe.
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Checks a stored token against the backend health endpoint.
///
/// A token is considered valid only when `GET {backend}/api/health` with the
/// token as a bearer credential returns 200.
pub struct TokenValidator {
    client: reqwest::Client,
    health_url: String,
}

impl TokenValidator {
    pub fn new(backend_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(VALIDATE_TIMEOUT)
            .user_agent("stride/0.1.0")
            .build()
            .unwrap_or_default();
        Self {
            client,
            health_url: format!("{}/api/health", backend_url.trim_end_matches('/')),
        }
    }

    /// Probe the backend with the given token.
    ///
    /// Every failure mode (non-200 status, connection refused, timeout)
    /// collapses to `false` with a diagnostic; callers treat an unreachable
    /// backend the same as a stale token. The token itself is never logged.
    pub async fn validate(&self, token: &str) -> bool {
        match self
            .client
            .get(&self.health_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .bearer_auth(token)
            .send()
            .await
        {
            Ok(resp) if resp.status() == StatusCode::OK => {
                debug!("Token accepted by backend");
                true
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "Token validation rejected");
                false
            }
            Err(e) => {
                warn!(error = %e, "Token validation request failed");
                false
            }
        }
    }
}
