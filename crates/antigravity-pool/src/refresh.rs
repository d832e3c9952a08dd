//! Request-time token refresh
//!
//! Unlike the teacher's background proactive-refresh loop, refresh here
//! happens lazily at broker time: the broker checks staleness itself and
//! calls through this trait only when a token needs replacing. There is no
//! periodic task and no independent schedule to keep in sync with the pool.

use async_trait::async_trait;

use tracing::warn;

/// Outcome of a successful refresh, ready to be written back onto an account.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_at_ms: u64,
}

/// Abstraction over "exchange a refresh token for a new access token".
///
/// Object-safe so the broker can hold a `dyn TokenRefresher`; returns `None`
/// uniformly for timeout, network failure, or a response missing
/// `access_token` — the caller, not the refresher, decides whether that
/// absence is fatal.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str, project_id: &str) -> Option<RefreshedToken>;
}

/// Default refresher backed by the real Google OAuth token endpoint.
pub struct HttpTokenRefresher {
    client: reqwest::Client,
}

impl HttpTokenRefresher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str, _project_id: &str) -> Option<RefreshedToken> {
        let response = match antigravity_auth::refresh_token(&self.client, refresh_token).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "token refresh failed");
                return None;
            }
        };

        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Some(RefreshedToken {
            access_token: response.access_token,
            expires_at_ms: now_ms + response.expires_in * 1000,
        })
    }
}
