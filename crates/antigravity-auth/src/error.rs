//! Error types for OAuth authentication operations

/// Errors from OAuth authentication operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token refresh timed out")]
    RefreshTimedOut,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("liveness probe failed: {0}")]
    ProbeFailed(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
