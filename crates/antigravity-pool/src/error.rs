//! Error types for pool operations

use crate::model::ModelFamily;

/// Identifies an account in a user-visible message: email when known, the
/// pool index otherwise.
#[derive(Debug, Clone)]
pub enum AccountRef {
    Email(String),
    Index(usize),
}

impl std::fmt::Display for AccountRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountRef::Email(email) => write!(f, "{email}"),
            AccountRef::Index(index) => write!(f, "account #{index}"),
        }
    }
}

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("no accounts configured")]
    NoAccounts,

    #[error("selected account has no project ID")]
    NoProjectId,

    #[error("token refresh failed for {account} ({family:?}): re-authenticate this account")]
    RefreshFailed { account: AccountRef, family: ModelFamily },

    #[error("all accounts rate-limited for {family:?}, retry after {}s", retry_after_ms / 1000)]
    RateLimitedAll { family: ModelFamily, retry_after_ms: u64 },

    #[error("no streaming activity for {elapsed_ms}ms on {account}, marked rate-limited for {family:?}")]
    ActivityTimeout { account: AccountRef, family: ModelFamily, elapsed_ms: u64 },

    #[error("upstream reported an explicit rate limit for {account} ({family:?}): {message}")]
    ExplicitRateLimit { account: AccountRef, family: ModelFamily, message: String },

    #[error("{0}")]
    Other(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
