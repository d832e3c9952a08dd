//! Multi-account credential pool and dispatch engine for the Antigravity
//! (Google Code Assist) provider
//!
//! Multiplexes model calls across a pool of OAuth-authenticated upstream
//! accounts to work around per-account rate limits. Five pieces, leaves
//! first:
//!
//! - [`store`] persists the account pool to a versioned JSON file.
//! - [`pool`] holds the in-memory account sequence and the sticky /
//!   round-robin selection algorithm, scoped per model family.
//! - [`refresh`] wraps the external OAuth refresh call with a hard timeout.
//! - [`broker`] turns a model id into a ready-to-use credential, refreshing
//!   and falling back to another account as needed.
//! - [`dispatch`] wraps a single request attempt in a bounded retry loop
//!   with an activity watchdog for silent rate limits.
//!
//! Account lifecycle:
//! 1. The OAuth login collaborator (out of scope here) produces a
//!    `refreshToken`/`projectId`/`access`/`expires`/`email`/`tier` tuple.
//! 2. [`broker::CredentialBroker::get_credential_for_model`] selects an
//!    account for the requested model's family and ensures its access token
//!    is live, refreshing lazily on use.
//! 3. [`dispatch::dispatch`] wraps a streaming attempt, detecting silent
//!    rate limits via an activity watchdog and retrying against a freshly
//!    selected account.
//! 4. Rate-limit and liveness events mutate the account in place; the pool
//!    persists after every selection so rotation state survives restarts.

pub mod broker;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pool;
pub mod quota;
pub mod refresh;
pub mod store;

pub use broker::{Credential, CredentialBroker};
pub use dispatch::{dispatch, max_attempts_for_provider, DispatchHandle};
pub use error::{AccountRef, Error, Result};
pub use model::{Account, AccountStorage, AccountTier, Liveness, ModelFamily, SwitchReason, MAX_ACCOUNTS, STORAGE_VERSION};
pub use pool::{AccountPool, AccountUpdate, NewAccount, SelectionMode};
pub use quota::is_rate_limit_error;
pub use refresh::{HttpTokenRefresher, RefreshedToken, TokenRefresher};
