//! Antigravity (Google Cloud Code Assist) OAuth mechanics
//!
//! Provides token refresh and credential liveness probing for accounts
//! already authenticated via the browser-based login flow. This crate is a
//! standalone library with no dependency on account storage or selection —
//! it can be tested and used independently of the pool that embeds it.
//!
//! Out of scope: the authorization-code exchange that produces the initial
//! refresh token. That flow runs once, interactively, in the login
//! collaborator this crate does not implement.

pub mod constants;
pub mod error;
pub mod liveness;
pub mod token;

pub use constants::*;
pub use error::{Error, Result};
pub use liveness::{Liveness, probe_claude, probe_gemini};
pub use token::{REFRESH_TIMEOUT, TokenResponse, refresh_token};
