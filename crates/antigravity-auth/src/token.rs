//! OAuth token refresh
//!
//! Handles the single token-endpoint interaction this crate is responsible
//! for: exchanging a long-lived refresh token for a fresh access token. The
//! authorization-code exchange that mints the initial refresh token happens
//! in the browser-based login flow, which this crate treats as an external
//! collaborator and does not implement.

use std::time::Duration;

use serde::Deserialize;

use crate::constants::{ANTIGRAVITY_CLIENT_ID, ANTIGRAVITY_CLIENT_SECRET, GOOGLE_TOKEN_URL};
use crate::error::{Error, Result};

/// A hard ceiling on how long a refresh call may take before the caller
/// gives up on this account and tries another one.
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(15);

/// Response from Google's token endpoint for a `refresh_token` grant.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Seconds until the access token expires (delta, not absolute).
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Refresh an access token using a refresh token.
///
/// Wraps the network call in [`REFRESH_TIMEOUT`]; a timeout surfaces as
/// [`Error::RefreshTimedOut`] so callers can distinguish "upstream didn't
/// answer" from "upstream rejected the token" and react accordingly (the
/// account pool treats both as a failed refresh, but logs them differently).
pub async fn refresh_token(client: &reqwest::Client, refresh: &str) -> Result<TokenResponse> {
    match tokio::time::timeout(REFRESH_TIMEOUT, do_refresh(client, refresh)).await {
        Ok(result) => result,
        Err(_) => Err(Error::RefreshTimedOut),
    }
}

async fn do_refresh(client: &reqwest::Client, refresh: &str) -> Result<TokenResponse> {
    let response = client
        .post(GOOGLE_TOKEN_URL)
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
            ("client_id", ANTIGRAVITY_CLIENT_ID),
            ("client_secret", ANTIGRAVITY_CLIENT_SECRET),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if let Ok(error_resp) = serde_json::from_str::<TokenErrorResponse>(&body)
            && error_resp.error == "invalid_grant"
        {
            return Err(Error::InvalidCredentials(format!(
                "refresh token revoked or expired: {}",
                error_resp.error_description.unwrap_or_default()
            )));
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::RefreshFailed(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::RefreshFailed(format!("invalid refresh response: {e}")))
}
