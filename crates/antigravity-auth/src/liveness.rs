//! Credential liveness probes
//!
//! Two cheap upstream calls that tell us whether an account's current
//! access token is actually usable, independent of whatever the pool's
//! bookkeeping believes. Used by the pool's "test" operation to promote an
//! account from `Unknown` to `Known{ok}` liveness.

use serde_json::json;

use crate::constants::{
    ANTIGRAVITY_API_CLIENT, ANTIGRAVITY_CLIENT_METADATA, ANTIGRAVITY_ENDPOINT_DAILY,
    ANTIGRAVITY_ENDPOINT_PROD, ANTIGRAVITY_USER_AGENT,
};
use crate::error::{Error, Result};

/// Outcome of a liveness probe.
///
/// `Valid` covers both a clean success and an upstream quota/rate-limit
/// response — both prove the credential itself authenticates correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Valid,
    Invalid,
}

fn ide_headers(req: reqwest::RequestBuilder, access_token: &str) -> reqwest::RequestBuilder {
    req.bearer_auth(access_token)
        .header("User-Agent", ANTIGRAVITY_USER_AGENT)
        .header("X-Goog-Api-Client", ANTIGRAVITY_API_CLIENT)
        .header("Client-Metadata", ANTIGRAVITY_CLIENT_METADATA)
}

/// Probe Gemini-family reachability via `loadCodeAssist`.
pub async fn probe_gemini(client: &reqwest::Client, access_token: &str) -> Result<Liveness> {
    let url = format!("{ANTIGRAVITY_ENDPOINT_PROD}/v1internal:loadCodeAssist");
    let response = ide_headers(client.get(&url), access_token)
        .send()
        .await
        .map_err(|e| Error::ProbeFailed(format!("loadCodeAssist request failed: {e}")))?;

    let status = response.status();
    if status.is_success() {
        return Ok(Liveness::Valid);
    }

    let body = response.text().await.unwrap_or_default();
    if status.as_u16() == 401
        || status.as_u16() == 403
        || body.contains("Invalid Google Cloud Code Assist credentials")
    {
        return Ok(Liveness::Invalid);
    }

    Err(Error::ProbeFailed(format!(
        "loadCodeAssist returned {status}: {body}"
    )))
}

/// Probe Claude-family reachability via a trivial `generateContent` call.
///
/// Responses mentioning quota/rate exhaustion are treated as `Valid` — the
/// credential authenticated, it's just out of headroom right now.
pub async fn probe_claude(client: &reqwest::Client, access_token: &str) -> Result<Liveness> {
    let url = format!("{ANTIGRAVITY_ENDPOINT_DAILY}/v1internal:generateContent");
    let body = json!({
        "model": "claude-sonnet-4-5",
        "request": { "contents": [{ "role": "user", "parts": [{ "text": "ping" }] }] }
    });

    let response = ide_headers(client.post(&url), access_token)
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::ProbeFailed(format!("generateContent request failed: {e}")))?;

    let status = response.status();
    if status.is_success() {
        return Ok(Liveness::Valid);
    }

    let text = response.text().await.unwrap_or_default();
    if text.contains("quota") || text.contains("rate") || text.contains("RESOURCE_EXHAUSTED") {
        return Ok(Liveness::Valid);
    }
    if status.as_u16() == 401 || status.as_u16() == 403 || text.contains("UNAUTHENTICATED") {
        return Ok(Liveness::Invalid);
    }

    Err(Error::ProbeFailed(format!(
        "generateContent returned {status}: {text}"
    )))
}
