//! Antigravity (Google Cloud Code Assist) OAuth constants
//!
//! Public OAuth client configuration matching the Antigravity IDE. These
//! values are not secrets — they identify the public native-app client,
//! the same way Google's own installed-app OAuth clients work. The actual
//! secrets (access/refresh tokens) live in the account pool's storage.

/// Antigravity's public OAuth client ID.
pub const ANTIGRAVITY_CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";

/// Antigravity's public OAuth client secret (native-app pair, not confidential).
pub const ANTIGRAVITY_CLIENT_SECRET: &str = "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";

/// Google's token endpoint, used for refresh only — this crate never performs
/// the authorization-code exchange that starts a grant.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Production Cloud Code Assist endpoint, used by the Gemini liveness probe.
pub const ANTIGRAVITY_ENDPOINT_PROD: &str = "https://cloudcode-pa.googleapis.com";

/// Sandbox endpoint used by the Claude liveness probe (mirrors the IDE's
/// own daily-sandbox routing for Claude-family models).
pub const ANTIGRAVITY_ENDPOINT_DAILY: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";

/// User-Agent header impersonating the Antigravity IDE.
pub const ANTIGRAVITY_USER_AGENT: &str = "antigravity/1.11.5 linux/amd64";

/// X-Goog-Api-Client header impersonating the Antigravity IDE.
pub const ANTIGRAVITY_API_CLIENT: &str = "google-cloud-sdk vscode_cloudshelleditor/0.1";

/// Client-Metadata header (JSON) impersonating the Antigravity IDE.
pub const ANTIGRAVITY_CLIENT_METADATA: &str =
    r#"{"ideType":"IDE_UNSPECIFIED","platform":"PLATFORM_UNSPECIFIED","pluginType":"GEMINI"}"#;
