//! Dispatch loop: bounded retry around a single streaming request attempt
//!
//! The loop owns nothing about the transport — it is handed an `attempt`
//! closure that performs the actual model call and reports activity through
//! a [`DispatchHandle`]. What the loop adds on top is credential acquisition
//! per attempt, an activity watchdog that detects silent rate limits, and a
//! retry policy that only re-attempts on that one failure mode.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{Credential, CredentialBroker};
use crate::error::{Error, Result};
use crate::model::ModelFamily;
use crate::quota::is_rate_limit_error;

const WATCHDOG_POLL_INTERVAL: Duration = Duration::from_secs(5);
const ACTIVITY_STALL_THRESHOLD: Duration = Duration::from_secs(30);
const RATE_LIMIT_COOLDOWN_MS: u64 = 120_000;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Per-attempt handle the streaming collaborator uses to report activity and
/// observe cancellation.
///
/// Activity is timestamped against `tokio::time::Instant` rather than
/// `SystemTime` so the watchdog's staleness check advances correctly under a
/// paused/auto-advancing test clock (`#[tokio::test(start_paused = true)]`);
/// `SystemTime` would stay frozen while `tokio::time::interval` ticks.
#[derive(Clone)]
pub struct DispatchHandle {
    start: TokioInstant,
    last_activity_millis: Arc<AtomicU64>,
    cancellation: CancellationToken,
}

impl DispatchHandle {
    fn new() -> Self {
        Self {
            start: TokioInstant::now(),
            last_activity_millis: Arc::new(AtomicU64::new(0)),
            cancellation: CancellationToken::new(),
        }
    }

    fn elapsed_millis_since_start(&self) -> u64 {
        TokioInstant::now().saturating_duration_since(self.start).as_millis() as u64
    }

    /// Record that a token or tool event was just produced.
    pub fn note_activity(&self) {
        self.last_activity_millis.store(self.elapsed_millis_since_start(), Ordering::SeqCst);
    }

    /// Whether the attempt has been cancelled (watchdog, wall clock, or
    /// external abort) and should stop as soon as possible.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

/// Whether a provider gets the full multi-attempt retry budget.
pub fn max_attempts_for_provider(provider: &str) -> u32 {
    if provider == "google-antigravity" { 3 } else { 1 }
}

/// Runs `attempt` with credential acquisition, an activity watchdog, and a
/// wall-clock timeout, retrying only on a detected activity stall.
///
/// `attempt` receives the resolved credential and a [`DispatchHandle`], and
/// resolves to `Ok(T)` on success or `Err(message)` on a transport-level
/// failure (the message is matched against the rate-limit heuristic).
pub async fn dispatch<T, F, Fut>(
    broker: &CredentialBroker,
    model_id: &str,
    provider: &str,
    wall_clock_timeout: Duration,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(Credential, DispatchHandle) -> Fut,
    Fut: Future<Output = std::result::Result<T, String>>,
{
    let family = ModelFamily::from_model_id(model_id);
    let max_attempts = max_attempts_for_provider(provider);

    let mut last_error = Error::Other("dispatch loop ran zero attempts".into());

    for attempt_index in 0..max_attempts {
        let credential = match broker.get_credential_for_model(model_id).await? {
            Some(credential) => credential,
            None => return Err(Error::NoProjectId),
        };

        let handle = DispatchHandle::new();
        let watchdog_handle = handle.clone();
        let watchdog_cancellation = handle.cancellation.clone();

        let watchdog = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCHDOG_POLL_INTERVAL);
            loop {
                tokio::select! {
                    _ = watchdog_cancellation.cancelled() => return None,
                    _ = ticker.tick() => {
                        let last_activity = watchdog_handle.last_activity_millis.load(Ordering::SeqCst);
                        let elapsed = watchdog_handle.elapsed_millis_since_start().saturating_sub(last_activity);
                        if elapsed >= ACTIVITY_STALL_THRESHOLD.as_millis() as u64 {
                            watchdog_handle.cancellation.cancel();
                            return Some(elapsed);
                        }
                    }
                }
            }
        });

        let refresh_token = credential.refresh.clone();

        let result = tokio::select! {
            result = attempt(credential, handle.clone()) => Outcome::Attempt(result),
            _ = tokio::time::sleep(wall_clock_timeout) => Outcome::WallClockTimeout,
        };

        handle.cancellation.cancel();
        let stalled_ms = watchdog.await.ok().flatten();

        match result {
            Outcome::Attempt(Ok(value)) => {
                info!(attempt = attempt_index, provider, "dispatch attempt succeeded");
                return Ok(value);
            }
            Outcome::Attempt(Err(message)) if stalled_ms.is_some() => {
                let elapsed = stalled_ms.unwrap();
                warn!(attempt = attempt_index, elapsed_ms = elapsed, "activity stall detected, cooling account down");
                broker.pool().mark_rate_limited(&refresh_token, RATE_LIMIT_COOLDOWN_MS, family).await;
                let account = broker.pool().account_ref(&refresh_token).await;
                last_error = Error::ActivityTimeout { account, family, elapsed_ms: elapsed };
                let _ = message;
            }
            Outcome::Attempt(Err(message)) => {
                if is_rate_limit_error(&message) {
                    broker.pool().mark_rate_limited(&refresh_token, RATE_LIMIT_COOLDOWN_MS, family).await;
                    let account = broker.pool().account_ref(&refresh_token).await;
                    return Err(Error::ExplicitRateLimit { account, family, message });
                }
                return Err(Error::Other(message));
            }
            Outcome::WallClockTimeout => {
                return Err(Error::Other("wall-clock timeout exceeded".into()));
            }
        }
    }

    Err(last_error)
}

enum Outcome<T> {
    Attempt(std::result::Result<T, String>),
    WallClockTimeout,
}
