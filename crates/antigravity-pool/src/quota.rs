//! Rate-limit error classification
//!
//! A deliberately broad substring heuristic over a callback's error message,
//! used by the dispatch loop to decide whether a failure should cool the
//! current account down rather than propagate immediately. Preserved
//! bug-for-bug rather than tightened: see the design notes on the
//! `timeout` substring's false-positive rate, which this implementation
//! accepts because the cooldown it triggers is self-healing.

/// Case-sensitive substrings that mark an error message as rate-limit-like.
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "429", "rate", "quota", "limit", "timeout", "ECONNRESET", "ETIMEDOUT",
];

/// Whether an error message should be treated as an explicit rate limit.
pub fn is_rate_limit_error(message: &str) -> bool {
    RATE_LIMIT_PATTERNS.iter().any(|pattern| message.contains(pattern))
}
