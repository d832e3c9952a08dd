//! Account pool data model
//!
//! Mirrors the on-disk schema described by `AccountStorage` while keeping
//! an illegal-states-unrepresentable shape in memory: `hasAccess`,
//! `lastError`, and `lastErrorAt` collapse into a single [`Liveness`] sum
//! type instead of three independently-nullable fields.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Coarse grouping at which rate limits are tracked independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelFamily {
    Claude,
    GeminiFlash,
    GeminiPro,
}

impl ModelFamily {
    /// Derive a family from a model identifier by case-insensitive substring.
    pub fn from_model_id(model_id: &str) -> Self {
        let lower = model_id.to_lowercase();
        if lower.contains("claude") {
            ModelFamily::Claude
        } else if lower.contains("flash") {
            ModelFamily::GeminiFlash
        } else {
            ModelFamily::GeminiPro
        }
    }
}

/// Billing tier of an account. `Paid` is preferred over `Free` in selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountTier {
    Free,
    Paid,
}

/// Advisory record of why the pool last moved away from an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchReason {
    RateLimit,
    Initial,
    Rotation,
    InvalidCreds,
}

/// Realized in-memory replacement for the three-field `hasAccess` /
/// `lastError` / `lastErrorAt` tuple. An account that has never been probed
/// is `Unknown`; one that has is `Known` with a verdict and, if the verdict
/// was negative, a diagnostic pair.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Liveness {
    #[default]
    Unknown,
    Known {
        ok: bool,
        last_error: Option<String>,
        last_error_at: Option<u64>,
    },
}

impl Liveness {
    /// `true` only when known to work; `Unknown` is not "valid" for the
    /// purposes of confirmed-account partitioning in `nextForFamily`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Liveness::Known { ok: true, .. })
    }

    /// `true` only when known to be broken. `Unknown` accounts are still
    /// selectable; only a confirmed-bad account is excluded from selection.
    pub fn is_known_bad(&self) -> bool {
        matches!(self, Liveness::Known { ok: false, .. })
    }
}

/// Wire projection of [`Liveness`] matching the documented on-disk fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LivenessWire {
    #[serde(skip_serializing_if = "Option::is_none")]
    has_access: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error_at: Option<u64>,
}

impl From<Liveness> for LivenessWire {
    fn from(liveness: Liveness) -> Self {
        match liveness {
            Liveness::Unknown => LivenessWire::default(),
            Liveness::Known {
                ok,
                last_error,
                last_error_at,
            } => LivenessWire {
                has_access: Some(ok),
                last_error,
                last_error_at,
            },
        }
    }
}

impl From<LivenessWire> for Liveness {
    fn from(wire: LivenessWire) -> Self {
        match wire.has_access {
            None => Liveness::Unknown,
            Some(ok) => Liveness::Known {
                ok,
                last_error: wire.last_error,
                last_error_at: wire.last_error_at,
            },
        }
    }
}

/// A single upstream OAuth identity usable to obtain access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub refresh_token: String,
    pub project_id: Option<String>,
    pub access: Option<String>,
    pub expires: Option<u64>,
    pub email: Option<String>,
    pub tier: Option<AccountTier>,
    #[serde(default)]
    pub rate_limit_reset_times: HashMap<ModelFamily, u64>,
    #[serde(flatten, serialize_with = "serialize_liveness", deserialize_with = "deserialize_liveness")]
    pub liveness: Liveness,
    #[serde(default)]
    pub last_used: u64,
    pub last_switch_reason: Option<SwitchReason>,
    pub added_at: u64,
}

fn serialize_liveness<S>(liveness: &Liveness, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    LivenessWire::from(liveness.clone()).serialize(serializer)
}

fn deserialize_liveness<'de, D>(deserializer: D) -> Result<Liveness, D::Error>
where
    D: serde::Deserializer<'de>,
{
    LivenessWire::deserialize(deserializer).map(Liveness::from)
}

impl Account {
    /// `true` if this account currently has no active rate limit for `family`.
    pub fn is_rate_limited_for(&self, family: ModelFamily, now_ms: u64) -> bool {
        match self.rate_limit_reset_times.get(&family) {
            Some(&reset_at) => reset_at > now_ms,
            None => false,
        }
    }

    /// Drop any rate-limit entries that have already lapsed.
    pub fn prune_expired_limits(&mut self, now_ms: u64) {
        self.rate_limit_reset_times.retain(|_, &mut reset_at| reset_at > now_ms);
    }

    pub fn is_paid(&self) -> bool {
        matches!(self.tier, Some(AccountTier::Paid))
    }
}

/// On-disk shape: `{version: 2, accounts: [...], activeIndex: N}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStorage {
    pub version: u32,
    pub accounts: Vec<Account>,
    #[serde(rename = "activeIndex")]
    pub active_index: usize,
}

pub const STORAGE_VERSION: u32 = 2;
/// Hard cap on the number of accounts a pool may hold.
pub const MAX_ACCOUNTS: usize = 10;
