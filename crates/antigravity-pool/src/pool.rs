//! Account pool state machine and selection
//!
//! Holds the account sequence, the sticky "current account" cursor, and the
//! round-robin rotation cursor behind a single `tokio::sync::Mutex`. Every
//! mutator and query is a method on that one lock — deliberately, not a
//! finer-grained `RwLock` split between the account vector and a status map,
//! because splitting them would let one caller observe a half-updated
//! rotation cursor while another is mid-selection.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::error::Result;
use crate::model::{Account, AccountStorage, AccountTier, Liveness, MAX_ACCOUNTS, ModelFamily, STORAGE_VERSION, SwitchReason};
use crate::store;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Whether selection should stick to the current account or rotate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
    Sticky,
    RoundRobin,
}

/// The fields the OAuth login collaborator supplies for a brand-new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub refresh_token: String,
    pub project_id: Option<String>,
    pub access: Option<String>,
    pub expires: Option<u64>,
    pub email: Option<String>,
    pub tier: Option<AccountTier>,
}

/// Partial update applied by [`AccountPool::update_account`]; omitted fields
/// (`None`) are left untouched.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub access: Option<String>,
    pub expires: Option<u64>,
    pub refresh_token: Option<String>,
    pub project_id: Option<String>,
    pub email: Option<String>,
    pub tier: Option<AccountTier>,
}

struct PoolState {
    accounts: Vec<Account>,
    current_account_index: usize,
    rotation_index: usize,
}

/// A shared, mutex-guarded collection of upstream OAuth accounts.
pub struct AccountPool {
    state: tokio::sync::Mutex<PoolState>,
    storage_path: std::path::PathBuf,
}

impl AccountPool {
    /// Load a pool from `storage_path`, hydrating from disk if present.
    pub async fn load(storage_path: std::path::PathBuf) -> Result<Self> {
        match store::load(&storage_path).await? {
            Some(storage) => Ok(Self::from_storage(storage_path, storage)),
            None => Ok(Self::empty(storage_path)),
        }
    }

    /// Construct a pool with no accounts at all.
    pub fn empty(storage_path: std::path::PathBuf) -> Self {
        Self {
            state: tokio::sync::Mutex::new(PoolState {
                accounts: Vec::new(),
                current_account_index: 0,
                rotation_index: 0,
            }),
            storage_path,
        }
    }

    /// Construct a pool hydrated from previously persisted storage.
    pub fn from_storage(storage_path: std::path::PathBuf, storage: AccountStorage) -> Self {
        let active_index = if storage.accounts.is_empty() {
            0
        } else {
            storage.active_index.min(storage.accounts.len() - 1)
        };
        info!(accounts = storage.accounts.len(), "account pool hydrated from storage");
        Self {
            state: tokio::sync::Mutex::new(PoolState {
                accounts: storage.accounts,
                current_account_index: active_index,
                rotation_index: active_index,
            }),
            storage_path,
        }
    }

    /// Construct a pool seeded with a single account (no prior storage).
    pub fn seeded(storage_path: std::path::PathBuf, seed: NewAccount) -> Self {
        let account = Account {
            refresh_token: seed.refresh_token,
            project_id: seed.project_id,
            access: seed.access,
            expires: seed.expires,
            email: seed.email,
            tier: seed.tier,
            rate_limit_reset_times: Default::default(),
            liveness: Liveness::Unknown,
            last_used: 0,
            last_switch_reason: Some(SwitchReason::Initial),
            added_at: now_ms(),
        };
        Self {
            state: tokio::sync::Mutex::new(PoolState {
                accounts: vec![account],
                current_account_index: 0,
                rotation_index: 0,
            }),
            storage_path,
        }
    }

    /// Persist the current state to disk.
    pub async fn save(&self) -> Result<()> {
        let state = self.state.lock().await;
        let storage = AccountStorage {
            version: STORAGE_VERSION,
            accounts: state.accounts.clone(),
            active_index: state.current_account_index,
        };
        store::save(&self.storage_path, &storage).await
    }

    /// Select an account usable for `family`, per the sticky / round-robin
    /// algorithm. Returns a clone; callers address the account for
    /// subsequent mutation by its `refresh_token`.
    pub async fn select_account_for_family(
        &self,
        family: ModelFamily,
        mode: SelectionMode,
    ) -> Option<Account> {
        let mode_label = match mode {
            SelectionMode::Sticky => "sticky",
            SelectionMode::RoundRobin => "round_robin",
        };
        let selected = self.select_account_for_family_inner(family, mode).await;
        crate::metrics::record_selection(
            family_label(family),
            mode_label,
            if selected.is_some() { "hit" } else { "miss" },
        );
        selected
    }

    async fn select_account_for_family_inner(&self, family: ModelFamily, mode: SelectionMode) -> Option<Account> {
        let mut state = self.state.lock().await;
        let now = now_ms();

        if state.accounts.is_empty() {
            return None;
        }

        for account in state.accounts.iter_mut() {
            account.prune_expired_limits(now);
        }

        if mode == SelectionMode::RoundRobin && state.accounts.len() > 1 {
            return Self::next_for_family_locked(&mut state, family, now).map(|idx| {
                state.accounts[idx].last_switch_reason = Some(SwitchReason::Rotation);
                state.current_account_index = idx;
                state.accounts[idx].clone()
            });
        }

        let current = state.current_account_index.min(state.accounts.len() - 1);
        let current_eligible = !state.accounts[current].is_rate_limited_for(family, now)
            && !state.accounts[current].liveness.is_known_bad();

        if current_eligible {
            let current_is_paid = state.accounts[current].is_paid();
            let tier_upgrade_available = !current_is_paid
                && state.accounts.iter().enumerate().any(|(i, a)| {
                    i != current
                        && a.is_paid()
                        && !a.is_rate_limited_for(family, now)
                        && !a.liveness.is_known_bad()
                });

            if !tier_upgrade_available {
                state.accounts[current].last_used = now;
                return Some(state.accounts[current].clone());
            }
        }

        Self::next_for_family_locked(&mut state, family, now).map(|idx| {
            state.current_account_index = idx;
            state.accounts[idx].clone()
        })
    }

    /// Candidate selection within an already-locked state: excludes
    /// rate-limited and known-bad accounts, prefers confirmed-working over
    /// unknown, and paid over free within whichever class is non-empty.
    fn next_for_family_locked(state: &mut PoolState, family: ModelFamily, now: u64) -> Option<usize> {
        let candidates: Vec<usize> = state
            .accounts
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.is_rate_limited_for(family, now) && !a.liveness.is_known_bad())
            .map(|(i, _)| i)
            .collect();

        if candidates.is_empty() {
            return None;
        }

        let confirmed: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| state.accounts[i].liveness.is_ok())
            .collect();

        let pool = if !confirmed.is_empty() {
            let paid: Vec<usize> = confirmed.iter().copied().filter(|&i| state.accounts[i].is_paid()).collect();
            if paid.is_empty() { confirmed } else { paid }
        } else {
            let paid: Vec<usize> = candidates.iter().copied().filter(|&i| state.accounts[i].is_paid()).collect();
            if paid.is_empty() { candidates } else { paid }
        };

        let chosen = pool[state.rotation_index % pool.len()];
        state.rotation_index = state.rotation_index.wrapping_add(1);
        state.accounts[chosen].last_used = now;
        Some(chosen)
    }

    /// Add a new account. Returns `false` without mutating state if the
    /// pool is already at [`MAX_ACCOUNTS`].
    pub async fn add_account(&self, new_account: NewAccount) -> bool {
        let mut state = self.state.lock().await;
        if state.accounts.len() >= MAX_ACCOUNTS {
            return false;
        }
        state.accounts.push(Account {
            refresh_token: new_account.refresh_token,
            project_id: new_account.project_id,
            access: new_account.access,
            expires: new_account.expires,
            email: new_account.email,
            tier: new_account.tier,
            rate_limit_reset_times: Default::default(),
            liveness: Liveness::Unknown,
            last_used: 0,
            last_switch_reason: Some(SwitchReason::Initial),
            added_at: now_ms(),
        });
        info!(total = state.accounts.len(), "account added to pool");
        true
    }

    /// Remove the account at `index`, re-indexing the tail and clamping
    /// cursors back into range.
    pub async fn remove_account(&self, index: usize) -> bool {
        let mut state = self.state.lock().await;
        if index >= state.accounts.len() {
            return false;
        }
        state.accounts.remove(index);
        if state.accounts.is_empty() {
            state.current_account_index = 0;
            state.rotation_index = 0;
        } else {
            state.current_account_index = state.current_account_index.min(state.accounts.len() - 1);
            state.rotation_index = state.rotation_index.min(state.accounts.len() - 1);
        }
        info!(remaining = state.accounts.len(), "account removed from pool");
        true
    }

    /// Mark the account identified by `refresh_token` rate-limited for
    /// `family` until `now + duration_ms`.
    pub async fn mark_rate_limited(&self, refresh_token: &str, duration_ms: u64, family: ModelFamily) {
        let mut state = self.state.lock().await;
        let now = now_ms();
        if let Some(account) = find_mut(&mut state, refresh_token) {
            account.rate_limit_reset_times.insert(family, now + duration_ms);
            account.last_switch_reason = Some(SwitchReason::RateLimit);
            debug!(refresh_token = %redact(refresh_token), family = ?family, duration_ms, "account rate-limited");
            crate::metrics::record_rate_limit(family_label(family), "rate-limit");
        }
    }

    /// Mark the account identified by `refresh_token` as having invalid
    /// credentials.
    pub async fn mark_invalid_credentials(&self, refresh_token: &str, error: String) {
        let mut state = self.state.lock().await;
        let now = now_ms();
        if let Some(account) = find_mut(&mut state, refresh_token) {
            account.liveness = Liveness::Known {
                ok: false,
                last_error: Some(error),
                last_error_at: Some(now),
            };
            account.last_switch_reason = Some(SwitchReason::InvalidCreds);
        }
    }

    /// Mark the account identified by `refresh_token` as having valid,
    /// working credentials, clearing any prior error.
    pub async fn mark_valid_credentials(&self, refresh_token: &str) {
        let mut state = self.state.lock().await;
        if let Some(account) = find_mut(&mut state, refresh_token) {
            account.liveness = Liveness::Known {
                ok: true,
                last_error: None,
                last_error_at: None,
            };
        }
    }

    /// Apply a partial update to the account identified by `refresh_token`.
    /// Fields left as `None` in `update` are preserved.
    pub async fn update_account(&self, refresh_token: &str, update: AccountUpdate) {
        let mut state = self.state.lock().await;
        if let Some(account) = find_mut(&mut state, refresh_token) {
            if let Some(access) = update.access {
                account.access = Some(access);
            }
            if let Some(expires) = update.expires {
                account.expires = Some(expires);
            }
            if let Some(new_refresh) = update.refresh_token {
                account.refresh_token = new_refresh;
            }
            if let Some(project_id) = update.project_id {
                account.project_id = Some(project_id);
            }
            if let Some(email) = update.email {
                account.email = Some(email);
            }
            if let Some(tier) = update.tier {
                account.tier = Some(tier);
            }
        }
    }

    /// `0` if any account is currently usable for `family`; otherwise the
    /// minimum remaining wait (never negative) across accounts with a
    /// recorded reset time for `family`.
    pub async fn min_wait_time_for_family(&self, family: ModelFamily) -> u64 {
        let state = self.state.lock().await;
        let now = now_ms();

        let any_unlimited = state
            .accounts
            .iter()
            .any(|a| !a.is_rate_limited_for(family, now));
        if any_unlimited || state.accounts.is_empty() {
            return 0;
        }

        state
            .accounts
            .iter()
            .filter_map(|a| a.rate_limit_reset_times.get(&family))
            .map(|&reset_at| reset_at.saturating_sub(now))
            .min()
            .unwrap_or(0)
    }

    /// Find an account by its refresh token (the natural key for
    /// reconciling externally-supplied seed records).
    pub async fn find_by_refresh_token(&self, token: &str) -> Option<Account> {
        let state = self.state.lock().await;
        state.accounts.iter().find(|a| a.refresh_token == token).cloned()
    }

    /// How a user-visible error should refer to this account: its email if
    /// set, otherwise its current positional index in the pool.
    pub async fn account_ref(&self, refresh_token: &str) -> crate::error::AccountRef {
        let state = self.state.lock().await;
        match state.accounts.iter().position(|a| a.refresh_token == refresh_token) {
            Some(index) => match &state.accounts[index].email {
                Some(email) => crate::error::AccountRef::Email(email.clone()),
                None => crate::error::AccountRef::Index(index),
            },
            None => crate::error::AccountRef::Index(usize::MAX),
        }
    }

    /// Snapshot of every account currently in the pool.
    pub async fn accounts_snapshot(&self) -> Vec<Account> {
        self.state.lock().await.accounts.clone()
    }

    /// Number of accounts currently in the pool.
    pub async fn len(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn find_mut<'a>(state: &'a mut PoolState, refresh_token: &str) -> Option<&'a mut Account> {
    state.accounts.iter_mut().find(|a| a.refresh_token == refresh_token)
}

fn family_label(family: ModelFamily) -> &'static str {
    match family {
        ModelFamily::Claude => "claude",
        ModelFamily::GeminiFlash => "gemini-flash",
        ModelFamily::GeminiPro => "gemini-pro",
    }
}

fn redact(token: &str) -> String {
    if token.len() <= 8 {
        "***".to_string()
    } else {
        format!("{}***", &token[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(refresh_token: &str, tier: AccountTier, ok: Option<bool>) -> Account {
        Account {
            refresh_token: refresh_token.into(),
            project_id: Some(format!("proj-{refresh_token}")),
            access: Some(format!("at-{refresh_token}")),
            expires: Some(u64::MAX),
            email: Some(format!("{refresh_token}@example.com")),
            tier: Some(tier),
            rate_limit_reset_times: Default::default(),
            liveness: match ok {
                None => Liveness::Unknown,
                Some(ok) => Liveness::Known { ok, last_error: None, last_error_at: None },
            },
            last_used: 0,
            last_switch_reason: None,
            added_at: 0,
        }
    }

    fn pool_with(accounts: Vec<Account>) -> AccountPool {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        // Keep the tempdir alive for the pool's lifetime by leaking it —
        // these tests only ever read/write the path, never assert cleanup.
        std::mem::forget(dir);
        AccountPool::from_storage(
            path,
            AccountStorage { version: STORAGE_VERSION, accounts, active_index: 0 },
        )
    }

    #[tokio::test]
    async fn tier_upgrade_under_sticky_selection() {
        let pool = pool_with(vec![
            account("free", AccountTier::Free, None),
            account("paid", AccountTier::Paid, None),
        ]);

        let selected = pool
            .select_account_for_family(ModelFamily::GeminiPro, SelectionMode::Sticky)
            .await
            .unwrap();
        assert_eq!(selected.refresh_token, "paid");
    }

    #[tokio::test]
    async fn family_isolation() {
        let pool = pool_with(vec![account("a", AccountTier::Free, None)]);
        pool.mark_rate_limited("a", 60_000, ModelFamily::Claude).await;

        let gemini = pool
            .select_account_for_family(ModelFamily::GeminiFlash, SelectionMode::Sticky)
            .await;
        assert!(gemini.is_some());

        let claude = pool
            .select_account_for_family(ModelFamily::Claude, SelectionMode::Sticky)
            .await;
        assert!(claude.is_none());

        let wait = pool.min_wait_time_for_family(ModelFamily::Claude).await;
        assert!(wait > 0 && wait <= 60_000);
    }

    #[tokio::test]
    async fn round_robin_fairness_among_paid_confirmed() {
        let pool = pool_with(vec![
            account("p1", AccountTier::Paid, Some(true)),
            account("p2", AccountTier::Paid, Some(true)),
            account("free", AccountTier::Free, Some(true)),
        ]);

        let mut picks = Vec::new();
        for _ in 0..3 {
            let selected = pool
                .select_account_for_family(ModelFamily::Claude, SelectionMode::RoundRobin)
                .await
                .unwrap();
            picks.push(selected.refresh_token);
        }

        assert_eq!(picks, vec!["p1", "p2", "p1"]);
    }

    #[tokio::test]
    async fn add_account_respects_cap() {
        let pool = pool_with(Vec::new());
        for i in 0..MAX_ACCOUNTS {
            let added = pool
                .add_account(NewAccount {
                    refresh_token: format!("rt-{i}"),
                    project_id: None,
                    access: None,
                    expires: None,
                    email: None,
                    tier: None,
                })
                .await;
            assert!(added);
        }

        let rejected = pool
            .add_account(NewAccount {
                refresh_token: "overflow".into(),
                project_id: None,
                access: None,
                expires: None,
                email: None,
                tier: None,
            })
            .await;
        assert!(!rejected);
        assert_eq!(pool.len().await, MAX_ACCOUNTS);
    }

    #[tokio::test]
    async fn remove_account_reindexes_densely() {
        let pool = pool_with(vec![
            account("a", AccountTier::Free, None),
            account("b", AccountTier::Free, None),
            account("c", AccountTier::Free, None),
        ]);

        pool.remove_account(1).await;
        let remaining = pool.accounts_snapshot().await;
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].refresh_token, "a");
        assert_eq!(remaining[1].refresh_token, "c");
    }

    #[tokio::test]
    async fn known_bad_account_is_excluded_from_selection() {
        let pool = pool_with(vec![account("bad", AccountTier::Paid, Some(false))]);
        let selected = pool
            .select_account_for_family(ModelFamily::Claude, SelectionMode::Sticky)
            .await;
        assert!(selected.is_none());
    }

    #[tokio::test]
    async fn all_rate_limited_reports_min_wait() {
        let pool = pool_with(vec![
            account("a", AccountTier::Free, None),
            account("b", AccountTier::Free, None),
        ]);
        pool.mark_rate_limited("a", 30_000, ModelFamily::GeminiPro).await;
        pool.mark_rate_limited("b", 30_000, ModelFamily::GeminiPro).await;

        let selected = pool
            .select_account_for_family(ModelFamily::GeminiPro, SelectionMode::Sticky)
            .await;
        assert!(selected.is_none());

        let wait = pool.min_wait_time_for_family(ModelFamily::GeminiPro).await;
        assert!(wait > 0, "expected a positive wait, got {wait}");
    }

    #[tokio::test]
    async fn update_account_preserves_omitted_fields() {
        let pool = pool_with(vec![account("a", AccountTier::Free, None)]);
        pool.update_account(
            "a",
            AccountUpdate { access: Some("new-access".into()), ..Default::default() },
        )
        .await;

        let updated = pool.find_by_refresh_token("a").await.unwrap();
        assert_eq!(updated.access.as_deref(), Some("new-access"));
        assert_eq!(updated.project_id.as_deref(), Some("proj-a"));
    }

    #[tokio::test]
    async fn mark_invalid_then_valid_clears_error() {
        let pool = pool_with(vec![account("a", AccountTier::Free, None)]);
        pool.mark_invalid_credentials("a", "bad grant".into()).await;
        let after_invalid = pool.find_by_refresh_token("a").await.unwrap();
        assert!(after_invalid.liveness.is_known_bad());

        pool.mark_valid_credentials("a").await;
        let after_valid = pool.find_by_refresh_token("a").await.unwrap();
        assert!(after_valid.liveness.is_ok());
    }

    #[tokio::test]
    async fn save_then_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        let pool = AccountPool::from_storage(
            path.clone(),
            AccountStorage {
                version: STORAGE_VERSION,
                accounts: vec![account("a", AccountTier::Paid, None)],
                active_index: 0,
            },
        );
        pool.save().await.unwrap();

        let reloaded = AccountPool::load(path).await.unwrap();
        assert_eq!(reloaded.len().await, 1);
    }
}
