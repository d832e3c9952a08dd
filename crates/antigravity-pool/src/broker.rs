//! Credential broker: turns a model id into a currently-usable credential
//!
//! Sits between the dispatch loop and the account pool. Each call either
//! returns a ready-to-use `{access, refresh, projectId, expires}` tuple or
//! fails with a typed [`Error`] the caller can act on (notably
//! `RateLimitedAll`, which carries a wait hint).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{AccountRef, Error, Result};
use crate::model::{AccountTier, ModelFamily};
use crate::pool::{AccountPool, AccountUpdate, NewAccount, SelectionMode};
use crate::refresh::TokenRefresher;

/// The credential handed back to a caller about to make a model request.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access: String,
    pub refresh: String,
    pub project_id: String,
    pub expires: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LegacyCredentialEntry {
    refresh: String,
    access: Option<String>,
    expires: Option<u64>,
    #[serde(rename = "projectId")]
    project_id: Option<String>,
}

const LEGACY_PROVIDER_KEY: &str = "google-antigravity";

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Resolves a usable credential for a model, refreshing and persisting as
/// needed, and seeding the pool from a legacy single-credential file the
/// first time it sees an empty store.
pub struct CredentialBroker {
    pool: AccountPool,
    refresher: Box<dyn TokenRefresher>,
    legacy_credential_path: Option<PathBuf>,
}

impl CredentialBroker {
    pub fn new(pool: AccountPool, refresher: Box<dyn TokenRefresher>, legacy_credential_path: Option<PathBuf>) -> Self {
        Self { pool, refresher, legacy_credential_path }
    }

    pub fn pool(&self) -> &AccountPool {
        &self.pool
    }

    /// Resolve a usable credential for `model_id`.
    pub async fn get_credential_for_model(&self, model_id: &str) -> Result<Option<Credential>> {
        self.seed_from_legacy_file_if_empty().await?;

        if self.pool.is_empty().await {
            return Err(Error::NoAccounts);
        }

        let family = ModelFamily::from_model_id(model_id);
        let mode = if self.pool.len().await >= 2 { SelectionMode::RoundRobin } else { SelectionMode::Sticky };

        let account = match self.pool.select_account_for_family(family, mode).await {
            Some(account) => account,
            None => {
                let wait = self.pool.min_wait_time_for_family(family).await;
                if wait > 0 {
                    return Err(Error::RateLimitedAll { family, retry_after_ms: wait });
                }
                return Ok(None);
            }
        };

        let Some(project_id) = account.project_id.clone() else {
            return Ok(None);
        };

        let now = now_ms();
        let stale = account.access.is_none() || account.expires.is_some_and(|expires| now >= expires);

        if !stale {
            self.pool.save().await?;
            return Ok(Some(Credential {
                access: account.access.expect("checked non-stale implies access present"),
                refresh: account.refresh_token,
                project_id,
                expires: account.expires,
            }));
        }

        if let Some(refreshed) = self.refresher.refresh(&account.refresh_token, &project_id).await {
            crate::metrics::record_refresh("success");
            self.pool
                .update_account(
                    &account.refresh_token,
                    AccountUpdate { access: Some(refreshed.access_token.clone()), expires: Some(refreshed.expires_at_ms), ..Default::default() },
                )
                .await;
            self.pool.save().await?;
            return Ok(Some(Credential {
                access: refreshed.access_token,
                refresh: account.refresh_token,
                project_id,
                expires: Some(refreshed.expires_at_ms),
            }));
        }

        crate::metrics::record_refresh("failure");
        warn!(family = ?family, "refresh failed for selected account, cooling down and trying one fallback");
        self.pool.mark_rate_limited(&account.refresh_token, 60_000, family).await;

        let fallback = match self.pool.select_account_for_family(family, mode).await {
            Some(fallback) if fallback.refresh_token != account.refresh_token => fallback,
            _ => {
                let account_ref = self.pool.account_ref(&account.refresh_token).await;
                return Err(Error::RefreshFailed { account: account_ref, family });
            }
        };

        let Some(fallback_project_id) = fallback.project_id.clone() else {
            let account_ref = self.pool.account_ref(&fallback.refresh_token).await;
            return Err(Error::RefreshFailed { account: account_ref, family });
        };

        match self.refresher.refresh(&fallback.refresh_token, &fallback_project_id).await {
            Some(refreshed) => {
                crate::metrics::record_refresh("success");
                self.pool
                    .update_account(
                        &fallback.refresh_token,
                        AccountUpdate { access: Some(refreshed.access_token.clone()), expires: Some(refreshed.expires_at_ms), ..Default::default() },
                    )
                    .await;
                self.pool.save().await?;
                Ok(Some(Credential {
                    access: refreshed.access_token,
                    refresh: fallback.refresh_token,
                    project_id: fallback_project_id,
                    expires: Some(refreshed.expires_at_ms),
                }))
            }
            None => {
                crate::metrics::record_refresh("failure");
                let account_ref = self.pool.account_ref(&fallback.refresh_token).await;
                Err(Error::RefreshFailed { account: account_ref, family })
            }
        }
    }

    async fn seed_from_legacy_file_if_empty(&self) -> Result<()> {
        if !self.pool.is_empty().await {
            return Ok(());
        }
        let Some(path) = &self.legacy_credential_path else { return Ok(()) };
        match read_legacy_credential(path).await {
            Ok(Some(entry)) => {
                info!(path = %path.display(), "seeding account pool from legacy credential file");
                self.pool
                    .add_account(NewAccount {
                        refresh_token: entry.refresh,
                        project_id: entry.project_id,
                        access: entry.access,
                        expires: entry.expires,
                        email: None,
                        tier: Some(AccountTier::Free),
                    })
                    .await;
                self.pool.save().await?;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read legacy credential file, skipping seed");
                Ok(())
            }
        }
    }
}

async fn read_legacy_credential(path: &Path) -> std::result::Result<Option<LegacyCredentialEntry>, std::io::Error> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut map: std::collections::HashMap<String, LegacyCredentialEntry> = match serde_json::from_str(&contents) {
        Ok(map) => map,
        Err(_) => return Ok(None),
    };

    Ok(map.remove(LEGACY_PROVIDER_KEY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Account, AccountStorage, Liveness, STORAGE_VERSION};
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    struct FakeRefresher {
        outcomes: StdMutex<StdHashMap<String, Option<crate::refresh::RefreshedToken>>>,
    }

    impl FakeRefresher {
        fn new() -> Self {
            Self { outcomes: StdMutex::new(Default::default()) }
        }

        fn succeed_for(&self, refresh_token: &str, access_token: &str) {
            self.outcomes.lock().unwrap().insert(
                refresh_token.to_string(),
                Some(crate::refresh::RefreshedToken { access_token: access_token.into(), expires_at_ms: now_ms() + 3_600_000 }),
            );
        }

        fn fail_for(&self, refresh_token: &str) {
            self.outcomes.lock().unwrap().insert(refresh_token.to_string(), None);
        }
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self, refresh_token: &str, _project_id: &str) -> Option<crate::refresh::RefreshedToken> {
            self.outcomes.lock().unwrap().get(refresh_token).cloned().flatten()
        }
    }

    fn account(refresh_token: &str, access: Option<&str>, expires: Option<u64>) -> Account {
        Account {
            refresh_token: refresh_token.into(),
            project_id: Some(format!("proj-{refresh_token}")),
            access: access.map(String::from),
            expires,
            email: None,
            tier: Some(AccountTier::Free),
            rate_limit_reset_times: StdHashMap::new(),
            liveness: Liveness::Unknown,
            last_used: 0,
            last_switch_reason: None,
            added_at: 0,
        }
    }

    fn pool_with(accounts: Vec<Account>) -> AccountPool {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");
        std::mem::forget(dir);
        AccountPool::from_storage(path, AccountStorage { version: STORAGE_VERSION, accounts, active_index: 0 })
    }

    #[tokio::test]
    async fn returns_fresh_credential_without_refreshing() {
        let pool = pool_with(vec![account("rt1", Some("fresh-access"), Some(now_ms() + 3_600_000))]);
        let broker = CredentialBroker::new(pool, Box::new(FakeRefresher::new()), None);

        let credential = broker.get_credential_for_model("claude-sonnet-4-5").await.unwrap().unwrap();
        assert_eq!(credential.access, "fresh-access");
    }

    #[tokio::test]
    async fn refreshes_stale_token_and_persists() {
        let pool = pool_with(vec![account("rt1", None, None)]);
        let refresher = FakeRefresher::new();
        refresher.succeed_for("rt1", "new-access");
        let broker = CredentialBroker::new(pool, Box::new(refresher), None);

        let credential = broker.get_credential_for_model("gemini-2.5-pro").await.unwrap().unwrap();
        assert_eq!(credential.access, "new-access");

        let refreshed_account = broker.pool().find_by_refresh_token("rt1").await.unwrap();
        assert_eq!(refreshed_account.access.as_deref(), Some("new-access"));
    }

    #[tokio::test]
    async fn falls_back_to_second_account_on_refresh_failure() {
        let pool = pool_with(vec![account("rt1", None, None), account("rt2", Some("tokB"), Some(now_ms() + 3_600_000))]);
        let refresher = FakeRefresher::new();
        refresher.fail_for("rt1");
        refresher.succeed_for("rt2", "tokB");
        let broker = CredentialBroker::new(pool, Box::new(refresher), None);

        let credential = broker.get_credential_for_model("claude-sonnet-4-5").await.unwrap().unwrap();
        assert_eq!(credential.access, "tokB");
        assert_eq!(credential.project_id, "proj-rt2");
    }

    #[tokio::test]
    async fn rate_limited_all_reports_wait() {
        let pool = pool_with(vec![account("rt1", Some("a"), Some(now_ms() + 3_600_000))]);
        pool.mark_rate_limited("rt1", 30_000, ModelFamily::GeminiPro).await;
        let broker = CredentialBroker::new(pool, Box::new(FakeRefresher::new()), None);

        let err = broker.get_credential_for_model("gemini-2.5-pro").await.unwrap_err();
        match err {
            Error::RateLimitedAll { retry_after_ms, .. } => assert!(retry_after_ms > 0),
            other => panic!("expected RateLimitedAll, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn seeds_from_legacy_credential_file_when_pool_empty() {
        let dir = tempfile::tempdir().unwrap();
        let legacy_path = dir.path().join("credentials.json");
        tokio::fs::write(
            &legacy_path,
            r#"{"google-antigravity":{"refresh":"legacy-rt","access":"legacy-access","expires":9999999999999,"projectId":"legacy-proj"}}"#,
        )
        .await
        .unwrap();

        let pool = pool_with(Vec::new());
        let broker = CredentialBroker::new(pool, Box::new(FakeRefresher::new()), Some(legacy_path));

        let credential = broker.get_credential_for_model("claude-sonnet-4-5").await.unwrap().unwrap();
        assert_eq!(credential.access, "legacy-access");
        assert_eq!(credential.project_id, "legacy-proj");
    }

    #[tokio::test]
    async fn empty_pool_reports_no_accounts() {
        let pool = pool_with(Vec::new());
        let broker = CredentialBroker::new(pool, Box::new(FakeRefresher::new()), None);

        let err = broker.get_credential_for_model("claude-sonnet-4-5").await.unwrap_err();
        assert!(matches!(err, Error::NoAccounts));
    }

    #[tokio::test]
    async fn missing_project_id_yields_no_credential() {
        let mut acc = account("rt1", Some("a"), Some(now_ms() + 3_600_000));
        acc.project_id = None;
        let pool = pool_with(vec![acc]);
        let broker = CredentialBroker::new(pool, Box::new(FakeRefresher::new()), None);

        let credential = broker.get_credential_for_model("claude-sonnet-4-5").await.unwrap();
        assert!(credential.is_none());
    }
}
