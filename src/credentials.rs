// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! OAuth account selection for HTTP providers.
//!
//! The handshake that produces tokens happens elsewhere; this side only
//! picks accounts in priority order and keeps failure bookkeeping.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use tracing::{debug, warn};

use crate::storage::{now_ms, Database};

/// Accounts that stop working this many times in a row are parked.
pub const MAX_CONSECUTIVE_FAILURES: i64 = 3;

/// Account lookup and health bookkeeping.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    /// Active account ids for a provider, best first.
    fn active_oauth_account_ids(&self, provider: &str) -> Vec<String>;

    fn access_token(&self, account_id: &str) -> Option<String>;

    fn record_failure(&self, account_id: &str, error: &str);

    fn record_success(&self, account_id: &str);
}

/// [`CredentialStore`] over the `oauth_accounts` table.
#[derive(Debug, Clone)]
pub struct SqliteCredentials {
    db: Arc<Database>,
}

impl SqliteCredentials {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Register or replace an account (used by the operator binary and tests).
    pub async fn upsert_account(
        &self,
        id: &str,
        provider: &str,
        access_token: &str,
        priority: i64,
    ) -> Result<(), crate::error::StorageError> {
        self.db
            .write("oauth_accounts.upsert", |conn| {
                conn.execute(
                    "INSERT INTO oauth_accounts (id, provider, access_token, priority, status)
                     VALUES (?1, ?2, ?3, ?4, 'active')
                     ON CONFLICT(id) DO UPDATE SET
                        provider = excluded.provider,
                        access_token = excluded.access_token,
                        priority = excluded.priority,
                        status = 'active',
                        failure_count = 0",
                    params![id, provider, access_token, priority],
                )
            })
            .await
            .map(|_| ())
    }
}

impl CredentialStore for SqliteCredentials {
    fn active_oauth_account_ids(&self, provider: &str) -> Vec<String> {
        let result = self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM oauth_accounts
                 WHERE provider = ?1 AND status = 'active'
                 ORDER BY priority ASC, COALESCE(last_success_at, 0) DESC, id ASC",
            )?;
            let rows = stmt.query_map(params![provider], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()
        });
        result.unwrap_or_else(|e| {
            warn!(provider, error = %e, "failed to list oauth accounts");
            Vec::new()
        })
    }

    fn access_token(&self, account_id: &str) -> Option<String> {
        self.db
            .read(|conn| {
                conn.query_row(
                    "SELECT access_token FROM oauth_accounts WHERE id = ?1",
                    params![account_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
            .ok()
            .flatten()
    }

    fn record_failure(&self, account_id: &str, error: &str) {
        let now = now_ms();
        let result = self.db.write_once(|conn| {
            conn.execute(
                "UPDATE oauth_accounts SET
                    failure_count = failure_count + 1,
                    last_error = ?2,
                    last_failed_at = ?3,
                    status = CASE WHEN failure_count + 1 >= ?4 THEN 'disabled' ELSE status END
                 WHERE id = ?1",
                params![account_id, error, now, MAX_CONSECUTIVE_FAILURES],
            )
        });
        if let Err(e) = result {
            warn!(account_id, error = %e, "failed to record oauth failure");
        } else {
            debug!(account_id, "oauth account failure recorded");
        }
    }

    fn record_success(&self, account_id: &str) {
        let now = now_ms();
        let result = self.db.write_once(|conn| {
            conn.execute(
                "UPDATE oauth_accounts SET failure_count = 0, last_error = NULL, last_success_at = ?2
                 WHERE id = ?1",
                params![account_id, now],
            )
        });
        if let Err(e) = result {
            warn!(account_id, error = %e, "failed to record oauth success");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteCredentials {
        let creds = SqliteCredentials::new(Arc::new(Database::open_in_memory().unwrap()));
        creds.upsert_account("acct-b", "copilot", "tok-b", 20).await.unwrap();
        creds.upsert_account("acct-a", "copilot", "tok-a", 10).await.unwrap();
        creds.upsert_account("acct-g", "antigravity", "tok-g", 10).await.unwrap();
        creds
    }

    #[tokio::test]
    async fn test_priority_order_per_provider() {
        let creds = store().await;
        assert_eq!(
            creds.active_oauth_account_ids("copilot"),
            vec!["acct-a".to_string(), "acct-b".to_string()]
        );
        assert_eq!(creds.access_token("acct-g").as_deref(), Some("tok-g"));
        assert!(creds.access_token("missing").is_none());
    }

    #[tokio::test]
    async fn test_repeated_failures_disable_account() {
        let creds = store().await;
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            creds.record_failure("acct-a", "401 unauthorized");
        }
        assert_eq!(creds.active_oauth_account_ids("copilot"), vec!["acct-b".to_string()]);
    }

    #[tokio::test]
    async fn test_success_resets_failures() {
        let creds = store().await;
        creds.record_failure("acct-a", "timeout");
        creds.record_failure("acct-a", "timeout");
        creds.record_success("acct-a");
        creds.record_failure("acct-a", "timeout");
        assert_eq!(creds.active_oauth_account_ids("copilot").len(), 2);
    }
}
