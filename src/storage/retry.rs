// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Exponential backoff for SQLite busy/locked contention.
//!
//! Writers that can collide with another connection (WAL checkpoints,
//! external readers holding a lock) go through [`with_busy_retry`]. Only
//! `SQLITE_BUSY` and `SQLITE_LOCKED` are retried; every other error is
//! returned on the first attempt. Exhaustion yields
//! [`StorageError::Busy`] carrying the attempt count.

use std::time::Duration;

use rand::Rng;
use rusqlite::ErrorCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StorageError;

/// Backoff parameters for busy retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusyRetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay_ms: u64,
    /// Upper bound for the exponential part of the delay.
    pub max_delay_ms: u64,
    /// Random extra delay in `[0, jitter_ms]` added to every wait.
    pub jitter_ms: u64,
}

impl Default for BusyRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay_ms: 25,
            max_delay_ms: 1_000,
            jitter_ms: 20,
        }
    }
}

impl BusyRetryPolicy {
    /// Delay to wait after the given failed attempt (1-based), without jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let raw = self.base_delay_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(raw.min(self.max_delay_ms))
    }

    fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
    }
}

/// Whether a rusqlite error is a transient busy/locked condition.
pub fn is_busy_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        }
        _ => false,
    }
}

/// Run `op` until it succeeds, fails with a non-busy error, or the policy
/// runs out of attempts.
///
/// `op` receives the 1-based attempt number.
pub async fn with_busy_retry<T, F>(
    policy: &BusyRetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut(u32) -> Result<T, rusqlite::Error>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "storage write succeeded after busy retry");
                }
                return Ok(value);
            }
            Err(err) if is_busy_error(&err) => {
                if attempt >= max_attempts {
                    warn!(operation, attempts = attempt, "storage busy, retries exhausted");
                    return Err(StorageError::Busy {
                        operation: operation.to_string(),
                        attempts: attempt,
                    });
                }
                let delay = policy.backoff_for(attempt) + policy.jitter();
                debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "storage busy, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY), None)
    }

    fn locked() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED), None)
    }

    fn fast_policy(max_attempts: u32) -> BusyRetryPolicy {
        BusyRetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 4,
            jitter_ms: 1,
        }
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = BusyRetryPolicy {
            max_attempts: 10,
            base_delay_ms: 10,
            max_delay_ms: 50,
            jitter_ms: 0,
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(40));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(50));
        assert_eq!(policy.backoff_for(30), Duration::from_millis(50));
    }

    #[test]
    fn test_is_busy_error() {
        assert!(is_busy_error(&busy()));
        assert!(is_busy_error(&locked()));
        assert!(!is_busy_error(&rusqlite::Error::QueryReturnedNoRows));
    }

    #[tokio::test]
    async fn test_succeeds_after_busy_failures_below_threshold() {
        let policy = fast_policy(5);
        let mut calls = 0;
        let result = with_busy_retry(&policy, "test", |_| {
            calls += 1;
            if calls < 4 {
                Err(busy())
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls, 4);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempt_count() {
        let policy = fast_policy(3);
        let mut calls = 0;
        let result: Result<(), _> = with_busy_retry(&policy, "insert_message", |_| {
            calls += 1;
            Err(locked())
        })
        .await;

        assert_eq!(calls, 3);
        match result {
            Err(StorageError::Busy { operation, attempts }) => {
                assert_eq!(operation, "insert_message");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected busy error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_busy_error_is_not_retried() {
        let policy = fast_policy(5);
        let mut calls = 0;
        let result: Result<(), _> = with_busy_retry(&policy, "read", |_| {
            calls += 1;
            Err(rusqlite::Error::InvalidQuery)
        })
        .await;

        assert_eq!(calls, 1);
        assert!(matches!(result, Err(StorageError::Database(_))));
    }
}
