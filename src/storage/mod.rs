// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Embedded SQLite store.
//!
//! One connection in WAL mode, shared behind a mutex. Lock hold times are
//! kept to a single statement or transaction; the mutex is never held across
//! an `.await`. Writes that may collide with another connection go through
//! [`Database::write`], which applies the busy-retry policy.

mod retry;
mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StorageError;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

pub use retry::{is_busy_error, with_busy_retry, BusyRetryPolicy};
pub use schema::SCHEMA_VERSION;

/// Database file name inside the data directory.
pub const DB_FILE: &str = "climpire.sqlite";

/// Current time as unix milliseconds, the timestamp format of every table.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Conversion error for a text column holding an unknown enum value.
pub(crate) fn invalid_text(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, message.into())
}

/// Shared handle to the SQLite database.
pub struct Database {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    retry: BusyRetryPolicy,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("retry", &self.retry)
            .finish()
    }
}

impl Database {
    /// Open or create the database inside a data directory.
    pub fn open(data_dir: &Path, retry: BusyRetryPolicy) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            StorageError::Database(format!("Failed to create data directory: {}", e))
        })?;
        Self::open_at(&data_dir.join(DB_FILE), retry)
    }

    /// Open or create a database at a specific path.
    pub fn open_at(db_path: &Path, retry: BusyRetryPolicy) -> Result<Self, StorageError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 0;",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
            path: Some(db_path.to_path_buf()),
            retry,
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open a private in-memory database (tests and dry runs).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
            path: None,
            retry: BusyRetryPolicy::default(),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Database file path, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Busy-retry policy used by [`Database::write`].
    pub fn retry_policy(&self) -> &BusyRetryPolicy {
        &self.retry
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.lock();
        conn.execute_batch(schema::CREATE_SCHEMA)?;

        let current: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?;
        if current.is_none() {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        Ok(())
    }

    // A panic while holding the lock leaves the connection itself usable.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a read-only closure against the connection.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StorageError> {
        let conn = self.lock();
        f(&conn).map_err(StorageError::from)
    }

    /// Run a single write without retry, for best-effort bookkeeping.
    pub fn write_once<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StorageError> {
        let mut conn = self.lock();
        f(&mut conn).map_err(StorageError::from)
    }

    /// Run a write closure with busy retry.
    ///
    /// The closure may run several times, so it must not have side effects
    /// outside the connection.
    pub async fn write<T>(
        &self,
        operation: &str,
        mut f: impl FnMut(&mut Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StorageError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let result = with_busy_retry(&self.retry, operation, |_| {
            let mut conn = self.lock();
            f(&mut conn)
        })
        .await;

        #[cfg(feature = "telemetry")]
        {
            GLOBAL_METRICS.record_operation(&format!("storage.{}", operation), start.elapsed());
            if matches!(result, Err(StorageError::Busy { .. })) {
                GLOBAL_METRICS.record_busy_exhaustion();
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_schema() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path(), BusyRetryPolicy::default()).unwrap();
        assert!(dir.path().join(DB_FILE).exists());

        let tables: Vec<String> = db
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect()
            })
            .unwrap();

        for expected in [
            "tasks",
            "subtasks",
            "messages",
            "task_logs",
            "meeting_minutes",
            "meeting_minute_entries",
            "task_creation_audits",
            "review_revision_history",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
        }
    }

    #[test]
    fn test_reopen_keeps_schema_version() {
        let dir = tempdir().unwrap();
        drop(Database::open(dir.path(), BusyRetryPolicy::default()).unwrap());
        let db = Database::open(dir.path(), BusyRetryPolicy::default()).unwrap();
        let versions: i64 = db
            .read(|conn| conn.query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[tokio::test]
    async fn test_write_roundtrip() {
        let db = Database::open_in_memory().unwrap();
        db.write("settings.put", |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES ('language', 'en')",
                [],
            )
        })
        .await
        .unwrap();

        let value: String = db
            .read(|conn| {
                conn.query_row("SELECT value FROM settings WHERE key = 'language'", [], |r| {
                    r.get(0)
                })
            })
            .unwrap();
        assert_eq!(value, "en");
    }
}
