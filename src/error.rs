// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types shared across the orchestration core.
//!
//! Component-specific errors (`WorktreeError`, `RunnerError`, `WorkflowError`,
//! `MeetingError`) live next to their modules; the types here cover storage,
//! the ingestion ledger and configuration, which every component touches.

use thiserror::Error;

/// Errors raised by the embedded SQLite store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The database stayed busy/locked for every retry attempt.
    #[error("Storage busy: {operation} gave up after {attempts} attempts")]
    Busy { operation: String, attempts: u32 },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// Whether the caller may retry the whole request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound(err.to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidData(err.to_string())
    }
}

/// Errors raised at the audit / idempotency boundary.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Same idempotency key, different payload.
    #[error("Idempotency conflict for key {key} in scope {scope}")]
    IdempotencyConflict { scope: String, key: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The hash-chained audit log could not be appended.
    #[error("Audit write failed: {0}")]
    AuditWriteFailed(String),
}

impl LedgerError {
    /// Check if the request can be retried unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_retryable(),
            Self::AuditWriteFailed(_) => true,
            Self::InvalidInput(_) | Self::IdempotencyConflict { .. } => false,
        }
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_busy_is_retryable() {
        let err = StorageError::Busy {
            operation: "insert_message".to_string(),
            attempts: 6,
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("6 attempts"));
        assert!(!StorageError::Database("boom".to_string()).is_retryable());
    }

    #[test]
    fn test_ledger_error_retryable() {
        assert!(LedgerError::AuditWriteFailed("disk full".to_string()).is_retryable());
        assert!(!LedgerError::IdempotencyConflict {
            scope: "messages".to_string(),
            key: "abc".to_string(),
        }
        .is_retryable());
        assert!(!LedgerError::InvalidInput("empty".to_string()).is_retryable());
    }

    #[test]
    fn test_storage_error_from_no_rows() {
        let err: StorageError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let config_err: ConfigError = result.unwrap_err().into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }
}
