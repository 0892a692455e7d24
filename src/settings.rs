// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Runtime settings stored in the `settings` table.
//!
//! Unlike [`crate::config`], these are re-read on every decision so an
//! operator can flip them while the orchestrator runs.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StorageError;
use crate::storage::Database;
use crate::types::Lang;

pub const KEY_AUTO_ASSIGN: &str = "autoAssign";
pub const KEY_DEFAULT_PROVIDER: &str = "defaultProvider";
pub const KEY_PROVIDER_MODEL_CONFIG: &str = "providerModelConfig";
pub const KEY_LANGUAGE: &str = "language";
pub const KEY_MERGE_STRATEGY: &str = "mergeStrategy";
pub const KEY_GITHUB_REPO: &str = "githubRepo";

/// Read access to string settings.
#[cfg_attr(test, mockall::automock)]
pub trait SettingsReader: Send + Sync {
    fn read_setting_string(&self, key: &str) -> Option<String>;
}

/// [`SettingsReader`] backed by the SQLite `settings` table.
#[derive(Debug, Clone)]
pub struct SqliteSettings {
    db: Arc<Database>,
}

impl SqliteSettings {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a setting.
    pub async fn write_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.db
            .write("settings.put", |conn| {
                conn.execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )
            })
            .await
            .map(|_| ())
    }
}

impl SettingsReader for SqliteSettings {
    fn read_setting_string(&self, key: &str) -> Option<String> {
        let result = self.db.read(|conn| {
            conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
        });
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "failed to read setting");
                None
            }
        }
    }
}

/// How a finished task branch reaches the shared line of development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// `git merge --no-ff` into the project's current branch.
    #[default]
    Direct,
    /// Merge into `dev`, push, and open a pull request.
    DevPr,
}

impl FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "direct" => Ok(Self::Direct),
            "dev_pr" | "dev-pr" => Ok(Self::DevPr),
            other => Err(format!("unknown merge strategy: {}", other)),
        }
    }
}

/// Model overrides for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderModelConfig {
    #[serde(default)]
    pub model: Option<String>,
    /// Model used for short meeting turns, when cheaper than `model`.
    #[serde(default)]
    pub sub_model: Option<String>,
    #[serde(default)]
    pub reasoning_level: Option<String>,
}

/// Typed view over the runtime settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeSettings {
    pub auto_assign: bool,
    pub default_provider: Option<String>,
    pub provider_models: HashMap<String, ProviderModelConfig>,
    pub language: Lang,
    pub merge_strategy: MergeStrategy,
    pub github_repo: Option<String>,
}

impl RuntimeSettings {
    /// Snapshot every known setting. Malformed values fall back to defaults.
    pub fn load(reader: &dyn SettingsReader) -> Self {
        let auto_assign = reader
            .read_setting_string(KEY_AUTO_ASSIGN)
            .map(|v| matches!(v.trim(), "true" | "1"))
            .unwrap_or(false);

        let provider_models = match reader.read_setting_string(KEY_PROVIDER_MODEL_CONFIG) {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "ignoring malformed providerModelConfig");
                HashMap::new()
            }),
            None => HashMap::new(),
        };

        let merge_strategy = reader
            .read_setting_string(KEY_MERGE_STRATEGY)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();

        Self {
            auto_assign,
            default_provider: reader
                .read_setting_string(KEY_DEFAULT_PROVIDER)
                .filter(|v| !v.trim().is_empty()),
            provider_models,
            language: Lang::from_setting(reader.read_setting_string(KEY_LANGUAGE).as_deref()),
            merge_strategy,
            github_repo: reader
                .read_setting_string(KEY_GITHUB_REPO)
                .filter(|v| v.contains('/')),
        }
    }

    pub fn model_for(&self, provider: &str) -> Option<&ProviderModelConfig> {
        self.provider_models.get(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_settings_roundtrip() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let settings = SqliteSettings::new(db);
        assert!(settings.read_setting_string(KEY_LANGUAGE).is_none());

        settings.write_setting(KEY_LANGUAGE, "ko").await.unwrap();
        settings.write_setting(KEY_LANGUAGE, "ja").await.unwrap();
        assert_eq!(settings.read_setting_string(KEY_LANGUAGE).as_deref(), Some("ja"));
    }

    fn mock_with(values: &'static [(&'static str, &'static str)]) -> MockSettingsReader {
        let mut reader = MockSettingsReader::new();
        reader.expect_read_setting_string().returning(move |key| {
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        });
        reader
    }

    #[test]
    fn test_runtime_settings_from_mock() {
        let reader = mock_with(&[
            (KEY_AUTO_ASSIGN, "true"),
            (KEY_MERGE_STRATEGY, "dev_pr"),
            (
                KEY_PROVIDER_MODEL_CONFIG,
                r#"{"claude":{"model":"opus","reasoningLevel":"high"}}"#,
            ),
        ]);

        let settings = RuntimeSettings::load(&reader);
        assert!(settings.auto_assign);
        assert_eq!(settings.merge_strategy, MergeStrategy::DevPr);
        assert_eq!(
            settings.model_for("claude").and_then(|c| c.model.as_deref()),
            Some("opus")
        );
        assert_eq!(settings.language, Lang::En);
        assert!(settings.github_repo.is_none());
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let reader = mock_with(&[
            (KEY_AUTO_ASSIGN, "yes please"),
            (KEY_PROVIDER_MODEL_CONFIG, "not json"),
            (KEY_GITHUB_REPO, "no-slash"),
            (KEY_MERGE_STRATEGY, "squash"),
            (KEY_LANGUAGE, "klingon"),
        ]);

        let settings = RuntimeSettings::load(&reader);
        assert!(!settings.auto_assign);
        assert!(settings.provider_models.is_empty());
        assert_eq!(settings.merge_strategy, MergeStrategy::Direct);
        assert_eq!(settings.language, Lang::En);
        assert!(settings.github_repo.is_none());
    }
}
