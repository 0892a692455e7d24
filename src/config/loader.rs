// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::ConfigFile;

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &["climpire.json", "climpire.yaml", "climpire.yml"];

/// Find the first config file present in `dir`.
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Load the config file from `dir`, if any.
pub fn load_dir_config(dir: &Path) -> Result<Option<ConfigFile>, ConfigError> {
    match find_config_file(dir) {
        Some(path) => load_config_file(&path).map(Some),
        None => Ok(None),
    }
}

/// Load a configuration file (JSON or YAML by extension).
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_no_config_file() {
        let temp = TempDir::new().unwrap();
        assert!(load_dir_config(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("climpire.json"),
            r#"{"idleTimeoutMs": 60000, "auditChainSeed": "s3ed"}"#,
        )
        .unwrap();

        let config = load_dir_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.idle_timeout_ms, Some(60_000));
        assert_eq!(config.audit_chain_seed.as_deref(), Some("s3ed"));
    }

    #[test]
    fn test_load_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("climpire.yaml"),
            "maxReviewRounds: 2\nbusyRetry:\n  maxAttempts: 3\n  baseDelayMs: 10\n  maxDelayMs: 100\n  jitterMs: 0\n",
        )
        .unwrap();

        let config = load_dir_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.max_review_rounds, Some(2));
        assert_eq!(config.busy_retry.unwrap().max_attempts, 3);
    }

    #[test]
    fn test_json_wins_over_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("climpire.json"), "{}").unwrap();
        std::fs::write(temp.path().join("climpire.yaml"), "maxReviewRounds: 9").unwrap();
        let found = find_config_file(temp.path()).unwrap();
        assert!(found.ends_with("climpire.json"));
    }

    #[test]
    fn test_invalid_json_is_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("climpire.json"), "{ nope").unwrap();
        assert!(matches!(
            load_dir_config(temp.path()),
            Err(ConfigError::JsonError(_))
        ));
    }
}
