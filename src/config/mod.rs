// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Orchestrator configuration.
//!
//! Resolved in layers, later layers winning:
//! - built-in defaults
//! - `climpire.json` / `climpire.yaml` in the config directory
//! - `CLIMPIRE_*` environment variables
//!
//! Runtime toggles that operators flip while the process runs (auto-assign,
//! merge strategy, language) are not here; they live in the `settings`
//! table and are read through [`crate::settings::SettingsReader`].

mod env;
mod loader;
mod merger;
mod types;

pub use env::{apply_env, apply_env_with};
pub use loader::{find_config_file, load_config_file, load_dir_config, CONFIG_FILES};
pub use merger::apply_config_file;
pub use types::{
    default_data_dir, ConfigFile, OrchestratorConfig, AUDIT_FALLBACK_FILE, AUDIT_LOG_FILE,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load configuration for a process started in `config_dir`.
pub fn load_config(config_dir: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let mut config = OrchestratorConfig::default();
    if let Some(file) = load_dir_config(config_dir)? {
        apply_config_file(&mut config, &file);
    }
    apply_env(&mut config);
    Ok(config)
}

/// Load configuration from an explicit file path, then apply the environment.
pub fn load_config_from(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let mut config = OrchestratorConfig::default();
    apply_config_file(&mut config, &load_config_file(path)?);
    apply_env(&mut config);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_layer_then_env_layer() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("climpire.json"),
            r#"{"maxReplyChars": 900, "idleTimeoutMs": 5000}"#,
        )
        .unwrap();

        let mut config = OrchestratorConfig::default();
        apply_config_file(&mut config, &load_dir_config(temp.path()).unwrap().unwrap());
        apply_env_with(&mut config, |name| {
            (name == "CLIMPIRE_IDLE_TIMEOUT_MS").then(|| "7000".to_string())
        });

        assert_eq!(config.max_reply_chars, 900);
        assert_eq!(config.idle_timeout_ms, 7_000);
    }

    #[test]
    fn test_missing_explicit_file() {
        let temp = TempDir::new().unwrap();
        let result = load_config_from(&temp.path().join("nope.json"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
