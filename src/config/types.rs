// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`ConfigFile`] is what `climpire.json` / `climpire.yaml` may contain,
//! every field optional. [`OrchestratorConfig`] is the resolved result the
//! rest of the crate consumes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::storage::BusyRetryPolicy;

/// File name of the hash-chained audit log inside the data directory.
pub const AUDIT_LOG_FILE: &str = "security-audit.ndjson";

/// File name of the audit fallback log inside the data directory.
pub const AUDIT_FALLBACK_FILE: &str = "security-audit-fallback.ndjson";

/// Partial configuration as read from a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// Directory holding the database and audit logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Kill a run after this long without output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,

    /// Kill a run after this long in total (0 disables)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hard_timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_turn_timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub busy_retry: Option<BusyRetryPolicy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_chain_seed: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_review_rounds: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_dedup_window_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reply_chars: Option<usize>,

    /// Base URL for GitHub REST calls (pull requests)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_api_base: Option<String>,

    /// OpenAI-compatible endpoint for the copilot provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copilot_base_url: Option<String>,

    /// OpenAI-compatible endpoint for the antigravity provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antigravity_base_url: Option<String>,
}

/// Fully resolved orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    pub data_dir: PathBuf,
    pub idle_timeout_ms: u64,
    /// Zero means no hard limit.
    pub hard_timeout_ms: u64,
    pub meeting_turn_timeout_ms: u64,
    pub busy_retry: BusyRetryPolicy,
    pub audit_chain_seed: Option<String>,
    pub max_review_rounds: u32,
    pub stream_dedup_window_ms: u64,
    pub max_reply_chars: usize,
    pub github_api_base: String,
    pub copilot_base_url: String,
    pub antigravity_base_url: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            idle_timeout_ms: 900_000,
            hard_timeout_ms: 0,
            meeting_turn_timeout_ms: 180_000,
            busy_retry: BusyRetryPolicy::default(),
            audit_chain_seed: None,
            max_review_rounds: 3,
            stream_dedup_window_ms: 1_500,
            max_reply_chars: 600,
            github_api_base: "https://api.github.com".to_string(),
            copilot_base_url: "https://api.githubcopilot.com".to_string(),
            antigravity_base_url: "https://antigravity.googleapis.com/v1".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join(AUDIT_LOG_FILE)
    }

    pub fn audit_fallback_path(&self) -> PathBuf {
        self.data_dir.join(AUDIT_FALLBACK_FILE)
    }

    /// Hard timeout as an option, `None` when disabled.
    pub fn hard_timeout(&self) -> Option<std::time::Duration> {
        (self.hard_timeout_ms > 0).then(|| std::time::Duration::from_millis(self.hard_timeout_ms))
    }

    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn meeting_turn_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.meeting_turn_timeout_ms)
    }
}

/// `~/.local/share/climpire` or platform equivalent, `.climpire` as last resort.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("climpire"))
        .unwrap_or_else(|| PathBuf::from(".climpire"))
}
