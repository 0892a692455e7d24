// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Layer a config file over the defaults.

use super::types::{ConfigFile, OrchestratorConfig};

/// Overlay every field the file sets onto `base`.
pub fn apply_config_file(base: &mut OrchestratorConfig, file: &ConfigFile) {
    if let Some(ref dir) = file.data_dir {
        base.data_dir = dir.clone();
    }
    if let Some(v) = file.idle_timeout_ms {
        base.idle_timeout_ms = v;
    }
    if let Some(v) = file.hard_timeout_ms {
        base.hard_timeout_ms = v;
    }
    if let Some(v) = file.meeting_turn_timeout_ms {
        base.meeting_turn_timeout_ms = v;
    }
    if let Some(policy) = file.busy_retry {
        base.busy_retry = policy;
    }
    if file.audit_chain_seed.is_some() {
        base.audit_chain_seed = file.audit_chain_seed.clone();
    }
    if let Some(v) = file.max_review_rounds {
        base.max_review_rounds = v;
    }
    if let Some(v) = file.stream_dedup_window_ms {
        base.stream_dedup_window_ms = v;
    }
    if let Some(v) = file.max_reply_chars {
        base.max_reply_chars = v;
    }
    if let Some(ref v) = file.github_api_base {
        base.github_api_base = v.clone();
    }
    if let Some(ref v) = file.copilot_base_url {
        base.copilot_base_url = v.clone();
    }
    if let Some(ref v) = file.antigravity_base_url {
        base.antigravity_base_url = v.clone();
    }
}
