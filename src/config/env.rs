// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Environment variable overrides.
//!
//! Numeric variables are range-checked. An unparsable or out-of-range value
//! is ignored with a warning and the previous layer's value stays in effect.

use std::ops::RangeInclusive;
use std::path::PathBuf;

use tracing::warn;

use super::types::OrchestratorConfig;

pub const ENV_DATA_DIR: &str = "CLIMPIRE_DATA_DIR";
pub const ENV_IDLE_TIMEOUT_MS: &str = "CLIMPIRE_IDLE_TIMEOUT_MS";
pub const ENV_HARD_TIMEOUT_MS: &str = "CLIMPIRE_HARD_TIMEOUT_MS";
pub const ENV_MEETING_TURN_TIMEOUT_MS: &str = "CLIMPIRE_MEETING_TURN_TIMEOUT_MS";
pub const ENV_BUSY_MAX_ATTEMPTS: &str = "CLIMPIRE_DB_BUSY_RETRY_MAX_ATTEMPTS";
pub const ENV_BUSY_BASE_DELAY_MS: &str = "CLIMPIRE_DB_BUSY_RETRY_BASE_DELAY_MS";
pub const ENV_BUSY_MAX_DELAY_MS: &str = "CLIMPIRE_DB_BUSY_RETRY_MAX_DELAY_MS";
pub const ENV_BUSY_JITTER_MS: &str = "CLIMPIRE_DB_BUSY_RETRY_JITTER_MS";
pub const ENV_AUDIT_CHAIN_SEED: &str = "CLIMPIRE_AUDIT_CHAIN_SEED";
pub const ENV_MAX_REVIEW_ROUNDS: &str = "CLIMPIRE_MAX_REVIEW_ROUNDS";
pub const ENV_STREAM_DEDUP_WINDOW_MS: &str = "CLIMPIRE_STREAM_DEDUP_WINDOW_MS";
pub const ENV_MAX_REPLY_CHARS: &str = "CLIMPIRE_MAX_REPLY_CHARS";

const DAY_MS: u64 = 86_400_000;

/// Apply overrides from the process environment.
pub fn apply_env(config: &mut OrchestratorConfig) {
    apply_env_with(config, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup (tests pass a map).
pub fn apply_env_with(config: &mut OrchestratorConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(dir) = non_empty(lookup(ENV_DATA_DIR)) {
        config.data_dir = PathBuf::from(dir);
    }
    if let Some(seed) = non_empty(lookup(ENV_AUDIT_CHAIN_SEED)) {
        config.audit_chain_seed = Some(seed);
    }

    override_num(&lookup, ENV_IDLE_TIMEOUT_MS, 1_000..=DAY_MS, &mut config.idle_timeout_ms);
    override_num(&lookup, ENV_HARD_TIMEOUT_MS, 0..=DAY_MS, &mut config.hard_timeout_ms);
    override_num(
        &lookup,
        ENV_MEETING_TURN_TIMEOUT_MS,
        1_000..=3_600_000,
        &mut config.meeting_turn_timeout_ms,
    );

    let retry = &mut config.busy_retry;
    override_num(&lookup, ENV_BUSY_MAX_ATTEMPTS, 1..=50, &mut retry.max_attempts);
    override_num(&lookup, ENV_BUSY_BASE_DELAY_MS, 1..=60_000, &mut retry.base_delay_ms);
    override_num(&lookup, ENV_BUSY_MAX_DELAY_MS, 1..=300_000, &mut retry.max_delay_ms);
    override_num(&lookup, ENV_BUSY_JITTER_MS, 0..=10_000, &mut retry.jitter_ms);
    if retry.max_delay_ms < retry.base_delay_ms {
        warn!(
            base = retry.base_delay_ms,
            max = retry.max_delay_ms,
            "busy retry max delay below base delay, raising it"
        );
        retry.max_delay_ms = retry.base_delay_ms;
    }

    override_num(&lookup, ENV_MAX_REVIEW_ROUNDS, 1..=20, &mut config.max_review_rounds);
    override_num(
        &lookup,
        ENV_STREAM_DEDUP_WINDOW_MS,
        0..=60_000,
        &mut config.stream_dedup_window_ms,
    );
    override_num(&lookup, ENV_MAX_REPLY_CHARS, 80..=20_000, &mut config.max_reply_chars);
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn override_num<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    range: RangeInclusive<T>,
    target: &mut T,
) where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let Some(raw) = non_empty(lookup(name)) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) if range.contains(&value) => *target = value,
        Ok(value) => warn!(
            var = name,
            %value,
            min = %range.start(),
            max = %range.end(),
            fallback = %target,
            "environment value out of range, ignoring"
        ),
        Err(_) => warn!(var = name, raw = %raw, fallback = %target, "environment value is not a number, ignoring"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn apply(vars: &[(&str, &str)]) -> OrchestratorConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = OrchestratorConfig::default();
        apply_env_with(&mut config, |name| map.get(name).cloned());
        config
    }

    #[test]
    fn test_valid_overrides() {
        let config = apply(&[
            (ENV_IDLE_TIMEOUT_MS, "60000"),
            (ENV_HARD_TIMEOUT_MS, "120000"),
            (ENV_BUSY_MAX_ATTEMPTS, "3"),
            (ENV_MAX_REVIEW_ROUNDS, "5"),
            (ENV_DATA_DIR, "/tmp/climpire-data"),
            (ENV_AUDIT_CHAIN_SEED, "seed-1"),
        ]);
        assert_eq!(config.idle_timeout_ms, 60_000);
        assert_eq!(config.hard_timeout_ms, 120_000);
        assert_eq!(config.busy_retry.max_attempts, 3);
        assert_eq!(config.max_review_rounds, 5);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/climpire-data"));
        assert_eq!(config.audit_chain_seed.as_deref(), Some("seed-1"));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = apply(&[
            (ENV_IDLE_TIMEOUT_MS, "soon"),
            (ENV_BUSY_MAX_ATTEMPTS, "0"),
            (ENV_MAX_REPLY_CHARS, "-5"),
            (ENV_MEETING_TURN_TIMEOUT_MS, "10"),
        ]);
        let defaults = OrchestratorConfig::default();
        assert_eq!(config.idle_timeout_ms, defaults.idle_timeout_ms);
        assert_eq!(config.busy_retry.max_attempts, 6);
        assert_eq!(config.max_reply_chars, 600);
        assert_eq!(config.meeting_turn_timeout_ms, 180_000);
    }

    #[test]
    fn test_blank_values_ignored() {
        let config = apply(&[(ENV_DATA_DIR, "  "), (ENV_AUDIT_CHAIN_SEED, "")]);
        assert!(config.audit_chain_seed.is_none());
        assert_eq!(config.data_dir, OrchestratorConfig::default().data_dir);
    }

    #[test]
    fn test_max_delay_raised_to_base() {
        let config = apply(&[
            (ENV_BUSY_BASE_DELAY_MS, "500"),
            (ENV_BUSY_MAX_DELAY_MS, "100"),
        ]);
        assert_eq!(config.busy_retry.max_delay_ms, 500);
    }
}
