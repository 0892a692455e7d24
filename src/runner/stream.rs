// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Normalization of streamed CLI output.
//!
//! Lines pass through ANSI stripping, carriage-return collapsing, an optional
//! noise filter, and a short time-window dedup before anyone sees them.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;

/// CSI, OSC and single-character escape sequences.
static ANSI: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]").ok()
});

const SPINNER_CHARS: &[char] = &[
    '⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏', '◐', '◓', '◑', '◒', '|', '/', '-', '\\',
];

/// Fixed banner lines some CLIs print on every run.
const NOISE_LINES: &[&str] = &[
    "reading prompt from stdin...",
    "reading additional input from stdin...",
    "loaded cached credentials.",
    "data collection is disabled.",
    "[dotenv] injecting env",
];

/// Entries older than this many windows are dropped from the dedup map.
const DEDUP_MAP_LIMIT: usize = 512;

/// Remove terminal escape sequences.
pub fn strip_ansi(s: &str) -> Cow<'_, str> {
    match ANSI.as_ref() {
        Some(re) if s.contains('\x1b') => re.replace_all(s, ""),
        _ => Cow::Borrowed(s),
    }
}

/// Collapse CRLF to LF and keep only the final overwrite of `\r` redraws.
pub fn collapse_carriage_returns(s: &str) -> Cow<'_, str> {
    if !s.contains('\r') {
        return Cow::Borrowed(s);
    }
    let unified = s.replace("\r\n", "\n");
    let collapsed: Vec<&str> = unified
        .split('\n')
        .map(|line| line.rsplit('\r').find(|seg| !seg.is_empty()).unwrap_or(""))
        .collect();
    Cow::Owned(collapsed.join("\n"))
}

/// Spinner frames, progress dots and fixed CLI banners.
pub fn is_noise_line(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    if trimmed.chars().all(|c| SPINNER_CHARS.contains(&c) || c == '.' || c.is_whitespace()) {
        return true;
    }
    // A spinner frame followed by a status word, e.g. "⠙ Thinking".
    let mut chars = trimmed.chars();
    if let Some(first) = chars.next() {
        if SPINNER_CHARS[..14].contains(&first) && chars.as_str().len() < 40 {
            return true;
        }
    }
    let lower = trimmed.to_ascii_lowercase();
    NOISE_LINES.iter().any(|n| lower.starts_with(n))
}

/// Full single-line cleanup without dedup.
pub fn clean_line(raw: &str) -> String {
    let stripped = strip_ansi(raw);
    collapse_carriage_returns(&stripped).trim_end().to_string()
}

/// Stateful per-stream normalizer.
#[derive(Debug)]
pub struct StreamNormalizer {
    window: Duration,
    filter_noise: bool,
    recent: HashMap<String, Instant>,
}

impl StreamNormalizer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            filter_noise: true,
            recent: HashMap::new(),
        }
    }

    pub fn with_noise_filter(mut self, enabled: bool) -> Self {
        self.filter_noise = enabled;
        self
    }

    /// Normalize one raw line, or `None` when it should be suppressed.
    pub fn push(&mut self, raw: &str) -> Option<String> {
        self.push_at(raw, Instant::now())
    }

    /// As [`push`](Self::push) with an explicit clock.
    pub fn push_at(&mut self, raw: &str, now: Instant) -> Option<String> {
        let line = clean_line(raw);
        if self.filter_noise && is_noise_line(&line) {
            return None;
        }
        if line.trim().is_empty() || self.window.is_zero() {
            return Some(line);
        }

        // The first sighting anchors the window; repeats inside it are dropped.
        if let Some(seen) = self.recent.get(&line) {
            if now.saturating_duration_since(*seen) < self.window {
                return None;
            }
        }
        if self.recent.len() >= DEDUP_MAP_LIMIT {
            let window = self.window;
            self.recent
                .retain(|_, seen| now.saturating_duration_since(*seen) < window);
        }
        self.recent.insert(line.clone(), now);
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[32mok\x1b[0m done"), "ok done");
        assert_eq!(strip_ansi("\x1b]0;title\x07text"), "text");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_carriage_returns() {
        assert_eq!(collapse_carriage_returns("a\r\nb\r\n"), "a\nb\n");
        assert_eq!(collapse_carriage_returns("10%\r50%\r100%"), "100%");
    }

    #[test]
    fn test_noise_filter() {
        assert!(is_noise_line("⠙"));
        assert!(is_noise_line("⠹ Thinking"));
        assert!(is_noise_line("Reading prompt from stdin..."));
        assert!(is_noise_line("..."));
        assert!(!is_noise_line("- item one"));
        assert!(!is_noise_line("Implemented the login form"));
    }

    #[test]
    fn test_dedup_window() {
        let mut n = StreamNormalizer::new(Duration::from_millis(1500));
        let t0 = Instant::now();
        assert_eq!(n.push_at("building", t0).as_deref(), Some("building"));
        assert_eq!(n.push_at("building", t0 + Duration::from_millis(500)), None);
        assert_eq!(n.push_at("other", t0 + Duration::from_millis(600)).as_deref(), Some("other"));
        assert_eq!(
            n.push_at("building", t0 + Duration::from_millis(1600)).as_deref(),
            Some("building")
        );
    }

    #[test]
    fn test_zero_window_keeps_everything() {
        let mut n = StreamNormalizer::new(Duration::ZERO).with_noise_filter(false);
        assert!(n.push("x").is_some());
        assert!(n.push("x").is_some());
        assert_eq!(n.push("⠙").as_deref(), Some("⠙"));
    }
}
