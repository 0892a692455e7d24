// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process metrics for agent runs, git operations and the audit ledger.
//!
//! No exporter: the operator binary prints [`MetricsSnapshot::format_report`]
//! and tests read snapshots directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// How an agent run ended, for per-provider accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunResult {
    Success,
    Failure,
    Timeout,
    Cancelled,
}

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Agent run metrics keyed by provider name.
    runs: RwLock<HashMap<String, RunMetrics>>,

    /// Timed operations (`worktree.merge`, `ledger.append`, ...).
    operations: RwLock<HashMap<String, OperationMetrics>>,

    audit_appends: AtomicU64,
    audit_fallbacks: AtomicU64,
    busy_exhaustions: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            audit_appends: AtomicU64::new(0),
            audit_fallbacks: AtomicU64::new(0),
            busy_exhaustions: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one finished agent run.
    pub fn record_run(&self, provider: &str, duration: Duration, result: RunResult) {
        let mut runs = self.runs.write().unwrap_or_else(|p| p.into_inner());
        runs.entry(provider.to_string())
            .or_insert_with(RunMetrics::new)
            .record(duration, result);
    }

    /// Record a generic timed operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write().unwrap_or_else(|p| p.into_inner());
        ops.entry(name.to_string())
            .or_insert_with(OperationMetrics::new)
            .record(duration);
    }

    /// Count an audit line written to the primary chain.
    pub fn record_audit_append(&self) {
        self.audit_appends.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an audit line diverted to the fallback log.
    pub fn record_audit_fallback(&self) {
        self.audit_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a write that ran out of busy retries.
    pub fn record_busy_exhaustion(&self) {
        self.busy_exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    /// Get run metrics for a provider.
    pub fn run_metrics(&self, provider: &str) -> Option<RunMetrics> {
        self.runs
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(provider)
            .cloned()
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs: self.runs.read().unwrap_or_else(|p| p.into_inner()).clone(),
            operations: self
                .operations
                .read()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
            audit_appends: self.audit_appends.load(Ordering::Relaxed),
            audit_fallbacks: self.audit_fallbacks.load(Ordering::Relaxed),
            busy_exhaustions: self.busy_exhaustions.load(Ordering::Relaxed),
            uptime: self.start_time.elapsed(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.runs.write().unwrap_or_else(|p| p.into_inner()).clear();
        self.operations
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .clear();
        self.audit_appends.store(0, Ordering::Relaxed);
        self.audit_fallbacks.store(0, Ordering::Relaxed);
        self.busy_exhaustions.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-provider run statistics.
#[derive(Debug, Clone)]
pub struct RunMetrics {
    pub runs: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl RunMetrics {
    fn new() -> Self {
        Self {
            runs: 0,
            successes: 0,
            failures: 0,
            timeouts: 0,
            cancellations: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
        }
    }

    fn record(&mut self, duration: Duration, result: RunResult) {
        self.runs += 1;
        match result {
            RunResult::Success => self.successes += 1,
            RunResult::Failure => self.failures += 1,
            RunResult::Timeout => self.timeouts += 1,
            RunResult::Cancelled => self.cancellations += 1,
        }
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
    }

    /// Fraction of runs that succeeded (1.0 when nothing ran).
    pub fn success_rate(&self) -> f64 {
        if self.runs == 0 {
            1.0
        } else {
            self.successes as f64 / self.runs as f64
        }
    }
}

/// Generic operation metrics with a latency histogram.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    /// Calculate average duration.
    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

/// Fixed-bucket latency histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Upper bucket bounds in milliseconds; the last count is overflow.
    bounds_ms: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bounds (milliseconds).
    pub fn with_bounds(bounds_ms: Vec<u64>) -> Self {
        let counts = vec![0; bounds_ms.len() + 1];
        Self { bounds_ms, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let idx = self
            .bounds_ms
            .iter()
            .position(|&b| ms <= b)
            .unwrap_or(self.bounds_ms.len());
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Approximate percentile as the upper bound of the matching bucket.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }
        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let ms = match self.bounds_ms.get(i) {
                    Some(bound) => *bound,
                    None => self.bounds_ms.last().copied().unwrap_or(0) * 10,
                };
                return Duration::from_millis(ms);
            }
        }
        Duration::ZERO
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Git and SQLite ops land in the low buckets, agent runs in the high ones.
        Self::with_bounds(vec![1, 10, 100, 1_000, 10_000, 60_000, 600_000])
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub runs: HashMap<String, RunMetrics>,
    pub operations: HashMap<String, OperationMetrics>,
    pub audit_appends: u64,
    pub audit_fallbacks: u64,
    pub busy_exhaustions: u64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Metrics Report ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Audit: {} appended, {} fallback, {} busy exhaustions\n\n",
            self.audit_appends, self.audit_fallbacks, self.busy_exhaustions
        ));

        if !self.runs.is_empty() {
            report.push_str("Agent Runs:\n");
            let mut providers: Vec<_> = self.runs.iter().collect();
            providers.sort_by(|a, b| a.0.cmp(b.0));
            for (provider, m) in providers {
                report.push_str(&format!(
                    "  {}: {} runs, {:.1}% success, {} timeouts, max {:.2?}\n",
                    provider,
                    m.runs,
                    m.success_rate() * 100.0,
                    m.timeouts,
                    m.max_duration
                ));
            }
            report.push('\n');
        }

        if !self.operations.is_empty() {
            report.push_str("Operations:\n");
            let mut ops: Vec<_> = self.operations.iter().collect();
            ops.sort_by(|a, b| a.0.cmp(b.0));
            for (name, m) in ops {
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    m.count,
                    m.avg_duration(),
                    m.histogram.p99()
                ));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_metrics_by_result() {
        let metrics = Metrics::new();
        metrics.record_run("claude", Duration::from_secs(3), RunResult::Success);
        metrics.record_run("claude", Duration::from_secs(9), RunResult::Timeout);
        metrics.record_run("codex", Duration::from_secs(1), RunResult::Failure);

        let claude = metrics.run_metrics("claude").unwrap();
        assert_eq!(claude.runs, 2);
        assert_eq!(claude.timeouts, 1);
        assert_eq!(claude.max_duration, Duration::from_secs(9));
        assert!((claude.success_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.run_metrics("codex").unwrap().failures, 1);
    }

    #[test]
    fn test_histogram_buckets_and_percentile() {
        let mut hist = Histogram::default();
        for _ in 0..99 {
            hist.record(Duration::from_millis(5));
        }
        hist.record(Duration::from_secs(30));

        assert_eq!(hist.counts()[1], 99);
        assert_eq!(hist.counts()[5], 1);
        assert_eq!(hist.percentile(50.0), Duration::from_millis(10));
        assert_eq!(hist.p99(), Duration::from_millis(10));
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = Metrics::new();
        metrics.record_operation("worktree.merge", Duration::from_millis(40));
        metrics.record_audit_append();
        metrics.record_audit_fallback();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.audit_appends, 1);
        assert_eq!(snapshot.audit_fallbacks, 1);
        assert!(snapshot.format_report().contains("worktree.merge"));

        metrics.reset();
        assert!(metrics.operation_metrics("worktree.merge").is_none());
        assert_eq!(metrics.snapshot().audit_appends, 0);
    }
}
