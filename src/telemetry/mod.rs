// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and in-process metrics.
//!
//! Every component logs through `tracing` with structured fields
//! (`task_id`, `provider`, `branch`, ...). Timed operations and run outcomes
//! are recorded in [`GLOBAL_METRICS`] when the `telemetry` feature is on.
//!
//! ```rust,ignore
//! use climpire::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::from_verbosity(1))?;
//! ```

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{
    Histogram, Metrics, MetricsSnapshot, OperationMetrics, RunMetrics, RunResult, GLOBAL_METRICS,
};
