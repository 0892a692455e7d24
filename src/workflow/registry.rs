// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory registry of active runs.
//!
//! One run per task at a time. A stop request records its mode and flips
//! the run's watch channel; the runner observes the channel and kills the
//! process tree.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

/// What happens to a task after its run is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Park in `pending`; resumable.
    Pause,
    /// Move to `cancelled` and roll back the worktree.
    Cancel,
}

impl StopMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopMode::Pause => "pause",
            StopMode::Cancel => "cancel",
        }
    }
}

impl std::str::FromStr for StopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(StopMode::Pause),
            "cancel" => Ok(StopMode::Cancel),
            other => Err(format!("unknown stop mode: {}", other)),
        }
    }
}

struct ActiveRun {
    stop_tx: watch::Sender<bool>,
    stop_mode: Option<StopMode>,
}

/// Handle held by the run loop for the duration of a run.
///
/// Dropping it does not unregister; call [`ActiveRunRegistry::finish`].
#[derive(Debug)]
pub struct RunTicket {
    pub task_id: String,
    pub stop: watch::Receiver<bool>,
}

#[derive(Default)]
pub struct ActiveRunRegistry {
    runs: Mutex<HashMap<String, ActiveRun>>,
}

impl std::fmt::Debug for ActiveRunRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveRunRegistry")
            .field("active", &self.active_task_ids())
            .finish()
    }
}

impl ActiveRunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ActiveRun>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a run. `None` if the task already has one.
    pub fn begin(&self, task_id: &str) -> Option<RunTicket> {
        let mut runs = self.lock();
        if runs.contains_key(task_id) {
            return None;
        }
        let (stop_tx, stop) = watch::channel(false);
        runs.insert(
            task_id.to_string(),
            ActiveRun {
                stop_tx,
                stop_mode: None,
            },
        );
        debug!(task_id, "run registered");
        Some(RunTicket {
            task_id: task_id.to_string(),
            stop,
        })
    }

    /// Ask a run to stop. Returns false when no run is active.
    ///
    /// A later request overrides the mode of an earlier one.
    pub fn request_stop(&self, task_id: &str, mode: StopMode) -> bool {
        let mut runs = self.lock();
        match runs.get_mut(task_id) {
            Some(run) => {
                run.stop_mode = Some(mode);
                let _ = run.stop_tx.send(true);
                debug!(task_id, mode = mode.as_str(), "stop requested");
                true
            }
            None => false,
        }
    }

    /// Stop mode recorded for a run, if any.
    pub fn stop_mode(&self, task_id: &str) -> Option<StopMode> {
        self.lock().get(task_id).and_then(|run| run.stop_mode)
    }

    /// Unregister a run and return the stop mode it ended with.
    pub fn finish(&self, task_id: &str) -> Option<StopMode> {
        self.lock().remove(task_id).and_then(|run| run.stop_mode)
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        self.lock().contains_key(task_id)
    }

    pub fn active_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}
