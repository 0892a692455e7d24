// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task lifecycle.
//!
//! ```text
//! inbox -> planned -> collaborating -> in_progress -> review -> done
//!                                          ^   |         |
//!                                          |   v         |
//!                                        pending         +--> in_progress (revision)
//!
//! any non-terminal state -> cancelled
//! ```
//!
//! The [`Orchestrator`] drives tasks along this graph: a planning meeting,
//! delegation of cross-department subtasks, an isolated agent run, review
//! rounds, and finally a merge.

pub mod engine;
pub mod registry;
pub mod state;
pub mod store;
pub mod types;

use thiserror::Error;

use crate::error::StorageError;
use crate::ledger::IngressResponse;
use crate::meeting::MeetingError;
use crate::runner::RunnerError;
use crate::worktree::WorktreeError;

pub use engine::{
    Directive, Orchestrator, OrchestratorServices, PlanVerdict, ReviewVerdict, RunDisposition,
    StopOutcome, TaskCreation,
};
pub use registry::{ActiveRunRegistry, RunTicket, StopMode};
pub use state::{SubtaskStatus, TaskStatus};
pub use store::TaskStore;
pub use types::{CompletionArchive, NewTask, Subtask, Task, TaskLog};

/// Error type for workflow operations.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Illegal transition for task {task_id}: {from} -> {to}")]
    IllegalTransition {
        task_id: String,
        from: state::TaskStatus,
        to: state::TaskStatus,
    },

    #[error("Task {0} has no assigned agent")]
    Unassigned(String),

    #[error("Agent {agent_id} is not usable: {reason}")]
    InvalidAgent { agent_id: String, reason: String },

    #[error("Task {0} already has an active run")]
    AlreadyRunning(String),

    /// Rejected at the ingestion boundary.
    #[error("Ingress rejected: {0}")]
    Ingress(IngressResponse),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Meeting(#[from] MeetingError),

    #[error(transparent)]
    Worktree(#[from] WorktreeError),

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

impl WorkflowError {
    /// Whether the same call may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ingress(response) => response.retryable,
            Self::Storage(e) => e.is_retryable(),
            Self::AlreadyRunning(_) => true,
            _ => false,
        }
    }
}

impl From<IngressResponse> for WorkflowError {
    fn from(response: IngressResponse) -> Self {
        Self::Ingress(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(WorkflowError::Ingress(IngressResponse::audit_unavailable("disk")).is_retryable());
        assert!(!WorkflowError::TaskNotFound("t".into()).is_retryable());
        assert!(WorkflowError::Storage(StorageError::Busy {
            operation: "tasks.insert".into(),
            attempts: 6
        })
        .is_retryable());
    }

    #[test]
    fn test_transition_message() {
        let err = WorkflowError::IllegalTransition {
            task_id: "t1".into(),
            from: TaskStatus::Inbox,
            to: TaskStatus::Done,
        };
        assert_eq!(err.to_string(), "Illegal transition for task t1: inbox -> done");
    }
}
