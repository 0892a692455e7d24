// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Climpire - multi-agent task orchestration.
//!
//! Tasks arrive as directives, are planned in a meeting of team leaders,
//! executed by a coding agent inside an isolated git worktree, reviewed by
//! consensus, and merged back. Every ingress write is deduplicated and
//! recorded in a hash-chained audit log.
//!
//! # Architecture
//!
//! Leaf modules first:
//!
//! - [`storage`] - Embedded SQLite with busy-retry writes
//! - [`worktree`] - Per-task git worktrees: create, merge, rollback
//! - [`runner`] - One-shot agent runs over CLI processes or HTTP providers
//! - [`meeting`] - Turn-based planning and review meetings
//! - [`ledger`] - Idempotent ingestion and the audit hash chain
//! - [`workflow`] - The task state machine and the [`workflow::Orchestrator`]
//!
//! Shared pieces: [`config`] (file and environment layers), [`settings`]
//! (runtime toggles stored in the database), [`credentials`] (OAuth
//! accounts), [`telemetry`] (tracing setup and metrics) and [`types`].
//!
//! # Example
//!
//! ```rust,ignore
//! use climpire::workflow::{Directive, Orchestrator};
//!
//! let created = orchestrator
//!     .create_task_from_directive(&Directive {
//!         sender: "ceo".into(),
//!         content: "Add a login form".into(),
//!         department: Some("Dev".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//! let task = orchestrator.drive(&created.task.id).await?;
//! ```

pub mod config;
pub mod credentials;
pub mod error;
pub mod ledger;
pub mod meeting;
pub mod runner;
pub mod settings;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod workflow;
pub mod worktree;

pub use error::{ConfigError, LedgerError, Result, StorageError};
pub use types::{Agent, AgentRole, AgentStatus, Lang, LogKind};
pub use workflow::{Directive, Orchestrator, OrchestratorServices, Task, TaskStatus, WorkflowError};

/// Climpire version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let agent = Agent::new("a1", "Ava", "Dev", AgentRole::TeamLeader, "claude");
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(TaskStatus::Done.is_terminal());
    }
}
