// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-task git worktree isolation.
//!
//! Each task runs in its own working copy on its own branch:
//!
//! ```text
//! /project/                         # the user's repository
//! ├── .git/
//! ├── .climpire-worktrees/
//! │   ├── 3f2a9c1e/                 # task 3f2a9c1e-..., branch climpire/3f2a9c1e
//! │   └── _dev-3f2a9c1e/            # short-lived checkout of `dev` for dev_pr merges
//! └── src/
//! ```
//!
//! Creation problems are soft: the run continues in the project directory
//! and a warning is logged. Merge and auto-commit problems are hard errors.

mod bootstrap;
pub mod git;
mod manager;
pub mod policy;
mod pull_request;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::short_id;

pub use bootstrap::{ensure_repository, BOT_EMAIL, BOT_NAME};
pub use manager::WorktreeManager;
pub use policy::{PathVerdict, UntrackedPolicy};
pub use pull_request::{PullRequestClient, PullRequestTarget};

/// Directory under the project root that holds task worktrees.
pub const WORKTREE_DIR: &str = ".climpire-worktrees";

/// Branch prefix for task branches.
pub const BRANCH_PREFIX: &str = "climpire/";

/// Shared integration branch for the `dev_pr` merge strategy.
pub const DEV_BRANCH: &str = "dev";

/// Error type for worktree operations.
#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Not a git repository: {0}")]
    NotARepository(String),

    #[error("No worktree recorded for task {0}")]
    NoWorktree(String),

    #[error("Pull request API error: {0}")]
    PullRequest(String),
}

/// In-memory record of one task's isolated checkout. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeRecord {
    pub task_id: String,
    pub worktree_path: PathBuf,
    pub branch_name: String,
    pub project_path: PathBuf,
    pub base_branch: Option<String>,
}

/// Branch name for a task.
pub fn branch_name_for(task_id: &str) -> String {
    format!("{}{}", BRANCH_PREFIX, short_id(task_id))
}

/// Worktree directory for a task.
pub fn worktree_path_for(project: &Path, task_id: &str) -> PathBuf {
    project.join(WORKTREE_DIR).join(short_id(task_id))
}

/// What auto-commit staged and what it refused to stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoCommitOutcome {
    pub committed: bool,
    pub staged_untracked: Vec<String>,
    pub blocked_untracked: Vec<String>,
    pub tracked_changes: usize,
}

/// Result of merging a task branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Merge commit created on the target branch.
    Merged {
        target: String,
        commit: String,
        files_changed: usize,
    },
    /// Merged into `dev` and pushed; `pr_url` when the API call worked.
    MergedToDev {
        commit: String,
        pushed: bool,
        pr_url: Option<String>,
    },
    /// The branch had no changes.
    NothingToMerge,
    /// The merge was aborted; the task branch is untouched.
    Conflict { files: Vec<String> },
    /// Only blocked untracked files were pending.
    RestrictedUntracked { files: Vec<String> },
}

impl MergeOutcome {
    /// Whether the task's work is now on the target line.
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. } | Self::MergedToDev { .. } | Self::NothingToMerge)
    }

    /// Stable code for logs and archives.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Merged { .. } => "merged",
            Self::MergedToDev { .. } => "merged_to_dev",
            Self::NothingToMerge => "nothing_to_merge",
            Self::Conflict { .. } => "conflict",
            Self::RestrictedUntracked { .. } => "restricted_untracked",
        }
    }
}

/// What rollback discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackSummary {
    pub branch: String,
    pub diff_stat: String,
}

/// Isolation operations the workflow depends on.
#[async_trait]
pub trait WorktreeProvider: Send + Sync {
    /// Return the task's worktree, creating it on first use.
    ///
    /// `None` means isolation is unavailable and the caller should run in
    /// the project directory; the reason has already been logged.
    async fn ensure(
        &self,
        task_id: &str,
        project_path: &Path,
        base_branch: Option<&str>,
    ) -> Option<WorktreeRecord>;

    async fn get(&self, task_id: &str) -> Option<WorktreeRecord>;

    /// Auto-commit and merge into the project's current branch.
    async fn merge(&self, task_id: &str, title: &str) -> Result<MergeOutcome, WorktreeError>;

    /// Auto-commit, merge into `dev`, push, and open or update a PR.
    async fn merge_to_dev(
        &self,
        task_id: &str,
        title: &str,
        pr: Option<PullRequestTarget>,
    ) -> Result<MergeOutcome, WorktreeError>;

    /// Log a diff summary and discard the task's worktree and branch.
    async fn rollback(&self, task_id: &str) -> Result<RollbackSummary, WorktreeError>;

    /// Remove the worktree and branch.
    async fn cleanup(&self, task_id: &str) -> Result<(), WorktreeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming() {
        let task = "3f2a9c1e-77aa-4b1d-9d0e-1234567890ab";
        assert_eq!(branch_name_for(task), "climpire/3f2a9c1e");
        assert_eq!(
            worktree_path_for(Path::new("/work/app"), task),
            PathBuf::from("/work/app/.climpire-worktrees/3f2a9c1e")
        );
    }

    #[test]
    fn test_merge_outcome_codes() {
        assert!(MergeOutcome::NothingToMerge.is_merged());
        assert!(!MergeOutcome::Conflict { files: vec![] }.is_merged());
        assert_eq!(
            MergeOutcome::RestrictedUntracked { files: vec![".env".into()] }.code(),
            "restricted_untracked"
        );
    }
}
