// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task records.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::LogKind;

use super::state::{SubtaskStatus, TaskStatus};

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub department: Option<String>,
    pub assigned_agent_id: Option<String>,
    pub project_path: Option<PathBuf>,
    pub base_branch: Option<String>,
    /// Parent task when this one was delegated.
    pub source_task_id: Option<String>,
    /// Completion archive, JSON.
    pub result: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    /// Set exactly when `status` is `done`.
    pub completed_at: Option<i64>,
}

/// Fields for a task that does not exist yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub assigned_agent_id: Option<String>,
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub source_task_id: Option<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.assigned_agent_id = Some(agent_id.into());
        self
    }

    pub fn with_project(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_path = Some(path.into());
        self
    }

    pub fn with_base_branch(mut self, branch: impl Into<String>) -> Self {
        self.base_branch = Some(branch.into());
        self
    }

    /// Payload that defines "the same task" for idempotent creation.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "title": self.title,
            "description": self.description,
            "department": self.department,
            "assignedAgentId": self.assigned_agent_id,
            "projectPath": self.project_path,
            "baseBranch": self.base_branch,
            "sourceTaskId": self.source_task_id,
        })
    }
}

// ============================================================================
// Subtasks
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: String,
    pub task_id: String,
    pub title: String,
    pub status: SubtaskStatus,
    /// Department expected to do the work; another department means delegation.
    pub target_department: Option<String>,
    pub delegated_task_id: Option<String>,
    pub blocked_reason: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

// ============================================================================
// Logs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskLog {
    pub id: i64,
    pub task_id: String,
    pub kind: LogKind,
    pub message: String,
    pub created_at: i64,
}

// ============================================================================
// Completion archive
// ============================================================================

/// Summary written to `tasks.result` when a task is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionArchive {
    pub last_reply: Option<String>,
    /// Merge outcome code (`merged`, `nothing_to_merge`, ...).
    pub merge: Option<String>,
    pub merge_commit: Option<String>,
    pub pr_url: Option<String>,
    pub review_decision: Option<String>,
    pub review_rounds: i64,
}
