// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task, subtask, log and agent rows.
//!
//! Status changes go through [`TaskStore::transition`], which checks the
//! graph and keeps `completed_at` in step with `done` inside one write.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StorageError;
use crate::runner::{OutputHub, StreamEvent};
use crate::storage::{invalid_text, now_ms, Database};
use crate::types::{Agent, AgentRole, AgentStatus, LogKind};

use super::state::{SubtaskStatus, TaskStatus};
use super::types::{NewTask, Subtask, Task, TaskLog};
use super::WorkflowError;

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get("status")?;
    let project_path: Option<String> = row.get("project_path")?;
    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: TaskStatus::from_str(&status).map_err(invalid_text)?,
        department: row.get("department")?,
        assigned_agent_id: row.get("assigned_agent_id")?,
        project_path: project_path.map(PathBuf::from),
        base_branch: row.get("base_branch")?,
        source_task_id: row.get("source_task_id")?,
        result: row.get("result")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn subtask_from_row(row: &Row<'_>) -> rusqlite::Result<Subtask> {
    let status: String = row.get("status")?;
    Ok(Subtask {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        title: row.get("title")?,
        status: SubtaskStatus::from_str(&status).map_err(invalid_text)?,
        target_department: row.get("target_department")?,
        delegated_task_id: row.get("delegated_task_id")?,
        blocked_reason: row.get("blocked_reason")?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<TaskLog> {
    let kind: String = row.get("kind")?;
    Ok(TaskLog {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        kind: LogKind::from_str(&kind).map_err(invalid_text)?,
        message: row.get("message")?,
        created_at: row.get("created_at")?,
    })
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let role: String = row.get("role")?;
    let status: String = row.get("status")?;
    Ok(Agent {
        id: row.get("id")?,
        name: row.get("name")?,
        department: row.get("department")?,
        role: AgentRole::from_str(&role).map_err(invalid_text)?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        reasoning_level: row.get("reasoning_level")?,
        personality: row.get("personality")?,
        oauth_account_id: row.get("oauth_account_id")?,
        status: AgentStatus::from_str(&status).map_err(invalid_text)?,
        current_task_id: row.get("current_task_id")?,
    })
}

fn task_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<Task>> {
    conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id], task_from_row)
        .optional()
}

enum TransitionCheck {
    Missing,
    Illegal(TaskStatus),
    Applied(Task),
}

/// Persistence for the workflow.
#[derive(Debug, Clone)]
pub struct TaskStore {
    db: Arc<Database>,
    hub: Option<OutputHub>,
}

impl TaskStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db, hub: None }
    }

    /// Publish every appended log line to `hub` as well.
    pub fn with_hub(mut self, hub: OutputHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Insert a task in `inbox`.
    pub async fn insert(&self, new: &NewTask) -> Result<Task, StorageError> {
        let now = now_ms();
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: new.title.trim().to_string(),
            description: new.description.clone(),
            status: TaskStatus::Inbox,
            department: new.department.clone(),
            assigned_agent_id: new.assigned_agent_id.clone(),
            project_path: new.project_path.clone(),
            base_branch: new.base_branch.clone(),
            source_task_id: new.source_task_id.clone(),
            result: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        let project = task.project_path.as_ref().map(|p| p.to_string_lossy().into_owned());
        self.db
            .write("tasks.insert", |conn| {
                conn.execute(
                    "INSERT INTO tasks
                        (id, title, description, status, department, assigned_agent_id,
                         project_path, base_branch, source_task_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        task.id,
                        task.title,
                        task.description,
                        task.status.as_str(),
                        task.department,
                        task.assigned_agent_id,
                        project,
                        task.base_branch,
                        task.source_task_id,
                        task.created_at,
                        task.updated_at,
                    ],
                )
            })
            .await?;
        debug!(task_id = %task.id, title = %task.title, "task inserted");
        Ok(task)
    }

    /// Remove a task and everything that cascades from it.
    pub async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let changed = self
            .db
            .write("tasks.delete", |conn| {
                conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            })
            .await?;
        Ok(changed > 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<Task>, StorageError> {
        self.db.read(|conn| task_by_id(conn, id))
    }

    /// Like [`TaskStore::get`], but a missing task is an error.
    pub fn require(&self, id: &str) -> Result<Task, WorkflowError> {
        self.get(id)?
            .ok_or_else(|| WorkflowError::TaskNotFound(id.to_string()))
    }

    /// Tasks, newest first, optionally filtered by status.
    pub fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>, StorageError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC, id",
            )?;
            let rows = stmt.query_map(params![status.map(|s| s.as_str())], task_from_row)?;
            rows.collect()
        })
    }

    /// Move a task along the status graph.
    ///
    /// Entering `in_progress` stamps `started_at` once; entering `done`
    /// stamps `completed_at`; any other target clears it.
    pub async fn transition(&self, id: &str, next: TaskStatus) -> Result<Task, WorkflowError> {
        let now = now_ms();
        let check = self
            .db
            .write("tasks.transition", |conn| {
                let tx = conn.transaction()?;
                let Some(current) = task_by_id(&tx, id)? else {
                    return Ok(TransitionCheck::Missing);
                };
                if !current.status.can_transition_to(next) {
                    return Ok(TransitionCheck::Illegal(current.status));
                }
                tx.execute(
                    "UPDATE tasks SET
                        status = ?2,
                        updated_at = ?3,
                        started_at = CASE WHEN ?2 = 'in_progress' AND started_at IS NULL THEN ?3 ELSE started_at END,
                        completed_at = CASE WHEN ?2 = 'done' THEN ?3 ELSE NULL END
                     WHERE id = ?1",
                    params![id, next.as_str(), now],
                )?;
                let updated = task_by_id(&tx, id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
                tx.commit()?;
                Ok(TransitionCheck::Applied(updated))
            })
            .await?;

        match check {
            TransitionCheck::Applied(task) => {
                debug!(task_id = id, status = %task.status, "task transitioned");
                Ok(task)
            }
            TransitionCheck::Missing => Err(WorkflowError::TaskNotFound(id.to_string())),
            TransitionCheck::Illegal(from) => Err(WorkflowError::IllegalTransition {
                task_id: id.to_string(),
                from,
                to: next,
            }),
        }
    }

    pub async fn set_assigned_agent(&self, id: &str, agent_id: Option<&str>) -> Result<(), StorageError> {
        self.db
            .write("tasks.assign", |conn| {
                conn.execute(
                    "UPDATE tasks SET assigned_agent_id = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, agent_id, now_ms()],
                )
            })
            .await?;
        Ok(())
    }

    /// Store the completion archive.
    pub async fn set_result(&self, id: &str, result: &str) -> Result<(), StorageError> {
        self.db
            .write("tasks.result", |conn| {
                conn.execute(
                    "UPDATE tasks SET result = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, result, now_ms()],
                )
            })
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------

    /// Append a log line and publish it to viewers.
    ///
    /// Log writes are best-effort: a failure is reported but never aborts
    /// the caller's work.
    pub async fn append_log(&self, task_id: &str, kind: LogKind, message: &str) {
        let created_at = now_ms();
        let result = self
            .db
            .write("task_logs.append", |conn| {
                conn.execute(
                    "INSERT INTO task_logs (task_id, kind, message, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![task_id, kind.as_str(), message, created_at],
                )
            })
            .await;
        if let Err(e) = result {
            warn!(task_id, kind = kind.as_str(), error = %e, "failed to append task log");
        }
        if let Some(hub) = &self.hub {
            hub.publish(StreamEvent::new(Some(task_id), kind, message));
        }
    }

    /// Persist lines that viewers already saw live, in one transaction.
    pub async fn append_streamed(&self, task_id: &str, kind: LogKind, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        let created_at = now_ms();
        let result = self
            .db
            .write("task_logs.append_streamed", |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO task_logs (task_id, kind, message, created_at) VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for line in lines {
                        stmt.execute(params![task_id, kind.as_str(), line, created_at])?;
                    }
                }
                tx.commit()
            })
            .await;
        if let Err(e) = result {
            warn!(task_id, lines = lines.len(), error = %e, "failed to persist streamed output");
        }
    }

    /// Logs for a task in append order.
    pub fn logs(&self, task_id: &str) -> Result<Vec<TaskLog>, StorageError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM task_logs WHERE task_id = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![task_id], log_from_row)?;
            rows.collect()
        })
    }

    // ------------------------------------------------------------------
    // Subtasks
    // ------------------------------------------------------------------

    pub async fn add_subtask(
        &self,
        task_id: &str,
        title: &str,
        target_department: Option<&str>,
    ) -> Result<Subtask, StorageError> {
        let subtask = Subtask {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            title: title.trim().to_string(),
            status: SubtaskStatus::Pending,
            target_department: target_department.map(str::to_string),
            delegated_task_id: None,
            blocked_reason: None,
            created_at: now_ms(),
            completed_at: None,
        };
        self.db
            .write("subtasks.insert", |conn| {
                conn.execute(
                    "INSERT INTO subtasks (id, task_id, title, status, target_department, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        subtask.id,
                        subtask.task_id,
                        subtask.title,
                        subtask.status.as_str(),
                        subtask.target_department,
                        subtask.created_at,
                    ],
                )
            })
            .await?;
        Ok(subtask)
    }

    pub fn subtasks(&self, task_id: &str) -> Result<Vec<Subtask>, StorageError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM subtasks WHERE task_id = ?1 ORDER BY created_at, id",
            )?;
            let rows = stmt.query_map(params![task_id], subtask_from_row)?;
            rows.collect()
        })
    }

    /// The subtask a delegated task was spawned for.
    pub fn subtask_for_delegated(&self, delegated_task_id: &str) -> Result<Option<Subtask>, StorageError> {
        self.db.read(|conn| {
            conn.query_row(
                "SELECT * FROM subtasks WHERE delegated_task_id = ?1",
                params![delegated_task_id],
                subtask_from_row,
            )
            .optional()
        })
    }

    pub async fn set_subtask_delegated(&self, subtask_id: &str, delegated_task_id: &str) -> Result<(), StorageError> {
        self.db
            .write("subtasks.delegate", |conn| {
                conn.execute(
                    "UPDATE subtasks SET delegated_task_id = ?2, status = 'in_progress' WHERE id = ?1",
                    params![subtask_id, delegated_task_id],
                )
            })
            .await?;
        Ok(())
    }

    pub async fn set_subtask_status(
        &self,
        subtask_id: &str,
        status: SubtaskStatus,
        blocked_reason: Option<&str>,
    ) -> Result<(), StorageError> {
        let completed_at = (status == SubtaskStatus::Done).then(now_ms);
        self.db
            .write("subtasks.status", |conn| {
                conn.execute(
                    "UPDATE subtasks SET status = ?2, blocked_reason = ?3, completed_at = ?4 WHERE id = ?1",
                    params![subtask_id, status.as_str(), blocked_reason, completed_at],
                )
            })
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    pub async fn upsert_agent(&self, agent: &Agent) -> Result<(), StorageError> {
        self.db
            .write("agents.upsert", |conn| {
                conn.execute(
                    "INSERT INTO agents
                        (id, name, department, role, provider, model, reasoning_level,
                         personality, oauth_account_id, status, current_task_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        department = excluded.department,
                        role = excluded.role,
                        provider = excluded.provider,
                        model = excluded.model,
                        reasoning_level = excluded.reasoning_level,
                        personality = excluded.personality,
                        oauth_account_id = excluded.oauth_account_id,
                        status = excluded.status,
                        current_task_id = excluded.current_task_id",
                    params![
                        agent.id,
                        agent.name,
                        agent.department,
                        agent.role.as_str(),
                        agent.provider,
                        agent.model,
                        agent.reasoning_level,
                        agent.personality,
                        agent.oauth_account_id,
                        agent.status.as_str(),
                        agent.current_task_id,
                    ],
                )
            })
            .await?;
        Ok(())
    }

    pub fn agent(&self, id: &str) -> Result<Option<Agent>, StorageError> {
        self.db.read(|conn| {
            conn.query_row("SELECT * FROM agents WHERE id = ?1", params![id], agent_from_row)
                .optional()
        })
    }

    /// Agents of a department, most senior first.
    pub fn agents_in_department(&self, department: &str) -> Result<Vec<Agent>, StorageError> {
        let mut agents = self.db.read(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM agents WHERE department = ?1 ORDER BY id")?;
            let rows = stmt.query_map(params![department], agent_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        agents.sort_by(|a, b| b.role.cmp(&a.role));
        Ok(agents)
    }

    /// Team leaders of every department, one per department.
    pub fn team_leaders(&self) -> Result<Vec<Agent>, StorageError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM agents WHERE role = 'team_leader' ORDER BY department, id",
            )?;
            let rows = stmt.query_map([], agent_from_row)?;
            let mut leaders: Vec<Agent> = Vec::new();
            for agent in rows {
                let agent = agent?;
                if !leaders.iter().any(|l| l.department == agent.department) {
                    leaders.push(agent);
                }
            }
            Ok(leaders)
        })
    }

    pub async fn set_agent_status(
        &self,
        id: &str,
        status: AgentStatus,
        current_task_id: Option<&str>,
    ) -> Result<(), StorageError> {
        self.db
            .write("agents.status", |conn| {
                conn.execute(
                    "UPDATE agents SET status = ?2, current_task_id = ?3 WHERE id = ?1",
                    params![id, status.as_str(), current_task_id],
                )
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TaskStore {
        TaskStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = store();
        let task = store
            .insert(&NewTask::new(" Add login ").with_department("Dev").with_project("/tmp/p"))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Inbox);
        assert_eq!(task.title, "Add login");

        let loaded = store.get(&task.id).unwrap().unwrap();
        assert_eq!(loaded, task);
        assert_eq!(store.list(Some(TaskStatus::Inbox)).unwrap().len(), 1);
        assert!(store.list(Some(TaskStatus::Done)).unwrap().is_empty());
        assert_eq!(store.list(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_at_tracks_done() {
        let store = store();
        let task = store.insert(&NewTask::new("T")).await.unwrap();
        for next in [
            TaskStatus::Planned,
            TaskStatus::Collaborating,
            TaskStatus::InProgress,
            TaskStatus::Review,
        ] {
            let t = store.transition(&task.id, next).await.unwrap();
            assert!(t.completed_at.is_none());
        }
        let in_review = store.get(&task.id).unwrap().unwrap();
        assert!(in_review.started_at.is_some());

        let done = store.transition(&task.id, TaskStatus::Done).await.unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert!(done.completed_at.is_some());
        assert_eq!(done.started_at, in_review.started_at);
    }

    #[tokio::test]
    async fn test_illegal_transition() {
        let store = store();
        let task = store.insert(&NewTask::new("T")).await.unwrap();
        let err = store.transition(&task.id, TaskStatus::Review).await.unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::IllegalTransition { from: TaskStatus::Inbox, to: TaskStatus::Review, .. }
        ));
        let err = store.transition("missing", TaskStatus::Planned).await.unwrap_err();
        assert!(matches!(err, WorkflowError::TaskNotFound(_)));
        assert_eq!(store.get(&task.id).unwrap().unwrap().status, TaskStatus::Inbox);
    }

    #[tokio::test]
    async fn test_logs_in_order_and_broadcast() {
        let hub = OutputHub::new(16);
        let mut rx = hub.subscribe();
        let store = store().with_hub(hub);
        let task = store.insert(&NewTask::new("T")).await.unwrap();

        store.append_log(&task.id, LogKind::System, "started").await;
        store.append_log(&task.id, LogKind::Stdout, "line 1").await;
        store.append_log(&task.id, LogKind::Agent, "done").await;

        let logs = store.logs(&task.id).unwrap();
        let kinds: Vec<_> = logs.iter().map(|l| l.kind).collect();
        assert_eq!(kinds, vec![LogKind::System, LogKind::Stdout, LogKind::Agent]);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, LogKind::System);
        assert_eq!(first.task_id.as_deref(), Some(task.id.as_str()));
    }

    #[tokio::test]
    async fn test_subtasks_and_delete_cascade() {
        let store = store();
        let parent = store.insert(&NewTask::new("Parent")).await.unwrap();
        let child = store.insert(&NewTask::new("Child")).await.unwrap();
        let sub = store.add_subtask(&parent.id, "Design", Some("Design")).await.unwrap();
        store.set_subtask_delegated(&sub.id, &child.id).await.unwrap();

        let found = store.subtask_for_delegated(&child.id).unwrap().unwrap();
        assert_eq!(found.status, SubtaskStatus::InProgress);

        store.set_subtask_status(&sub.id, SubtaskStatus::Done, None).await.unwrap();
        let done = &store.subtasks(&parent.id).unwrap()[0];
        assert_eq!(done.status, SubtaskStatus::Done);
        assert!(done.completed_at.is_some());

        assert!(store.delete(&parent.id).await.unwrap());
        assert!(store.subtasks(&parent.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_agents_by_seniority() {
        let store = store();
        store
            .upsert_agent(&Agent::new("a1", "Ava", "Dev", AgentRole::Junior, "claude"))
            .await
            .unwrap();
        store
            .upsert_agent(&Agent::new("a2", "Ben", "Dev", AgentRole::TeamLeader, "codex"))
            .await
            .unwrap();
        store
            .upsert_agent(&Agent::new("a3", "Cy", "QA", AgentRole::TeamLeader, "gemini"))
            .await
            .unwrap();

        let dev = store.agents_in_department("Dev").unwrap();
        assert_eq!(dev[0].id, "a2");
        assert_eq!(store.team_leaders().unwrap().len(), 2);

        store.set_agent_status("a1", AgentStatus::Working, Some("t1")).await.unwrap();
        let a1 = store.agent("a1").unwrap().unwrap();
        assert_eq!(a1.status, AgentStatus::Working);
        assert_eq!(a1.current_task_id.as_deref(), Some("t1"));
    }
}
