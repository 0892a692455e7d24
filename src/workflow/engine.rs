// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The orchestrator: drives tasks through planning, execution, review and
//! merge.
//!
//! Every task write that comes from outside goes through the ingress gate
//! first. Side effects (worktrees, agent processes) start only after the
//! write is durable and audited.

use std::path::PathBuf;
use std::sync::Arc;
#[cfg(feature = "telemetry")]
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::credentials::CredentialStore;
use crate::ledger::{AuditLogger, IdempotencyKey, IngressGate, IngressResponse, MessageInput};
use crate::meeting::{
    build_task_prompt, classify_failure, CliFailureKind, MeetingCoordinator, MeetingError,
    MeetingOutcome, MeetingRequest, MeetingStatus, MeetingStore, MeetingType, ReviewDecision,
    TaskPromptContext,
};
use crate::runner::reply::truncate_chars;
use crate::runner::{
    OutputHub, ProcessRunner, ProviderKind, ReasoningLevel, RunOutput, RunRequest, RunStatus,
};
use crate::settings::{MergeStrategy, RuntimeSettings, SettingsReader};
use crate::storage::Database;
#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;
use crate::types::{Agent, AgentStatus, Lang, LogKind};
use crate::worktree::{MergeOutcome, PullRequestTarget, WorktreeProvider};

use super::registry::{ActiveRunRegistry, StopMode};
use super::state::{SubtaskStatus, TaskStatus};
use super::store::TaskStore;
use super::types::{CompletionArchive, NewTask, Task};
use super::WorkflowError;

/// Most recent stdout lines kept in the task log per run.
const MAX_PERSISTED_LINES: usize = 200;
const MAX_MEETING_PARTICIPANTS: usize = 5;
const CREDENTIAL_PROVIDER_GITHUB: &str = "github";

// ============================================================================
// Inputs and outputs
// ============================================================================

/// An operator instruction that becomes a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directive {
    pub sender: String,
    pub content: String,
    /// Defaults to the first line of `content`.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl Directive {
    fn to_new_task(&self) -> NewTask {
        let title = self
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| {
                let first = self.content.lines().next().unwrap_or_default().trim();
                truncate_chars(first, 80)
            });
        NewTask {
            title,
            description: Some(self.content.trim().to_string()),
            department: self.department.clone(),
            assigned_agent_id: self.agent_id.clone(),
            project_path: self.project_path.clone(),
            base_branch: self.base_branch.clone(),
            source_task_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskCreation {
    pub task: Task,
    /// `false` when an identical earlier request was replayed.
    pub created: bool,
}

/// How a run ended, from the workflow's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunDisposition {
    /// Finished; the task is in review.
    ReadyForReview { reply: String },
    /// Stopped with [`StopMode::Pause`]; the task is pending.
    Paused,
    /// Stopped with [`StopMode::Cancel`]; the task is cancelled.
    Cancelled,
    /// Failed or timed out; the task is pending and can be resumed.
    Retryable { kind: CliFailureKind },
}

/// How a planning meeting ended.
#[derive(Debug, Clone)]
pub enum PlanVerdict {
    /// The meeting ran and the task is planned.
    Held(MeetingOutcome),
    /// Nobody to meet with; the task is planned anyway.
    Skipped,
    /// Stopped mid-meeting. A paused task stays in `inbox`.
    Stopped(StopMode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewVerdict {
    /// Approved; merge next.
    Approved { round: i64 },
    /// Sent back to `in_progress` with these notes.
    RevisionRequested { round: i64, notes: Vec<String> },
    /// No usable reviewer output; the task stays in review.
    Inconclusive { round: i64 },
    /// Stopped mid-meeting. A paused task stays in review.
    Stopped { round: i64, mode: StopMode },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The active run was signalled and will wind down.
    Signalled,
    /// No run was active; the task was moved directly.
    Applied(TaskStatus),
}

/// Collaborators the orchestrator is wired with.
pub struct OrchestratorServices {
    pub db: Arc<Database>,
    pub audit: Arc<dyn AuditLogger>,
    pub worktrees: Arc<dyn WorktreeProvider>,
    pub runner: Arc<dyn ProcessRunner>,
    pub settings: Arc<dyn SettingsReader>,
    pub credentials: Arc<dyn CredentialStore>,
    pub hub: OutputHub,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    config: OrchestratorConfig,
    store: TaskStore,
    gate: IngressGate,
    worktrees: Arc<dyn WorktreeProvider>,
    runner: Arc<dyn ProcessRunner>,
    meetings: MeetingCoordinator,
    settings: Arc<dyn SettingsReader>,
    credentials: Arc<dyn CredentialStore>,
    registry: Arc<ActiveRunRegistry>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, services: OrchestratorServices) -> Self {
        let store = TaskStore::new(services.db.clone()).with_hub(services.hub);
        let gate = IngressGate::new(services.db.clone(), services.audit);
        let meetings = MeetingCoordinator::new(
            services.runner.clone(),
            MeetingStore::new(services.db),
        )
        .with_config(&config);
        Self {
            config,
            store,
            gate,
            worktrees: services.worktrees,
            runner: services.runner,
            meetings,
            settings: services.settings,
            credentials: services.credentials,
            registry: Arc::new(ActiveRunRegistry::new()),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn meetings(&self) -> &MeetingStore {
        self.meetings.store()
    }

    pub fn registry(&self) -> &Arc<ActiveRunRegistry> {
        &self.registry
    }

    fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings::load(self.settings.as_ref())
    }

    async fn log(&self, task_id: &str, message: &str) {
        self.store.append_log(task_id, LogKind::System, message).await;
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Turn a directive into a task.
    ///
    /// The directive is stored as a message, then the task is created and
    /// audited. A replay with the same idempotency key returns the original
    /// task.
    pub async fn create_task_from_directive(&self, directive: &Directive) -> Result<TaskCreation, WorkflowError> {
        let message = MessageInput {
            sender: directive.sender.clone(),
            receiver: directive.department.clone(),
            content: directive.content.clone(),
            message_type: "directive".to_string(),
            task_id: None,
            idempotency_key: directive.idempotency_key.clone(),
        };
        self.gate.ingest_message(&message).await?;

        let creation = self
            .create_task(&directive.to_new_task(), "directive", directive.idempotency_key.as_deref())
            .await?;
        if creation.created {
            self.log(
                &creation.task.id,
                &format!("Task created from directive by {}", directive.sender.trim()),
            )
            .await;
            self.auto_assign(&creation.task.id).await?;
        }
        let task = self.store.require(&creation.task.id)?;
        Ok(TaskCreation { task, ..creation })
    }

    /// Create a task through the ledger.
    ///
    /// The row is written first, then audited; if auditing fails the row is
    /// deleted again and the caller gets the (retryable) ingress error.
    pub async fn create_task(
        &self,
        new: &NewTask,
        source: &str,
        idempotency_key: Option<&str>,
    ) -> Result<TaskCreation, WorkflowError> {
        if new.title.trim().is_empty() {
            return Err(IngressResponse::new(400, "invalid_input", "task title is empty", false).into());
        }
        let payload = new.payload();
        let key = idempotency_key
            .map(|raw| IdempotencyKey::new("task_creation", raw))
            .transpose()
            .map_err(|e| IngressResponse::from(&e))?;

        if let Some(key) = &key {
            if let Some(existing) = self.gate.lookup_task_creation(key, &payload)? {
                if let Some(task) = self.store.get(&existing.task_id)? {
                    debug!(task_id = %task.id, "replayed task creation");
                    return Ok(TaskCreation { task, created: false });
                }
            }
        }

        let task = self.store.insert(new).await?;
        match self
            .gate
            .record_task_creation(&task.id, source, key, payload)
            .await
        {
            Ok(audit) if audit.created => {
                info!(task_id = %task.id, source, title = %task.title, "task created");
                Ok(TaskCreation { task, created: true })
            }
            Ok(audit) => {
                // An identical request won the race; ours is dropped.
                self.store.delete(&task.id).await?;
                let original = self.store.require(&audit.record.task_id)?;
                Ok(TaskCreation {
                    task: original,
                    created: false,
                })
            }
            Err(response) => {
                warn!(task_id = %task.id, code = %response.code, "task audit failed, compensating");
                if let Err(e) = self.store.delete(&task.id).await {
                    warn!(task_id = %task.id, error = %e, "task compensation failed");
                }
                Err(response.into())
            }
        }
    }

    /// Assign the most senior idle agent of the task's department, when
    /// `autoAssign` is on and nobody is assigned yet.
    pub async fn auto_assign(&self, task_id: &str) -> Result<Option<Agent>, WorkflowError> {
        let task = self.store.require(task_id)?;
        if task.assigned_agent_id.is_some() || !self.runtime_settings().auto_assign {
            return Ok(None);
        }
        let Some(department) = task.department.as_deref() else {
            return Ok(None);
        };
        let candidate = self
            .store
            .agents_in_department(department)?
            .into_iter()
            .find(|a| a.status == AgentStatus::Idle);
        match candidate {
            Some(agent) => {
                self.store.set_assigned_agent(task_id, Some(&agent.id)).await?;
                self.log(
                    task_id,
                    &format!("Auto-assigned to {} ({})", agent.name, agent.role.as_str()),
                )
                .await;
                info!(task_id, agent_id = %agent.id, "task auto-assigned");
                Ok(Some(agent))
            }
            None => {
                debug!(task_id, department, "no idle agent to auto-assign");
                Ok(None)
            }
        }
    }

    // ------------------------------------------------------------------
    // Planning and collaboration
    // ------------------------------------------------------------------

    fn participants(&self, task: &Task, assignee: Option<&Agent>) -> Result<Vec<Agent>, WorkflowError> {
        let mut leaders = self.store.team_leaders()?;
        if let Some(dept) = task.department.as_deref() {
            if let Some(pos) = leaders.iter().position(|a| a.department == dept) {
                let own = leaders.remove(pos);
                leaders.insert(0, own);
            }
        }
        if let Some(agent) = assignee {
            if !leaders.iter().any(|a| a.id == agent.id) {
                let at = leaders.len().min(1);
                leaders.insert(at, agent.clone());
            }
        }
        leaders.truncate(MAX_MEETING_PARTICIPANTS);
        Ok(leaders)
    }

    fn assignee(&self, task: &Task) -> Result<Option<Agent>, WorkflowError> {
        match task.assigned_agent_id.as_deref() {
            Some(id) => Ok(self.store.agent(id)?),
            None => Ok(None),
        }
    }

    fn meeting_cwd(&self, task: &Task) -> PathBuf {
        task.project_path.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Hold the planning meeting, then move `inbox -> planned`.
    pub async fn plan(&self, task_id: &str) -> Result<PlanVerdict, WorkflowError> {
        let task = self.store.require(task_id)?;
        if task.status != TaskStatus::Inbox {
            return Err(WorkflowError::IllegalTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Planned,
            });
        }
        let assignee = self.assignee(&task)?;
        let participants = self.participants(&task, assignee.as_ref())?;
        let lang = self.runtime_settings().language;

        let (result, stop_mode) = self
            .convene(&task, MeetingType::Planned, 1, &participants, lang, None)
            .await?;
        let verdict = match result {
            Ok(outcome) => {
                self.log(
                    task_id,
                    &format!(
                        "Planning meeting finished with {} turns",
                        outcome.meeting.entries.len()
                    ),
                )
                .await;
                PlanVerdict::Held(outcome)
            }
            Err(MeetingError::NoParticipants) => {
                self.log(task_id, "No team leaders available; skipping planning meeting").await;
                PlanVerdict::Skipped
            }
            Err(MeetingError::Cancelled) => {
                let mode = self.halt_meeting(task_id, "Planning", stop_mode).await?;
                return Ok(PlanVerdict::Stopped(mode));
            }
            Err(e) => return Err(e.into()),
        };
        self.store.transition(task_id, TaskStatus::Planned).await?;
        Ok(verdict)
    }

    /// Hold a meeting in the task's run slot so stop requests reach it.
    ///
    /// Returns the meeting result with the stop mode recorded while it ran.
    async fn convene(
        &self,
        task: &Task,
        meeting_type: MeetingType,
        round: i64,
        participants: &[Agent],
        lang: Lang,
        work_summary: Option<&str>,
    ) -> Result<(Result<MeetingOutcome, MeetingError>, Option<StopMode>), WorkflowError> {
        let ticket = self
            .registry
            .begin(&task.id)
            .ok_or_else(|| WorkflowError::AlreadyRunning(task.id.clone()))?;
        let cwd = self.meeting_cwd(task);
        let result = self
            .meetings
            .convene(MeetingRequest {
                task_id: &task.id,
                task_title: &task.title,
                task_description: task.description.as_deref(),
                meeting_type,
                round,
                participants,
                lang,
                cwd: &cwd,
                work_summary,
                stop: Some(ticket.stop),
            })
            .await;
        let stop_mode = self.registry.finish(&task.id);
        Ok((result, stop_mode))
    }

    /// Apply a stop that interrupted a meeting. Pause leaves the status as
    /// is; cancel cancels the task.
    async fn halt_meeting(
        &self,
        task_id: &str,
        phase: &str,
        stop_mode: Option<StopMode>,
    ) -> Result<StopMode, WorkflowError> {
        let mode = stop_mode.unwrap_or(StopMode::Pause);
        match mode {
            StopMode::Pause => {
                self.log(task_id, &format!("{} meeting paused by operator", phase)).await;
            }
            StopMode::Cancel => {
                self.log(task_id, &format!("{} meeting cancelled by operator", phase)).await;
                self.cancel(task_id).await?;
            }
        }
        Ok(mode)
    }

    /// Delegate cross-department subtasks and move to `in_progress` once
    /// nothing is outstanding. Returns how many delegated subtasks are still
    /// open.
    pub async fn collaborate(&self, task_id: &str) -> Result<usize, WorkflowError> {
        let mut task = self.store.require(task_id)?;
        if task.status == TaskStatus::Planned {
            task = self.store.transition(task_id, TaskStatus::Collaborating).await?;
        }

        for subtask in self.store.subtasks(task_id)? {
            let cross_department = match (&subtask.target_department, &task.department) {
                (Some(target), Some(own)) => target != own,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !cross_department
                || subtask.delegated_task_id.is_some()
                || subtask.status != SubtaskStatus::Pending
            {
                continue;
            }
            let delegated = NewTask {
                title: subtask.title.clone(),
                description: Some(format!(
                    "{}\n\n(delegated from \"{}\")",
                    subtask.title, task.title
                )),
                department: subtask.target_department.clone(),
                assigned_agent_id: None,
                project_path: task.project_path.clone(),
                base_branch: task.base_branch.clone(),
                source_task_id: Some(task.id.clone()),
            };
            let key = format!("delegation:{}", subtask.id);
            let creation = self.create_task(&delegated, "delegation", Some(&key)).await?;
            self.store
                .set_subtask_delegated(&subtask.id, &creation.task.id)
                .await?;
            if creation.created {
                self.auto_assign(&creation.task.id).await?;
            }
            self.log(
                task_id,
                &format!(
                    "Delegated \"{}\" to {} as task {}",
                    subtask.title,
                    subtask.target_department.as_deref().unwrap_or("-"),
                    crate::types::short_id(&creation.task.id)
                ),
            )
            .await;
            info!(task_id, subtask_id = %subtask.id, delegated = %creation.task.id, "subtask delegated");
        }

        let open = self
            .store
            .subtasks(task_id)?
            .iter()
            .filter(|s| s.delegated_task_id.is_some() && s.status != SubtaskStatus::Done)
            .count();
        if open == 0 {
            self.store.transition(task_id, TaskStatus::InProgress).await?;
        } else {
            debug!(task_id, open, "waiting on delegated subtasks");
        }
        Ok(open)
    }

    /// Mark the subtask behind a finished delegated task done, and let the
    /// parent leave `collaborating` once nothing is outstanding.
    async fn on_delegated_done(&self, delegated: &Task) -> Result<(), WorkflowError> {
        let Some(subtask) = self.store.subtask_for_delegated(&delegated.id)? else {
            return Ok(());
        };
        self.store
            .set_subtask_status(&subtask.id, SubtaskStatus::Done, None)
            .await?;
        self.log(
            &subtask.task_id,
            &format!("Delegated subtask \"{}\" is done", subtask.title),
        )
        .await;

        if let Some(parent) = self.store.get(&subtask.task_id)? {
            if parent.status == TaskStatus::Collaborating {
                self.collaborate(&parent.id).await?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    fn latest_plan(&self, task_id: &str) -> Result<Option<String>, WorkflowError> {
        Ok(self
            .meetings
            .store()
            .list_for_task(task_id)?
            .into_iter()
            .rev()
            .find(|m| m.meeting_type == MeetingType::Planned)
            .and_then(|m| m.entries.last().map(|e| e.content.clone())))
    }

    fn resolve_agent(&self, task: &Task) -> Result<Agent, WorkflowError> {
        let agent_id = task
            .assigned_agent_id
            .as_deref()
            .ok_or_else(|| WorkflowError::Unassigned(task.id.clone()))?;
        self.store
            .agent(agent_id)?
            .ok_or_else(|| WorkflowError::InvalidAgent {
                agent_id: agent_id.to_string(),
                reason: "not in the roster".to_string(),
            })
    }

    /// Run the assigned agent on an `in_progress` task.
    pub async fn run_task(&self, task_id: &str) -> Result<RunDisposition, WorkflowError> {
        let task = self.store.require(task_id)?;
        if task.status != TaskStatus::InProgress {
            return Err(WorkflowError::IllegalTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Review,
            });
        }
        if task.assigned_agent_id.is_none() {
            self.auto_assign(task_id).await?;
        }
        let task = self.store.require(task_id)?;
        let agent = self.resolve_agent(&task)?;
        let settings = self.runtime_settings();
        let provider: ProviderKind = agent
            .provider
            .parse()
            .or_else(|_| {
                settings
                    .default_provider
                    .as_deref()
                    .unwrap_or_default()
                    .parse()
            })
            .map_err(|reason| WorkflowError::InvalidAgent {
                agent_id: agent.id.clone(),
                reason,
            })?;

        let ticket = self
            .registry
            .begin(task_id)
            .ok_or_else(|| WorkflowError::AlreadyRunning(task_id.to_string()))?;

        let result = self.execute(&task, &agent, provider, &settings, ticket.stop).await;
        let stop_mode = self.registry.finish(task_id);
        if let Err(e) = self.store.set_agent_status(&agent.id, AgentStatus::Idle, None).await {
            warn!(agent_id = %agent.id, error = %e, "failed to release agent");
        }

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!(task_id, error = %e, "run could not start");
                self.log(task_id, &format!("Run failed to start: {}", e)).await;
                self.store.transition(task_id, TaskStatus::Pending).await?;
                return Ok(RunDisposition::Retryable {
                    kind: CliFailureKind::Generic,
                });
            }
        };
        self.settle_run(&task, output, stop_mode, settings.language).await
    }

    async fn execute(
        &self,
        task: &Task,
        agent: &Agent,
        provider: ProviderKind,
        settings: &RuntimeSettings,
        stop: tokio::sync::watch::Receiver<bool>,
    ) -> Result<RunOutput, WorkflowError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        self.store
            .set_agent_status(&agent.id, AgentStatus::Working, Some(&task.id))
            .await?;

        let record = match task.project_path.as_deref() {
            Some(project) => {
                let record = self
                    .worktrees
                    .ensure(&task.id, project, task.base_branch.as_deref())
                    .await;
                if record.is_none() {
                    self.log(
                        &task.id,
                        "Worktree isolation unavailable; running in the project directory",
                    )
                    .await;
                }
                record
            }
            None => None,
        };
        let cwd: PathBuf = match (&record, task.project_path.as_deref()) {
            (Some(r), _) => r.worktree_path.clone(),
            (None, Some(project)) => project.to_path_buf(),
            (None, None) => PathBuf::from("."),
        };

        let plan = self.latest_plan(&task.id)?;
        let notes = self.meetings.store().revision_notes(&task.id)?;
        let prompt = build_task_prompt(&TaskPromptContext {
            task_title: &task.title,
            task_description: task.description.as_deref(),
            agent,
            lang: settings.language,
            plan: plan.as_deref(),
            revision_notes: &notes,
            worktree_branch: record.as_ref().map(|r| r.branch_name.as_str()),
        });

        let model_config = settings.model_for(provider.as_str());
        let model = agent
            .model
            .clone()
            .or_else(|| model_config.and_then(|c| c.model.clone()));
        let reasoning = agent
            .reasoning_level
            .clone()
            .or_else(|| model_config.and_then(|c| c.reasoning_level.clone()))
            .and_then(|r| r.parse::<ReasoningLevel>().ok());

        let request = RunRequest::new(provider, prompt, &cwd)
            .with_task(&task.id)
            .with_model(model)
            .with_reasoning(reasoning)
            .with_timeouts(self.config.idle_timeout(), self.config.hard_timeout())
            .with_stop(stop)
            .with_lang(settings.language);

        self.log(
            &task.id,
            &format!("Run started: {} via {} in {}", agent.name, provider, cwd.display()),
        )
        .await;
        info!(task_id = %task.id, agent_id = %agent.id, provider = provider.as_str(), "run started");

        let output = self.runner.run(request).await?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("workflow.run", start.elapsed());
        Ok(output)
    }

    async fn settle_run(
        &self,
        task: &Task,
        output: RunOutput,
        stop_mode: Option<StopMode>,
        lang: Lang,
    ) -> Result<RunDisposition, WorkflowError> {
        let tail = output.lines.len().saturating_sub(MAX_PERSISTED_LINES);
        self.store
            .append_streamed(&task.id, LogKind::Stdout, &output.lines[tail..])
            .await;
        let stderr: Vec<String> = output
            .raw_stderr
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        let tail = stderr.len().saturating_sub(MAX_PERSISTED_LINES);
        self.store
            .append_streamed(&task.id, LogKind::Stderr, &stderr[tail..])
            .await;

        match output.status {
            RunStatus::Completed => {
                let reply = crate::runner::normalize_reply(&output.reply.text, self.config.max_reply_chars * 4);
                if !reply.is_empty() {
                    self.store.append_log(&task.id, LogKind::Agent, &reply).await;
                }
                self.log(&task.id, &format!("Run finished in {} ms", output.duration_ms)).await;
                self.store.transition(&task.id, TaskStatus::Review).await?;
                Ok(RunDisposition::ReadyForReview { reply })
            }
            RunStatus::Cancelled => match stop_mode.unwrap_or(StopMode::Pause) {
                StopMode::Pause => {
                    self.log(&task.id, "Run paused by operator").await;
                    self.store.transition(&task.id, TaskStatus::Pending).await?;
                    Ok(RunDisposition::Paused)
                }
                StopMode::Cancel => {
                    self.log(&task.id, "Run cancelled by operator").await;
                    self.cancel(&task.id).await?;
                    Ok(RunDisposition::Cancelled)
                }
            },
            RunStatus::Failed { .. } | RunStatus::TimedOut { .. } => {
                let kind = classify_failure(&output);
                let mut message = format!("Run failed ({}): {}", kind.as_str(), kind.explain(lang));
                if let RunStatus::Failed { exit_code: Some(code) } = output.status {
                    message.push_str(&format!(" [exit {}]", code));
                }
                self.log(&task.id, &message).await;
                warn!(task_id = %task.id, kind = kind.as_str(), "run failed");
                self.store.transition(&task.id, TaskStatus::Pending).await?;
                Ok(RunDisposition::Retryable { kind })
            }
        }
    }

    // ------------------------------------------------------------------
    // Review and completion
    // ------------------------------------------------------------------

    fn last_agent_reply(&self, task_id: &str) -> Result<Option<String>, WorkflowError> {
        Ok(self
            .store
            .logs(task_id)?
            .into_iter()
            .rev()
            .find(|l| l.kind == LogKind::Agent)
            .map(|l| l.message))
    }

    /// Hold a review meeting on a task in `review`.
    pub async fn review(&self, task_id: &str) -> Result<ReviewVerdict, WorkflowError> {
        let task = self.store.require(task_id)?;
        if task.status != TaskStatus::Review {
            return Err(WorkflowError::IllegalTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Done,
            });
        }
        let round = self
            .meetings
            .store()
            .list_for_task(task_id)?
            .iter()
            .filter(|m| m.meeting_type == MeetingType::Review)
            .count() as i64
            + 1;
        let assignee = self.assignee(&task)?;
        let participants = self.participants(&task, assignee.as_ref())?;
        let summary = self.last_agent_reply(task_id)?;
        let lang = self.runtime_settings().language;

        let (result, stop_mode) = self
            .convene(&task, MeetingType::Review, round, &participants, lang, summary.as_deref())
            .await?;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(MeetingError::NoParticipants) => {
                self.log(task_id, "No reviewers available; approving without a meeting").await;
                return Ok(ReviewVerdict::Approved { round });
            }
            Err(MeetingError::Cancelled) => {
                let mode = self.halt_meeting(task_id, "Review", stop_mode).await?;
                return Ok(ReviewVerdict::Stopped { round, mode });
            }
            Err(e) => return Err(e.into()),
        };

        if outcome.meeting.status == MeetingStatus::Failed {
            self.log(task_id, &format!("Review round {} produced no usable replies", round))
                .await;
            return Ok(ReviewVerdict::Inconclusive { round });
        }

        match outcome.decision {
            Some(ReviewDecision::Hold) if round < i64::from(self.config.max_review_rounds) => {
                let notes = self.meetings.store().revision_notes(task_id)?;
                self.log(
                    task_id,
                    &format!(
                        "Review round {}: hold, {} new revision note(s)",
                        round,
                        outcome.new_revision_notes.len()
                    ),
                )
                .await;
                self.store.transition(task_id, TaskStatus::InProgress).await?;
                Ok(ReviewVerdict::RevisionRequested { round, notes })
            }
            Some(ReviewDecision::Hold) => {
                self.log(
                    task_id,
                    &format!(
                        "Review round limit ({}) reached; proceeding with outstanding notes",
                        self.config.max_review_rounds
                    ),
                )
                .await;
                Ok(ReviewVerdict::Approved { round })
            }
            Some(ReviewDecision::Approved) => {
                self.log(task_id, &format!("Review round {}: approved", round)).await;
                Ok(ReviewVerdict::Approved { round })
            }
            Some(ReviewDecision::Reviewing) | None => {
                self.log(
                    task_id,
                    &format!("Review round {}: no explicit objections", round),
                )
                .await;
                Ok(ReviewVerdict::Approved { round })
            }
        }
    }

    fn pull_request_target(&self, settings: &RuntimeSettings, task: &Task) -> Option<PullRequestTarget> {
        let repo = settings.github_repo.clone()?;
        let token = self
            .credentials
            .active_oauth_account_ids(CREDENTIAL_PROVIDER_GITHUB)
            .into_iter()
            .find_map(|id| self.credentials.access_token(&id))?;
        Some(PullRequestTarget {
            repo,
            token,
            base: task.base_branch.clone().unwrap_or_else(|| "main".to_string()),
        })
    }

    /// Merge an approved task and move it to `done`.
    ///
    /// A conflict or a restricted-untracked refusal leaves the task in
    /// review with the reason logged; the outcome is returned either way.
    pub async fn complete(&self, task_id: &str, review_round: i64) -> Result<Option<MergeOutcome>, WorkflowError> {
        let task = self.store.require(task_id)?;
        if task.status != TaskStatus::Review {
            return Err(WorkflowError::IllegalTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Done,
            });
        }
        let settings = self.runtime_settings();

        let merge = if self.worktrees.get(task_id).await.is_some() {
            let outcome = match settings.merge_strategy {
                MergeStrategy::Direct => self.worktrees.merge(task_id, &task.title).await,
                MergeStrategy::DevPr => {
                    let target = self.pull_request_target(&settings, &task);
                    if target.is_none() {
                        self.log(task_id, "No GitHub repo or token configured; skipping pull request")
                            .await;
                    }
                    self.worktrees.merge_to_dev(task_id, &task.title, target).await
                }
            };
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.log(task_id, &format!("Merge failed: {}", e)).await;
                    return Err(e.into());
                }
            };
            match &outcome {
                MergeOutcome::Conflict { files } => {
                    self.log(
                        task_id,
                        &format!("Merge conflict in {}; task stays in review", files.join(", ")),
                    )
                    .await;
                    return Ok(Some(outcome));
                }
                MergeOutcome::RestrictedUntracked { files } => {
                    self.log(
                        task_id,
                        &format!(
                            "Merge refused (restricted_untracked): only blocked files changed: {}",
                            files.join(", ")
                        ),
                    )
                    .await;
                    return Ok(Some(outcome));
                }
                other => {
                    self.log(task_id, &format!("Merge result: {}", other.code())).await;
                }
            }
            if let Err(e) = self.worktrees.cleanup(task_id).await {
                warn!(task_id, error = %e, "worktree cleanup after merge failed");
            }
            Some(outcome)
        } else {
            None
        };

        let archive = CompletionArchive {
            last_reply: self.last_agent_reply(task_id)?,
            merge: merge.as_ref().map(|m| m.code().to_string()),
            merge_commit: match &merge {
                Some(MergeOutcome::Merged { commit, .. }) | Some(MergeOutcome::MergedToDev { commit, .. }) => {
                    Some(commit.clone())
                }
                _ => None,
            },
            pr_url: match &merge {
                Some(MergeOutcome::MergedToDev { pr_url, .. }) => pr_url.clone(),
                _ => None,
            },
            review_decision: Some(ReviewDecision::Approved.as_str().to_string()),
            review_rounds: review_round,
        };
        match serde_json::to_string(&archive) {
            Ok(json) => self.store.set_result(task_id, &json).await?,
            Err(e) => warn!(task_id, error = %e, "could not serialize completion archive"),
        }

        let done = self.store.transition(task_id, TaskStatus::Done).await?;
        for subtask in self.store.subtasks(task_id)? {
            if subtask.delegated_task_id.is_none() && subtask.status != SubtaskStatus::Done {
                self.store
                    .set_subtask_status(&subtask.id, SubtaskStatus::Done, None)
                    .await?;
            }
        }
        self.log(task_id, "Task done").await;
        info!(task_id, merge = merge.as_ref().map(|m| m.code()).unwrap_or("none"), "task done");

        if done.source_task_id.is_some() {
            self.on_delegated_done(&done).await?;
        }
        Ok(merge)
    }

    // ------------------------------------------------------------------
    // Stop, resume, cancel
    // ------------------------------------------------------------------

    /// Stop a task.
    ///
    /// With an active run or meeting it is signalled and settles the task
    /// itself.
    /// Otherwise `Pause` parks an `in_progress` task and `Cancel` cancels
    /// any non-terminal task.
    pub async fn stop_task(&self, task_id: &str, mode: StopMode) -> Result<StopOutcome, WorkflowError> {
        if self.registry.request_stop(task_id, mode) {
            info!(task_id, mode = mode.as_str(), "stop signalled");
            return Ok(StopOutcome::Signalled);
        }
        let task = match mode {
            StopMode::Pause => {
                let task = self.store.transition(task_id, TaskStatus::Pending).await?;
                self.log(task_id, "Task paused").await;
                task
            }
            StopMode::Cancel => self.cancel(task_id).await?,
        };
        Ok(StopOutcome::Applied(task.status))
    }

    /// Roll back the task's worktree and move it to `cancelled`.
    pub async fn cancel(&self, task_id: &str) -> Result<Task, WorkflowError> {
        let task = self.store.require(task_id)?;
        if !task.status.can_transition_to(TaskStatus::Cancelled) {
            return Err(WorkflowError::IllegalTransition {
                task_id: task_id.to_string(),
                from: task.status,
                to: TaskStatus::Cancelled,
            });
        }
        if self.worktrees.get(task_id).await.is_some() {
            match self.worktrees.rollback(task_id).await {
                Ok(summary) => {
                    let stat = if summary.diff_stat.trim().is_empty() {
                        "no changes".to_string()
                    } else {
                        summary.diff_stat.trim().to_string()
                    };
                    self.log(task_id, &format!("Rolled back {}: {}", summary.branch, stat))
                        .await;
                }
                Err(e) => {
                    self.log(task_id, &format!("Rollback failed: {}", e)).await;
                    warn!(task_id, error = %e, "rollback failed");
                }
            }
        }
        let task = self.store.transition(task_id, TaskStatus::Cancelled).await?;
        self.log(task_id, "Task cancelled").await;
        Ok(task)
    }

    /// Move a `pending` task back to `in_progress` and drive it on.
    pub async fn resume_task(&self, task_id: &str) -> Result<Task, WorkflowError> {
        self.store.transition(task_id, TaskStatus::InProgress).await?;
        self.log(task_id, "Task resumed").await;
        self.drive(task_id).await
    }

    // ------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------

    /// Advance a task as far as it can go without outside input.
    ///
    /// Stops at `done`, `cancelled`, `pending`, while waiting on delegated
    /// subtasks, or when review or merge needs an operator.
    pub async fn drive(&self, task_id: &str) -> Result<Task, WorkflowError> {
        loop {
            let task = self.store.require(task_id)?;
            match task.status {
                TaskStatus::Inbox => {
                    if let PlanVerdict::Stopped(_) = self.plan(task_id).await? {
                        return self.store.require(task_id);
                    }
                }
                TaskStatus::Planned | TaskStatus::Collaborating => {
                    if self.collaborate(task_id).await? > 0 {
                        return self.store.require(task_id);
                    }
                }
                TaskStatus::InProgress => match self.run_task(task_id).await? {
                    RunDisposition::ReadyForReview { .. } => {}
                    _ => return self.store.require(task_id),
                },
                TaskStatus::Review => match self.review(task_id).await? {
                    ReviewVerdict::Approved { round } => {
                        self.complete(task_id, round).await?;
                        return self.store.require(task_id);
                    }
                    ReviewVerdict::RevisionRequested { .. } => {}
                    ReviewVerdict::Inconclusive { .. } | ReviewVerdict::Stopped { .. } => {
                        return self.store.require(task_id)
                    }
                },
                TaskStatus::Done | TaskStatus::Cancelled | TaskStatus::Pending => return Ok(task),
            }
        }
    }
}
