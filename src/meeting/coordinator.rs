// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Turn-based meetings between agents.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
#[cfg(feature = "telemetry")]
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::runner::{ProcessRunner, ProviderKind, ReasoningLevel, RunRequest, RunStatus};
#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;
use crate::types::{Agent, Lang};

use super::classify::{aggregate_decisions, classify_review};
use super::prompt::{build_turn_prompt, stance_for, TranscriptLimits, TurnContext};
use super::reply::finalize_turn_reply;
use super::store::MeetingStore;
use super::types::{Meeting, MeetingStatus, MeetingType, ReviewDecision};
use super::MeetingError;

/// What a meeting is about and who attends.
#[derive(Debug, Clone)]
pub struct MeetingRequest<'a> {
    pub task_id: &'a str,
    pub task_title: &'a str,
    pub task_description: Option<&'a str>,
    pub meeting_type: MeetingType,
    pub round: i64,
    /// Speakers in turn order.
    pub participants: &'a [Agent],
    pub lang: Lang,
    pub cwd: &'a Path,
    pub work_summary: Option<&'a str>,
    pub stop: Option<watch::Receiver<bool>>,
}

/// Result of a finished meeting.
#[derive(Debug, Clone)]
pub struct MeetingOutcome {
    pub meeting: Meeting,
    /// Aggregate over real replies; `None` for planning meetings.
    pub decision: Option<ReviewDecision>,
    /// Notes from hold statements not seen before for this task.
    pub new_revision_notes: Vec<String>,
    pub fallback_turns: usize,
}

impl MeetingOutcome {
    /// Text of the closing turn, used as the plan or the review summary.
    pub fn conclusion(&self) -> Option<&str> {
        self.meeting.entries.last().map(|e| e.content.as_str())
    }
}

/// Runs meetings and records their minutes.
pub struct MeetingCoordinator {
    runner: Arc<dyn ProcessRunner>,
    store: MeetingStore,
    turn_timeout: Duration,
    max_reply_chars: usize,
    limits: TranscriptLimits,
}

impl MeetingCoordinator {
    pub fn new(runner: Arc<dyn ProcessRunner>, store: MeetingStore) -> Self {
        Self {
            runner,
            store,
            turn_timeout: Duration::from_millis(180_000),
            max_reply_chars: 600,
            limits: TranscriptLimits::default(),
        }
    }

    pub fn with_config(mut self, config: &OrchestratorConfig) -> Self {
        self.turn_timeout = config.meeting_turn_timeout();
        self.max_reply_chars = config.max_reply_chars;
        self
    }

    pub fn with_transcript_limits(mut self, limits: TranscriptLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn store(&self) -> &MeetingStore {
        &self.store
    }

    /// Close a stopped meeting as failed.
    async fn abandon(&self, meeting: &Meeting, task_id: &str) -> MeetingError {
        if let Err(e) = self.store.finish(&meeting.id, MeetingStatus::Failed, None).await {
            return e.into();
        }
        info!(task_id, meeting_id = %meeting.id, "meeting stopped");
        MeetingError::Cancelled
    }

    /// Hold a meeting: one runner call per participant, in order.
    pub async fn convene(&self, request: MeetingRequest<'_>) -> Result<MeetingOutcome, MeetingError> {
        if request.participants.is_empty() {
            return Err(MeetingError::NoParticipants);
        }
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let meeting = self
            .store
            .create(request.task_id, request.meeting_type, request.round)
            .await?;
        info!(
            task_id = request.task_id,
            meeting_id = %meeting.id,
            kind = request.meeting_type.as_str(),
            round = request.round,
            participants = request.participants.len(),
            "meeting started"
        );

        let revision_notes = match request.meeting_type {
            MeetingType::Review => self.store.revision_notes(request.task_id)?,
            MeetingType::Planned => Vec::new(),
        };

        let total = request.participants.len();
        let mut entries = Vec::with_capacity(total);
        let mut decisions = Vec::new();
        let mut hold_notes = Vec::new();
        let mut fallback_turns = 0;

        for (turn, speaker) in request.participants.iter().enumerate() {
            if request.stop.as_ref().is_some_and(|stop| *stop.borrow()) {
                return Err(self.abandon(&meeting, request.task_id).await);
            }
            let stance = stance_for(request.meeting_type, turn, total, speaker.role);
            let prompt = build_turn_prompt(&TurnContext {
                task_title: request.task_title,
                task_description: request.task_description,
                meeting_type: request.meeting_type,
                round: request.round,
                speaker,
                stance,
                transcript: &entries,
                revision_notes: &revision_notes,
                work_summary: request.work_summary,
                lang: request.lang,
                limits: self.limits,
                max_reply_chars: self.max_reply_chars,
            });

            let output = match speaker.provider.parse::<ProviderKind>() {
                Ok(provider) => {
                    let mut run = RunRequest::new(provider, prompt, request.cwd)
                        .with_task(request.task_id)
                        .with_model(speaker.model.clone())
                        .with_reasoning(
                            speaker
                                .reasoning_level
                                .as_deref()
                                .and_then(|r| r.parse::<ReasoningLevel>().ok()),
                        )
                        .with_timeouts(self.turn_timeout, Some(self.turn_timeout))
                        .with_lang(request.lang);
                    if let Some(stop) = &request.stop {
                        run = run.with_stop(stop.clone());
                    }
                    match self.runner.run(run).await {
                        Ok(out) => Some(out),
                        Err(e) => {
                            warn!(task_id = request.task_id, speaker = %speaker.name, error = %e, "meeting turn failed");
                            None
                        }
                    }
                }
                Err(e) => {
                    warn!(speaker = %speaker.name, error = %e, "speaker has no usable provider");
                    None
                }
            };

            if matches!(output.as_ref().map(|o| &o.status), Some(RunStatus::Cancelled)) {
                return Err(self.abandon(&meeting, request.task_id).await);
            }

            let reply = finalize_turn_reply(
                output.as_ref(),
                request.meeting_type,
                stance,
                request.lang,
                self.max_reply_chars,
            );
            if let Some(reason) = reply.rejection {
                fallback_turns += 1;
                debug!(speaker = %speaker.name, ?reason, "using fallback reply");
            }

            if request.meeting_type == MeetingType::Review && reply.rejection.is_none() {
                let decision = classify_review(&reply.text);
                if decision == ReviewDecision::Hold {
                    hold_notes.push(reply.text.clone());
                }
                decisions.push(decision);
            }

            let entry = self
                .store
                .append_entry(
                    &meeting.id,
                    Some(&speaker.id),
                    &speaker.name,
                    Some(&speaker.department),
                    &reply.text,
                )
                .await?;
            entries.push(entry);
        }

        let (status, decision) = match request.meeting_type {
            MeetingType::Planned => (MeetingStatus::Completed, None),
            MeetingType::Review if fallback_turns == total => {
                (MeetingStatus::Failed, Some(ReviewDecision::Reviewing))
            }
            MeetingType::Review => match aggregate_decisions(&decisions) {
                ReviewDecision::Hold => (MeetingStatus::RevisionRequested, Some(ReviewDecision::Hold)),
                other => (MeetingStatus::Completed, Some(other)),
            },
        };

        let mut new_revision_notes = Vec::new();
        if decision == Some(ReviewDecision::Hold) {
            for note in hold_notes {
                if self
                    .store
                    .record_revision_note(request.task_id, &note, request.round)
                    .await?
                {
                    new_revision_notes.push(note);
                }
            }
        }

        self.store.finish(&meeting.id, status, decision).await?;
        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("meeting.convene", start.elapsed());

        info!(
            task_id = request.task_id,
            meeting_id = %meeting.id,
            status = status.as_str(),
            decision = decision.map(|d| d.as_str()).unwrap_or("-"),
            fallback_turns,
            "meeting finished"
        );

        let meeting = Meeting {
            status,
            decision,
            completed_at: Some(crate::storage::now_ms()),
            entries,
            ..meeting
        };
        Ok(MeetingOutcome {
            meeting,
            decision,
            new_revision_notes,
            fallback_turns,
        })
    }
}
