// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Meeting consensus.
//!
//! Agents take turns speaking on a task, either to plan it or to review the
//! finished work. Each turn is one runner call; replies are filtered, stored
//! as minutes, and review turns are reduced to an approve/hold decision.
//!
//! - [`prompt`]: turn and task prompts
//! - [`reply`]: safe-reply filter and fallbacks
//! - [`classify`]: failure and review classification
//! - [`store`]: minutes and revision history
//! - [`coordinator`]: the turn loop

pub mod classify;
pub mod coordinator;
pub mod prompt;
pub mod reply;
pub mod store;
pub mod types;

use thiserror::Error;

use crate::error::StorageError;

pub use classify::{
    aggregate_decisions, classify_failure, classify_failure_text, classify_review, CliFailureKind,
};
pub use coordinator::{MeetingCoordinator, MeetingOutcome, MeetingRequest};
pub use prompt::{build_task_prompt, build_turn_prompt, TaskPromptContext, TranscriptLimits};
pub use reply::{fallback_reply, Rejection};
pub use store::MeetingStore;
pub use types::{Meeting, MeetingEntry, MeetingStatus, MeetingType, ReviewDecision, Stance};

#[derive(Error, Debug)]
pub enum MeetingError {
    #[error("meeting has no participants")]
    NoParticipants,

    /// A stop request arrived during a turn.
    #[error("meeting cancelled")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),
}
