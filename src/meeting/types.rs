// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Meeting records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::Lang;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingType {
    /// Kickoff before work starts.
    Planned,
    /// Review of finished work before merge.
    Review,
}

impl MeetingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingType::Planned => "planned",
            MeetingType::Review => "review",
        }
    }

    pub fn label(&self, lang: Lang) -> &'static str {
        match self {
            MeetingType::Planned => lang.pick("기획 회의", "planning meeting", "企画会議", "规划会议"),
            MeetingType::Review => lang.pick("리뷰 회의", "review meeting", "レビュー会議", "评审会议"),
        }
    }
}

impl FromStr for MeetingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(MeetingType::Planned),
            "review" => Ok(MeetingType::Review),
            other => Err(format!("unknown meeting type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    InProgress,
    Completed,
    RevisionRequested,
    Failed,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingStatus::InProgress => "in_progress",
            MeetingStatus::Completed => "completed",
            MeetingStatus::RevisionRequested => "revision_requested",
            MeetingStatus::Failed => "failed",
        }
    }
}

impl FromStr for MeetingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(MeetingStatus::InProgress),
            "completed" => Ok(MeetingStatus::Completed),
            "revision_requested" => Ok(MeetingStatus::RevisionRequested),
            "failed" => Ok(MeetingStatus::Failed),
            other => Err(format!("unknown meeting status: {}", other)),
        }
    }
}

/// Reduction of a review statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Hold,
    /// No usable signal yet.
    Reviewing,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Approved => "approved",
            ReviewDecision::Hold => "hold",
            ReviewDecision::Reviewing => "reviewing",
        }
    }
}

impl fmt::Display for ReviewDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(ReviewDecision::Approved),
            "hold" => Ok(ReviewDecision::Hold),
            "reviewing" => Ok(ReviewDecision::Reviewing),
            other => Err(format!("unknown review decision: {}", other)),
        }
    }
}

/// Position a speaker is nudged to take this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    /// Open the discussion with a plan or verdict.
    Lead,
    /// Look for what could go wrong.
    Challenge,
    /// Build on what was said.
    Support,
    /// Close with a decision.
    Conclude,
}

/// One spoken turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingEntry {
    pub seq: i64,
    pub speaker_agent_id: Option<String>,
    pub speaker_name: String,
    pub department: Option<String>,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: String,
    pub task_id: String,
    pub meeting_type: MeetingType,
    pub round: i64,
    pub status: MeetingStatus,
    pub decision: Option<ReviewDecision>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub entries: Vec<MeetingEntry>,
}
