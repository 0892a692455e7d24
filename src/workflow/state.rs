// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Task and subtask status graphs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Inbox,
    Planned,
    Collaborating,
    InProgress,
    Review,
    Done,
    Cancelled,
    /// Parked run, resumable back to `in_progress`.
    Pending,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Inbox,
        TaskStatus::Planned,
        TaskStatus::Collaborating,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
        TaskStatus::Cancelled,
        TaskStatus::Pending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Inbox => "inbox",
            TaskStatus::Planned => "planned",
            TaskStatus::Collaborating => "collaborating",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Pending => "pending",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }

    /// Whether the graph has an edge `self -> next`.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Inbox, Planned)
                | (Planned, Collaborating)
                | (Collaborating, InProgress)
                | (InProgress, Review)
                | (Review, Done)
                | (Review, InProgress)
                | (InProgress, Pending)
                | (Pending, InProgress)
                | (_, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Done,
    Blocked,
}

impl SubtaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtaskStatus::Pending => "pending",
            SubtaskStatus::InProgress => "in_progress",
            SubtaskStatus::Done => "done",
            SubtaskStatus::Blocked => "blocked",
        }
    }
}

impl FromStr for SubtaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubtaskStatus::Pending),
            "in_progress" => Ok(SubtaskStatus::InProgress),
            "done" => Ok(SubtaskStatus::Done),
            "blocked" => Ok(SubtaskStatus::Blocked),
            other => Err(format!("unknown subtask status: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn test_happy_path() {
        let path = [Inbox, Planned, Collaborating, InProgress, Review, Done];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_only_documented_edges() {
        let allowed = [
            (Inbox, Planned),
            (Planned, Collaborating),
            (Collaborating, InProgress),
            (InProgress, Review),
            (Review, Done),
            (Review, InProgress),
            (InProgress, Pending),
            (Pending, InProgress),
        ];
        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                let expected = if from.is_terminal() {
                    false
                } else if to == Cancelled {
                    true
                } else {
                    allowed.contains(&(from, to))
                };
                assert_eq!(from.can_transition_to(to), expected, "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_terminal_states_stick() {
        assert!(!Done.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(InProgress));
        assert!(!Pending.can_transition_to(Review));
        assert!(!Inbox.can_transition_to(InProgress));
    }

    #[test]
    fn test_parse() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("archived".parse::<TaskStatus>().is_err());
        assert_eq!("blocked".parse::<SubtaskStatus>().unwrap(), SubtaskStatus::Blocked);
    }
}
