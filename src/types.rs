// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Domain types shared by the workflow, runner and meeting components.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Language
// ============================================================================

/// Language used for prompts, fallback replies and failure explanations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Ko,
    #[default]
    En,
    Ja,
    Zh,
}

impl Lang {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::Ko => "ko",
            Lang::En => "en",
            Lang::Ja => "ja",
            Lang::Zh => "zh",
        }
    }

    /// Parse a settings value, falling back to English for anything unknown.
    pub fn from_setting(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    /// Guess the language of a piece of text from its script.
    ///
    /// Kana wins over Han so Japanese with kanji is not read as Chinese.
    pub fn detect(text: &str) -> Self {
        let (mut hangul, mut kana, mut han, mut latin) = (0usize, 0usize, 0usize, 0usize);
        for c in text.chars() {
            match c as u32 {
                0xAC00..=0xD7A3 | 0x1100..=0x11FF | 0x3130..=0x318F => hangul += 1,
                0x3040..=0x30FF => kana += 1,
                0x4E00..=0x9FFF => han += 1,
                _ if c.is_ascii_alphabetic() => latin += 1,
                _ => {}
            }
        }
        if hangul > 0 && hangul * 4 >= latin {
            Lang::Ko
        } else if kana > 0 {
            Lang::Ja
        } else if han > 0 && han * 4 >= latin {
            Lang::Zh
        } else {
            Lang::En
        }
    }

    /// Select the string for this language.
    pub fn pick<'a>(&self, ko: &'a str, en: &'a str, ja: &'a str, zh: &'a str) -> &'a str {
        match self {
            Lang::Ko => ko,
            Lang::En => en,
            Lang::Ja => ja,
            Lang::Zh => zh,
        }
    }
}

impl FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ko" | "kr" | "korean" => Ok(Lang::Ko),
            "en" | "english" => Ok(Lang::En),
            "ja" | "jp" | "japanese" => Ok(Lang::Ja),
            "zh" | "cn" | "chinese" => Ok(Lang::Zh),
            other => Err(format!("unknown language: {}", other)),
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Task logs
// ============================================================================

/// Source of a task log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Orchestrator decisions (transitions, merges, warnings).
    System,
    /// Normalized agent reply text.
    Agent,
    Stdout,
    Stderr,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::System => "system",
            LogKind::Agent => "agent",
            LogKind::Stdout => "stdout",
            LogKind::Stderr => "stderr",
        }
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(LogKind::System),
            "agent" => Ok(LogKind::Agent),
            "stdout" => Ok(LogKind::Stdout),
            "stderr" => Ok(LogKind::Stderr),
            other => Err(format!("unknown log kind: {}", other)),
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Agents
// ============================================================================

/// Seniority of an agent inside its department.
///
/// Ordering follows seniority, so `max()` picks the most senior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Intern,
    Junior,
    Senior,
    TeamLeader,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Intern => "intern",
            AgentRole::Junior => "junior",
            AgentRole::Senior => "senior",
            AgentRole::TeamLeader => "team_leader",
        }
    }

    pub fn label(&self, lang: Lang) -> &'static str {
        match self {
            AgentRole::TeamLeader => lang.pick("팀장", "Team Leader", "チームリーダー", "组长"),
            AgentRole::Senior => lang.pick("시니어", "Senior", "シニア", "高级"),
            AgentRole::Junior => lang.pick("주니어", "Junior", "ジュニア", "初级"),
            AgentRole::Intern => lang.pick("인턴", "Intern", "インターン", "实习生"),
        }
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "team_leader" => Ok(AgentRole::TeamLeader),
            "senior" => Ok(AgentRole::Senior),
            "junior" => Ok(AgentRole::Junior),
            "intern" => Ok(AgentRole::Intern),
            other => Err(format!("unknown agent role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Offline => "offline",
        }
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "working" => Ok(AgentStatus::Working),
            "offline" => Ok(AgentStatus::Offline),
            other => Err(format!("unknown agent status: {}", other)),
        }
    }
}

/// A roster member that can be assigned tasks and speak in meetings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub department: String,
    pub role: AgentRole,
    /// Provider name as stored (`claude`, `codex`, `copilot`, ...).
    pub provider: String,
    pub model: Option<String>,
    pub reasoning_level: Option<String>,
    pub personality: Option<String>,
    pub oauth_account_id: Option<String>,
    pub status: AgentStatus,
    pub current_task_id: Option<String>,
}

impl Agent {
    /// Minimal idle agent, mostly for tests and seeding.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        department: impl Into<String>,
        role: AgentRole,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            department: department.into(),
            role,
            provider: provider.into(),
            model: None,
            reasoning_level: None,
            personality: None,
            oauth_account_id: None,
            status: AgentStatus::Idle,
            current_task_id: None,
        }
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Short id used in branch and directory names: the first 8 characters.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lang_detect() {
        assert_eq!(Lang::detect("이 변경은 안전합니다"), Lang::Ko);
        assert_eq!(Lang::detect("この変更は安全です"), Lang::Ja);
        assert_eq!(Lang::detect("这个改动是安全的"), Lang::Zh);
        assert_eq!(Lang::detect("LGTM, no risk"), Lang::En);
        assert_eq!(Lang::detect("123 ..."), Lang::En);
    }

    #[test]
    fn test_lang_from_setting() {
        assert_eq!(Lang::from_setting(Some("ko")), Lang::Ko);
        assert_eq!(Lang::from_setting(Some(" JA ")), Lang::Ja);
        assert_eq!(Lang::from_setting(Some("klingon")), Lang::En);
        assert_eq!(Lang::from_setting(None), Lang::En);
    }

    #[test]
    fn test_role_ordering() {
        let roles = [AgentRole::Junior, AgentRole::TeamLeader, AgentRole::Intern];
        assert_eq!(roles.iter().max(), Some(&AgentRole::TeamLeader));
        assert_eq!("team_leader".parse::<AgentRole>().unwrap(), AgentRole::TeamLeader);
    }

    #[test]
    fn test_log_kind_roundtrip_names() {
        for kind in [LogKind::System, LogKind::Agent, LogKind::Stdout, LogKind::Stderr] {
            assert_eq!(kind.as_str().parse::<LogKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
