// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Provider kinds and how each one is invoked.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a provider is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Child process, prompt on stdin.
    Cli,
    /// OpenAI-compatible chat completions with an OAuth account.
    Http,
}

/// Every supported agent backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    Codex,
    Gemini,
    Opencode,
    Copilot,
    Antigravity,
}

/// Reasoning effort requested from providers that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningLevel {
    Low,
    Medium,
    High,
    Xhigh,
}

impl ReasoningLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningLevel::Low => "low",
            ReasoningLevel::Medium => "medium",
            ReasoningLevel::High => "high",
            ReasoningLevel::Xhigh => "xhigh",
        }
    }

    /// Thinking-token budget for providers configured through the environment.
    fn thinking_tokens(&self) -> u32 {
        match self {
            ReasoningLevel::Low => 4_000,
            ReasoningLevel::Medium => 10_000,
            ReasoningLevel::High => 32_000,
            ReasoningLevel::Xhigh => 63_999,
        }
    }
}

impl FromStr for ReasoningLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "minimal" => Ok(ReasoningLevel::Low),
            "medium" | "normal" => Ok(ReasoningLevel::Medium),
            "high" => Ok(ReasoningLevel::High),
            "xhigh" | "max" => Ok(ReasoningLevel::Xhigh),
            other => Err(format!("unknown reasoning level: {}", other)),
        }
    }
}

/// A fully built child-process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::Claude,
        ProviderKind::Codex,
        ProviderKind::Gemini,
        ProviderKind::Opencode,
        ProviderKind::Copilot,
        ProviderKind::Antigravity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::Codex => "codex",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Opencode => "opencode",
            ProviderKind::Copilot => "copilot",
            ProviderKind::Antigravity => "antigravity",
        }
    }

    pub fn transport(&self) -> Transport {
        match self {
            ProviderKind::Claude
            | ProviderKind::Codex
            | ProviderKind::Gemini
            | ProviderKind::Opencode => Transport::Cli,
            ProviderKind::Copilot | ProviderKind::Antigravity => Transport::Http,
        }
    }

    /// Model used when neither the agent nor settings name one.
    pub fn default_model(&self) -> Option<&'static str> {
        match self {
            ProviderKind::Copilot => Some("gpt-4.1"),
            ProviderKind::Antigravity => Some("gemini-2.5-pro"),
            ProviderKind::Claude
            | ProviderKind::Codex
            | ProviderKind::Gemini
            | ProviderKind::Opencode => None,
        }
    }

    /// Build the argv for a CLI provider. `None` for HTTP providers.
    pub fn cli_invocation(
        &self,
        model: Option<&str>,
        reasoning: Option<ReasoningLevel>,
    ) -> Option<CliInvocation> {
        let model = model.map(str::trim).filter(|m| !m.is_empty());
        let mut env = Vec::new();
        let (program, mut args): (&str, Vec<String>) = match self {
            ProviderKind::Claude => {
                if let Some(level) = reasoning {
                    env.push((
                        "MAX_THINKING_TOKENS".to_string(),
                        level.thinking_tokens().to_string(),
                    ));
                }
                (
                    "claude",
                    vec![
                        "--print".into(),
                        "--verbose".into(),
                        "--output-format=stream-json".into(),
                        "--dangerously-skip-permissions".into(),
                    ],
                )
            }
            ProviderKind::Codex => {
                let mut args: Vec<String> = vec![
                    "exec".into(),
                    "--json".into(),
                    "--skip-git-repo-check".into(),
                    "--dangerously-bypass-approvals-and-sandbox".into(),
                ];
                if let Some(level) = reasoning {
                    args.push("-c".into());
                    args.push(format!("model_reasoning_effort=\"{}\"", level.as_str()));
                }
                ("codex", args)
            }
            ProviderKind::Gemini => (
                "gemini",
                vec!["--yolo".into(), "--output-format=stream-json".into()],
            ),
            ProviderKind::Opencode => (
                "opencode",
                vec!["run".into(), "--format".into(), "json".into()],
            ),
            ProviderKind::Copilot | ProviderKind::Antigravity => return None,
        };

        if let Some(model) = model {
            match self {
                ProviderKind::Codex => {
                    args.push("-m".into());
                    args.push(model.to_string());
                }
                _ => {
                    args.push("--model".into());
                    args.push(model.to_string());
                }
            }
        }
        // Codex reads the prompt from stdin when given `-`.
        if *self == ProviderKind::Codex {
            args.push("-".into());
        }

        Some(CliInvocation {
            program: program.to_string(),
            args,
            env,
        })
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| format!("unknown provider: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_split() {
        let http: Vec<_> = ProviderKind::ALL
            .iter()
            .filter(|p| p.transport() == Transport::Http)
            .collect();
        assert_eq!(http, vec![&ProviderKind::Copilot, &ProviderKind::Antigravity]);
        assert!(ProviderKind::Copilot.cli_invocation(None, None).is_none());
    }

    #[test]
    fn test_claude_argv_and_thinking_env() {
        let inv = ProviderKind::Claude
            .cli_invocation(Some("opus"), Some(ReasoningLevel::High))
            .unwrap();
        assert_eq!(inv.program, "claude");
        assert!(inv.args.contains(&"--output-format=stream-json".to_string()));
        assert_eq!(&inv.args[inv.args.len() - 2..], &["--model", "opus"]);
        assert_eq!(inv.env, vec![("MAX_THINKING_TOKENS".into(), "32000".into())]);
    }

    #[test]
    fn test_codex_reads_stdin_last() {
        let inv = ProviderKind::Codex
            .cli_invocation(Some("gpt-5"), Some(ReasoningLevel::Low))
            .unwrap();
        assert_eq!(inv.args.last().map(String::as_str), Some("-"));
        assert!(inv.args.contains(&"model_reasoning_effort=\"low\"".to_string()));
        assert!(inv.args.windows(2).any(|w| w == ["-m", "gpt-5"]));
    }

    #[test]
    fn test_blank_model_ignored() {
        let inv = ProviderKind::Gemini.cli_invocation(Some("  "), None).unwrap();
        assert!(!inv.args.contains(&"--model".to_string()));
    }

    #[test]
    fn test_parse() {
        assert_eq!("Claude".parse::<ProviderKind>(), Ok(ProviderKind::Claude));
        assert!("cursor".parse::<ProviderKind>().is_err());
        assert_eq!("max".parse::<ReasoningLevel>(), Ok(ReasoningLevel::Xhigh));
    }
}
