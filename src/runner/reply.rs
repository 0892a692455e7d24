// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Reply extraction from provider output.
//!
//! Structured JSON-lines streams are tried first, then the cleaned raw text.
//! An empty result is reported as such so "said nothing" stays distinct
//! from "crashed".

use serde::Serialize;
use serde_json::Value;

use super::stream::{clean_line, is_noise_line};

/// Where the reply text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Structured,
    RoughText,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedReply {
    pub text: String,
    pub source: ReplySource,
}

/// Text carried by one structured event, and whether it is a final result.
fn event_text(event: &Value) -> Option<(String, bool)> {
    let kind = event.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        // claude: {"type":"result","result":"..."}
        "result" => event
            .get("result")
            .and_then(Value::as_str)
            .map(|s| (s.to_string(), true)),
        // claude: {"type":"assistant","message":{"content":[{"type":"text","text":..}]}}
        "assistant" => {
            let content = event.pointer("/message/content")?.as_array()?;
            let text: Vec<&str> = content
                .iter()
                .filter(|c| c.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|c| c.get("text").and_then(Value::as_str))
                .collect();
            (!text.is_empty()).then(|| (text.join("\n"), false))
        }
        // codex: {"type":"item.completed","item":{"type":"agent_message","text":..}}
        "item.completed" => {
            let item = event.get("item")?;
            match item.get("type").and_then(Value::as_str) {
                Some("agent_message") | Some("assistant_message") => item
                    .get("text")
                    .and_then(Value::as_str)
                    .map(|s| (s.to_string(), false)),
                _ => None,
            }
        }
        // gemini: {"type":"message","role":"assistant","content":..}
        "message" if event.get("role").and_then(Value::as_str) == Some("assistant") => event
            .get("content")
            .and_then(Value::as_str)
            .map(|s| (s.to_string(), false)),
        // opencode: {"type":"text","part":{"text":..}}
        "text" => event
            .pointer("/part/text")
            .or_else(|| event.get("text"))
            .and_then(Value::as_str)
            .map(|s| (s.to_string(), false)),
        _ => {
            // Older codex event shape: {"msg":{"type":"agent_message","message":..}}
            let msg = event.get("msg")?;
            (msg.get("type").and_then(Value::as_str) == Some("agent_message"))
                .then(|| msg.get("message").and_then(Value::as_str))
                .flatten()
                .map(|s| (s.to_string(), false))
        }
    }
}

/// Join streamed pieces. Delta chunks continue the previous piece; whole
/// messages start a new line.
fn join_pieces(pieces: &[(String, bool)]) -> String {
    let mut out = String::new();
    for (i, (text, delta)) in pieces.iter().enumerate() {
        if i > 0 && !delta {
            out.push('\n');
        }
        out.push_str(text);
    }
    out
}

/// Pull the agent's reply out of captured stdout.
pub fn extract_reply(stdout: &str) -> ExtractedReply {
    let mut pieces: Vec<(String, bool)> = Vec::new();
    let mut final_result: Option<String> = None;
    let mut rough: Vec<String> = Vec::new();

    for raw in stdout.lines() {
        let line = clean_line(raw);
        let trimmed = line.trim();
        if trimmed.starts_with('{') {
            if let Ok(event) = serde_json::from_str::<Value>(trimmed) {
                if let Some((text, is_final)) = event_text(&event) {
                    if is_final {
                        final_result = Some(text);
                    } else {
                        let delta = event.get("delta").and_then(Value::as_bool).unwrap_or(false);
                        pieces.push((text, delta));
                    }
                }
                continue;
            }
        }
        if !trimmed.is_empty() && !is_noise_line(trimmed) {
            rough.push(line);
        }
    }

    let structured = final_result
        .filter(|s| !s.trim().is_empty())
        .or_else(|| (!pieces.is_empty()).then(|| join_pieces(&pieces)));
    if let Some(text) = structured.filter(|s| !s.trim().is_empty()) {
        return ExtractedReply {
            text: text.trim().to_string(),
            source: ReplySource::Structured,
        };
    }
    // No assistant text in the JSON events; use the plain lines around them.
    let text = rough.join("\n").trim().to_string();
    if text.is_empty() {
        ExtractedReply {
            text,
            source: ReplySource::Empty,
        }
    } else {
        ExtractedReply {
            text,
            source: ReplySource::RoughText,
        }
    }
}

/// Lines that narrate tool use or reasoning rather than answer.
fn is_narration(line: &str) -> bool {
    let lower = line.trim_start().to_lowercase();
    const PREFIXES: &[&str] = &[
        "thinking",
        "[thinking]",
        "[tool",
        "tool call:",
        "tool_use",
        "running command",
        "$ ",
        "exec ",
        "calling tool",
        "reading file",
        "i'll use the",
        "let me run",
    ];
    PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Remove `<think>` blocks, fenced code and narration lines, collapse
/// whitespace, and cap the length with an ellipsis.
pub fn normalize_reply(text: &str, max_chars: usize) -> String {
    let mut without_think = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        without_think.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    without_think.push_str(rest);

    let mut kept: Vec<&str> = Vec::new();
    let mut in_fence = false;
    for line in without_think.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence || is_narration(line) {
            continue;
        }
        kept.push(line.trim());
    }

    let mut collapsed = String::new();
    let mut blank_run = false;
    for line in kept {
        if line.is_empty() {
            blank_run = !collapsed.is_empty();
            continue;
        }
        if !collapsed.is_empty() {
            collapsed.push_str(if blank_run { "\n\n" } else { "\n" });
        }
        collapsed.push_str(&line.split_whitespace().collect::<Vec<_>>().join(" "));
        blank_run = false;
    }
    truncate_chars(&collapsed, max_chars)
}

/// Cut to at most `max_chars` characters, marking the cut with `…`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.truncate(out.trim_end().len());
    out.push('…');
    out
}
