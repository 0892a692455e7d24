// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Prompt construction for meeting turns and task runs.
//!
//! Everything here is a pure function of its inputs.

use crate::runner::reply::truncate_chars;
use crate::types::{Agent, AgentRole, Lang};

use super::types::{MeetingEntry, MeetingType, Stance};

/// Bounds on how much transcript a prompt carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptLimits {
    /// Most recent turns quoted in full.
    pub max_turns: usize,
    /// Budget for the whole transcript section.
    pub max_chars: usize,
    /// Cap for a single quoted turn.
    pub max_entry_chars: usize,
}

impl Default for TranscriptLimits {
    fn default() -> Self {
        Self {
            max_turns: 8,
            max_chars: 2400,
            max_entry_chars: 320,
        }
    }
}

/// Render the transcript tail. Turns that do not fit are folded, oldest
/// first, into a one-line summary of who spoke.
pub fn render_transcript(entries: &[MeetingEntry], limits: TranscriptLimits, lang: Lang) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let mut first_kept = entries.len().saturating_sub(limits.max_turns);
    let quote = |e: &MeetingEntry| {
        format!(
            "- {}: {}",
            e.speaker_name,
            truncate_chars(&e.content.replace('\n', " "), limits.max_entry_chars)
        )
    };

    let mut quoted: Vec<String> = entries[first_kept..].iter().map(quote).collect();
    while quoted.len() > 1 && quoted.iter().map(|q| q.chars().count() + 1).sum::<usize>() > limits.max_chars {
        quoted.remove(0);
        first_kept += 1;
    }

    let mut out = String::new();
    if first_kept > 0 {
        let mut speakers: Vec<&str> = Vec::new();
        for e in &entries[..first_kept] {
            if !speakers.contains(&e.speaker_name.as_str()) {
                speakers.push(&e.speaker_name);
            }
        }
        let label = lang.pick("이전 발언", "earlier remarks", "以前の発言", "更早的发言");
        out.push_str(&format!("({} {}: {})\n", first_kept, label, speakers.join(", ")));
    }
    out.push_str(&quoted.join("\n"));
    out
}

/// Stance for the speaker at `turn` of `total` turns.
pub fn stance_for(meeting_type: MeetingType, turn: usize, total: usize, role: AgentRole) -> Stance {
    if turn == 0 {
        return Stance::Lead;
    }
    if total > 1 && turn + 1 == total {
        return Stance::Conclude;
    }
    match (meeting_type, role) {
        (MeetingType::Review, AgentRole::Senior | AgentRole::TeamLeader) => Stance::Challenge,
        (MeetingType::Review, _) if turn % 2 == 1 => Stance::Challenge,
        _ => Stance::Support,
    }
}

fn stance_hint(stance: Stance, meeting_type: MeetingType, lang: Lang) -> &'static str {
    match (stance, meeting_type) {
        (Stance::Lead, MeetingType::Planned) => lang.pick(
            "먼저 작업 계획과 역할 분담을 제안하세요.",
            "Open by proposing a plan and who does what.",
            "まず作業計画と役割分担を提案してください。",
            "先提出工作计划和分工。",
        ),
        (Stance::Lead, MeetingType::Review) => lang.pick(
            "결과물을 평가하고 승인 또는 보류 의견을 먼저 밝히세요.",
            "Assess the result and state first whether you approve or hold.",
            "成果物を評価し、承認か保留かを最初に述べてください。",
            "评估结果，并首先说明批准还是保留。",
        ),
        (Stance::Challenge, _) => lang.pick(
            "놓친 위험이나 빠진 부분을 구체적으로 지적하세요.",
            "Point out concrete risks or gaps others missed.",
            "見落とされたリスクや不足点を具体的に指摘してください。",
            "具体指出被忽略的风险或遗漏。",
        ),
        (Stance::Support, _) => lang.pick(
            "앞선 의견을 보완하고 당신 부서 관점을 더하세요.",
            "Build on what was said and add your department's view.",
            "前の意見を補い、あなたの部署の視点を加えてください。",
            "补充前面的意见，并加入你所在部门的视角。",
        ),
        (Stance::Conclude, MeetingType::Planned) => lang.pick(
            "논의를 정리하고 바로 실행할 다음 단계를 확정하세요.",
            "Wrap up and settle the next concrete steps.",
            "議論をまとめ、次の具体的なステップを確定してください。",
            "总结讨论并确定下一步具体行动。",
        ),
        (Stance::Conclude, MeetingType::Review) => lang.pick(
            "최종 판단을 내리세요: 승인 또는 보류(필요한 수정 명시).",
            "Give the final call: approve, or hold and name the required changes.",
            "最終判断を下してください:承認、または保留(必要な修正を明記)。",
            "给出最终结论：批准，或保留并写明需要的修改。",
        ),
    }
}

/// Inputs for one meeting turn.
#[derive(Debug, Clone)]
pub struct TurnContext<'a> {
    pub task_title: &'a str,
    pub task_description: Option<&'a str>,
    pub meeting_type: MeetingType,
    pub round: i64,
    pub speaker: &'a Agent,
    pub stance: Stance,
    pub transcript: &'a [MeetingEntry],
    pub revision_notes: &'a [String],
    /// Latest agent report, for review meetings.
    pub work_summary: Option<&'a str>,
    pub lang: Lang,
    pub limits: TranscriptLimits,
    pub max_reply_chars: usize,
}

/// Build the prompt for one meeting turn.
pub fn build_turn_prompt(ctx: &TurnContext<'_>) -> String {
    let lang = ctx.lang;
    let mut p = String::new();

    p.push_str(&format!(
        "{} {} ({}, {}). {} {}.\n",
        lang.pick("당신은", "You are", "あなたは", "你是"),
        ctx.speaker.name,
        ctx.speaker.department,
        ctx.speaker.role.label(lang),
        lang.pick("지금은", "This is a", "これは", "当前是"),
        ctx.meeting_type.label(lang),
    ));
    if let Some(personality) = ctx.speaker.personality.as_deref().filter(|s| !s.trim().is_empty()) {
        p.push_str(&format!(
            "{}: {}\n",
            lang.pick("성격", "Personality", "性格", "性格"),
            personality.trim()
        ));
    }
    if ctx.round > 1 {
        p.push_str(&format!(
            "{} {}.\n",
            lang.pick("리뷰 라운드", "Review round", "レビューラウンド", "评审轮次"),
            ctx.round
        ));
    }

    p.push_str(&format!(
        "\n{}: {}\n",
        lang.pick("작업", "Task", "タスク", "任务"),
        ctx.task_title
    ));
    if let Some(desc) = ctx.task_description.filter(|d| !d.trim().is_empty()) {
        p.push_str(&truncate_chars(desc.trim(), 1200));
        p.push('\n');
    }
    if let Some(summary) = ctx.work_summary.filter(|s| !s.trim().is_empty()) {
        p.push_str(&format!(
            "\n{}:\n{}\n",
            lang.pick("작업 결과 보고", "Work report", "作業報告", "工作报告"),
            truncate_chars(summary.trim(), 1200)
        ));
    }
    if !ctx.revision_notes.is_empty() {
        p.push_str(&format!(
            "\n{}:\n",
            lang.pick("이전 수정 요청", "Earlier revision requests", "以前の修正依頼", "之前的修改要求")
        ));
        for note in ctx.revision_notes {
            p.push_str(&format!("- {}\n", truncate_chars(note, 200)));
        }
    }

    let transcript = render_transcript(ctx.transcript, ctx.limits, lang);
    if !transcript.is_empty() {
        p.push_str(&format!(
            "\n{}:\n{}\n",
            lang.pick("지금까지의 대화", "Discussion so far", "これまでの議論", "目前的讨论"),
            transcript
        ));
    }

    p.push_str(&format!(
        "\n{}\n",
        stance_hint(ctx.stance, ctx.meeting_type, lang)
    ));
    p.push_str(&format!(
        "{} {} {}\n",
        lang.pick(
            "도구를 쓰거나 파일을 수정하지 말고, 회의 발언만 한국어로",
            "Do not use tools or edit files. Reply only with your spoken remark in English,",
            "ツールを使ったりファイルを編集したりせず、会議での発言だけを日本語で",
            "不要使用工具或修改文件，只用中文给出你的会议发言，",
        ),
        ctx.max_reply_chars,
        lang.pick("자 이내로 답하세요.", "characters at most.", "文字以内で答えてください。", "字以内。"),
    ));
    p
}

/// Inputs for a task execution run.
#[derive(Debug, Clone)]
pub struct TaskPromptContext<'a> {
    pub task_title: &'a str,
    pub task_description: Option<&'a str>,
    pub agent: &'a Agent,
    pub lang: Lang,
    /// Planning meeting conclusion, if one was held.
    pub plan: Option<&'a str>,
    pub revision_notes: &'a [String],
    /// Where the agent is working; absent when isolation was unavailable.
    pub worktree_branch: Option<&'a str>,
}

/// Build the prompt for a task execution run.
pub fn build_task_prompt(ctx: &TaskPromptContext<'_>) -> String {
    let lang = ctx.lang;
    let mut p = String::new();
    p.push_str(&format!(
        "{} {} ({}, {}).\n\n",
        lang.pick("당신은", "You are", "あなたは", "你是"),
        ctx.agent.name,
        ctx.agent.department,
        ctx.agent.role.label(lang),
    ));
    p.push_str(&format!("# {}\n", ctx.task_title));
    if let Some(desc) = ctx.task_description.filter(|d| !d.trim().is_empty()) {
        p.push_str(desc.trim());
        p.push('\n');
    }
    if let Some(plan) = ctx.plan.filter(|s| !s.trim().is_empty()) {
        p.push_str(&format!(
            "\n## {}\n{}\n",
            lang.pick("회의에서 정한 계획", "Plan agreed in the meeting", "会議で決めた計画", "会议确定的计划"),
            plan.trim()
        ));
    }
    if !ctx.revision_notes.is_empty() {
        p.push_str(&format!(
            "\n## {}\n",
            lang.pick("반영할 리뷰 의견", "Review feedback to address", "対応すべきレビュー指摘", "需要处理的评审意见")
        ));
        for note in ctx.revision_notes {
            p.push_str(&format!("- {}\n", note));
        }
    }
    if let Some(branch) = ctx.worktree_branch {
        p.push_str(&format!(
            "\n{} `{}`. {}\n",
            lang.pick("작업 브랜치:", "Working branch:", "作業ブランチ:", "工作分支:"),
            branch,
            lang.pick(
                "변경 사항은 자동으로 커밋됩니다.",
                "Changes are committed automatically.",
                "変更は自動でコミットされます。",
                "修改会被自动提交。",
            ),
        ));
    }
    p.push_str(&format!(
        "\n{}\n",
        lang.pick(
            "작업을 마치면 무엇을 바꿨는지 짧게 보고하세요.",
            "When finished, report briefly what you changed.",
            "完了したら、何を変更したかを簡潔に報告してください。",
            "完成后，简要报告你修改了什么。",
        )
    ));
    p
}
