// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Failure and review-decision classification.
//!
//! Both work on signal categories rather than exact phrases; the phrase
//! lists below are the current members of each category.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::runner::{RunOutput, RunStatus};
use crate::types::Lang;

use super::types::ReviewDecision;

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(&format!("(?i){}", p)).ok())
        .collect()
}

fn any_match(set: &[Regex], text: &str) -> bool {
    set.iter().any(|re| re.is_match(text))
}

// ============================================================================
// CLI failures
// ============================================================================

/// Why an agent run produced nothing usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CliFailureKind {
    Permission,
    StaleFile,
    ToolCallsOnly,
    Timeout,
    Generic,
}

static PERMISSION: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"permission denied",
        r"operation not permitted",
        r"\beacces\b",
        r"requires? (?:user )?approval",
        r"approval required",
        r"not allowed to (?:run|write|edit|execute)",
        r"blocked by (?:the )?sandbox",
        r"권한이 (?:없|거부)",
        r"権限がありません",
        r"权限被拒绝|没有权限",
    ])
});

static STALE_FILE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"modified since (?:it was )?(?:last )?read",
        r"file has (?:been )?(?:changed|modified) (?:on disk|externally)",
        r"stale file",
        r"old_string (?:was )?not found",
        r"content (?:has )?changed since",
    ])
});

static TIMEOUT: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[r"timed? ?out", r"deadline exceeded", r"시간 초과", r"タイムアウト", r"超时"])
});

static TOOL_EVENTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r#""type"\s*:\s*"tool_use""#,
        r#""type"\s*:\s*"(?:tool_call|function_call|command_execution)""#,
        r#""tool_calls"\s*:"#,
    ])
});

/// Classify a finished run that did not yield a reply.
pub fn classify_failure(output: &RunOutput) -> CliFailureKind {
    if matches!(output.status, RunStatus::TimedOut { .. }) {
        return CliFailureKind::Timeout;
    }
    classify_failure_text(&output.combined_output(), output.reply.text.trim().is_empty())
}

/// Text-only classification, for output captured elsewhere.
pub fn classify_failure_text(text: &str, reply_empty: bool) -> CliFailureKind {
    if any_match(&PERMISSION, text) {
        CliFailureKind::Permission
    } else if any_match(&STALE_FILE, text) {
        CliFailureKind::StaleFile
    } else if any_match(&TIMEOUT, text) {
        CliFailureKind::Timeout
    } else if reply_empty && any_match(&TOOL_EVENTS, text) {
        CliFailureKind::ToolCallsOnly
    } else {
        CliFailureKind::Generic
    }
}

impl CliFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CliFailureKind::Permission => "permission",
            CliFailureKind::StaleFile => "stale_file",
            CliFailureKind::ToolCallsOnly => "tool_calls_only",
            CliFailureKind::Timeout => "timeout",
            CliFailureKind::Generic => "generic",
        }
    }

    /// Operator-facing explanation.
    pub fn explain(&self, lang: Lang) -> &'static str {
        match self {
            CliFailureKind::Permission => lang.pick(
                "에이전트가 권한 문제로 작업을 진행하지 못했습니다. CLI 권한 설정을 확인해 주세요.",
                "The agent was blocked by a permission check. Check the CLI's permission settings.",
                "権限チェックによりエージェントが作業を続行できませんでした。CLIの権限設定を確認してください。",
                "代理因权限检查被阻止。请检查 CLI 的权限设置。",
            ),
            CliFailureKind::StaleFile => lang.pick(
                "작업 중 파일이 외부에서 변경되어 편집이 거부되었습니다. 다시 실행하면 최신 내용으로 진행합니다.",
                "A file changed underneath the agent and its edit was rejected. A rerun will pick up the current content.",
                "作業中にファイルが外部で変更され、編集が拒否されました。再実行すると最新の内容で続行します。",
                "文件在代理工作期间被外部修改，编辑被拒绝。重新运行将基于最新内容继续。",
            ),
            CliFailureKind::ToolCallsOnly => lang.pick(
                "에이전트가 도구 호출만 하고 답변을 남기지 않았습니다.",
                "The agent only made tool calls and never wrote a reply.",
                "エージェントはツール呼び出しのみを行い、返答を残しませんでした。",
                "代理只进行了工具调用，没有给出回复。",
            ),
            CliFailureKind::Timeout => lang.pick(
                "응답 시간이 초과되어 에이전트 프로세스를 종료했습니다.",
                "The agent did not respond in time and its process was stopped.",
                "応答がタイムアウトしたため、エージェントのプロセスを終了しました。",
                "代理响应超时，进程已被终止。",
            ),
            CliFailureKind::Generic => lang.pick(
                "에이전트 실행이 실패했습니다. 로그를 확인해 주세요.",
                "The agent run failed. See the task log for details.",
                "エージェントの実行に失敗しました。ログを確認してください。",
                "代理运行失败。请查看任务日志。",
            ),
        }
    }
}

// ============================================================================
// Review decisions
// ============================================================================

/// Blocking problems. These override every other signal.
static HARD_BLOCK: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bp0\b",
        r"security (?:incident|vulnerabilit(?:y|ies)|hole|breach|fix|issue)",
        r"data (?:loss|corruption|leak)",
        r"\bblocker\b",
        r"critical (?:bug|issue|defect)",
        r"must (?:be )?fix(?:ed)? before (?:merge|release|shipping)",
        r"(?:cannot|can't|must not|do not) (?:ship|merge|release)",
        r"보안 (?:사고|취약)",
        r"데이터 (?:손실|유실)",
        r"セキュリティ(?:インシデント|脆弱性)",
        r"データ(?:損失|消失)",
        r"安全(?:事故|漏洞)",
        r"数据丢失",
    ])
});

/// A negator right before a hard-block phrase ("no data loss", "没有安全漏洞").
static NEGATED_BEFORE: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\b(?:no|not any|without|nothing|zero|never)\s+(?:[\w-]+\s+){0,2}$",
        r"(?:没有|无|未发现)\s*$",
    ])
});

/// A negator right after one ("보안 취약점은 없습니다", "データ損失はありません").
static NEGATED_AFTER: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"^[^\s.,!?。、]{0,3}\s*(?:없|なし|ありません|はない)",
        r"^\w{0,2}\s*(?:found|detected|spotted|seen)?\s*[:=]?\s*(?:none|n/a)\b",
    ])
});

fn is_negated(text: &str, start: usize, end: usize) -> bool {
    any_match(&NEGATED_BEFORE, &text[..start]) || any_match(&NEGATED_AFTER, &text[end..])
}

/// Hard-block phrases that are asserted rather than ruled out.
fn has_hard_block(text: &str) -> bool {
    HARD_BLOCK.iter().any(|re| {
        re.find_iter(text)
            .any(|m| !is_negated(text, m.start(), m.end()))
    })
}

/// Explicit asks for changes.
static CHANGE_REQUEST: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"request(?:ing)? changes",
        r"needs? (?:changes|rework|revision|another pass)",
        r"\bmust (?:fix|change|add|address)",
        r"please (?:fix|change|revise|address)",
        r"\bon hold\b",
        r"\bhold\b(?: off)?",
        r"not approv(?:ed|ing)",
        r"(?:cannot|can't) approve",
        r"\bpending\b",
        r"수정(?:이)? 필요",
        r"보류",
        r"修正が必要",
        r"保留",
        r"需要修改",
    ])
});

/// Risk accepted for later.
static DEFERRAL: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\bmvp\b",
        r"post[- ]release",
        r"follow[- ]?up",
        r"will monitor",
        r"non[- ]blocking",
        r"\blater\b",
        r"next (?:iteration|sprint|release)",
        r"추후|후속",
        r"後で|フォローアップ",
        r"后续|以后",
    ])
});

static APPROVAL: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"\blgtm\b",
        r"\bapprov(?:e|ed|al)\b",
        r"ship it",
        r"looks good",
        r"\bfine\b",
        r"good to (?:go|merge)",
        r"승인",
        r"문제(?:가)? 없",
        r"承認",
        r"批准|同意",
    ])
});

static NO_RISK: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"no (?:major |real |significant )?(?:risk|risks|issues|concerns|blockers?)",
        r"nothing blocking",
        r"리스크(?:가|는)? 없",
        r"リスク(?:は)?(?:なし|ありません)",
        r"问题不大|没有风险|无风险",
    ])
});

/// Reduce one review statement to a decision.
///
/// Hard blocks win outright unless they are negated ("no blocker").
/// A change request wins unless the speaker explicitly defers it.
/// Approval, "no risk" and deferral language approve.
pub fn classify_review(text: &str) -> ReviewDecision {
    if text.trim().is_empty() {
        return ReviewDecision::Reviewing;
    }
    if has_hard_block(text) {
        return ReviewDecision::Hold;
    }
    let change = any_match(&CHANGE_REQUEST, text);
    let deferral = any_match(&DEFERRAL, text);
    if change && !deferral {
        return ReviewDecision::Hold;
    }
    if deferral || any_match(&APPROVAL, text) || any_match(&NO_RISK, text) {
        return ReviewDecision::Approved;
    }
    ReviewDecision::Reviewing
}

/// Combine individual decisions: any hold holds, any approval otherwise
/// approves.
pub fn aggregate_decisions(decisions: &[ReviewDecision]) -> ReviewDecision {
    if decisions.contains(&ReviewDecision::Hold) {
        ReviewDecision::Hold
    } else if decisions.contains(&ReviewDecision::Approved) {
        ReviewDecision::Approved
    } else {
        ReviewDecision::Reviewing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{extract_reply, ProviderKind, TimeoutKind};

    #[test]
    fn test_review_examples() {
        assert_eq!(classify_review("LGTM, no risk"), ReviewDecision::Approved);
        assert_eq!(
            classify_review("approved pending P0 security fix"),
            ReviewDecision::Hold
        );
        assert_eq!(
            classify_review("fine for MVP, will monitor post-release"),
            ReviewDecision::Approved
        );
        assert_eq!(
            classify_review("LGTM, no security issues found."),
            ReviewDecision::Approved
        );
        assert_eq!(
            classify_review("Approved. No data loss risk."),
            ReviewDecision::Approved
        );
        assert_eq!(classify_review("Looks good, no blocker."), ReviewDecision::Approved);
    }

    #[test]
    fn test_negation_only_covers_its_own_phrase() {
        assert_eq!(
            classify_review("No blocker for the UI, but there is a data loss path on retry."),
            ReviewDecision::Hold
        );
        assert_eq!(
            classify_review("Merged without a security review, which is a blocker."),
            ReviewDecision::Hold
        );
        assert_eq!(
            classify_review("Security issues: none. LGTM."),
            ReviewDecision::Approved
        );
        assert_eq!(classify_review("보안 취약점은 없습니다. 승인합니다."), ReviewDecision::Approved);
        assert_eq!(classify_review("没有安全漏洞，同意合并。"), ReviewDecision::Approved);
    }

    #[test]
    fn test_hard_block_overrides_deferral() {
        assert_eq!(
            classify_review("OK for the MVP but there is a data loss path on retry"),
            ReviewDecision::Hold
        );
    }

    #[test]
    fn test_change_request_without_deferral_holds() {
        assert_eq!(
            classify_review("Please fix the null check in the parser."),
            ReviewDecision::Hold
        );
        assert_eq!(
            classify_review("Please fix the typo in a follow-up, otherwise fine."),
            ReviewDecision::Approved
        );
    }

    #[test]
    fn test_hold_needs_word_boundary() {
        assert_eq!(
            classify_review("The threshold constant is documented."),
            ReviewDecision::Reviewing
        );
    }

    #[test]
    fn test_localized_signals() {
        assert_eq!(classify_review("승인합니다. 리스크 없습니다."), ReviewDecision::Approved);
        assert_eq!(classify_review("보안 취약점이 있어 보류합니다."), ReviewDecision::Hold);
        assert_eq!(classify_review("承認します"), ReviewDecision::Approved);
    }

    #[test]
    fn test_aggregate() {
        use ReviewDecision::*;
        assert_eq!(aggregate_decisions(&[Approved, Hold]), Hold);
        assert_eq!(aggregate_decisions(&[Approved, Reviewing]), Approved);
        assert_eq!(aggregate_decisions(&[Reviewing]), Reviewing);
        assert_eq!(aggregate_decisions(&[]), Reviewing);
    }

    fn output(status: RunStatus, stdout: &str, stderr: &str) -> RunOutput {
        RunOutput {
            provider: ProviderKind::Claude,
            status,
            raw_stdout: stdout.into(),
            raw_stderr: stderr.into(),
            lines: vec![],
            reply: extract_reply(stdout),
            duration_ms: 1,
        }
    }

    #[test]
    fn test_failure_kinds() {
        let failed = RunStatus::Failed { exit_code: Some(1) };
        assert_eq!(
            classify_failure(&output(failed.clone(), "", "Error: permission denied (os error 13)")),
            CliFailureKind::Permission
        );
        assert_eq!(
            classify_failure(&output(failed.clone(), "", "File has been modified since read")),
            CliFailureKind::StaleFile
        );
        assert_eq!(
            classify_failure(&output(
                RunStatus::Completed,
                r#"{"type":"tool_use","name":"Edit"}"#,
                ""
            )),
            CliFailureKind::ToolCallsOnly
        );
        assert_eq!(
            classify_failure(&output(RunStatus::TimedOut { limit: TimeoutKind::Idle }, "", "")),
            CliFailureKind::Timeout
        );
        assert_eq!(
            classify_failure(&output(failed, "", "segfault")),
            CliFailureKind::Generic
        );
    }

    #[test]
    fn test_explanations_localized() {
        assert!(CliFailureKind::Timeout.explain(Lang::En).contains("in time"));
        assert!(CliFailureKind::Timeout.explain(Lang::Ko).contains("시간"));
    }
}
