// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Turning raw turn output into something fit for the minutes.

use crate::runner::{normalize_reply, RunOutput};
use crate::types::Lang;

use super::classify::{classify_failure_text, CliFailureKind};
use super::types::{MeetingType, Stance};

/// Why a reply was replaced by a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    /// The agent described what it was about to do instead of speaking.
    Narration,
    WrongLanguage,
    /// The text reads like a CLI error rather than a remark.
    FailureSignature(CliFailureKind),
}

const NARRATION_MARKERS: &[&str] = &[
    "i'll ",
    "i will ",
    "let me ",
    "i'm going to ",
    "i am going to ",
    "reading the file",
    "running the command",
    "checking the code",
];

fn looks_like_narration(text: &str) -> bool {
    let lower = text.to_lowercase();
    let start = lower.trim_start();
    NARRATION_MARKERS.iter().any(|m| start.starts_with(m)) && lower.chars().count() < 160
}

/// How CLI error output starts. A remark that merely mentions a timeout or
/// a permission check does not.
const ERROR_PREFIXES: &[&str] = &[
    "error:",
    "error[",
    "fatal:",
    "panic:",
    "thread 'main' panicked",
    "permission denied",
    "operation not permitted",
    "eacces",
    "timed out",
    "deadline exceeded",
    "오류:",
    "에러:",
    "エラー:",
    "エラー：",
    "错误:",
    "错误：",
];

fn looks_like_error(text: &str) -> bool {
    let first = text.lines().next().unwrap_or_default().trim_start().to_lowercase();
    ERROR_PREFIXES.iter().any(|p| first.starts_with(p))
}

/// Check a normalized reply before it goes into the minutes.
pub fn check_reply(text: &str, lang: Lang) -> Result<(), Rejection> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| !c.is_alphanumeric()) {
        return Err(Rejection::Empty);
    }
    if looks_like_error(trimmed) {
        return Err(Rejection::FailureSignature(classify_failure_text(trimmed, false)));
    }
    if looks_like_narration(trimmed) {
        return Err(Rejection::Narration);
    }
    if Lang::detect(trimmed) != lang {
        return Err(Rejection::WrongLanguage);
    }
    Ok(())
}

/// Deterministic stand-in for a turn that produced nothing usable.
pub fn fallback_reply(meeting_type: MeetingType, stance: Stance, lang: Lang) -> &'static str {
    match (meeting_type, stance) {
        (MeetingType::Planned, Stance::Lead) => lang.pick(
            "요구사항을 기준으로 작게 나눠 바로 착수하겠습니다.",
            "Let's split the requirements into small steps and start right away.",
            "要件を小さく分けて、すぐに着手しましょう。",
            "按需求拆成小步骤，马上开始。",
        ),
        (MeetingType::Planned, Stance::Conclude) => lang.pick(
            "합의한 계획대로 진행하고 결과를 리뷰에서 확인하겠습니다.",
            "We go ahead with the agreed plan and check the result in review.",
            "合意した計画で進め、結果はレビューで確認します。",
            "按商定的计划推进，结果在评审时确认。",
        ),
        (MeetingType::Planned, _) => lang.pick(
            "계획에 동의합니다. 제 부서 쪽 작업도 맞춰 준비하겠습니다.",
            "I agree with the plan and will line up my department's part.",
            "計画に賛成です。私の部署の作業も合わせて準備します。",
            "同意这个计划，我会准备好本部门的部分。",
        ),
        (MeetingType::Review, Stance::Challenge) => lang.pick(
            "큰 위험은 보이지 않지만 테스트 범위는 추후 보강이 필요합니다.",
            "No major risk seen, though test coverage should be extended in a follow-up.",
            "大きなリスクは見当たりませんが、テスト範囲は後で補強が必要です。",
            "没有发现重大风险，但后续需要补充测试覆盖。",
        ),
        (MeetingType::Review, _) => lang.pick(
            "검토했습니다. 특별한 이견은 없습니다.",
            "Reviewed. No particular objections.",
            "確認しました。特に異論はありません。",
            "已审阅，没有特别的异议。",
        ),
    }
}

/// Final text for one turn and whether a fallback was used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    pub text: String,
    pub rejection: Option<Rejection>,
}

impl TurnReply {
    pub fn is_fallback(&self) -> bool {
        self.rejection.is_some()
    }
}

/// Normalize a turn's output, falling back when it is unusable.
pub fn finalize_turn_reply(
    output: Option<&RunOutput>,
    meeting_type: MeetingType,
    stance: Stance,
    lang: Lang,
    max_chars: usize,
) -> TurnReply {
    let rejection = match output {
        None => Rejection::Empty,
        Some(out) if !out.is_success() => {
            match super::classify::classify_failure(out) {
                CliFailureKind::Generic if out.reply.text.trim().is_empty() => Rejection::Empty,
                kind => Rejection::FailureSignature(kind),
            }
        }
        Some(out) => {
            let text = normalize_reply(&out.reply.text, max_chars);
            match check_reply(&text, lang) {
                Ok(()) => return TurnReply { text, rejection: None },
                Err(r) => r,
            }
        }
    };
    TurnReply {
        text: fallback_reply(meeting_type, stance, lang).to_string(),
        rejection: Some(rejection),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{ExtractedReply, ProviderKind, ReplySource, RunStatus};

    fn output(status: RunStatus, reply: &str, stderr: &str) -> RunOutput {
        RunOutput {
            provider: ProviderKind::Claude,
            status,
            raw_stdout: String::new(),
            raw_stderr: stderr.into(),
            lines: vec![],
            reply: ExtractedReply {
                text: reply.into(),
                source: ReplySource::Structured,
            },
            duration_ms: 5,
        }
    }

    #[test]
    fn test_check_reply() {
        assert_eq!(check_reply("  ", Lang::En), Err(Rejection::Empty));
        assert_eq!(check_reply("...", Lang::En), Err(Rejection::Empty));
        assert_eq!(
            check_reply("Let me read the file first.", Lang::En),
            Err(Rejection::Narration)
        );
        assert_eq!(
            check_reply("The retry path looks safe to me.", Lang::Ko),
            Err(Rejection::WrongLanguage)
        );
        assert!(matches!(
            check_reply("Error: permission denied", Lang::En),
            Err(Rejection::FailureSignature(CliFailureKind::Permission))
        ));
        assert_eq!(check_reply("재시도 경로는 안전해 보입니다.", Lang::Ko), Ok(()));
    }

    #[test]
    fn test_remarks_about_failures_are_kept() {
        assert_eq!(
            check_reply("Added a timeout to the HTTP client. LGTM, no risk.", Lang::En),
            Ok(())
        );
        assert_eq!(
            check_reply("The code now handles permission denied errors. Approved.", Lang::En),
            Ok(())
        );
        assert_eq!(
            check_reply("Error handling around the retry loop looks solid.", Lang::En),
            Ok(())
        );
        assert!(matches!(
            check_reply("fatal: not a git repository", Lang::En),
            Err(Rejection::FailureSignature(CliFailureKind::Generic))
        ));
        assert!(matches!(
            check_reply("Timed out waiting for the model", Lang::En),
            Err(Rejection::FailureSignature(CliFailureKind::Timeout))
        ));
    }

    #[test]
    fn test_review_mentioning_timeouts_votes() {
        let out = output(
            RunStatus::Completed,
            "Added a timeout to the HTTP client. LGTM",
            "",
        );
        let reply = finalize_turn_reply(Some(&out), MeetingType::Review, Stance::Lead, Lang::En, 600);
        assert!(!reply.is_fallback());
        assert_eq!(reply.text, "Added a timeout to the HTTP client. LGTM");
    }

    #[test]
    fn test_finalize_uses_reply() {
        let out = output(RunStatus::Completed, "LGTM, no risk.", "");
        let reply = finalize_turn_reply(Some(&out), MeetingType::Review, Stance::Lead, Lang::En, 600);
        assert_eq!(reply.text, "LGTM, no risk.");
        assert!(!reply.is_fallback());
    }

    #[test]
    fn test_finalize_falls_back() {
        let out = output(RunStatus::Failed { exit_code: Some(1) }, "", "permission denied");
        let reply = finalize_turn_reply(Some(&out), MeetingType::Review, Stance::Lead, Lang::Ja, 600);
        assert_eq!(reply.rejection, Some(Rejection::FailureSignature(CliFailureKind::Permission)));
        assert_eq!(reply.text, fallback_reply(MeetingType::Review, Stance::Lead, Lang::Ja));

        let missing = finalize_turn_reply(None, MeetingType::Planned, Stance::Lead, Lang::En, 600);
        assert_eq!(missing.rejection, Some(Rejection::Empty));
    }

    #[test]
    fn test_fallbacks_read_as_approval_or_neutral() {
        use super::super::classify::classify_review;
        use super::super::types::ReviewDecision;
        for lang in [Lang::Ko, Lang::En, Lang::Ja, Lang::Zh] {
            for stance in [Stance::Lead, Stance::Challenge, Stance::Support, Stance::Conclude] {
                let text = fallback_reply(MeetingType::Review, stance, lang);
                assert_ne!(classify_review(text), ReviewDecision::Hold, "{}", text);
                assert_eq!(Lang::detect(text), lang);
            }
        }
    }
}
