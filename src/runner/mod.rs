// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent process runner.
//!
//! One [`RunRequest`] is one non-interactive agent invocation. CLI providers
//! are spawned as their own process group and fed the prompt on stdin; HTTP
//! providers make one abort-bound chat completion call. Either way the
//! caller gets a [`RunOutput`] with the raw capture, the normalized text and
//! how the run ended.

mod cli;
mod http;
pub mod hub;
pub mod kill;
pub mod provider;
pub mod reply;
pub mod stream;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

use crate::types::Lang;

pub use cli::CliRunner;
pub use http::HttpRunner;
pub use hub::{OutputHub, StreamEvent};
pub use kill::kill_process_tree;
pub use provider::{CliInvocation, ProviderKind, ReasoningLevel, Transport};
pub use reply::{extract_reply, normalize_reply, ExtractedReply, ReplySource};
pub use stream::StreamNormalizer;

/// Error type for runs that could not produce any output at all.
///
/// Non-zero exits, timeouts and cancellations are not errors; they come back
/// as a [`RunOutput`] with the partial capture.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("No usable OAuth account for {0}")]
    NoUsableAccount(String),

    #[error("Provider {0} cannot be run by this runner")]
    UnsupportedProvider(ProviderKind),
}

/// Which limit ended a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// No output for the idle window.
    Idle,
    /// Wall-clock limit reached.
    Hard,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed { exit_code: Option<i32> },
    TimedOut { limit: TimeoutKind },
    Cancelled,
}

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub task_id: Option<String>,
    pub provider: ProviderKind,
    pub prompt: String,
    pub cwd: PathBuf,
    pub model: Option<String>,
    pub reasoning: Option<ReasoningLevel>,
    /// Kill after this long without output.
    pub idle_timeout: Duration,
    /// Kill after this long regardless of output.
    pub hard_timeout: Option<Duration>,
    /// Flips to `true` when the run should stop.
    pub stop: Option<watch::Receiver<bool>>,
    pub lang: Lang,
}

impl RunRequest {
    pub fn new(provider: ProviderKind, prompt: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            task_id: None,
            provider,
            prompt: prompt.into(),
            cwd: cwd.into(),
            model: None,
            reasoning: None,
            idle_timeout: Duration::from_secs(15 * 60),
            hard_timeout: None,
            stop: None,
            lang: Lang::default(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_reasoning(mut self, reasoning: Option<ReasoningLevel>) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn with_timeouts(mut self, idle: Duration, hard: Option<Duration>) -> Self {
        self.idle_timeout = idle;
        self.hard_timeout = hard;
        self
    }

    pub fn with_stop(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_lang(mut self, lang: Lang) -> Self {
        self.lang = lang;
        self
    }
}

/// Everything captured from one run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub provider: ProviderKind,
    pub status: RunStatus,
    /// Unmodified stdout.
    pub raw_stdout: String,
    /// Unmodified stderr.
    pub raw_stderr: String,
    /// Normalized, deduplicated stdout lines.
    pub lines: Vec<String>,
    pub reply: ExtractedReply,
    pub duration_ms: u64,
}

impl RunOutput {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Stdout and stderr together, for failure classification.
    pub fn combined_output(&self) -> String {
        if self.raw_stderr.is_empty() {
            self.raw_stdout.clone()
        } else {
            format!("{}\n{}", self.raw_stdout, self.raw_stderr)
        }
    }
}

/// Executes one prompt against one provider.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, request: RunRequest) -> Result<RunOutput, RunnerError>;
}

/// Routes each request to the CLI or HTTP runner by provider transport.
pub struct AgentRunner {
    cli: CliRunner,
    http: HttpRunner,
}

impl AgentRunner {
    pub fn new(cli: CliRunner, http: HttpRunner) -> Self {
        Self { cli, http }
    }

    pub fn into_shared(self) -> Arc<dyn ProcessRunner> {
        Arc::new(self)
    }
}

#[async_trait]
impl ProcessRunner for AgentRunner {
    async fn run(&self, request: RunRequest) -> Result<RunOutput, RunnerError> {
        match request.provider.transport() {
            Transport::Cli => self.cli.run(request).await,
            Transport::Http => self.http.run(request).await,
        }
    }
}

/// Resolves when `stop` flips to `true`; pends forever without a signal.
pub(crate) async fn stop_requested(stop: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = stop.as_mut() {
        if rx.wait_for(|stopped| *stopped).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let out = RunOutput {
            provider: ProviderKind::Claude,
            status: RunStatus::Failed { exit_code: Some(1) },
            raw_stdout: "out".into(),
            raw_stderr: "permission denied".into(),
            lines: vec![],
            reply: extract_reply(""),
            duration_ms: 3,
        };
        assert!(!out.is_success());
        assert_eq!(out.combined_output(), "out\npermission denied");
    }

    #[tokio::test]
    async fn test_stop_requested_fires() {
        let (tx, rx) = watch::channel(false);
        let mut stop = Some(rx);
        let waiter = tokio::spawn(async move { stop_requested(&mut stop).await });
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_signal_pends() {
        let mut stop = None;
        let result =
            tokio::time::timeout(Duration::from_millis(50), stop_requested(&mut stop)).await;
        assert!(result.is_err());
    }
}
