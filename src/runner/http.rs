// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP runner for OAuth-backed providers.
//!
//! Both providers speak OpenAI-style chat completions. Accounts are tried in
//! priority order; a failing account is recorded and the next one is used.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;
#[cfg(feature = "telemetry")]
use crate::telemetry::{RunResult, GLOBAL_METRICS};

use super::provider::ProviderKind;
use super::reply::{extract_reply, ExtractedReply, ReplySource};
use super::{stop_requested, ProcessRunner, RunOutput, RunRequest, RunStatus, RunnerError, TimeoutKind};

pub const DEFAULT_COPILOT_BASE_URL: &str = "https://api.githubcopilot.com";
pub const DEFAULT_ANTIGRAVITY_BASE_URL: &str = "https://antigravity.googleapis.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Outcome of one attempt with one account.
enum Attempt {
    Reply(String),
    /// The account did not work; try the next one.
    Failed(String),
    TimedOut(TimeoutKind),
    Cancelled,
}

/// Runner for `copilot` and `antigravity`.
pub struct HttpRunner {
    client: Client,
    credentials: Arc<dyn CredentialStore>,
    copilot_base_url: String,
    antigravity_base_url: String,
}

impl HttpRunner {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        let client = Client::builder()
            .user_agent(concat!("climpire/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            credentials,
            copilot_base_url: DEFAULT_COPILOT_BASE_URL.to_string(),
            antigravity_base_url: DEFAULT_ANTIGRAVITY_BASE_URL.to_string(),
        }
    }

    pub fn with_base_urls(mut self, copilot: impl Into<String>, antigravity: impl Into<String>) -> Self {
        self.copilot_base_url = copilot.into();
        self.antigravity_base_url = antigravity.into();
        self
    }

    fn endpoint(&self, provider: ProviderKind) -> Option<String> {
        let base = match provider {
            ProviderKind::Copilot => &self.copilot_base_url,
            ProviderKind::Antigravity => &self.antigravity_base_url,
            ProviderKind::Claude
            | ProviderKind::Codex
            | ProviderKind::Gemini
            | ProviderKind::Opencode => return None,
        };
        Some(format!("{}/chat/completions", base.trim_end_matches('/')))
    }

    async fn attempt(
        &self,
        url: &str,
        token: &str,
        model: &str,
        request: &mut RunRequest,
        deadline: Instant,
        limit: TimeoutKind,
    ) -> Attempt {
        let body = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            stream: false,
        };
        let call = async {
            let response = self
                .client
                .post(url)
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", token))
                .json(&body)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(format!("{}: {}", status.as_u16(), text));
            }
            let parsed: ChatResponse = response.json().await.map_err(|e| e.to_string())?;
            Ok::<String, String>(
                parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .unwrap_or_default(),
            )
        };

        tokio::select! {
            result = call => match result {
                Ok(text) => Attempt::Reply(text),
                Err(e) => Attempt::Failed(e),
            },
            _ = tokio::time::sleep_until(deadline) => Attempt::TimedOut(limit),
            _ = stop_requested(&mut request.stop) => Attempt::Cancelled,
        }
    }

    fn finish(&self, request: &RunRequest, started: Instant, status: RunStatus, text: String) -> RunOutput {
        let duration = started.elapsed();
        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_run(
            request.provider.as_str(),
            duration,
            match status {
                RunStatus::Completed => RunResult::Success,
                RunStatus::Failed { .. } => RunResult::Failure,
                RunStatus::TimedOut { .. } => RunResult::Timeout,
                RunStatus::Cancelled => RunResult::Cancelled,
            },
        );
        let reply = if text.trim().is_empty() {
            extract_reply("")
        } else {
            ExtractedReply {
                text: text.trim().to_string(),
                source: ReplySource::Structured,
            }
        };
        RunOutput {
            provider: request.provider,
            status,
            lines: text.lines().map(str::to_string).collect(),
            raw_stdout: text,
            raw_stderr: String::new(),
            reply,
            duration_ms: duration.as_millis() as u64,
        }
    }
}

#[async_trait]
impl ProcessRunner for HttpRunner {
    async fn run(&self, mut request: RunRequest) -> Result<RunOutput, RunnerError> {
        let url = self
            .endpoint(request.provider)
            .ok_or(RunnerError::UnsupportedProvider(request.provider))?;
        let provider = request.provider.as_str();
        let model = request
            .model
            .clone()
            .or_else(|| request.provider.default_model().map(str::to_string))
            .unwrap_or_default();

        let started = Instant::now();
        // No output arrives until the reply, so the idle window bounds the call too.
        let idle_deadline = started + request.idle_timeout;
        let (deadline, limit) = match request.hard_timeout.map(|d| started + d) {
            Some(hard) if hard <= idle_deadline => (hard, TimeoutKind::Hard),
            _ => (idle_deadline, TimeoutKind::Idle),
        };

        let accounts = self.credentials.active_oauth_account_ids(provider);
        if accounts.is_empty() {
            return Err(RunnerError::NoUsableAccount(provider.to_string()));
        }

        let mut errors: Vec<String> = Vec::new();
        for account in accounts {
            let Some(token) = self.credentials.access_token(&account) else {
                self.credentials.record_failure(&account, "missing access token");
                errors.push(format!("{}: missing access token", account));
                continue;
            };
            debug!(provider, account = %account, model = %model, "calling provider");
            match self
                .attempt(&url, &token, &model, &mut request, deadline, limit)
                .await
            {
                Attempt::Reply(text) => {
                    self.credentials.record_success(&account);
                    info!(provider, account = %account, chars = text.len(), "provider replied");
                    return Ok(self.finish(&request, started, RunStatus::Completed, text));
                }
                Attempt::Failed(error) => {
                    warn!(provider, account = %account, error = %error, "account failed, trying next");
                    self.credentials.record_failure(&account, &error);
                    errors.push(format!("{}: {}", account, error));
                }
                Attempt::TimedOut(limit) => {
                    warn!(provider, account = %account, ?limit, "provider call timed out");
                    return Ok(self.finish(
                        &request,
                        started,
                        RunStatus::TimedOut { limit },
                        String::new(),
                    ));
                }
                Attempt::Cancelled => {
                    info!(provider, "stop requested during provider call");
                    return Ok(self.finish(&request, started, RunStatus::Cancelled, String::new()));
                }
            }
        }

        warn!(provider, failures = errors.len(), "every account failed");
        Err(RunnerError::NoUsableAccount(format!(
            "{} ({})",
            provider,
            errors.join("; ")
        )))
    }
}
