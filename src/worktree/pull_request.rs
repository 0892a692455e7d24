// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Open or update the `dev` pull request through the GitHub REST API.

use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;

use super::WorktreeError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const GITHUB_API_VERSION: &str = "2022-11-28";

/// Where to open the pull request and with which token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestTarget {
    /// `owner/name`.
    pub repo: String,
    pub token: String,
    /// Branch the PR merges into, usually `main`.
    pub base: String,
}

impl PullRequestTarget {
    pub fn owner(&self) -> &str {
        self.repo.split('/').next().unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    number: u64,
    html_url: String,
}

/// Minimal GitHub pulls client.
#[derive(Debug, Clone)]
pub struct PullRequestClient {
    client: Client,
    api_base: String,
}

impl PullRequestClient {
    pub fn new(api_base: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(concat!("climpire/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn pulls_url(&self, repo: &str) -> String {
        format!("{}/repos/{}/pulls", self.api_base, repo)
    }

    fn request(&self, method: reqwest::Method, url: String, token: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", GITHUB_API_VERSION)
            .header("authorization", format!("Bearer {}", token))
    }

    /// Update the open PR from `head` into `target.base`, or create one.
    /// Returns the PR's web URL.
    pub async fn open_or_update(
        &self,
        target: &PullRequestTarget,
        head: &str,
        title: &str,
        body: &str,
    ) -> Result<String, WorktreeError> {
        let start = Instant::now();
        let existing = self.find_open(target, head).await?;

        let response = match existing {
            Some(pr) => {
                debug!(repo = %target.repo, number = pr.number, "updating pull request");
                self.request(
                    reqwest::Method::PATCH,
                    format!("{}/{}", self.pulls_url(&target.repo), pr.number),
                    &target.token,
                )
                .json(&json!({ "title": title, "body": body }))
                .send()
                .await
            }
            None => {
                debug!(repo = %target.repo, head, base = %target.base, "creating pull request");
                self.request(reqwest::Method::POST, self.pulls_url(&target.repo), &target.token)
                    .json(&json!({
                        "title": title,
                        "head": head,
                        "base": target.base,
                        "body": body,
                    }))
                    .send()
                    .await
            }
        }
        .map_err(|e| WorktreeError::PullRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WorktreeError::PullRequest(format!("{}: {}", status.as_u16(), text)));
        }
        let pr: PullRequest = response
            .json()
            .await
            .map_err(|e| WorktreeError::PullRequest(e.to_string()))?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("worktree.pull_request", start.elapsed());
        #[cfg(not(feature = "telemetry"))]
        let _ = start;

        Ok(pr.html_url)
    }

    async fn find_open(
        &self,
        target: &PullRequestTarget,
        head: &str,
    ) -> Result<Option<PullRequest>, WorktreeError> {
        let response = self
            .request(reqwest::Method::GET, self.pulls_url(&target.repo), &target.token)
            .query(&[
                ("state", "open"),
                ("head", &format!("{}:{}", target.owner(), head)),
                ("base", &target.base),
            ])
            .send()
            .await
            .map_err(|e| WorktreeError::PullRequest(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(WorktreeError::PullRequest(format!("{}: {}", status.as_u16(), text)));
        }
        let mut open: Vec<PullRequest> = response
            .json()
            .await
            .map_err(|e| WorktreeError::PullRequest(e.to_string()))?;
        Ok(if open.is_empty() { None } else { Some(open.remove(0)) })
    }
}
