// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Child-process runner for CLI providers.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::{RunResult, GLOBAL_METRICS};
use crate::types::LogKind;

use super::hub::{OutputHub, StreamEvent};
use super::kill::kill_process_tree;
use super::provider::CliInvocation;
use super::reply::extract_reply;
use super::stream::StreamNormalizer;
use super::{
    stop_requested, ProcessRunner, RunOutput, RunRequest, RunStatus, RunnerError, TimeoutKind,
};

const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(1500);

/// How long to wait for a killed child to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawns CLI providers in their own process group.
#[derive(Debug, Clone)]
pub struct CliRunner {
    hub: Option<OutputHub>,
    dedup_window: Duration,
}

impl Default for CliRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CliRunner {
    pub fn new() -> Self {
        Self {
            hub: None,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }

    /// Publish normalized lines to `hub` while the run is live.
    pub fn with_hub(mut self, hub: OutputHub) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    fn publish(&self, task_id: Option<&str>, kind: LogKind, line: &str) {
        if let Some(hub) = &self.hub {
            hub.publish(StreamEvent::new(task_id, kind, line));
        }
    }

    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        if let Some(pid) = pid {
            if let Err(e) = kill_process_tree(pid) {
                warn!(pid, error = %e, "process tree kill failed");
            }
        }
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "start_kill after tree kill");
        }
        if tokio::time::timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
            warn!(?pid, "killed child not reaped in time");
        }
    }

    /// Run an already-built invocation. Exposed so arbitrary commands can be
    /// driven through the same timeout and kill handling.
    pub async fn run_invocation(
        &self,
        invocation: &CliInvocation,
        mut request: RunRequest,
    ) -> Result<RunOutput, RunnerError> {
        let started = Instant::now();
        let task_id = request.task_id.clone();

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&request.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| RunnerError::Spawn {
            program: invocation.program.clone(),
            message: e.to_string(),
        })?;
        let pid = child.id();
        info!(
            task_id = task_id.as_deref().unwrap_or("-"),
            provider = %request.provider,
            ?pid,
            cwd = %request.cwd.display(),
            "agent process started"
        );

        if let Some(mut stdin) = child.stdin.take() {
            let prompt = std::mem::take(&mut request.prompt);
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(error = %e, "prompt write to stdin failed");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            self.terminate(&mut child, pid).await;
            return Err(RunnerError::Io(std::io::Error::other("child pipes unavailable")));
        };
        let mut out_lines = BufReader::new(stdout).lines();
        let mut err_lines = BufReader::new(stderr).lines();

        let mut out_norm = StreamNormalizer::new(self.dedup_window);
        let mut err_norm = StreamNormalizer::new(self.dedup_window);
        let mut raw_stdout = String::new();
        let mut raw_stderr = String::new();
        let mut lines = Vec::new();
        let (mut out_open, mut err_open) = (true, true);

        let hard_deadline = request.hard_timeout.map(|d| started + d);
        let mut last_activity = Instant::now();

        let status = loop {
            let idle_deadline = last_activity + request.idle_timeout;
            let (deadline, limit) = match hard_deadline {
                Some(hard) if hard <= idle_deadline => (hard, TimeoutKind::Hard),
                _ => (idle_deadline, TimeoutKind::Idle),
            };

            tokio::select! {
                line = out_lines.next_line(), if out_open => match line {
                    Ok(Some(line)) => {
                        last_activity = Instant::now();
                        raw_stdout.push_str(&line);
                        raw_stdout.push('\n');
                        if let Some(clean) = out_norm.push(&line) {
                            self.publish(task_id.as_deref(), LogKind::Stdout, &clean);
                            lines.push(clean);
                        }
                    }
                    Ok(None) | Err(_) => out_open = false,
                },
                line = err_lines.next_line(), if err_open => match line {
                    Ok(Some(line)) => {
                        last_activity = Instant::now();
                        raw_stderr.push_str(&line);
                        raw_stderr.push('\n');
                        if let Some(clean) = err_norm.push(&line) {
                            self.publish(task_id.as_deref(), LogKind::Stderr, &clean);
                        }
                    }
                    Ok(None) | Err(_) => err_open = false,
                },
                exit = child.wait(), if !out_open && !err_open => {
                    let exit = exit?;
                    break if exit.success() {
                        RunStatus::Completed
                    } else {
                        RunStatus::Failed { exit_code: exit.code() }
                    };
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        task_id = task_id.as_deref().unwrap_or("-"),
                        provider = %request.provider,
                        ?limit,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "agent run timed out, killing process tree"
                    );
                    self.terminate(&mut child, pid).await;
                    break RunStatus::TimedOut { limit };
                }
                _ = stop_requested(&mut request.stop) => {
                    info!(
                        task_id = task_id.as_deref().unwrap_or("-"),
                        provider = %request.provider,
                        "stop requested, killing process tree"
                    );
                    self.terminate(&mut child, pid).await;
                    break RunStatus::Cancelled;
                }
            }
        };

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

        debug!(
            task_id = task_id.as_deref().unwrap_or("-"),
            ?status,
            stdout_bytes = raw_stdout.len(),
            stderr_bytes = raw_stderr.len(),
            "agent process finished"
        );

        let reply = extract_reply(&raw_stdout);
        Ok(RunOutput {
            provider: request.provider,
            status,
            raw_stdout,
            raw_stderr,
            lines,
            reply,
            duration_ms: duration.as_millis() as u64,
        })
    }
}

#[async_trait]
impl ProcessRunner for CliRunner {
    async fn run(&self, request: RunRequest) -> Result<RunOutput, RunnerError> {
        let invocation = request
            .provider
            .cli_invocation(request.model.as_deref(), request.reasoning)
            .ok_or(RunnerError::UnsupportedProvider(request.provider))?;
        self.run_invocation(&invocation, request).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runner::provider::ProviderKind;
    use crate::runner::reply::ReplySource;
    use tokio::sync::watch;

    fn sh(script: &str) -> CliInvocation {
        CliInvocation {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: vec![],
        }
    }

    fn request(dir: &std::path::Path) -> RunRequest {
        RunRequest::new(ProviderKind::Claude, "hello from stdin", dir)
            .with_timeouts(Duration::from_secs(10), None)
    }

    #[tokio::test]
    async fn test_completed_run_reads_stdin_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CliRunner::new();
        let out = runner
            .run_invocation(&sh("cat; echo; echo same; echo same"), request(dir.path()))
            .await
            .unwrap();
        assert!(out.is_success());
        assert!(out.raw_stdout.contains("hello from stdin"));
        assert_eq!(out.lines.iter().filter(|l| l.as_str() == "same").count(), 1);
        assert_eq!(out.reply.source, ReplySource::RoughText);
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = CliRunner::new()
            .run_invocation(&sh("echo partial; echo 'permission denied' >&2; exit 3"), request(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.status, RunStatus::Failed { exit_code: Some(3) });
        assert!(out.raw_stdout.contains("partial"));
        assert!(out.raw_stderr.contains("permission denied"));
    }

    #[tokio::test]
    async fn test_idle_timeout_kills_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let script = format!("echo started; (sleep 2; touch '{}') & sleep 30", marker.display());
        let req = request(dir.path()).with_timeouts(Duration::from_millis(300), None);

        let out = CliRunner::new().run_invocation(&sh(&script), req).await.unwrap();
        assert_eq!(out.status, RunStatus::TimedOut { limit: TimeoutKind::Idle });
        assert!(out.raw_stdout.contains("started"));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_hard_timeout_despite_output() {
        let dir = tempfile::tempdir().unwrap();
        let req = request(dir.path())
            .with_timeouts(Duration::from_secs(10), Some(Duration::from_millis(400)));
        let out = CliRunner::new()
            .with_dedup_window(Duration::ZERO)
            .run_invocation(&sh("while true; do echo tick; sleep 0.05; done"), req)
            .await
            .unwrap();
        assert_eq!(out.status, RunStatus::TimedOut { limit: TimeoutKind::Hard });
    }

    #[tokio::test]
    async fn test_stop_signal_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = watch::channel(false);
        let req = request(dir.path()).with_stop(rx);
        let handle = tokio::spawn(async move {
            CliRunner::new().run_invocation(&sh("sleep 30"), req).await
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        let out = handle.await.unwrap().unwrap();
        assert_eq!(out.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let inv = CliInvocation {
            program: "climpire-no-such-binary".into(),
            args: vec![],
            env: vec![],
        };
        let err = CliRunner::new().run_invocation(&inv, request(dir.path())).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_lines_published_to_hub() {
        let dir = tempfile::tempdir().unwrap();
        let hub = OutputHub::new(16);
        let mut viewer = hub.subscribe();
        CliRunner::new()
            .with_hub(hub)
            .run_invocation(&sh("echo live"), request(dir.path()).with_task("t-1"))
            .await
            .unwrap();
        let event = viewer.recv().await.unwrap();
        assert_eq!(event.line, "live");
        assert_eq!(event.task_id.as_deref(), Some("t-1"));
    }
}
