// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Git worktree manager: one worktree and branch per task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;
use crate::types::short_id;

use super::bootstrap::ensure_repository;
use super::git::{
    branch_exists, checked_out_branches, commits_ahead, conflicted_files, current_branch, git,
    git_as_bot, git_output, has_remote, head_commit, is_work_tree, status,
};
use super::policy::UntrackedPolicy;
use super::pull_request::{PullRequestClient, PullRequestTarget};
use super::{
    branch_name_for, worktree_path_for, AutoCommitOutcome, MergeOutcome, RollbackSummary,
    WorktreeError, WorktreeProvider, WorktreeRecord, DEV_BRANCH, WORKTREE_DIR,
};

const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Tracks task worktrees in memory and drives git for them.
pub struct WorktreeManager {
    records: Arc<RwLock<HashMap<String, WorktreeRecord>>>,
    policy: UntrackedPolicy,
    pull_requests: PullRequestClient,
}

impl Default for WorktreeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WorktreeManager {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            policy: UntrackedPolicy::default(),
            pull_requests: PullRequestClient::new(DEFAULT_GITHUB_API),
        }
    }

    pub fn with_policy(mut self, policy: UntrackedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_pull_request_client(mut self, client: PullRequestClient) -> Self {
        self.pull_requests = client;
        self
    }

    async fn record(&self, task_id: &str) -> Result<WorktreeRecord, WorktreeError> {
        self.records
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| WorktreeError::NoWorktree(task_id.to_string()))
    }

    /// Create the task's worktree, failing loudly.
    ///
    /// An existing directory that is already a worktree of this project is
    /// adopted, so a restarted process can pick a task back up.
    pub async fn create(
        &self,
        task_id: &str,
        project_path: &Path,
        base_branch: Option<&str>,
    ) -> Result<WorktreeRecord, WorktreeError> {
        let path = worktree_path_for(project_path, task_id);
        let branch = branch_name_for(task_id);

        {
            let records = self.records.read().await;
            if let Some(owner) = records
                .values()
                .find(|r| r.worktree_path == path && r.task_id != task_id)
            {
                return Err(WorktreeError::Git(format!(
                    "worktree {} already belongs to task {}",
                    path.display(),
                    owner.task_id
                )));
            }
        }

        let target = current_branch(project_path).await?;
        let path_str = path.to_string_lossy().to_string();

        if path.exists() && is_work_tree(&path).await {
            info!(task_id, path = %path.display(), "adopting existing worktree");
        } else {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if branch_exists(project_path, &branch).await {
                git(project_path, &["worktree", "add", &path_str, &branch]).await?;
            } else {
                let mut start_point = "HEAD";
                if let Some(base) = base_branch {
                    if branch_exists(project_path, base).await {
                        start_point = base;
                    } else {
                        warn!(task_id, base, "base branch not found, starting from HEAD");
                    }
                }
                git(
                    project_path,
                    &["worktree", "add", "-b", &branch, &path_str, start_point],
                )
                .await?;
            }
            info!(task_id, branch = %branch, path = %path.display(), "worktree created");
        }

        let record = WorktreeRecord {
            task_id: task_id.to_string(),
            worktree_path: path,
            branch_name: branch,
            project_path: project_path.to_path_buf(),
            base_branch: base_branch.map(str::to_string).or(target),
        };
        self.records
            .write()
            .await
            .insert(task_id.to_string(), record.clone());
        Ok(record)
    }

    /// Stage tracked changes and allowed untracked files, then commit as the bot.
    pub async fn auto_commit(
        &self,
        record: &WorktreeRecord,
        title: &str,
    ) -> Result<AutoCommitOutcome, WorktreeError> {
        let wt = record.worktree_path.as_path();
        let entries = status(wt).await?;

        let mut outcome = AutoCommitOutcome::default();
        for entry in &entries {
            if !entry.is_untracked() {
                outcome.tracked_changes += 1;
                continue;
            }
            let verdict = self.policy.classify(&entry.path);
            if verdict.is_allowed() {
                outcome.staged_untracked.push(entry.path.clone());
            } else {
                debug!(task_id = %record.task_id, path = %entry.path, ?verdict, "untracked file not staged");
                outcome.blocked_untracked.push(entry.path.clone());
            }
        }

        if outcome.tracked_changes > 0 {
            git(wt, &["add", "-u"]).await?;
        }
        for chunk in outcome.staged_untracked.chunks(100) {
            let mut args = vec!["add", "--"];
            args.extend(chunk.iter().map(String::as_str));
            git(wt, &args).await?;
        }

        // Exit status 1 means something is staged.
        let staged = git_output(wt, &["diff", "--cached", "--quiet"]).await?;
        if staged.status.success() {
            if !outcome.blocked_untracked.is_empty() {
                warn!(
                    task_id = %record.task_id,
                    files = ?outcome.blocked_untracked,
                    "only restricted untracked files pending"
                );
            }
            return Ok(outcome);
        }

        let message = format!("climpire: auto-commit for {}\n\nTask: {}", title, record.task_id);
        git_as_bot(wt, &["commit", "--no-verify", "-m", &message]).await?;
        outcome.committed = true;
        info!(
            task_id = %record.task_id,
            tracked = outcome.tracked_changes,
            untracked = outcome.staged_untracked.len(),
            blocked = outcome.blocked_untracked.len(),
            "auto-committed task changes"
        );
        Ok(outcome)
    }

    /// Merge `branch` in `cwd`; on conflict abort and report the paths.
    async fn merge_branch(
        &self,
        cwd: &Path,
        branch: &str,
        message: &str,
    ) -> Result<Result<String, Vec<String>>, WorktreeError> {
        match git_as_bot(cwd, &["merge", "--no-ff", "--no-edit", "-m", message, branch]).await {
            Ok(_) => Ok(Ok(head_commit(cwd).await?)),
            Err(err) => {
                let files = conflicted_files(cwd).await;
                if let Err(abort) = git(cwd, &["merge", "--abort"]).await {
                    debug!(error = %abort, "merge --abort after failed merge");
                }
                if files.is_empty() {
                    Err(err)
                } else {
                    Ok(Err(files))
                }
            }
        }
    }

    /// Worktree directories on disk with no in-memory record.
    pub async fn scan_orphans(&self, project_path: &Path) -> Vec<PathBuf> {
        let dir = project_path.join(WORKTREE_DIR);
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            return Vec::new();
        };
        let known: Vec<PathBuf> = self
            .records
            .read()
            .await
            .values()
            .map(|r| r.worktree_path.clone())
            .collect();

        let mut orphans = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_dir() || known.contains(&path) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            warn!(
                path = %path.display(),
                branch = %format!("climpire/{}", name.trim_start_matches("_dev-")),
                "orphaned worktree found"
            );
            orphans.push(path);
        }
        orphans.sort();
        orphans
    }

    /// Remove a worktree directory, tolerating a failed `git worktree remove`.
    async fn remove_worktree(&self, project: &Path, path: &Path) {
        let path_str = path.to_string_lossy().to_string();
        if let Err(e) = git(project, &["worktree", "remove", "--force", &path_str]).await {
            warn!(path = %path.display(), error = %e, "worktree remove failed, deleting directory");
            if let Err(e) = tokio::fs::remove_dir_all(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "could not delete worktree directory");
                }
            }
            if let Err(e) = git(project, &["worktree", "prune"]).await {
                warn!(error = %e, "worktree prune failed");
            }
        }
    }

    async fn ensure_dev_branch(&self, project: &Path) -> Result<(), WorktreeError> {
        if branch_exists(project, DEV_BRANCH).await {
            return Ok(());
        }
        if has_remote(project, "origin").await
            && git(project, &["fetch", "origin", DEV_BRANCH]).await.is_ok()
        {
            git(project, &["branch", DEV_BRANCH, &format!("origin/{}", DEV_BRANCH)]).await?;
        } else {
            git(project, &["branch", DEV_BRANCH, "HEAD"]).await?;
        }
        info!(project = %project.display(), "created dev branch");
        Ok(())
    }
}

fn merge_message(record: &WorktreeRecord, title: &str) -> String {
    format!(
        "Merge {}: {}\n\nTask: {}",
        record.branch_name, title, record.task_id
    )
}

#[async_trait]
impl WorktreeProvider for WorktreeManager {
    async fn ensure(
        &self,
        task_id: &str,
        project_path: &Path,
        base_branch: Option<&str>,
    ) -> Option<WorktreeRecord> {
        if let Ok(existing) = self.record(task_id).await {
            if existing.worktree_path.exists() {
                return Some(existing);
            }
            self.records.write().await.remove(task_id);
        }

        if let Err(e) = ensure_repository(project_path).await {
            warn!(task_id, project = %project_path.display(), error = %e, "git bootstrap failed, running without isolation");
            return None;
        }
        match self.create(task_id, project_path, base_branch).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(task_id, project = %project_path.display(), error = %e, "worktree creation failed, running without isolation");
                None
            }
        }
    }

    async fn get(&self, task_id: &str) -> Option<WorktreeRecord> {
        self.record(task_id).await.ok()
    }

    async fn merge(&self, task_id: &str, title: &str) -> Result<MergeOutcome, WorktreeError> {
        let start = Instant::now();
        let record = self.record(task_id).await?;
        let project = record.project_path.as_path();
        let auto = self.auto_commit(&record, title).await?;

        let target = current_branch(project).await?.unwrap_or_else(|| "HEAD".to_string());
        let ahead = commits_ahead(project, "HEAD", &record.branch_name).await?;
        if ahead == 0 {
            if !auto.blocked_untracked.is_empty() {
                return Ok(MergeOutcome::RestrictedUntracked {
                    files: auto.blocked_untracked,
                });
            }
            debug!(task_id, "nothing to merge");
            return Ok(MergeOutcome::NothingToMerge);
        }

        let files_changed = git(
            project,
            &["diff", "--name-only", &format!("HEAD...{}", record.branch_name)],
        )
        .await?
        .lines()
        .filter(|l| !l.is_empty())
        .count();

        let outcome = match self
            .merge_branch(project, &record.branch_name, &merge_message(&record, title))
            .await?
        {
            Ok(commit) => {
                info!(task_id, branch = %record.branch_name, target = %target, files_changed, "task branch merged");
                MergeOutcome::Merged {
                    target,
                    commit,
                    files_changed,
                }
            }
            Err(files) => {
                warn!(task_id, branch = %record.branch_name, ?files, "merge conflict, aborted");
                MergeOutcome::Conflict { files }
            }
        };

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("worktree.merge", start.elapsed());
        #[cfg(not(feature = "telemetry"))]
        let _ = start;
        Ok(outcome)
    }

    async fn merge_to_dev(
        &self,
        task_id: &str,
        title: &str,
        pr: Option<PullRequestTarget>,
    ) -> Result<MergeOutcome, WorktreeError> {
        let record = self.record(task_id).await?;
        let project = record.project_path.as_path();
        let auto = self.auto_commit(&record, title).await?;

        self.ensure_dev_branch(project).await?;
        let ahead = commits_ahead(project, DEV_BRANCH, &record.branch_name).await?;
        if ahead == 0 {
            if !auto.blocked_untracked.is_empty() {
                return Ok(MergeOutcome::RestrictedUntracked {
                    files: auto.blocked_untracked,
                });
            }
            return Ok(MergeOutcome::NothingToMerge);
        }

        // Merge inside whichever checkout holds `dev`, or a short-lived one.
        let existing = checked_out_branches(project)
            .await
            .into_iter()
            .find(|(_, b)| b == DEV_BRANCH)
            .map(|(p, _)| p);
        let (dev_path, temporary) = match existing {
            Some(path) => (path, false),
            None => {
                let path = project
                    .join(WORKTREE_DIR)
                    .join(format!("_dev-{}", short_id(task_id)));
                if path.exists() {
                    self.remove_worktree(project, &path).await;
                }
                let path_str = path.to_string_lossy().to_string();
                git(project, &["worktree", "add", &path_str, DEV_BRANCH]).await?;
                (path, true)
            }
        };

        let merged = self
            .merge_branch(&dev_path, &record.branch_name, &merge_message(&record, title))
            .await;
        let commit = match merged {
            Ok(Ok(commit)) => commit,
            Ok(Err(files)) => {
                if temporary {
                    self.remove_worktree(project, &dev_path).await;
                }
                warn!(task_id, ?files, "merge into dev conflicted, aborted");
                return Ok(MergeOutcome::Conflict { files });
            }
            Err(e) => {
                if temporary {
                    self.remove_worktree(project, &dev_path).await;
                }
                return Err(e);
            }
        };

        let pushed = if has_remote(project, "origin").await {
            match git(&dev_path, &["push", "origin", DEV_BRANCH]).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(task_id, error = %e, "push to origin dev failed");
                    false
                }
            }
        } else {
            debug!(task_id, "no origin remote, skipping push");
            false
        };
        if temporary {
            self.remove_worktree(project, &dev_path).await;
        }

        let pr_url = match (pushed, pr) {
            (true, Some(target)) => {
                let body = format!(
                    "Automated integration of task `{}`.\n\nLatest merge: {}",
                    task_id, commit
                );
                match self
                    .pull_requests
                    .open_or_update(&target, DEV_BRANCH, &format!("dev: {}", title), &body)
                    .await
                {
                    Ok(url) => Some(url),
                    Err(e) => {
                        warn!(task_id, repo = %target.repo, error = %e, "pull request update failed");
                        None
                    }
                }
            }
            _ => None,
        };

        info!(task_id, commit = %commit, pushed, pr = ?pr_url, "task branch merged into dev");
        Ok(MergeOutcome::MergedToDev {
            commit,
            pushed,
            pr_url,
        })
    }

    async fn rollback(&self, task_id: &str) -> Result<RollbackSummary, WorktreeError> {
        let record = self.record(task_id).await?;
        let project = record.project_path.as_path();

        let base = git(project, &["merge-base", "HEAD", &record.branch_name])
            .await
            .unwrap_or_else(|_| "HEAD".to_string());
        let diff_stat = git(&record.worktree_path, &["diff", "--stat", &base])
            .await
            .unwrap_or_default();
        info!(
            task_id,
            branch = %record.branch_name,
            diff_stat = %diff_stat,
            "rolling back task worktree"
        );

        self.cleanup(task_id).await?;
        Ok(RollbackSummary {
            branch: record.branch_name,
            diff_stat,
        })
    }

    async fn cleanup(&self, task_id: &str) -> Result<(), WorktreeError> {
        let Some(record) = self.records.write().await.remove(task_id) else {
            debug!(task_id, "no worktree to clean up");
            return Ok(());
        };
        let project = record.project_path.as_path();
        self.remove_worktree(project, &record.worktree_path).await;
        if let Err(e) = git(project, &["branch", "-D", &record.branch_name]).await {
            warn!(task_id, branch = %record.branch_name, error = %e, "branch delete failed");
        }
        info!(task_id, branch = %record.branch_name, "worktree cleaned up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TASK_A: &str = "aaaaaaaa-0000-4000-8000-000000000001";
    const TASK_B: &str = "bbbbbbbb-0000-4000-8000-000000000002";

    async fn repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("app.ts"), "export const a = 1;\n").unwrap();
        // Without `.env` in .gitignore the policy is what keeps it out.
        std::fs::write(dir.path().join(".gitignore"), "node_modules/\n").unwrap();
        ensure_repository(dir.path()).await.unwrap();
        dir
    }

    #[tokio::test]
    async fn test_ensure_creates_distinct_worktrees() {
        let dir = repo().await;
        let manager = WorktreeManager::new();

        let a = manager.ensure(TASK_A, dir.path(), None).await.unwrap();
        let b = manager.ensure(TASK_B, dir.path(), None).await.unwrap();
        assert_ne!(a.worktree_path, b.worktree_path);
        assert_ne!(a.branch_name, b.branch_name);
        assert!(a.worktree_path.join("app.ts").exists());
        assert_eq!(manager.get(TASK_A).await, Some(a.clone()));

        // Second ensure returns the same record.
        let again = manager.ensure(TASK_A, dir.path(), None).await.unwrap();
        assert_eq!(again, a);
    }

    #[tokio::test]
    async fn test_merge_stages_tracked_but_not_secrets() {
        let dir = repo().await;
        let manager = WorktreeManager::new();
        let record = manager.ensure(TASK_A, dir.path(), None).await.unwrap();

        std::fs::write(record.worktree_path.join("app.ts"), "export const a = 2;\n").unwrap();
        std::fs::write(record.worktree_path.join(".env"), "TOKEN=x\n").unwrap();

        let outcome = manager.merge(TASK_A, "bump a").await.unwrap();
        assert!(matches!(outcome, MergeOutcome::Merged { files_changed: 1, .. }));
        let merged = std::fs::read_to_string(dir.path().join("app.ts")).unwrap();
        assert!(merged.contains("a = 2"));
        assert!(!dir.path().join(".env").exists());
    }

    #[tokio::test]
    async fn test_env_only_is_restricted() {
        let dir = repo().await;
        let manager = WorktreeManager::new();
        let record = manager.ensure(TASK_A, dir.path(), None).await.unwrap();
        std::fs::write(record.worktree_path.join(".env"), "TOKEN=x\n").unwrap();

        let outcome = manager.merge(TASK_A, "secrets").await.unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::RestrictedUntracked {
                files: vec![".env".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_empty_branch_nothing_to_merge() {
        let dir = repo().await;
        let manager = WorktreeManager::new();
        manager.ensure(TASK_A, dir.path(), None).await.unwrap();
        let outcome = manager.merge(TASK_A, "noop").await.unwrap();
        assert_eq!(outcome, MergeOutcome::NothingToMerge);
    }

    #[tokio::test]
    async fn test_conflict_aborts_cleanly() {
        let dir = repo().await;
        let manager = WorktreeManager::new();
        let record = manager.ensure(TASK_A, dir.path(), None).await.unwrap();

        std::fs::write(record.worktree_path.join("app.ts"), "export const a = 'task';\n").unwrap();
        std::fs::write(dir.path().join("app.ts"), "export const a = 'main';\n").unwrap();
        git(dir.path(), &["add", "-u"]).await.unwrap();
        git_as_bot(dir.path(), &["commit", "-m", "main edit"]).await.unwrap();

        let outcome = manager.merge(TASK_A, "conflicting").await.unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::Conflict {
                files: vec!["app.ts".to_string()]
            }
        );
        assert!(conflicted_files(dir.path()).await.is_empty());
        let content = std::fs::read_to_string(dir.path().join("app.ts")).unwrap();
        assert!(content.contains("'main'"));
    }

    #[tokio::test]
    async fn test_rollback_removes_worktree_and_branch() {
        let dir = repo().await;
        let manager = WorktreeManager::new();
        let record = manager.ensure(TASK_A, dir.path(), None).await.unwrap();
        std::fs::write(record.worktree_path.join("app.ts"), "changed\n").unwrap();

        let summary = manager.rollback(TASK_A).await.unwrap();
        assert!(summary.diff_stat.contains("app.ts"));
        assert!(!record.worktree_path.exists());
        assert!(!branch_exists(dir.path(), &record.branch_name).await);
        assert!(manager.get(TASK_A).await.is_none());
    }

    #[tokio::test]
    async fn test_merge_to_dev_without_remote() {
        let dir = repo().await;
        let manager = WorktreeManager::new();
        let record = manager.ensure(TASK_A, dir.path(), None).await.unwrap();
        std::fs::write(record.worktree_path.join("feature.ts"), "export {}\n").unwrap();

        let outcome = manager.merge_to_dev(TASK_A, "feature", None).await.unwrap();
        assert!(matches!(outcome, MergeOutcome::MergedToDev { pushed: false, pr_url: None, .. }));
        let on_dev = git(dir.path(), &["show", "dev:feature.ts"]).await.unwrap();
        assert!(on_dev.contains("export"));
        assert!(!dir.path().join(WORKTREE_DIR).join("_dev-aaaaaaaa").exists());
    }

    #[tokio::test]
    async fn test_scan_orphans_lists_unknown_dirs() {
        let dir = repo().await;
        let first = WorktreeManager::new();
        first.ensure(TASK_A, dir.path(), None).await.unwrap();

        let restarted = WorktreeManager::new();
        let orphans = restarted.scan_orphans(dir.path()).await;
        assert_eq!(orphans.len(), 1);
        assert!(orphans[0].ends_with("aaaaaaaa"));
        assert!(first.scan_orphans(dir.path()).await.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_without_directory_degrades() {
        let dir = tempdir().unwrap();
        let manager = WorktreeManager::new();
        assert!(manager.ensure(TASK_A, &dir.path().join("missing"), None).await.is_none());
    }
}
