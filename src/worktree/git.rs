// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Thin async wrappers around the `git` binary.

use std::path::Path;
use std::process::{Output, Stdio};

use tokio::process::Command;

use super::WorktreeError;

/// Run git in `cwd` and return the raw output, whatever the exit status.
pub async fn git_output(cwd: &Path, args: &[&str]) -> Result<Output, WorktreeError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;
    Ok(output)
}

/// Run git in `cwd` and return trimmed stdout, or the stderr as an error.
pub async fn git(cwd: &Path, args: &[&str]) -> Result<String, WorktreeError> {
    let output = git_output(cwd, args).await?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(WorktreeError::Git(format!("git {}: {}", args.join(" "), stderr)))
    }
}

/// Run a committing git command as the bot identity.
pub async fn git_as_bot(cwd: &Path, args: &[&str]) -> Result<String, WorktreeError> {
    let name = format!("user.name={}", super::BOT_NAME);
    let email = format!("user.email={}", super::BOT_EMAIL);
    let mut full: Vec<&str> = vec!["-c", name.as_str(), "-c", email.as_str()];
    full.extend_from_slice(args);
    git(cwd, &full).await
}

/// Whether `path` is inside a git work tree.
pub async fn is_work_tree(path: &Path) -> bool {
    matches!(
        git(path, &["rev-parse", "--is-inside-work-tree"]).await.as_deref(),
        Ok("true")
    )
}

/// Whether HEAD points at a commit.
pub async fn has_commits(path: &Path) -> bool {
    git(path, &["rev-parse", "--verify", "--quiet", "HEAD"]).await.is_ok()
}

pub async fn branch_exists(repo: &Path, branch: &str) -> bool {
    git(repo, &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{}", branch)])
        .await
        .is_ok()
}

/// Current branch, `None` when detached.
pub async fn current_branch(repo: &Path) -> Result<Option<String>, WorktreeError> {
    let name = git(repo, &["branch", "--show-current"]).await?;
    Ok((!name.is_empty()).then_some(name))
}

pub async fn head_commit(repo: &Path) -> Result<String, WorktreeError> {
    git(repo, &["rev-parse", "HEAD"]).await
}

/// Number of commits on `branch` not reachable from `target`.
pub async fn commits_ahead(repo: &Path, target: &str, branch: &str) -> Result<u64, WorktreeError> {
    let out = git(repo, &["rev-list", "--count", &format!("{}..{}", target, branch)]).await?;
    out.parse()
        .map_err(|_| WorktreeError::Git(format!("unexpected rev-list output: {}", out)))
}

/// Paths with unresolved merge conflicts.
pub async fn conflicted_files(repo: &Path) -> Vec<String> {
    git(repo, &["diff", "--name-only", "--diff-filter=U"])
        .await
        .map(|out| out.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

pub async fn has_remote(repo: &Path, remote: &str) -> bool {
    git(repo, &["remote", "get-url", remote]).await.is_ok()
}

/// One entry of `git status --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Two-letter XY code (`" M"`, `"A "`, `"??"`, ...).
    pub code: String,
    pub path: String,
}

impl StatusEntry {
    pub fn is_untracked(&self) -> bool {
        self.code == "??"
    }
}

/// Parse NUL-separated `git status --porcelain=v1 -z` output.
pub fn parse_status_z(raw: &str) -> Vec<StatusEntry> {
    let mut entries = Vec::new();
    let mut fields = raw.split('\0').filter(|f| !f.is_empty());
    while let Some(field) = fields.next() {
        if field.len() < 4 {
            continue;
        }
        let code = field[..2].to_string();
        let path = field[3..].to_string();
        // Renames and copies carry the original path as the next field.
        if code.starts_with('R') || code.starts_with('C') {
            fields.next();
        }
        entries.push(StatusEntry { code, path });
    }
    entries
}

/// Working tree status including every untracked file.
pub async fn status(repo: &Path) -> Result<Vec<StatusEntry>, WorktreeError> {
    let output = git_output(repo, &["status", "--porcelain=v1", "-z", "--untracked-files=all"]).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(WorktreeError::Git(format!("git status: {}", stderr)));
    }
    Ok(parse_status_z(&String::from_utf8_lossy(&output.stdout)))
}

/// Branch names checked out in any worktree of `repo`.
pub async fn checked_out_branches(repo: &Path) -> Vec<(std::path::PathBuf, String)> {
    let Ok(output) = git(repo, &["worktree", "list", "--porcelain"]).await else {
        return Vec::new();
    };
    let mut result = Vec::new();
    let mut current_path = None;
    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            current_path = Some(std::path::PathBuf::from(path));
        } else if let Some(branch) = line.strip_prefix("branch refs/heads/") {
            if let Some(path) = current_path.take() {
                result.push((path, branch.to_string()));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_z() {
        let raw = " M src/app.ts\0?? .env\0R  new.ts\0old.ts\0A  added.rs\0";
        let entries = parse_status_z(raw);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].code, " M");
        assert_eq!(entries[0].path, "src/app.ts");
        assert!(entries[1].is_untracked());
        assert_eq!(entries[2].path, "new.ts");
        assert_eq!(entries[3].path, "added.rs");
    }

    #[test]
    fn test_parse_status_keeps_spaces_in_paths() {
        let entries = parse_status_z("?? docs/release notes.md\0");
        assert_eq!(entries[0].path, "docs/release notes.md");
    }

    #[tokio::test]
    async fn test_git_error_contains_command() {
        let dir = tempfile::tempdir().unwrap();
        let err = git(dir.path(), &["rev-parse", "HEAD"]).await.unwrap_err();
        assert!(err.to_string().contains("rev-parse"));
        assert!(!is_work_tree(dir.path()).await);
    }
}
