// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Turn a plain project directory into a repository worktrees can hang off.

use std::path::Path;

use tracing::{debug, info};

use super::git::{git, git_as_bot, has_commits, is_work_tree, status};
use super::policy::{PathVerdict, UntrackedPolicy};
use super::{WorktreeError, WORKTREE_DIR};

pub const BOT_NAME: &str = "Climpire Bot";
pub const BOT_EMAIL: &str = "climpire-bot@users.noreply.github.com";

const BASE_GITIGNORE: &str = "\
node_modules/
dist/
build/
target/
coverage/
.next/
.env
.env.*
*.pem
*.key
.DS_Store
.climpire-worktrees/
";

/// Make sure `project` is a repository with at least one commit.
///
/// Returns `true` when this call initialized the repository or created the
/// first commit.
pub async fn ensure_repository(project: &Path) -> Result<bool, WorktreeError> {
    if !project.is_dir() {
        return Err(WorktreeError::NotARepository(format!(
            "{} is not a directory",
            project.display()
        )));
    }

    let mut changed = false;
    if !is_work_tree(project).await {
        info!(project = %project.display(), "initializing git repository");
        git(project, &["init"]).await?;
        let gitignore = project.join(".gitignore");
        if !gitignore.exists() {
            tokio::fs::write(&gitignore, BASE_GITIGNORE).await?;
        }
        git(project, &["config", "user.name", BOT_NAME]).await?;
        git(project, &["config", "user.email", BOT_EMAIL]).await?;
        changed = true;
    }

    exclude_worktree_dir(project).await?;

    if !has_commits(project).await {
        stage_initial_files(project).await?;
        git_as_bot(
            project,
            &["commit", "--allow-empty", "--no-verify", "-m", "chore: initial commit"],
        )
        .await?;
        changed = true;
    }
    Ok(changed)
}

/// Stage the files of the first commit.
///
/// Secret-like files and build output stay out even when the project's own
/// `.gitignore` does not list them; they would otherwise be copied into
/// every task worktree.
async fn stage_initial_files(project: &Path) -> Result<usize, WorktreeError> {
    let policy = UntrackedPolicy::default();
    let mut paths = Vec::new();
    for entry in status(project).await? {
        match policy.classify(&entry.path) {
            PathVerdict::SecretLike | PathVerdict::BlockedDirectory => {
                debug!(path = %entry.path, "left out of initial commit");
            }
            _ => paths.push(entry.path),
        }
    }
    for chunk in paths.chunks(100) {
        let mut args = vec!["add", "--"];
        args.extend(chunk.iter().map(String::as_str));
        git(project, &args).await?;
    }
    Ok(paths.len())
}

/// Keep the worktree directory out of `git status` without touching the
/// user's `.gitignore`.
async fn exclude_worktree_dir(project: &Path) -> Result<(), WorktreeError> {
    let git_dir = git(project, &["rev-parse", "--git-common-dir"]).await?;
    let git_dir = if Path::new(&git_dir).is_absolute() {
        Path::new(&git_dir).to_path_buf()
    } else {
        project.join(git_dir)
    };
    let exclude = git_dir.join("info").join("exclude");
    let entry = format!("/{}/", WORKTREE_DIR);

    let existing = tokio::fs::read_to_string(&exclude).await.unwrap_or_default();
    if existing.lines().any(|l| l.trim() == entry) {
        return Ok(());
    }
    if let Some(parent) = exclude.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&entry);
    content.push('\n');
    tokio::fs::write(&exclude, content).await?;
    debug!(path = %exclude.display(), "worktree directory excluded");
    Ok(())
}
