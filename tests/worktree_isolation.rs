// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-task worktrees against a real git repository.

use std::path::Path;

use climpire::worktree::{
    ensure_repository, worktree_path_for, MergeOutcome, WorktreeManager, WorktreeProvider,
    WORKTREE_DIR,
};
use tempfile::tempdir;

const TASK_A: &str = "11111111-aaaa-4000-8000-000000000001";
const TASK_B: &str = "22222222-bbbb-4000-8000-000000000002";

async fn project() -> tempfile::TempDir {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();
    std::fs::write(dir.path().join("main.ts"), "console.log(1);\n").unwrap();
    ensure_repository(dir.path()).await.unwrap();
    dir
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

#[tokio::test]
async fn parallel_tasks_do_not_see_each_other() {
    let dir = project().await;
    let manager = WorktreeManager::new();
    let a = manager.ensure(TASK_A, dir.path(), None).await.unwrap();
    let b = manager.ensure(TASK_B, dir.path(), None).await.unwrap();

    std::fs::write(a.worktree_path.join("a.ts"), "export const a = 1;\n").unwrap();
    std::fs::write(b.worktree_path.join("main.ts"), "console.log(2);\n").unwrap();

    assert!(!b.worktree_path.join("a.ts").exists());
    assert_eq!(read(&a.worktree_path.join("main.ts")), "console.log(1);\n");
    assert_eq!(read(&dir.path().join("main.ts")), "console.log(1);\n");

    let merged_a = manager.merge(TASK_A, "add a").await.unwrap();
    assert!(merged_a.is_merged());
    manager.cleanup(TASK_A).await.unwrap();
    assert!(dir.path().join("a.ts").exists());
    assert!(!a.worktree_path.exists());

    let merged_b = manager.merge(TASK_B, "log 2").await.unwrap();
    assert!(matches!(merged_b, MergeOutcome::Merged { .. }));
    manager.cleanup(TASK_B).await.unwrap();
    assert_eq!(read(&dir.path().join("main.ts")), "console.log(2);\n");
}

#[tokio::test]
async fn rollback_leaves_project_untouched() {
    let dir = project().await;
    let manager = WorktreeManager::new();
    let record = manager.ensure(TASK_A, dir.path(), None).await.unwrap();
    std::fs::write(record.worktree_path.join("main.ts"), "broken(\n").unwrap();

    let summary = manager.rollback(TASK_A).await.unwrap();
    assert_eq!(summary.branch, record.branch_name);
    assert!(!record.worktree_path.exists());
    assert!(manager.get(TASK_A).await.is_none());
    assert_eq!(read(&dir.path().join("main.ts")), "console.log(1);\n");
}

#[tokio::test]
async fn restarted_manager_reports_orphans() {
    let dir = project().await;
    let first = WorktreeManager::new();
    let record = first.ensure(TASK_A, dir.path(), None).await.unwrap();
    assert_eq!(record.worktree_path, worktree_path_for(dir.path(), TASK_A));
    assert!(first.scan_orphans(dir.path()).await.is_empty());

    // The records of the first process are gone; the directory is not.
    let second = WorktreeManager::new();
    let orphans = second.scan_orphans(dir.path()).await;
    assert_eq!(orphans.len(), 1);
    assert!(orphans[0].starts_with(dir.path().join(WORKTREE_DIR)));
}
