// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ingress deduplication and the audit hash chain, through the public API.

use std::sync::Arc;

use climpire::ledger::{AuditLog, AuditLogger, IngressGate, MessageInput, GENESIS_HASH};
use climpire::storage::{BusyRetryPolicy, Database};
use tempfile::tempdir;

fn directive(content: &str, key: Option<&str>) -> MessageInput {
    MessageInput {
        sender: "ceo".to_string(),
        receiver: Some("Dev".to_string()),
        content: content.to_string(),
        message_type: "directive".to_string(),
        task_id: None,
        idempotency_key: key.map(str::to_string),
    }
}

async fn open_log(dir: &std::path::Path, seed: &str) -> AuditLog {
    AuditLog::open(
        dir.join("audit.ndjson"),
        dir.join("audit-fallback.ndjson"),
        Some(seed.to_string()),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn concurrent_retries_commit_once() {
    let dir = tempdir().unwrap();
    let db = Arc::new(Database::open(dir.path(), BusyRetryPolicy::default()).unwrap());
    let audit: Arc<dyn AuditLogger> = Arc::new(open_log(dir.path(), "seed").await);
    let gate = IngressGate::new(db.clone(), audit);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            gate.ingest_message(&directive("Ship the login page", Some("retry-1")))
                .await
                .unwrap()
        }));
    }
    let mut created = 0;
    let mut ids = Vec::new();
    for handle in handles {
        let inserted = handle.await.unwrap();
        if inserted.created {
            created += 1;
        }
        ids.push(inserted.record.id);
    }
    assert_eq!(created, 1);
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let rows: i64 = db
        .read(|c| c.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0)))
        .unwrap();
    assert_eq!(rows, 1);

    let report = AuditLog::verify(&dir.path().join("audit.ndjson"), Some("seed"))
        .await
        .unwrap();
    assert_eq!(report.lines, 8);
    assert!(report.is_intact());
}

#[tokio::test]
async fn chain_survives_restart_and_detects_edits() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("audit.ndjson");
    let db = Arc::new(Database::open_in_memory().unwrap());

    {
        let log = open_log(dir.path(), "seed").await;
        assert_eq!(log.tail_hash().await, GENESIS_HASH);
        let gate = IngressGate::new(db.clone(), Arc::new(log));
        gate.ingest_message(&directive("first", None)).await.unwrap();
        gate.ingest_message(&directive("second", None)).await.unwrap();
    }

    // A new process picks up where the file ends.
    let log = open_log(dir.path(), "seed").await;
    let before = AuditLog::verify(&path, Some("seed")).await.unwrap();
    assert_eq!(log.tail_hash().await, before.tail_hash);
    let gate = IngressGate::new(db, Arc::new(log));
    gate.ingest_message(&directive("third", None)).await.unwrap();

    let report = AuditLog::verify(&path, Some("seed")).await.unwrap();
    assert_eq!(report.lines, 3);
    assert!(report.is_intact());

    // Deleting a middle line breaks the link of the line after it.
    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    std::fs::write(&path, format!("{}\n{}\n", lines[0], lines[2])).unwrap();
    let report = AuditLog::verify(&path, Some("seed")).await.unwrap();
    assert_eq!(report.first_broken, Some(1));
    assert!(!report.is_intact());
}

#[tokio::test]
async fn conflicting_payload_is_rejected_and_audited() {
    let dir = tempdir().unwrap();
    let db = Arc::new(Database::open_in_memory().unwrap());
    let gate = IngressGate::new(db, Arc::new(open_log(dir.path(), "seed").await));

    gate.ingest_message(&directive("Build it", Some("k"))).await.unwrap();
    let err = gate
        .ingest_message(&directive("Scrap it", Some("k")))
        .await
        .unwrap_err();
    assert_eq!(err.status, 409);
    assert!(!err.retryable);

    let content = std::fs::read_to_string(dir.path().join("audit.ndjson")).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert!(content.lines().nth(1).unwrap().contains("\"conflict\""));
}
