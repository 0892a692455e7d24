// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hash-chained, append-only audit log.
//!
//! One canonical-JSON line per ingress decision in `security-audit.ndjson`.
//! Each line carries the previous line's `chainHash` and its own:
//!
//! ```text
//! chainHash = SHA256(seed | prevHash | idempotencyKey | canonical_json(body))
//! ```
//!
//! where `body` is the entry without its `prevHash` and `chainHash` fields.
//! Editing, dropping or reordering any line breaks every later link.
//!
//! Appends are serialized by a `tokio::sync::Mutex` around the tail hash.
//! When the primary file cannot be written the entry goes to the fallback
//! log together with the failure reason, the tail does not advance, and
//! the caller receives [`LedgerError::AuditWriteFailed`].

use std::path::{Path, PathBuf};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::LedgerError;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::canonical::{canonical_json, sha256_hex};

/// `prevHash` of the first line.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// What happened at the ingress boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Accepted,
    Duplicate,
    Rejected,
    Conflict,
    /// A previously accepted write was undone.
    Compensated,
}

/// An ingress decision to be appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Logical endpoint (`messages`, `task_creation`, ...).
    pub endpoint: String,
    pub outcome: AuditOutcome,
    pub payload_hash: Option<String>,
    pub idempotency_key: Option<String>,
    /// Request metadata (ids, status codes, actor).
    #[serde(default)]
    pub metadata: Value,
}

impl AuditEvent {
    pub fn new(endpoint: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            endpoint: endpoint.into(),
            outcome,
            payload_hash: None,
            idempotency_key: None,
            metadata: json!({}),
        }
    }

    pub fn with_payload_hash(mut self, hash: impl Into<String>) -> Self {
        self.payload_hash = Some(hash.into());
        self
    }

    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    /// RFC3339 timestamp.
    pub ts: String,
    pub endpoint: String,
    pub outcome: AuditOutcome,
    pub payload_hash: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: Value,
    pub prev_hash: String,
    pub chain_hash: String,
}

impl AuditEntry {
    /// The hashed part of the entry.
    fn body(&self) -> Value {
        json!({
            "id": self.id,
            "ts": self.ts,
            "endpoint": self.endpoint,
            "outcome": self.outcome,
            "payloadHash": self.payload_hash,
            "idempotencyKey": self.idempotency_key,
            "metadata": self.metadata,
        })
    }

    /// Recompute this entry's chain hash from its content.
    pub fn compute_chain_hash(&self, seed: &str) -> String {
        compute_chain_hash(
            seed,
            &self.prev_hash,
            self.idempotency_key.as_deref(),
            &self.body(),
        )
    }
}

/// `SHA256(seed | prev | key | canonical_json(body))`.
pub fn compute_chain_hash(seed: &str, prev_hash: &str, key: Option<&str>, body: &Value) -> String {
    sha256_hex(format!(
        "{}|{}|{}|{}",
        seed,
        prev_hash,
        key.unwrap_or(""),
        canonical_json(body)
    ))
}

/// Sequential append-only audit sink.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Append an event and return the chained entry.
    async fn append(&self, event: AuditEvent) -> Result<AuditEntry, LedgerError>;

    /// Hash of the most recent appended line.
    async fn tail_hash(&self) -> String;
}

/// NDJSON file implementation of [`AuditLogger`].
pub struct AuditLog {
    path: PathBuf,
    fallback_path: PathBuf,
    seed: String,
    tail: Mutex<String>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .field("fallback_path", &self.fallback_path)
            .finish()
    }
}

impl AuditLog {
    /// Open the log, seeding the tail from the last valid line on disk.
    pub async fn open(
        path: impl Into<PathBuf>,
        fallback_path: impl Into<PathBuf>,
        seed: Option<String>,
    ) -> Result<Self, LedgerError> {
        let path = path.into();
        let fallback_path = fallback_path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LedgerError::AuditWriteFailed(format!("create audit dir: {}", e)))?;
        }

        let tail = match tokio::fs::read_to_string(&path).await {
            Ok(content) => last_valid_hash(&content).unwrap_or_else(|| GENESIS_HASH.to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => GENESIS_HASH.to_string(),
            Err(e) => {
                return Err(LedgerError::AuditWriteFailed(format!(
                    "read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        debug!(path = %path.display(), tail = %tail, "audit log opened");

        Ok(Self {
            path,
            fallback_path,
            seed: seed.unwrap_or_default(),
            tail: Mutex::new(tail),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fallback_path(&self) -> &Path {
        &self.fallback_path
    }

    async fn write_line(path: &Path, line: &str) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_data().await
    }

    async fn write_fallback(&self, entry: &AuditEntry, reason: &str) {
        let mut value = match serde_json::to_value(entry) {
            Ok(v) => v,
            Err(_) => entry.body(),
        };
        if let Value::Object(ref mut map) = value {
            map.insert("fallbackReason".to_string(), Value::String(reason.to_string()));
        }
        if let Err(e) = Self::write_line(&self.fallback_path, &canonical_json(&value)).await {
            error!(
                path = %self.fallback_path.display(),
                error = %e,
                "audit fallback write failed"
            );
        }
        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_audit_fallback();
    }

    /// Recompute the chain of a log file.
    pub async fn verify(path: &Path, seed: Option<&str>) -> Result<ChainReport, LedgerError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(LedgerError::AuditWriteFailed(format!("read: {}", e))),
        };
        Ok(verify_chain(&content, seed.unwrap_or("")))
    }
}

#[async_trait]
impl AuditLogger for AuditLog {
    async fn append(&self, event: AuditEvent) -> Result<AuditEntry, LedgerError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let mut tail = self.tail.lock().await;

        let mut entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            ts: chrono::Utc::now().to_rfc3339(),
            endpoint: event.endpoint,
            outcome: event.outcome,
            payload_hash: event.payload_hash,
            idempotency_key: event.idempotency_key,
            metadata: event.metadata,
            prev_hash: tail.clone(),
            chain_hash: String::new(),
        };
        entry.chain_hash = entry.compute_chain_hash(&self.seed);

        let line = serde_json::to_value(&entry)
            .map(|v| canonical_json(&v))
            .map_err(|e| LedgerError::AuditWriteFailed(e.to_string()))?;

        if let Err(e) = Self::write_line(&self.path, &line).await {
            let reason = format!("primary append failed: {}", e);
            warn!(path = %self.path.display(), error = %e, "audit append failed, writing fallback");
            self.write_fallback(&entry, &reason).await;
            return Err(LedgerError::AuditWriteFailed(reason));
        }

        *tail = entry.chain_hash.clone();
        drop(tail);

        #[cfg(feature = "telemetry")]
        {
            GLOBAL_METRICS.record_audit_append();
            GLOBAL_METRICS.record_operation("ledger.append", start.elapsed());
        }
        debug!(endpoint = %entry.endpoint, outcome = ?entry.outcome, "audit line appended");
        Ok(entry)
    }

    async fn tail_hash(&self) -> String {
        self.tail.lock().await.clone()
    }
}

/// Chain hash of the last line that parses as an entry.
fn last_valid_hash(content: &str) -> Option<String> {
    content
        .lines()
        .rev()
        .filter(|line| !line.trim().is_empty())
        .find_map(|line| serde_json::from_str::<AuditEntry>(line).ok())
        .map(|entry| entry.chain_hash)
        .filter(|hash| hash.len() == 64)
}

/// Result of recomputing a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    /// Non-empty lines examined.
    pub lines: usize,
    /// Lines whose hash and link both check out.
    pub valid: usize,
    /// Zero-based index of the first bad line.
    pub first_broken: Option<usize>,
    pub tail_hash: String,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_broken.is_none()
    }
}

/// Walk NDJSON content and check every link.
///
/// After the first broken line every later line counts as invalid, since
/// its ancestry can no longer be trusted.
pub fn verify_chain(content: &str, seed: &str) -> ChainReport {
    let mut prev = GENESIS_HASH.to_string();
    let mut report = ChainReport {
        lines: 0,
        valid: 0,
        first_broken: None,
        tail_hash: GENESIS_HASH.to_string(),
    };

    for (idx, line) in content.lines().filter(|l| !l.trim().is_empty()).enumerate() {
        report.lines += 1;
        if report.first_broken.is_some() {
            continue;
        }
        let ok = match serde_json::from_str::<AuditEntry>(line) {
            Ok(entry) => {
                let ok = entry.prev_hash == prev && entry.compute_chain_hash(seed) == entry.chain_hash;
                if ok {
                    prev = entry.chain_hash;
                }
                ok
            }
            Err(_) => false,
        };
        if ok {
            report.valid += 1;
        } else {
            report.first_broken = Some(idx);
        }
    }
    report.tail_hash = prev;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn open(dir: &Path, seed: &str) -> AuditLog {
        AuditLog::open(
            dir.join("security-audit.ndjson"),
            dir.join("security-audit-fallback.ndjson"),
            Some(seed.to_string()),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_entries_link_to_previous() {
        let dir = tempdir().unwrap();
        let log = open(dir.path(), "seed").await;

        let first = log.append(AuditEvent::new("messages", AuditOutcome::Accepted)).await.unwrap();
        let second = log
            .append(
                AuditEvent::new("messages", AuditOutcome::Duplicate)
                    .with_key(Some("messages:abc".to_string())),
            )
            .await
            .unwrap();

        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.prev_hash, first.chain_hash);
        assert_eq!(second.compute_chain_hash("seed"), second.chain_hash);
        assert_eq!(log.tail_hash().await, second.chain_hash);
    }

    #[tokio::test]
    async fn test_reopen_resumes_from_tail() {
        let dir = tempdir().unwrap();
        let last = {
            let log = open(dir.path(), "s").await;
            log.append(AuditEvent::new("a", AuditOutcome::Accepted)).await.unwrap();
            log.append(AuditEvent::new("b", AuditOutcome::Accepted)).await.unwrap()
        };

        // A torn trailing write must not reset the chain.
        let path = dir.path().join("security-audit.ndjson");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"id\":\"trunc");
        std::fs::write(&path, content).unwrap();

        let log = open(dir.path(), "s").await;
        assert_eq!(log.tail_hash().await, last.chain_hash);
    }

    #[tokio::test]
    async fn test_verify_detects_tampering() {
        let dir = tempdir().unwrap();
        let log = open(dir.path(), "s").await;
        for i in 0..4 {
            log.append(
                AuditEvent::new("messages", AuditOutcome::Accepted)
                    .with_metadata(json!({ "n": i })),
            )
            .await
            .unwrap();
        }

        let report = AuditLog::verify(log.path(), Some("s")).await.unwrap();
        assert!(report.is_intact());
        assert_eq!(report.valid, 4);

        let content = std::fs::read_to_string(log.path()).unwrap();
        let tampered = content.replacen("\"n\":1", "\"n\":9", 1);
        let report = verify_chain(&tampered, "s");
        assert_eq!(report.first_broken, Some(1));
        assert_eq!(report.valid, 1);
        assert_eq!(report.lines, 4);

        let wrong_seed = verify_chain(&content, "other");
        assert_eq!(wrong_seed.first_broken, Some(0));
    }

    #[tokio::test]
    async fn test_failed_append_goes_to_fallback() {
        let dir = tempdir().unwrap();
        let log = open(dir.path(), "s").await;
        let before = log.tail_hash().await;

        // A directory where the log file should be makes the append fail.
        std::fs::create_dir(log.path()).unwrap();
        let err = log
            .append(AuditEvent::new("messages", AuditOutcome::Accepted))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::AuditWriteFailed(_)));
        assert_eq!(log.tail_hash().await, before);
        let fallback = std::fs::read_to_string(log.fallback_path()).unwrap();
        assert!(fallback.contains("fallbackReason"));
    }
}
