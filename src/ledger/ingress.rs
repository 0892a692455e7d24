// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The ingestion boundary.
//!
//! Every externally triggered write passes through [`IngressGate`]: validate,
//! insert idempotently, append an audit line, and compensate the insert when
//! the audit line cannot be written. Errors leave the gate as an
//! [`IngressResponse`] carrying an HTTP-style status and a stable code.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{LedgerError, StorageError};
use crate::storage::Database;

use super::audit_log::{AuditEntry, AuditEvent, AuditLogger, AuditOutcome};
use super::canonical::payload_hash;
use super::idempotency::{
    delete_message, find_task_creation, insert_message_with_idempotency,
    record_task_creation_audit, IdempotencyKey, IdempotentInsert, MessageInput, MessageRecord,
    TaskCreationAudit, TaskCreationAuditInput,
};

/// Error returned to the caller at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressResponse {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl IngressResponse {
    pub fn new(status: u16, code: &str, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            retryable,
        }
    }

    pub fn audit_unavailable(message: impl Into<String>) -> Self {
        Self::new(503, "audit_unavailable", message, true)
    }
}

impl std::fmt::Display for IngressResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.status, self.code, self.message)
    }
}

impl std::error::Error for IngressResponse {}

impl From<&LedgerError> for IngressResponse {
    fn from(err: &LedgerError) -> Self {
        match err {
            LedgerError::InvalidInput(msg) => Self::new(400, "invalid_input", msg.clone(), false),
            LedgerError::IdempotencyConflict { .. } => {
                Self::new(409, "idempotency_conflict", err.to_string(), false)
            }
            LedgerError::Storage(StorageError::Busy { .. }) => {
                Self::new(503, "storage_busy", err.to_string(), true)
            }
            LedgerError::Storage(inner) => Self::new(500, "storage_error", inner.to_string(), false),
            LedgerError::AuditWriteFailed(msg) => Self::audit_unavailable(msg.clone()),
        }
    }
}

impl From<LedgerError> for IngressResponse {
    fn from(err: LedgerError) -> Self {
        Self::from(&err)
    }
}

/// Metadata for an ingress audit line that is not tied to an insert.
#[derive(Debug, Clone)]
pub struct IngressAuditInput {
    pub endpoint: String,
    pub outcome: AuditOutcome,
    pub payload: Option<Value>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub metadata: Value,
}

/// Gate in front of every ingress write.
#[derive(Clone)]
pub struct IngressGate {
    db: Arc<Database>,
    audit: Arc<dyn AuditLogger>,
}

impl IngressGate {
    pub fn new(db: Arc<Database>, audit: Arc<dyn AuditLogger>) -> Self {
        Self { db, audit }
    }

    pub fn audit(&self) -> &Arc<dyn AuditLogger> {
        &self.audit
    }

    /// Append an audit line or fail with `503 audit_unavailable`.
    pub async fn record_message_ingress_audit_or_503(
        &self,
        input: IngressAuditInput,
    ) -> Result<AuditEntry, IngressResponse> {
        let mut event = AuditEvent::new(input.endpoint, input.outcome)
            .with_key(input.idempotency_key.map(|k| k.to_string()))
            .with_metadata(input.metadata);
        if let Some(payload) = input.payload.as_ref() {
            event = event.with_payload_hash(payload_hash(payload));
        }
        self.audit
            .append(event)
            .await
            .map_err(|e| IngressResponse::from(&e))
    }

    /// Audit a rejection. The original error is what the caller sees, so a
    /// failure here is only logged.
    async fn audit_rejection(&self, endpoint: &str, err: &LedgerError, key: Option<String>) {
        let outcome = match err {
            LedgerError::IdempotencyConflict { .. } => AuditOutcome::Conflict,
            _ => AuditOutcome::Rejected,
        };
        let response = IngressResponse::from(err);
        let event = AuditEvent::new(endpoint, outcome)
            .with_key(key)
            .with_metadata(json!({ "status": response.status, "code": response.code }));
        if let Err(e) = self.audit.append(event).await {
            warn!(endpoint, error = %e, "could not audit rejected ingress");
        }
    }

    /// Accept a message: idempotent insert plus audit line.
    pub async fn ingest_message(
        &self,
        input: &MessageInput,
    ) -> Result<IdempotentInsert<MessageRecord>, IngressResponse> {
        let inserted = match insert_message_with_idempotency(&self.db, input).await {
            Ok(inserted) => inserted,
            Err(err) => {
                let key = input.key().ok().flatten().map(|k| k.to_string());
                self.audit_rejection("messages", &err, key).await;
                return Err(IngressResponse::from(&err));
            }
        };

        let record = &inserted.record;
        let outcome = if inserted.created {
            AuditOutcome::Accepted
        } else {
            AuditOutcome::Duplicate
        };
        let event = AuditEvent::new("messages", outcome)
            .with_payload_hash(record.payload_hash.clone())
            .with_key(record.idempotency_key.clone())
            .with_metadata(json!({
                "messageId": record.id,
                "sender": record.sender,
                "messageType": record.message_type,
                "taskId": record.task_id,
            }));

        if let Err(audit_err) = self.audit.append(event).await {
            if inserted.created {
                warn!(message_id = %record.id, "audit failed, compensating message insert");
                if let Err(e) = delete_message(&self.db, &record.id).await {
                    warn!(message_id = %record.id, error = %e, "message compensation failed");
                }
            }
            return Err(IngressResponse::from(&audit_err));
        }

        if inserted.created {
            info!(message_id = %record.id, sender = %record.sender, "message accepted");
        }
        Ok(inserted)
    }

    /// Earlier task creation with this key, or a conflict when the payload
    /// differs from the one recorded.
    pub fn lookup_task_creation(
        &self,
        key: &IdempotencyKey,
        payload: &Value,
    ) -> Result<Option<TaskCreationAudit>, IngressResponse> {
        match find_task_creation(&self.db, key).map_err(|e| IngressResponse::from(&e))? {
            Some(existing) if existing.payload_hash != payload_hash(payload) => {
                Err(IngressResponse::from(&LedgerError::IdempotencyConflict {
                    scope: key.scope().to_string(),
                    key: key.to_string(),
                }))
            }
            other => Ok(other),
        }
    }

    /// Audit a freshly written task.
    ///
    /// On error the caller must delete the task row; when the chain line was
    /// already written, a `compensated` line is appended here.
    pub async fn record_task_creation(
        &self,
        task_id: &str,
        source: &str,
        key: Option<IdempotencyKey>,
        payload: Value,
    ) -> Result<IdempotentInsert<TaskCreationAudit>, IngressResponse> {
        let hash = payload_hash(&payload);
        let entry = self
            .audit
            .append(
                AuditEvent::new("task_creation", AuditOutcome::Accepted)
                    .with_payload_hash(hash.clone())
                    .with_key(key.as_ref().map(|k| k.to_string()))
                    .with_metadata(json!({ "taskId": task_id, "source": source })),
            )
            .await
            .map_err(|e| IngressResponse::from(&e))?;

        let input = TaskCreationAuditInput {
            task_id: task_id.to_string(),
            source: source.to_string(),
            idempotency_key: key.clone(),
            payload,
            chain_hash: Some(entry.chain_hash.clone()),
        };
        match record_task_creation_audit(&self.db, &input).await {
            Ok(inserted) if inserted.created => Ok(inserted),
            Ok(inserted) => {
                // Lost a race with an identical request; ours is undone by the caller.
                self.append_compensation(task_id, key, "duplicate_race").await;
                Ok(inserted)
            }
            Err(err) => {
                self.append_compensation(task_id, key, "audit_row_failed").await;
                Err(IngressResponse::from(&err))
            }
        }
    }

    /// Append a `compensated` line for a task write that was undone.
    pub async fn append_compensation(
        &self,
        task_id: &str,
        key: Option<IdempotencyKey>,
        reason: &str,
    ) {
        let event = AuditEvent::new("task_creation", AuditOutcome::Compensated)
            .with_key(key.map(|k| k.to_string()))
            .with_metadata(json!({ "taskId": task_id, "reason": reason }));
        if let Err(e) = self.audit.append(event).await {
            warn!(task_id, error = %e, "could not audit compensation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::audit_log::{AuditLog, ChainReport};
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::tempdir;

    struct FailingAudit;

    #[async_trait]
    impl AuditLogger for FailingAudit {
        async fn append(&self, _event: AuditEvent) -> Result<AuditEntry, LedgerError> {
            Err(LedgerError::AuditWriteFailed("disk full".to_string()))
        }

        async fn tail_hash(&self) -> String {
            String::new()
        }
    }

    async fn gate(dir: &Path) -> (IngressGate, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let audit = AuditLog::open(dir.join("audit.ndjson"), dir.join("fallback.ndjson"), None)
            .await
            .unwrap();
        (IngressGate::new(db.clone(), Arc::new(audit)), db)
    }

    fn directive(content: &str) -> MessageInput {
        MessageInput {
            sender: "ceo".to_string(),
            receiver: None,
            content: content.to_string(),
            message_type: "directive".to_string(),
            task_id: None,
            idempotency_key: Some("req-42".to_string()),
        }
    }

    #[test]
    fn test_error_mapping() {
        let busy = LedgerError::Storage(StorageError::Busy {
            operation: "insert_message".to_string(),
            attempts: 6,
        });
        let r = IngressResponse::from(&busy);
        assert_eq!((r.status, r.code.as_str(), r.retryable), (503, "storage_busy", true));

        let r = IngressResponse::from(&LedgerError::InvalidInput("x".to_string()));
        assert_eq!((r.status, r.code.as_str()), (400, "invalid_input"));

        let r = IngressResponse::from(&LedgerError::IdempotencyConflict {
            scope: "messages".to_string(),
            key: "k".to_string(),
        });
        assert_eq!((r.status, r.code.as_str(), r.retryable), (409, "idempotency_conflict", false));

        let r = IngressResponse::from(&LedgerError::AuditWriteFailed("x".to_string()));
        assert_eq!((r.status, r.code.as_str()), (503, "audit_unavailable"));
    }

    #[tokio::test]
    async fn test_ingest_accept_duplicate_conflict() {
        let dir = tempdir().unwrap();
        let (gate, _db) = gate(dir.path()).await;

        assert!(gate.ingest_message(&directive("build it")).await.unwrap().created);
        assert!(!gate.ingest_message(&directive("build it")).await.unwrap().created);
        let err = gate.ingest_message(&directive("scrap it")).await.unwrap_err();
        assert_eq!(err.status, 409);

        // accepted, duplicate, conflict
        let report: ChainReport = AuditLog::verify(&dir.path().join("audit.ndjson"), None)
            .await
            .unwrap();
        assert_eq!(report.lines, 3);
        assert!(report.is_intact());
    }

    #[tokio::test]
    async fn test_audit_failure_compensates_insert() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let gate = IngressGate::new(db.clone(), Arc::new(FailingAudit));

        let err = gate.ingest_message(&directive("build it")).await.unwrap_err();
        assert_eq!(err.code, "audit_unavailable");
        assert!(err.retryable);

        let count: i64 = db
            .read(|c| c.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_task_creation_lookup() {
        let dir = tempdir().unwrap();
        let (gate, _db) = gate(dir.path()).await;
        let key = IdempotencyKey::new("task_creation", "d-1").unwrap();
        let payload = json!({"title": "Add login"});

        assert!(gate.lookup_task_creation(&key, &payload).unwrap().is_none());
        gate.record_task_creation("t-1", "directive", Some(key.clone()), payload.clone())
            .await
            .unwrap();

        let found = gate.lookup_task_creation(&key, &payload).unwrap().unwrap();
        assert_eq!(found.task_id, "t-1");
        assert!(found.chain_hash.is_some());
        let err = gate
            .lookup_task_creation(&key, &json!({"title": "Other"}))
            .unwrap_err();
        assert_eq!(err.status, 409);
    }
}
