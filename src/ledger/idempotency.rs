// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Idempotent inserts for ingress writes.
//!
//! A key is scoped to the table it guards and stored hashed, so raw client
//! tokens never land in the database. The first submission inserts; a repeat
//! with the same payload hash returns the stored row with `created = false`;
//! a repeat with a different payload is [`LedgerError::IdempotencyConflict`].
//! Concurrent first submissions race on the `UNIQUE` index and the loser
//! reads back the winner's row.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::storage::{now_ms, Database};

use super::canonical::{payload_hash, sha256_hex};

const MAX_KEY_LEN: usize = 256;
const MAX_CONTENT_LEN: usize = 100_000;

/// A namespaced, hashed idempotency token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Build a key for `scope` from a raw client token.
    pub fn new(scope: &str, raw: &str) -> Result<Self, LedgerError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(LedgerError::InvalidInput("idempotency key is empty".to_string()));
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(LedgerError::InvalidInput(format!(
                "idempotency key longer than {} bytes",
                MAX_KEY_LEN
            )));
        }
        let digest = sha256_hex(format!("{}\u{1f}{}", scope, raw));
        Ok(Self(format!("{}:{}", scope, &digest[..40])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace part of the key.
    pub fn scope(&self) -> &str {
        self.0.split(':').next().unwrap_or("")
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotentInsert<T> {
    pub record: T,
    /// `false` when an identical earlier submission was returned.
    pub created: bool,
}

// ============================================================================
// Messages
// ============================================================================

/// An inbound chat or directive message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInput {
    pub sender: String,
    #[serde(default)]
    pub receiver: Option<String>,
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub task_id: Option<String>,
    /// Raw client token; hashed into an [`IdempotencyKey`] before storage.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

fn default_message_type() -> String {
    "chat".to_string()
}

impl MessageInput {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.sender.trim().is_empty() {
            return Err(LedgerError::InvalidInput("sender is required".to_string()));
        }
        if self.content.trim().is_empty() {
            return Err(LedgerError::InvalidInput("content is empty".to_string()));
        }
        if self.content.len() > MAX_CONTENT_LEN {
            return Err(LedgerError::InvalidInput("content is too long".to_string()));
        }
        if !matches!(
            self.message_type.as_str(),
            "chat" | "directive" | "announcement" | "report" | "status_update"
        ) {
            return Err(LedgerError::InvalidInput(format!(
                "unknown message type: {}",
                self.message_type
            )));
        }
        Ok(())
    }

    /// The fields that define "the same message".
    pub fn payload(&self) -> Value {
        json!({
            "sender": self.sender,
            "receiver": self.receiver,
            "content": self.content,
            "messageType": self.message_type,
            "taskId": self.task_id,
        })
    }

    pub fn key(&self) -> Result<Option<IdempotencyKey>, LedgerError> {
        self.idempotency_key
            .as_deref()
            .map(|raw| IdempotencyKey::new("messages", raw))
            .transpose()
    }
}

/// A stored message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub sender: String,
    pub receiver: Option<String>,
    pub content: String,
    pub message_type: String,
    pub task_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub payload_hash: String,
    pub created_at: i64,
}

impl MessageRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            sender: row.get("sender")?,
            receiver: row.get("receiver")?,
            content: row.get("content")?,
            message_type: row.get("message_type")?,
            task_id: row.get("task_id")?,
            idempotency_key: row.get("idempotency_key")?,
            payload_hash: row.get::<_, Option<String>>("payload_hash")?.unwrap_or_default(),
            created_at: row.get("created_at")?,
        })
    }
}

fn message_by_key(conn: &Connection, key: &str) -> rusqlite::Result<Option<MessageRecord>> {
    conn.query_row(
        "SELECT * FROM messages WHERE idempotency_key = ?1",
        params![key],
        MessageRecord::from_row,
    )
    .optional()
}

/// Insert a message unless an identical one with the same key exists.
pub async fn insert_message_with_idempotency(
    db: &Database,
    input: &MessageInput,
) -> Result<IdempotentInsert<MessageRecord>, LedgerError> {
    input.validate()?;
    let key = input.key()?;
    let hash = payload_hash(&input.payload());

    let candidate = MessageRecord {
        id: Uuid::new_v4().to_string(),
        sender: input.sender.trim().to_string(),
        receiver: input.receiver.clone(),
        content: input.content.clone(),
        message_type: input.message_type.clone(),
        task_id: input.task_id.clone(),
        idempotency_key: key.as_ref().map(|k| k.to_string()),
        payload_hash: hash.clone(),
        created_at: now_ms(),
    };

    let (record, created) = db
        .write("insert_message", |conn| {
            let changed = conn.execute(
                "INSERT INTO messages
                    (id, sender, receiver, content, message_type, task_id, idempotency_key, payload_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(idempotency_key) DO NOTHING",
                params![
                    candidate.id,
                    candidate.sender,
                    candidate.receiver,
                    candidate.content,
                    candidate.message_type,
                    candidate.task_id,
                    candidate.idempotency_key,
                    candidate.payload_hash,
                    candidate.created_at,
                ],
            )?;
            if changed == 1 {
                return Ok((candidate.clone(), true));
            }
            let key = candidate.idempotency_key.as_deref().unwrap_or_default();
            match message_by_key(conn, key)? {
                Some(existing) => Ok((existing, false)),
                None => Err(rusqlite::Error::QueryReturnedNoRows),
            }
        })
        .await?;

    if !created && record.payload_hash != hash {
        return Err(LedgerError::IdempotencyConflict {
            scope: "messages".to_string(),
            key: record.idempotency_key.unwrap_or_default(),
        });
    }
    Ok(IdempotentInsert { record, created })
}

/// Remove a message, undoing an insert whose audit line failed.
pub async fn delete_message(db: &Database, id: &str) -> Result<(), LedgerError> {
    db.write("delete_message", |conn| {
        conn.execute("DELETE FROM messages WHERE id = ?1", params![id])
    })
    .await?;
    Ok(())
}

// ============================================================================
// Task creation audits
// ============================================================================

/// Audit row describing how a task came to exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreationAuditInput {
    pub task_id: String,
    /// Ingress path (`directive`, `delegation`, `api`, ...).
    pub source: String,
    pub idempotency_key: Option<IdempotencyKey>,
    pub payload: Value,
    /// Chain hash of the matching audit-log line, when already appended.
    pub chain_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreationAudit {
    pub id: String,
    pub task_id: String,
    pub source: String,
    pub idempotency_key: Option<String>,
    pub payload_hash: String,
    pub chain_hash: Option<String>,
    pub created_at: i64,
}

impl TaskCreationAudit {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            task_id: row.get("task_id")?,
            source: row.get("source")?,
            idempotency_key: row.get("idempotency_key")?,
            payload_hash: row.get("payload_hash")?,
            chain_hash: row.get("chain_hash")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Look up an earlier task creation by key.
pub fn find_task_creation(
    db: &Database,
    key: &IdempotencyKey,
) -> Result<Option<TaskCreationAudit>, LedgerError> {
    Ok(db.read(|conn| {
        conn.query_row(
            "SELECT * FROM task_creation_audits WHERE idempotency_key = ?1",
            params![key.as_str()],
            TaskCreationAudit::from_row,
        )
        .optional()
    })?)
}

/// Record a task creation, idempotently when a key is given.
pub async fn record_task_creation_audit(
    db: &Database,
    input: &TaskCreationAuditInput,
) -> Result<IdempotentInsert<TaskCreationAudit>, LedgerError> {
    if input.task_id.trim().is_empty() {
        return Err(LedgerError::InvalidInput("task id is required".to_string()));
    }
    if input.source.trim().is_empty() {
        return Err(LedgerError::InvalidInput("source is required".to_string()));
    }

    let hash = payload_hash(&input.payload);
    let candidate = TaskCreationAudit {
        id: Uuid::new_v4().to_string(),
        task_id: input.task_id.clone(),
        source: input.source.clone(),
        idempotency_key: input.idempotency_key.as_ref().map(|k| k.to_string()),
        payload_hash: hash.clone(),
        chain_hash: input.chain_hash.clone(),
        created_at: now_ms(),
    };

    let (record, created) = db
        .write("record_task_creation_audit", |conn| {
            let changed = conn.execute(
                "INSERT INTO task_creation_audits
                    (id, task_id, source, idempotency_key, payload_hash, chain_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(idempotency_key) DO NOTHING",
                params![
                    candidate.id,
                    candidate.task_id,
                    candidate.source,
                    candidate.idempotency_key,
                    candidate.payload_hash,
                    candidate.chain_hash,
                    candidate.created_at,
                ],
            )?;
            if changed == 1 {
                return Ok((candidate.clone(), true));
            }
            conn.query_row(
                "SELECT * FROM task_creation_audits WHERE idempotency_key = ?1",
                params![candidate.idempotency_key],
                TaskCreationAudit::from_row,
            )
            .map(|existing| (existing, false))
        })
        .await?;

    if !created && record.payload_hash != hash {
        return Err(LedgerError::IdempotencyConflict {
            scope: "task_creation".to_string(),
            key: record.idempotency_key.unwrap_or_default(),
        });
    }
    Ok(IdempotentInsert { record, created })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str, key: Option<&str>) -> MessageInput {
        MessageInput {
            sender: "ceo".to_string(),
            receiver: Some("planning".to_string()),
            content: content.to_string(),
            message_type: "directive".to_string(),
            task_id: None,
            idempotency_key: key.map(str::to_string),
        }
    }

    #[test]
    fn test_key_is_scoped_and_hashed() {
        let a = IdempotencyKey::new("messages", "req-1").unwrap();
        let b = IdempotencyKey::new("task_creation", "req-1").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.scope(), "messages");
        assert!(!a.as_str().contains("req-1"));
        assert!(IdempotencyKey::new("messages", "   ").is_err());
        assert!(IdempotencyKey::new("messages", &"x".repeat(300)).is_err());
    }

    #[tokio::test]
    async fn test_repeat_returns_original() {
        let db = Database::open_in_memory().unwrap();
        let first = insert_message_with_idempotency(&db, &message("ship it", Some("k1")))
            .await
            .unwrap();
        let second = insert_message_with_idempotency(&db, &message("ship it", Some("k1")))
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.record.id, second.record.id);
    }

    #[tokio::test]
    async fn test_changed_payload_conflicts() {
        let db = Database::open_in_memory().unwrap();
        insert_message_with_idempotency(&db, &message("ship it", Some("k1")))
            .await
            .unwrap();
        let err = insert_message_with_idempotency(&db, &message("hold it", Some("k1")))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::IdempotencyConflict { .. }));
    }

    #[tokio::test]
    async fn test_no_key_always_inserts() {
        let db = Database::open_in_memory().unwrap();
        let a = insert_message_with_idempotency(&db, &message("hi", None)).await.unwrap();
        let b = insert_message_with_idempotency(&db, &message("hi", None)).await.unwrap();
        assert!(a.created && b.created);
        assert_ne!(a.record.id, b.record.id);
    }

    #[tokio::test]
    async fn test_invalid_message_rejected() {
        let db = Database::open_in_memory().unwrap();
        let mut input = message("  ", None);
        assert!(matches!(
            insert_message_with_idempotency(&db, &input).await,
            Err(LedgerError::InvalidInput(_))
        ));
        input.content = "ok".to_string();
        input.message_type = "telepathy".to_string();
        assert!(matches!(
            insert_message_with_idempotency(&db, &input).await,
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_task_creation_audit_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let key = IdempotencyKey::new("task_creation", "dir-7").unwrap();
        let input = TaskCreationAuditInput {
            task_id: "task-1".to_string(),
            source: "directive".to_string(),
            idempotency_key: Some(key.clone()),
            payload: json!({"title": "Add login"}),
            chain_hash: None,
        };

        assert!(record_task_creation_audit(&db, &input).await.unwrap().created);
        let again = record_task_creation_audit(&db, &input).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.record.task_id, "task-1");
        assert!(find_task_creation(&db, &key).unwrap().is_some());

        let changed = TaskCreationAuditInput {
            payload: json!({"title": "Add logout"}),
            ..input
        };
        assert!(matches!(
            record_task_creation_audit(&db, &changed).await,
            Err(LedgerError::IdempotencyConflict { .. })
        ));
    }
}
