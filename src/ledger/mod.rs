// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Audit and idempotency ledger.
//!
//! - [`canonical`]: canonical JSON and hashing
//! - [`idempotency`]: keyed inserts for messages and task creation
//! - [`audit_log`]: the hash-chained NDJSON log
//! - [`ingress`]: the gate that combines them at the boundary

pub mod audit_log;
pub mod canonical;
pub mod idempotency;
pub mod ingress;

pub use audit_log::{
    verify_chain, AuditEntry, AuditEvent, AuditLog, AuditLogger, AuditOutcome, ChainReport,
    GENESIS_HASH,
};
pub use canonical::{canonical_json, payload_hash, sha256_hex};
pub use idempotency::{
    insert_message_with_idempotency, record_task_creation_audit, IdempotencyKey,
    IdempotentInsert, MessageInput, MessageRecord, TaskCreationAudit, TaskCreationAuditInput,
};
pub use ingress::{IngressAuditInput, IngressGate, IngressResponse};
