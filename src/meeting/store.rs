// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistence for meeting minutes and review revision notes.

use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::StorageError;
use crate::ledger::sha256_hex;
use crate::storage::{invalid_text, now_ms, Database};

use super::types::{Meeting, MeetingEntry, MeetingStatus, MeetingType, ReviewDecision};

/// Hash used to deduplicate revision notes: case and whitespace do not count.
pub fn note_hash(note: &str) -> String {
    let normalized = note
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    sha256_hex(normalized)
}

fn meeting_from_row(row: &Row<'_>) -> rusqlite::Result<Meeting> {
    let meeting_type: String = row.get("meeting_type")?;
    let status: String = row.get("status")?;
    let decision: Option<String> = row.get("decision")?;
    Ok(Meeting {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        meeting_type: MeetingType::from_str(&meeting_type).map_err(invalid_text)?,
        round: row.get("round")?,
        status: MeetingStatus::from_str(&status).map_err(invalid_text)?,
        decision: decision
            .map(|d| ReviewDecision::from_str(&d))
            .transpose()
            .map_err(invalid_text)?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        entries: Vec::new(),
    })
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<MeetingEntry> {
    Ok(MeetingEntry {
        seq: row.get("seq")?,
        speaker_agent_id: row.get("speaker_agent_id")?,
        speaker_name: row.get("speaker_name")?,
        department: row.get("department")?,
        content: row.get("content")?,
        created_at: row.get("created_at")?,
    })
}

fn entries_for(conn: &rusqlite::Connection, meeting_id: &str) -> rusqlite::Result<Vec<MeetingEntry>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM meeting_minute_entries WHERE meeting_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![meeting_id], entry_from_row)?;
    rows.collect()
}

/// Meeting minutes over the shared database.
#[derive(Debug, Clone)]
pub struct MeetingStore {
    db: Arc<Database>,
}

impl MeetingStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Open a new meeting in `in_progress`.
    pub async fn create(
        &self,
        task_id: &str,
        meeting_type: MeetingType,
        round: i64,
    ) -> Result<Meeting, StorageError> {
        let meeting = Meeting {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            meeting_type,
            round,
            status: MeetingStatus::InProgress,
            decision: None,
            started_at: now_ms(),
            completed_at: None,
            entries: Vec::new(),
        };
        self.db
            .write("meeting.create", |conn| {
                conn.execute(
                    "INSERT INTO meeting_minutes (id, task_id, meeting_type, round, status, started_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        meeting.id,
                        meeting.task_id,
                        meeting.meeting_type.as_str(),
                        meeting.round,
                        meeting.status.as_str(),
                        meeting.started_at,
                    ],
                )
            })
            .await?;
        Ok(meeting)
    }

    /// Append a turn; `seq` is assigned here.
    pub async fn append_entry(
        &self,
        meeting_id: &str,
        speaker_agent_id: Option<&str>,
        speaker_name: &str,
        department: Option<&str>,
        content: &str,
    ) -> Result<MeetingEntry, StorageError> {
        let created_at = now_ms();
        self.db
            .write("meeting.append_entry", |conn| {
                let tx = conn.transaction()?;
                let seq: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(seq), 0) + 1 FROM meeting_minute_entries WHERE meeting_id = ?1",
                    params![meeting_id],
                    |row| row.get(0),
                )?;
                tx.execute(
                    "INSERT INTO meeting_minute_entries
                        (meeting_id, seq, speaker_agent_id, speaker_name, department, content, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![meeting_id, seq, speaker_agent_id, speaker_name, department, content, created_at],
                )?;
                tx.commit()?;
                Ok(MeetingEntry {
                    seq,
                    speaker_agent_id: speaker_agent_id.map(str::to_string),
                    speaker_name: speaker_name.to_string(),
                    department: department.map(str::to_string),
                    content: content.to_string(),
                    created_at,
                })
            })
            .await
    }

    /// Close a meeting with its final status and decision.
    pub async fn finish(
        &self,
        meeting_id: &str,
        status: MeetingStatus,
        decision: Option<ReviewDecision>,
    ) -> Result<(), StorageError> {
        let completed_at = now_ms();
        let changed = self
            .db
            .write("meeting.finish", |conn| {
                conn.execute(
                    "UPDATE meeting_minutes SET status = ?2, decision = ?3, completed_at = ?4 WHERE id = ?1",
                    params![
                        meeting_id,
                        status.as_str(),
                        decision.map(|d| d.as_str()),
                        completed_at
                    ],
                )
            })
            .await?;
        if changed == 0 {
            return Err(StorageError::NotFound(format!("meeting {}", meeting_id)));
        }
        Ok(())
    }

    /// Fetch a meeting with its entries.
    pub fn get(&self, meeting_id: &str) -> Result<Option<Meeting>, StorageError> {
        self.db.read(|conn| {
            let meeting = conn
                .query_row(
                    "SELECT * FROM meeting_minutes WHERE id = ?1",
                    params![meeting_id],
                    meeting_from_row,
                )
                .optional()?;
            match meeting {
                Some(mut m) => {
                    m.entries = entries_for(conn, &m.id)?;
                    Ok(Some(m))
                }
                None => Ok(None),
            }
        })
    }

    /// All meetings for a task in the order they were held.
    pub fn list_for_task(&self, task_id: &str) -> Result<Vec<Meeting>, StorageError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM meeting_minutes WHERE task_id = ?1 ORDER BY started_at, round",
            )?;
            let mut meetings = stmt
                .query_map(params![task_id], meeting_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for m in &mut meetings {
                m.entries = entries_for(conn, &m.id)?;
            }
            Ok(meetings)
        })
    }

    /// Store a revision note. Returns false when an equivalent note already exists.
    pub async fn record_revision_note(
        &self,
        task_id: &str,
        note: &str,
        round: i64,
    ) -> Result<bool, StorageError> {
        let hash = note_hash(note);
        let created_at = now_ms();
        let changed = self
            .db
            .write("meeting.revision_note", |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO review_revision_history (task_id, note_hash, note, round, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![task_id, hash, note.trim(), round, created_at],
                )
            })
            .await?;
        Ok(changed == 1)
    }

    /// Revision notes for a task, oldest first.
    pub fn revision_notes(&self, task_id: &str) -> Result<Vec<String>, StorageError> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT note FROM review_revision_history WHERE task_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![task_id], |row| row.get(0))?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_task(task_id: &str) -> MeetingStore {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.write_once(|conn| {
            conn.execute(
                "INSERT INTO tasks (id, title, created_at, updated_at) VALUES (?1, 'T', 0, 0)",
                params![task_id],
            )
        })
        .unwrap();
        MeetingStore::new(db)
    }

    #[tokio::test]
    async fn test_meeting_lifecycle() {
        let store = store_with_task("t1");
        let meeting = store.create("t1", MeetingType::Review, 1).await.unwrap();
        let a = store
            .append_entry(&meeting.id, Some("a1"), "Ava", Some("Dev"), "LGTM")
            .await
            .unwrap();
        let b = store
            .append_entry(&meeting.id, None, "System", None, "no objections")
            .await
            .unwrap();
        assert_eq!((a.seq, b.seq), (1, 2));

        store
            .finish(&meeting.id, MeetingStatus::Completed, Some(ReviewDecision::Approved))
            .await
            .unwrap();

        let loaded = store.get(&meeting.id).unwrap().unwrap();
        assert_eq!(loaded.status, MeetingStatus::Completed);
        assert_eq!(loaded.decision, Some(ReviewDecision::Approved));
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(loaded.entries[0].speaker_name, "Ava");

        assert_eq!(store.list_for_task("t1").unwrap().len(), 1);
        assert!(store.get("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_finish_unknown_meeting() {
        let store = store_with_task("t1");
        let err = store
            .finish("nope", MeetingStatus::Failed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_revision_notes_dedup() {
        let store = store_with_task("t1");
        assert!(store.record_revision_note("t1", "Add input validation", 1).await.unwrap());
        assert!(!store
            .record_revision_note("t1", "  add   INPUT validation ", 2)
            .await
            .unwrap());
        assert!(store.record_revision_note("t1", "Write tests", 2).await.unwrap());
        assert_eq!(
            store.revision_notes("t1").unwrap(),
            vec!["Add input validation", "Write tests"]
        );
    }
}
