//! Database operations for the `messages` table.
//!
//! Inbound messages form the turn inbox: they are upserted by the transport
//! sync and claimed (processed) by at most one turn. Outbound messages share
//! the table so threads can be reconstructed.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;

/// A row from the `messages` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    #[serde(rename = "from")]
    pub sender: String,
    #[serde(rename = "to")]
    pub recipient: String,
    pub thread_id: Option<String>,
    pub content: String,
    pub received_at: String,
    pub processed_at: Option<String>,
}

impl Database {
    /// Insert an inbound message if its id is new. Returns true when the row
    /// was inserted (duplicates from transport re-polls are ignored).
    pub fn upsert_inbound_message(
        &self,
        id: &str,
        sender: &str,
        recipient: &str,
        thread_id: Option<&str>,
        content: &str,
        received_at: &str,
    ) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO messages (id, sender, recipient, thread_id, content, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, sender, recipient, thread_id, content, received_at],
        )?;
        Ok(inserted > 0)
    }

    /// Record a message the agent sent. Outbound rows are created already
    /// processed so they never enter the inbox.
    pub fn insert_outbound_message(
        &self,
        sender: &str,
        recipient: &str,
        thread_id: Option<&str>,
        content: &str,
    ) -> Result<String, rusqlite::Error> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages (id, sender, recipient, thread_id, content, received_at, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![id, sender, recipient, thread_id, content, now],
        )?;
        Ok(id)
    }

    /// Unprocessed messages, oldest first.
    pub fn poll_messages(&self, limit: usize) -> Result<Vec<MessageRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, sender, recipient, thread_id, content, received_at, processed_at
             FROM messages WHERE processed_at IS NULL
             ORDER BY received_at ASC, id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], map_message_row)?;
        rows.collect()
    }

    /// Claim a message for a turn. The guard on `processed_at IS NULL` makes
    /// the transition happen at most once.
    pub fn mark_message_processed(&self, id: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE messages SET processed_at = ?1 WHERE id = ?2 AND processed_at IS NULL",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(updated > 0)
    }

    /// Queue depth: messages not yet claimed by any turn.
    pub fn count_unprocessed_messages(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE processed_at IS NULL",
            [],
            |row| row.get(0),
        )
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, sender, recipient, thread_id, content, received_at, processed_at
             FROM messages WHERE id = ?1",
            params![id],
            map_message_row,
        )
        .optional()
    }

    /// All messages in a thread, oldest first.
    pub fn list_thread_messages(
        &self,
        thread_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, sender, recipient, thread_id, content, received_at, processed_at
             FROM messages WHERE thread_id = ?1
             ORDER BY received_at ASC, id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![thread_id, limit as i64], map_message_row)?;
        rows.collect()
    }

    /// Distinct thread ids ordered by most recent activity.
    pub fn list_threads(&self, limit: usize) -> Result<Vec<String>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT thread_id, MAX(received_at) AS latest FROM messages
             WHERE thread_id IS NOT NULL
             GROUP BY thread_id ORDER BY latest DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        rows.collect()
    }
}

fn map_message_row(row: &rusqlite::Row) -> Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender: row.get(1)?,
        recipient: row.get(2)?,
        thread_id: row.get(3)?,
        content: row.get(4)?,
        received_at: row.get(5)?,
        processed_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(db: &Database, id: &str, received_at: &str) {
        db.upsert_inbound_message(id, "0xpeer", "0xagent", Some("thread-1"), "hello", received_at)
            .unwrap();
    }

    #[test]
    fn test_poll_returns_oldest_first() {
        let db = Database::new(":memory:").unwrap();
        seed(&db, "m-2", "2026-01-02T00:00:00Z");
        seed(&db, "m-1", "2026-01-01T00:00:00Z");
        let rows = db.poll_messages(10).unwrap();
        assert_eq!(rows[0].id, "m-1");
        assert_eq!(rows[1].id, "m-2");
    }

    #[test]
    fn test_mark_processed_is_single_shot() {
        let db = Database::new(":memory:").unwrap();
        seed(&db, "m-1", "2026-01-01T00:00:00Z");
        assert!(db.mark_message_processed("m-1").unwrap());
        assert!(!db.mark_message_processed("m-1").unwrap());
        assert_eq!(db.count_unprocessed_messages().unwrap(), 0);
    }

    #[test]
    fn test_duplicate_inbound_ignored() {
        let db = Database::new(":memory:").unwrap();
        seed(&db, "m-1", "2026-01-01T00:00:00Z");
        assert!(!db
            .upsert_inbound_message("m-1", "0xpeer", "0xagent", None, "again", "2026-01-01T00:00:01Z")
            .unwrap());
        assert_eq!(db.count_unprocessed_messages().unwrap(), 1);
    }

    #[test]
    fn test_outbound_never_enters_inbox() {
        let db = Database::new(":memory:").unwrap();
        db.insert_outbound_message("0xagent", "0xpeer", Some("thread-1"), "hi")
            .unwrap();
        assert_eq!(db.count_unprocessed_messages().unwrap(), 0);
        assert_eq!(db.list_thread_messages("thread-1", 10).unwrap().len(), 1);
    }
}
