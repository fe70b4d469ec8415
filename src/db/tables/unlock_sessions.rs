//! Database operations for the `unlock_sessions` table.
//!
//! An unlock session is a time-bounded authorization to use the wallet
//! signer. At most one session is active at a time: unlocking revokes any
//! predecessor.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;

/// A row from the `unlock_sessions` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockSessionRow {
    pub id: String,
    pub address: String,
    pub created_at: String,
    pub expires_at: String,
    pub revoked_at: Option<String>,
}

impl Database {
    /// Create a new unlock session, revoking any currently active one.
    pub fn insert_unlock_session(
        &self,
        address: &str,
        expires_at: &str,
    ) -> Result<String, rusqlite::Error> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE unlock_sessions SET revoked_at = ?1 WHERE revoked_at IS NULL",
            params![now],
        )?;
        tx.execute(
            "INSERT INTO unlock_sessions (id, address, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, address, now, expires_at],
        )?;
        tx.commit()?;
        Ok(id)
    }

    /// The active (unrevoked, unexpired) session, if any.
    pub fn active_unlock_session(&self) -> Result<Option<UnlockSessionRow>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, address, created_at, expires_at, revoked_at FROM unlock_sessions
             WHERE revoked_at IS NULL AND expires_at > ?1
             ORDER BY created_at DESC LIMIT 1",
            params![Utc::now().to_rfc3339()],
            |row| {
                Ok(UnlockSessionRow {
                    id: row.get(0)?,
                    address: row.get(1)?,
                    created_at: row.get(2)?,
                    expires_at: row.get(3)?,
                    revoked_at: row.get(4)?,
                })
            },
        )
        .optional()
    }

    /// Revoke every active session (lock / rotate). Returns how many rows
    /// were touched.
    pub fn revoke_unlock_sessions(&self) -> Result<usize, rusqlite::Error> {
        let conn = self.conn();
        conn.execute(
            "UPDATE unlock_sessions SET revoked_at = ?1 WHERE revoked_at IS NULL",
            params![Utc::now().to_rfc3339()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_single_active_session() {
        let db = Database::new(":memory:").unwrap();
        let later = (Utc::now() + Duration::minutes(15)).to_rfc3339();
        db.insert_unlock_session("0xabc", &later).unwrap();
        let second = db.insert_unlock_session("0xabc", &later).unwrap();

        let active = db.active_unlock_session().unwrap().unwrap();
        assert_eq!(active.id, second);
    }

    #[test]
    fn test_expired_session_not_active() {
        let db = Database::new(":memory:").unwrap();
        let past = (Utc::now() - Duration::minutes(1)).to_rfc3339();
        db.insert_unlock_session("0xabc", &past).unwrap();
        assert!(db.active_unlock_session().unwrap().is_none());
    }

    #[test]
    fn test_revoke_all() {
        let db = Database::new(":memory:").unwrap();
        let later = (Utc::now() + Duration::minutes(15)).to_rfc3339();
        db.insert_unlock_session("0xabc", &later).unwrap();
        assert_eq!(db.revoke_unlock_sessions().unwrap(), 1);
        assert!(db.active_unlock_session().unwrap().is_none());
    }
}
