//! Database operations for the `emergency_state` singleton.
//!
//! The emergency stop is a sticky boolean consulted by every mutating
//! operation; it stays set until an operator clears it.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::Database;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyState {
    pub enabled: bool,
    pub reason: Option<String>,
    pub updated_at: String,
}

impl Database {
    /// Current emergency state. Absent row means disabled.
    pub fn get_emergency_state(&self) -> Result<EmergencyState, rusqlite::Error> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT enabled, reason, updated_at FROM emergency_state WHERE id = 1",
                [],
                |row| {
                    Ok(EmergencyState {
                        enabled: row.get::<_, i64>(0)? != 0,
                        reason: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or(EmergencyState {
            enabled: false,
            reason: None,
            updated_at: String::new(),
        }))
    }

    pub fn set_emergency_stop(
        &self,
        enabled: bool,
        reason: Option<&str>,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO emergency_state (id, enabled, reason, updated_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                enabled = excluded.enabled,
                reason = excluded.reason,
                updated_at = excluded.updated_at",
            params![enabled as i64, reason, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_disabled() {
        let db = Database::new(":memory:").unwrap();
        assert!(!db.get_emergency_state().unwrap().enabled);
    }

    #[test]
    fn test_set_and_clear() {
        let db = Database::new(":memory:").unwrap();
        db.set_emergency_stop(true, Some("operator halt")).unwrap();
        let state = db.get_emergency_state().unwrap();
        assert!(state.enabled);
        assert_eq!(state.reason.as_deref(), Some("operator halt"));

        db.set_emergency_stop(false, None).unwrap();
        assert!(!db.get_emergency_state().unwrap().enabled);
    }
}
