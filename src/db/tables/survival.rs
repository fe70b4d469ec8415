//! Database operations for the `survival_snapshots` table.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;

/// A row from the `survival_snapshots` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurvivalSnapshotRow {
    pub id: String,
    pub tier: String,
    pub estimated_usd: i64,
    pub created_at: String,
}

impl Database {
    pub fn insert_survival_snapshot(
        &self,
        tier: &str,
        estimated_usd: i64,
    ) -> Result<String, rusqlite::Error> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO survival_snapshots (id, tier, estimated_usd, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, tier, estimated_usd, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    /// The most recently recorded snapshot, if any.
    pub fn latest_survival_snapshot(
        &self,
    ) -> Result<Option<SurvivalSnapshotRow>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, tier, estimated_usd, created_at FROM survival_snapshots
             ORDER BY created_at DESC, id DESC LIMIT 1",
            [],
            |row| {
                Ok(SurvivalSnapshotRow {
                    id: row.get(0)?,
                    tier: row.get(1)?,
                    estimated_usd: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()
    }
}
