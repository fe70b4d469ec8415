//! Database operations for the `turns` and `turn_telemetry` tables.
//!
//! Turns are immutable after insertion; exactly one telemetry row exists per
//! turn. Turn metadata passes through the redactor before it is persisted.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::redaction;

/// A row from the `turns` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRow {
    pub id: String,
    pub timestamp: String,
    pub state: String,
    pub input: Option<String>,
    pub output: Option<String>,
    pub metadata: serde_json::Value,
}

/// A row from the `turn_telemetry` table, keyed by turn id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnTelemetryRow {
    pub turn_id: String,
    pub survival_tier: String,
    pub estimated_usd: i64,
    pub queue_depth: i64,
    pub spend_proxy_usd: f64,
    pub actions_total: i64,
    pub action_failures: i64,
    pub brain_duration_ms: i64,
    pub brain_failures: i64,
}

impl Database {
    /// Insert a turn row. Metadata is redacted on the way in.
    pub fn insert_turn(
        &self,
        id: &str,
        state: &str,
        input: Option<&str>,
        output: Option<&str>,
        metadata: &serde_json::Value,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO turns (id, timestamp, state, input, output, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                Utc::now().to_rfc3339(),
                state,
                input,
                output,
                redaction::redact_metadata_json(metadata),
            ],
        )?;
        Ok(())
    }

    pub fn get_turn(&self, id: &str) -> Result<Option<TurnRow>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, timestamp, state, input, output, metadata FROM turns WHERE id = ?1",
            params![id],
            map_turn_row,
        )
        .optional()
    }

    /// Most recent turns, newest first.
    pub fn list_recent_turns(&self, limit: usize) -> Result<Vec<TurnRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, state, input, output, metadata
             FROM turns ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], map_turn_row)?;
        rows.collect()
    }

    pub fn count_turns(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row("SELECT COUNT(*) FROM turns", [], |row| row.get(0))
    }

    /// Insert the telemetry row for a turn. One row per turn.
    pub fn insert_turn_telemetry(&self, row: &TurnTelemetryRow) -> Result<(), rusqlite::Error> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO turn_telemetry (
                turn_id, survival_tier, estimated_usd, queue_depth, spend_proxy_usd,
                actions_total, action_failures, brain_duration_ms, brain_failures
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.turn_id,
                row.survival_tier,
                row.estimated_usd,
                row.queue_depth,
                row.spend_proxy_usd,
                row.actions_total,
                row.action_failures,
                row.brain_duration_ms,
                row.brain_failures,
            ],
        )?;
        Ok(())
    }

    pub fn get_turn_telemetry(
        &self,
        turn_id: &str,
    ) -> Result<Option<TurnTelemetryRow>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT turn_id, survival_tier, estimated_usd, queue_depth, spend_proxy_usd,
                    actions_total, action_failures, brain_duration_ms, brain_failures
             FROM turn_telemetry WHERE turn_id = ?1",
            params![turn_id],
            |row| {
                Ok(TurnTelemetryRow {
                    turn_id: row.get(0)?,
                    survival_tier: row.get(1)?,
                    estimated_usd: row.get(2)?,
                    queue_depth: row.get(3)?,
                    spend_proxy_usd: row.get(4)?,
                    actions_total: row.get(5)?,
                    action_failures: row.get(6)?,
                    brain_duration_ms: row.get(7)?,
                    brain_failures: row.get(8)?,
                })
            },
        )
        .optional()
    }
}

fn map_turn_row(row: &rusqlite::Row) -> Result<TurnRow, rusqlite::Error> {
    let metadata: String = row.get(5)?;
    Ok(TurnRow {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        state: row.get(2)?,
        input: row.get(3)?,
        output: row.get(4)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_and_telemetry_roundtrip() {
        let db = Database::new(":memory:").unwrap();
        db.insert_turn("t-1", "completed", None, None, &json!({"actions": []}))
            .unwrap();
        db.insert_turn_telemetry(&TurnTelemetryRow {
            turn_id: "t-1".to_string(),
            survival_tier: "normal".to_string(),
            estimated_usd: 100,
            queue_depth: 0,
            spend_proxy_usd: 0.0,
            actions_total: 1,
            action_failures: 0,
            brain_duration_ms: 42,
            brain_failures: 0,
        })
        .unwrap();

        let turn = db.get_turn("t-1").unwrap().unwrap();
        assert_eq!(turn.state, "completed");
        let telemetry = db.get_turn_telemetry("t-1").unwrap().unwrap();
        assert_eq!(telemetry.brain_duration_ms, 42);
    }

    #[test]
    fn test_telemetry_requires_turn() {
        let db = Database::new(":memory:").unwrap();
        let result = db.insert_turn_telemetry(&TurnTelemetryRow {
            turn_id: "missing".to_string(),
            survival_tier: "normal".to_string(),
            estimated_usd: 0,
            queue_depth: 0,
            spend_proxy_usd: 0.0,
            actions_total: 0,
            action_failures: 0,
            brain_duration_ms: 0,
            brain_failures: 0,
        });
        assert!(result.is_err(), "foreign key should reject orphan telemetry");
    }

    #[test]
    fn test_recent_turns_ordering() {
        let db = Database::new(":memory:").unwrap();
        for i in 0..5 {
            db.insert_turn(&format!("t-{i}"), "completed", None, None, &json!({}))
                .unwrap();
        }
        let rows = db.list_recent_turns(3).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].id, "t-4");
    }
}
