//! Database operations for the `alerts` table.
//!
//! Alerts are incidents promoted to operator-routed notifications. Rows are
//! append-only and redacted on insert like incidents.

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::tables::incidents::Severity;
use crate::db::Database;
use crate::redaction;

/// A row from the `alerts` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: String,
    pub code: String,
    pub severity: String,
    pub route: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub timestamp: String,
}

impl Database {
    pub fn insert_alert(
        &self,
        code: &str,
        severity: Severity,
        route: &str,
        message: &str,
        metadata: &serde_json::Value,
    ) -> Result<String, rusqlite::Error> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO alerts (id, code, severity, route, message, metadata, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                code,
                severity.as_str(),
                route,
                redaction::redact_text(message),
                redaction::redact_metadata_json(metadata),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    pub fn list_recent_alerts(&self, limit: usize) -> Result<Vec<AlertRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, code, severity, route, message, metadata, timestamp
             FROM alerts ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let metadata: String = row.get(5)?;
            Ok(AlertRow {
                id: row.get(0)?,
                code: row.get(1)?,
                severity: row.get(2)?,
                route: row.get(3)?,
                message: row.get(4)?,
                metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
                timestamp: row.get(6)?,
            })
        })?;
        rows.collect()
    }

    pub fn count_alerts(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_count() {
        let db = Database::new(":memory:").unwrap();
        db.insert_alert(
            "ALERT_TRIGGERED",
            Severity::Critical,
            "db",
            "survival tier is dead",
            &json!({"tier": "dead"}),
        )
        .unwrap();
        assert_eq!(db.count_alerts().unwrap(), 1);
        let rows = db.list_recent_alerts(5).unwrap();
        assert_eq!(rows[0].severity, "critical");
    }

    #[test]
    fn test_alert_message_redacted() {
        let db = Database::new(":memory:").unwrap();
        db.insert_alert(
            "ALERT_TRIGGERED",
            Severity::Warning,
            "db",
            "webhook auth used Bearer super-secret-token-123",
            &serde_json::Value::Null,
        )
        .unwrap();
        let rows = db.list_recent_alerts(1).unwrap();
        assert!(!rows[0].message.contains("super-secret-token-123"));
    }
}
