//! Database operations for the `incidents` table.
//!
//! Incidents are the append-only record of every non-success event. Message
//! and metadata text passes through the redactor before it is persisted.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;
use crate::redaction;

/// Incident severity ladder: `info < warning < error < critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// The closed set of incident codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentCode {
    ConfigInvalid,
    BrainRequestFailed,
    BrainOutputMalformed,
    ActionBlocked,
    ActionFailed,
    ChainCapabilityBlocked,
    WalletLocked,
    DaemonFailure,
    AlertTriggered,
    SecurityPolicyViolation,
    ProviderFailure,
}

impl IncidentCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentCode::ConfigInvalid => "CONFIG_INVALID",
            IncidentCode::BrainRequestFailed => "BRAIN_REQUEST_FAILED",
            IncidentCode::BrainOutputMalformed => "BRAIN_OUTPUT_MALFORMED",
            IncidentCode::ActionBlocked => "ACTION_BLOCKED",
            IncidentCode::ActionFailed => "ACTION_FAILED",
            IncidentCode::ChainCapabilityBlocked => "CHAIN_CAPABILITY_BLOCKED",
            IncidentCode::WalletLocked => "WALLET_LOCKED",
            IncidentCode::DaemonFailure => "DAEMON_FAILURE",
            IncidentCode::AlertTriggered => "ALERT_TRIGGERED",
            IncidentCode::SecurityPolicyViolation => "SECURITY_POLICY_VIOLATION",
            IncidentCode::ProviderFailure => "PROVIDER_FAILURE",
        }
    }
}

/// A row from the `incidents` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRow {
    pub id: String,
    pub code: String,
    pub severity: String,
    pub category: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub timestamp: String,
}

impl Database {
    /// Insert an incident and return its id. Free text and metadata are
    /// redacted before they touch disk.
    pub fn insert_incident(
        &self,
        code: IncidentCode,
        severity: Severity,
        category: &str,
        message: &str,
        metadata: &serde_json::Value,
    ) -> Result<String, rusqlite::Error> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO incidents (id, code, severity, category, message, metadata, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                code.as_str(),
                severity.as_str(),
                category,
                redaction::redact_text(message),
                redaction::redact_metadata_json(metadata),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    /// Most recent incidents, newest first.
    pub fn list_recent_incidents(&self, limit: usize) -> Result<Vec<IncidentRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, code, severity, category, message, metadata, timestamp
             FROM incidents ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], map_incident_row)?;
        rows.collect()
    }

    /// Incidents of a given severity since `since`, for alert-threshold
    /// evaluation.
    pub fn count_incidents_by_severity_since(
        &self,
        severity: Severity,
        since: DateTime<Utc>,
    ) -> Result<i64, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM incidents WHERE severity = ?1 AND timestamp >= ?2",
            params![severity.as_str(), since.to_rfc3339()],
            |row| row.get(0),
        )
    }

    /// Incidents with a given code, newest first.
    pub fn list_incidents_by_code(
        &self,
        code: IncidentCode,
        limit: usize,
    ) -> Result<Vec<IncidentRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, code, severity, category, message, metadata, timestamp
             FROM incidents WHERE code = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![code.as_str(), limit as i64], map_incident_row)?;
        rows.collect()
    }

    pub fn count_incidents(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))
    }
}

fn map_incident_row(row: &rusqlite::Row) -> Result<IncidentRow, rusqlite::Error> {
    let metadata: String = row.get(5)?;
    Ok(IncidentRow {
        id: row.get(0)?,
        code: row.get(1)?,
        severity: row.get(2)?,
        category: row.get(3)?,
        message: row.get(4)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        timestamp: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_list() {
        let db = Database::new(":memory:").unwrap();
        db.insert_incident(
            IncidentCode::ActionFailed,
            Severity::Warning,
            "action",
            "send_message failed: peer unreachable",
            &json!({"action": "send_message"}),
        )
        .unwrap();

        let rows = db.list_recent_incidents(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].code, "ACTION_FAILED");
        assert_eq!(rows[0].severity, "warning");
    }

    #[test]
    fn test_message_is_redacted_on_insert() {
        let db = Database::new(":memory:").unwrap();
        let secret = format!("0x{}", "ab".repeat(32));
        db.insert_incident(
            IncidentCode::ProviderFailure,
            Severity::Warning,
            "provider",
            &format!("request failed with key {}", secret),
            &json!({"api_key": "sk-live-123456"}),
        )
        .unwrap();

        let rows = db.list_recent_incidents(1).unwrap();
        assert!(!rows[0].message.contains(&secret));
        assert_eq!(rows[0].metadata["api_key"], "[REDACTED]");
    }

    #[test]
    fn test_severity_window_count() {
        let db = Database::new(":memory:").unwrap();
        for _ in 0..3 {
            db.insert_incident(
                IncidentCode::DaemonFailure,
                Severity::Critical,
                "daemon",
                "tick failed",
                &serde_json::Value::Null,
            )
            .unwrap();
        }
        let since = Utc::now() - chrono::Duration::minutes(10);
        assert_eq!(
            db.count_incidents_by_severity_since(Severity::Critical, since)
                .unwrap(),
            3
        );
        assert_eq!(
            db.count_incidents_by_severity_since(Severity::Warning, since)
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }
}
