//! Database operations for the `payment_events` table.
//!
//! Append-only record of value movement initiated by the agent (child
//! funding today). Metadata is redacted on insert.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;
use crate::redaction;

/// A row from the `payment_events` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEventRow {
    pub id: String,
    pub direction: String,
    pub amount_usdc: String,
    pub counterparty: Option<String>,
    pub reference: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

impl Database {
    pub fn insert_payment_event(
        &self,
        direction: &str,
        amount_usdc: &str,
        counterparty: Option<&str>,
        reference: Option<&str>,
        metadata: &serde_json::Value,
    ) -> Result<String, rusqlite::Error> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO payment_events (id, direction, amount_usdc, counterparty, reference, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                direction,
                amount_usdc,
                counterparty,
                reference.map(redaction::redact_text),
                redaction::redact_metadata_json(metadata),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    /// Sum of outbound payment amounts since `since`, used as the spend
    /// proxy in turn telemetry. Amounts that fail to parse count as zero.
    pub fn sum_outbound_payments_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<f64, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT amount_usdc FROM payment_events
             WHERE direction = 'outbound' AND created_at >= ?1",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| row.get::<_, String>(0))?;
        let mut total = 0.0;
        for amount in rows {
            total += amount?.parse::<f64>().unwrap_or(0.0);
        }
        Ok(total)
    }

    pub fn list_recent_payment_events(
        &self,
        limit: usize,
    ) -> Result<Vec<PaymentEventRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, direction, amount_usdc, counterparty, reference, metadata, created_at
             FROM payment_events ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let metadata: String = row.get(5)?;
            Ok(PaymentEventRow {
                id: row.get(0)?,
                direction: row.get(1)?,
                amount_usdc: row.get(2)?,
                counterparty: row.get(3)?,
                reference: row.get(4)?,
                metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
                created_at: row.get(6)?,
            })
        })?;
        rows.collect()
    }
}
