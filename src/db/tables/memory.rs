//! Database operations for the `memory_facts` and `memory_episodes` tables.
//!
//! Facts are a keyed upsert store (newest write wins); episodes are an
//! append-only journal of what the agent did.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;

/// A row from the `memory_facts` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFactRow {
    pub id: String,
    pub key: String,
    pub value: String,
    pub confidence: f64,
    pub source: String,
    pub updated_at: String,
}

/// A row from the `memory_episodes` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEpisodeRow {
    pub id: String,
    pub summary: String,
    pub outcome: Option<String>,
    pub action_type: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: String,
}

impl Database {
    /// Upsert a fact by key. Confidence is clamped into [0, 1].
    pub fn upsert_memory_fact(
        &self,
        key: &str,
        value: &str,
        confidence: f64,
        source: &str,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO memory_facts (id, key, value, confidence, source, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                confidence = excluded.confidence,
                source = excluded.source,
                updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                key,
                value,
                confidence.clamp(0.0, 1.0),
                source,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_memory_fact(&self, key: &str) -> Result<Option<MemoryFactRow>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, key, value, confidence, source, updated_at
             FROM memory_facts WHERE key = ?1",
            params![key],
            map_fact_row,
        )
        .optional()
    }

    /// Facts ordered by most recently updated.
    pub fn list_memory_facts(&self, limit: usize) -> Result<Vec<MemoryFactRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, key, value, confidence, source, updated_at
             FROM memory_facts ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], map_fact_row)?;
        rows.collect()
    }

    /// Append an episode and return its id.
    pub fn insert_memory_episode(
        &self,
        summary: &str,
        outcome: Option<&str>,
        action_type: Option<&str>,
        metadata: &serde_json::Value,
    ) -> Result<String, rusqlite::Error> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO memory_episodes (id, summary, outcome, action_type, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                summary,
                outcome,
                action_type,
                metadata.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    /// Most recent episodes, newest first.
    pub fn list_memory_episodes(
        &self,
        limit: usize,
    ) -> Result<Vec<MemoryEpisodeRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, summary, outcome, action_type, metadata, created_at
             FROM memory_episodes ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let metadata: String = row.get(4)?;
            Ok(MemoryEpisodeRow {
                id: row.get(0)?,
                summary: row.get(1)?,
                outcome: row.get(2)?,
                action_type: row.get(3)?,
                metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
                created_at: row.get(5)?,
            })
        })?;
        rows.collect()
    }

    pub fn count_memory_episodes(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row("SELECT COUNT(*) FROM memory_episodes", [], |row| row.get(0))
    }
}

fn map_fact_row(row: &rusqlite::Row) -> Result<MemoryFactRow, rusqlite::Error> {
    Ok(MemoryFactRow {
        id: row.get(0)?,
        key: row.get(1)?,
        value: row.get(2)?,
        confidence: row.get(3)?,
        source: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
