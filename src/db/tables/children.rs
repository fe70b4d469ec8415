//! Database operations for the `children` and `lineage_edges` tables.
//!
//! Replication records: each successful `replicate` action inserts a child
//! row and the parent→child lineage edge.

use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;

/// A row from the `children` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildRow {
    pub id: String,
    pub name: String,
    pub address: String,
    pub sandbox_id: Option<String>,
    pub funded_usdc: String,
    pub created_at: String,
}

impl Database {
    pub fn insert_child(
        &self,
        name: &str,
        address: &str,
        sandbox_id: Option<&str>,
        funded_usdc: &str,
    ) -> Result<String, rusqlite::Error> {
        let id = Uuid::new_v4().to_string();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO children (id, name, address, sandbox_id, funded_usdc, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, name, address, sandbox_id, funded_usdc, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    pub fn insert_lineage_edge(
        &self,
        parent_id: &str,
        child_id: &str,
    ) -> Result<(), rusqlite::Error> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO lineage_edges (parent_id, child_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![parent_id, child_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_children(&self, limit: usize) -> Result<Vec<ChildRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, name, address, sandbox_id, funded_usdc, created_at
             FROM children ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ChildRow {
                id: row.get(0)?,
                name: row.get(1)?,
                address: row.get(2)?,
                sandbox_id: row.get(3)?,
                funded_usdc: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        rows.collect()
    }
}
