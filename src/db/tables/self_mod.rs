//! Database operations for the `self_mod_mutations` and `rollback_points`
//! tables.
//!
//! Every successful self-mod write produces exactly one mutation row and one
//! rollback point; the backup blob locator lives in KV keyed by mutation id.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;

/// A row from the `self_mod_mutations` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfModMutationRow {
    pub id: String,
    pub path: String,
    pub before_hash: Option<String>,
    pub after_hash: String,
    pub reason: Option<String>,
    pub created_at: String,
}

/// A row from the `rollback_points` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPointRow {
    pub id: String,
    pub mutation_id: String,
    pub path: String,
    pub rollback_hash: String,
    pub created_at: String,
}

impl Database {
    /// Insert a mutation and its paired rollback point in one transaction.
    pub fn insert_self_mod_mutation(
        &self,
        path: &str,
        before_hash: Option<&str>,
        after_hash: &str,
        reason: Option<&str>,
    ) -> Result<(String, String), rusqlite::Error> {
        let mutation_id = Uuid::new_v4().to_string();
        let rollback_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        // The rollback hash is the pre-image when one existed, otherwise the
        // new content hash (rolling back a created file means deleting it).
        let rollback_hash = before_hash.unwrap_or(after_hash);

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO self_mod_mutations (id, path, before_hash, after_hash, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![mutation_id, path, before_hash, after_hash, reason, now],
        )?;
        tx.execute(
            "INSERT INTO rollback_points (id, mutation_id, path, rollback_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![rollback_id, mutation_id, path, rollback_hash, now],
        )?;
        tx.commit()?;
        Ok((mutation_id, rollback_id))
    }

    pub fn get_self_mod_mutation(
        &self,
        id: &str,
    ) -> Result<Option<SelfModMutationRow>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, path, before_hash, after_hash, reason, created_at
             FROM self_mod_mutations WHERE id = ?1",
            params![id],
            map_mutation_row,
        )
        .optional()
    }

    pub fn count_self_mod_mutations(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row("SELECT COUNT(*) FROM self_mod_mutations", [], |row| row.get(0))
    }

    pub fn list_self_mod_mutations(
        &self,
        limit: usize,
    ) -> Result<Vec<SelfModMutationRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, path, before_hash, after_hash, reason, created_at
             FROM self_mod_mutations ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], map_mutation_row)?;
        rows.collect()
    }

    /// The most recent rollback point recorded for a path.
    pub fn latest_rollback_point_for_path(
        &self,
        path: &str,
    ) -> Result<Option<RollbackPointRow>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, mutation_id, path, rollback_hash, created_at
             FROM rollback_points WHERE path = ?1
             ORDER BY created_at DESC, id DESC LIMIT 1",
            params![path],
            map_rollback_row,
        )
        .optional()
    }

    pub fn list_rollback_points(
        &self,
        limit: usize,
    ) -> Result<Vec<RollbackPointRow>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, mutation_id, path, rollback_hash, created_at
             FROM rollback_points ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], map_rollback_row)?;
        rows.collect()
    }
}

fn map_mutation_row(row: &rusqlite::Row) -> Result<SelfModMutationRow, rusqlite::Error> {
    Ok(SelfModMutationRow {
        id: row.get(0)?,
        path: row.get(1)?,
        before_hash: row.get(2)?,
        after_hash: row.get(3)?,
        reason: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn map_rollback_row(row: &rusqlite::Row) -> Result<RollbackPointRow, rusqlite::Error> {
    Ok(RollbackPointRow {
        id: row.get(0)?,
        mutation_id: row.get(1)?,
        path: row.get(2)?,
        rollback_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_and_rollback_pair() {
        let db = Database::new(":memory:").unwrap();
        let (mutation_id, _) = db
            .insert_self_mod_mutation("/agent/notes.md", Some("aaa"), "bbb", Some("update notes"))
            .unwrap();

        let point = db
            .latest_rollback_point_for_path("/agent/notes.md")
            .unwrap()
            .unwrap();
        assert_eq!(point.mutation_id, mutation_id);
        assert_eq!(point.rollback_hash, "aaa");
        assert!(db.get_self_mod_mutation(&mutation_id).unwrap().is_some());
    }

    #[test]
    fn test_created_file_rollback_hash_is_after_hash() {
        let db = Database::new(":memory:").unwrap();
        db.insert_self_mod_mutation("/agent/new.txt", None, "ccc", None)
            .unwrap();
        let point = db
            .latest_rollback_point_for_path("/agent/new.txt")
            .unwrap()
            .unwrap();
        assert_eq!(point.rollback_hash, "ccc");
    }

    #[test]
    fn test_latest_point_wins() {
        let db = Database::new(":memory:").unwrap();
        db.insert_self_mod_mutation("/agent/a.txt", None, "v1", None)
            .unwrap();
        let (second, _) = db
            .insert_self_mod_mutation("/agent/a.txt", Some("v1"), "v2", None)
            .unwrap();
        let point = db
            .latest_rollback_point_for_path("/agent/a.txt")
            .unwrap()
            .unwrap();
        assert_eq!(point.mutation_id, second);
    }
}
