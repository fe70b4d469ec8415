//! Key/value store for agent state tracking.
//!
//! Used for persistent counters, feature flags, and markers (brain failure
//! streak, self-mod rate-limit timestamps, alert de-dup, next-sleep hint).
//! `kv_update` runs a read-modify-write inside a transaction for lists that
//! must not lose entries to concurrent writers.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::Database;

/// Reserved KV keys - single source of truth
pub mod keys {
    pub const STARTED_AT: &str = "started_at";
    pub const AGENT_STATE: &str = "agent_state";
    pub const SELF_CHILD_ID: &str = "self_child_id";
    pub const ENABLED_SKILL_IDS: &str = "enabled_skill_ids";
    pub const BRAIN_FAILURE_STREAK: &str = "brain_failure_streak_v1";
    pub const SELF_MOD_TIMESTAMPS: &str = "self_mod_timestamps_v1";
    pub const NEXT_SLEEP_MS: &str = "autonomy_next_sleep_ms";
    pub const LAST_POLL_AT: &str = "xmtp_last_poll_at";
    pub const LAST_HEARTBEAT_AT: &str = "last_heartbeat_at";
    pub const SELF_MOD_BACKUP_PREFIX: &str = "self_mod_backup_v1:";
    pub const ALERT_DEDUP_PREFIX: &str = "alert_dedup_v1:";
    pub const CONSTITUTION_HASH_PREFIX: &str = "constitution_hash_v1:";
}

impl Database {
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()
    }

    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), rusqlite::Error> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Delete a key. Returns true if the key existed.
    pub fn kv_delete(&self, key: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(deleted > 0)
    }

    /// JSON view over a key.
    pub fn kv_get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, rusqlite::Error> {
        Ok(self
            .kv_get(key)?
            .and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    pub fn kv_set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), rusqlite::Error> {
        let raw = serde_json::to_string(value)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.kv_set(key, &raw)
    }

    /// Atomic read-modify-write on a key. The closure receives the current
    /// value and returns the new one; the whole cycle runs in a transaction.
    pub fn kv_update<F>(&self, key: &str, f: F) -> Result<String, rusqlite::Error>
    where
        F: FnOnce(Option<String>) -> String,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let current: Option<String> = tx
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        let next = f(current);
        tx.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
            params![key, next, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(next)
    }

    /// Increment an integer-valued key and return the new value. Non-numeric
    /// contents reset to zero before incrementing.
    pub fn kv_increment(&self, key: &str, by: i64) -> Result<i64, rusqlite::Error> {
        let next = self.kv_update(key, |current| {
            let base: i64 = current.and_then(|v| v.trim().parse().ok()).unwrap_or(0);
            (base + by).to_string()
        })?;
        Ok(next.parse().unwrap_or(0))
    }

    /// List all keys with a given prefix, with their values.
    pub fn kv_list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT key, value FROM kv WHERE key LIKE ?1 || '%' ORDER BY key")?;
        let rows = stmt.query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    }
}
