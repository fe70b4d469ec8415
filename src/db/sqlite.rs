//! SQLite state store - schema definitions and connection management.
//!
//! This file contains:
//! - Database struct definition
//! - Connection pool management (r2d2)
//! - Versioned schema migrations
//!
//! All table operations are in the tables/ subdirectory.

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;

/// Pooled connection type alias for convenience
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Highest schema version this binary understands. A database stamped with a
/// newer version refuses to open.
pub const SCHEMA_VERSION: i64 = 3;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },
}

/// Main state store wrapper with r2d2 connection pool
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Create a new connection pool and run migrations.
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        // Create parent directory if it doesn't exist
        if database_url != ":memory:" {
            if let Some(parent) = Path::new(database_url).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).ok();
                }
            }
        }

        let manager = if database_url == ":memory:" {
            // A named shared-cache in-memory database: every pooled
            // connection sees the same data, and each Database instance gets
            // its own namespace.
            let name = format!(
                "file:memdb-{}?mode=memory&cache=shared",
                uuid::Uuid::new_v4()
            );
            SqliteConnectionManager::file(name)
                .with_flags(
                    rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                        | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                        | rusqlite::OpenFlags::SQLITE_OPEN_URI,
                )
                .with_init(|conn| {
                    conn.execute_batch(
                        "PRAGMA busy_timeout=5000;
                         PRAGMA foreign_keys=ON;",
                    )
                })
        } else {
            SqliteConnectionManager::file(database_url).with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA busy_timeout=5000;
                     PRAGMA journal_mode=WAL;
                     PRAGMA synchronous=NORMAL;
                     PRAGMA temp_store=memory;
                     PRAGMA foreign_keys=ON;",
                )
            })
        };

        // The daemon is effectively single-writer; a small pool covers the
        // concurrent host surfaces.
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let db = Self { pool };
        db.migrate()?;
        Ok(db)
    }

    /// Get a connection from the pool.
    /// Uses a 5-second timeout instead of panicking on pool exhaustion.
    #[inline]
    pub fn conn(&self) -> DbConn {
        self.pool
            .get_timeout(std::time::Duration::from_secs(5))
            .expect("Failed to get database connection from pool (timeout after 5s)")
    }

    /// Current schema version recorded in the database (0 = fresh).
    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;
        let version: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    /// Apply outstanding migrations in order. Refuses to open a database
    /// stamped by a newer binary.
    fn migrate(&self) -> Result<(), StoreError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(StoreError::SchemaTooNew {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        let conn = self.conn();
        for version in (current + 1)..=SCHEMA_VERSION {
            match version {
                1 => Self::migrate_v1(&conn)?,
                2 => Self::migrate_v2(&conn)?,
                3 => Self::migrate_v3(&conn)?,
                _ => unreachable!("unknown migration version {version}"),
            }
            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
                params![version],
            )?;
            log::info!("Applied schema migration v{}", version);
        }
        Ok(())
    }

    /// v1: base schema.
    fn migrate_v1(conn: &DbConn) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS turns (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                state TEXT NOT NULL,
                input TEXT,
                output TEXT,
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS turn_telemetry (
                turn_id TEXT PRIMARY KEY REFERENCES turns(id),
                survival_tier TEXT NOT NULL,
                estimated_usd INTEGER NOT NULL,
                queue_depth INTEGER NOT NULL,
                spend_proxy_usd REAL NOT NULL DEFAULT 0,
                actions_total INTEGER NOT NULL,
                action_failures INTEGER NOT NULL,
                brain_duration_ms INTEGER NOT NULL,
                brain_failures INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                thread_id TEXT,
                content TEXT NOT NULL,
                received_at TEXT NOT NULL,
                processed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_messages_unprocessed
                ON messages(received_at) WHERE processed_at IS NULL;

            CREATE TABLE IF NOT EXISTS memory_facts (
                id TEXT NOT NULL,
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 0.5,
                source TEXT NOT NULL DEFAULT 'agent',
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS memory_episodes (
                id TEXT PRIMARY KEY,
                summary TEXT NOT NULL,
                outcome TEXT,
                action_type TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL,
                severity TEXT NOT NULL,
                category TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                timestamp TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_severity_time
                ON incidents(severity, timestamp);

            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL,
                severity TEXT NOT NULL,
                route TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS self_mod_mutations (
                id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                before_hash TEXT,
                after_hash TEXT NOT NULL,
                reason TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rollback_points (
                id TEXT PRIMARY KEY,
                mutation_id TEXT NOT NULL REFERENCES self_mod_mutations(id),
                path TEXT NOT NULL,
                rollback_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_rollback_points_path
                ON rollback_points(path, created_at);

            CREATE TABLE IF NOT EXISTS emergency_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                enabled INTEGER NOT NULL DEFAULT 0,
                reason TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS unlock_sessions (
                id TEXT PRIMARY KEY,
                address TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                revoked_at TEXT
            );

            CREATE TABLE IF NOT EXISTS survival_snapshots (
                id TEXT PRIMARY KEY,
                tier TEXT NOT NULL,
                estimated_usd INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// v2: payment events for replication funding / spend tracking.
    fn migrate_v2(conn: &DbConn) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS payment_events (
                id TEXT PRIMARY KEY,
                direction TEXT NOT NULL,
                amount_usdc TEXT NOT NULL,
                counterparty TEXT,
                reference TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// v3: replication lineage records.
    fn migrate_v3(conn: &DbConn) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS children (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                address TEXT NOT NULL,
                sandbox_id TEXT,
                funded_usdc TEXT NOT NULL DEFAULT '0',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS lineage_edges (
                parent_id TEXT NOT NULL,
                child_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (parent_id, child_id)
            );",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_reaches_current_version() {
        let db = Database::new(":memory:").expect("open");
        assert_eq!(db.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        let url = path.to_str().unwrap().to_string();
        {
            let db = Database::new(&url).expect("open");
            let conn = db.conn();
            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
                params![SCHEMA_VERSION + 1],
            )
            .unwrap();
        }
        match Database::new(&url) {
            Err(StoreError::SchemaTooNew { found, supported }) => {
                assert_eq!(found, SCHEMA_VERSION + 1);
                assert_eq!(supported, SCHEMA_VERSION);
            }
            other => panic!("expected SchemaTooNew, got {:?}", other.map(|_| ())),
        }
    }
}
