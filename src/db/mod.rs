//! State store - schema, connection management, and per-table operations.
//!
//! `sqlite.rs` owns the pool and migrations; every table group lives in its
//! own module under `tables/` as an `impl Database` extension block.

pub mod sqlite;
pub mod tables;

pub use sqlite::{Database, DbConn, StoreError, SCHEMA_VERSION};
pub use tables::alerts::AlertRow;
pub use tables::incidents::{IncidentCode, IncidentRow, Severity};
pub use tables::memory::{MemoryEpisodeRow, MemoryFactRow};
pub use tables::messages::MessageRow;
pub use tables::self_mod::{RollbackPointRow, SelfModMutationRow};
pub use tables::survival::SurvivalSnapshotRow;
pub use tables::turns::{TurnRow, TurnTelemetryRow};
pub use tables::unlock_sessions::UnlockSessionRow;
