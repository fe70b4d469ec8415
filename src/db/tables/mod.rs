//! State-store table modules - extend Database with per-table methods.
//!
//! Each module adds `impl Database` blocks for one table group.

pub mod alerts; // alerts
pub mod children; // children, lineage_edges
pub mod emergency; // emergency_state singleton
pub mod incidents; // incidents
pub mod kv; // kv (+ JSON helpers)
pub mod memory; // memory_facts, memory_episodes
pub mod messages; // messages (inbound queue + outbound log)
pub mod payments; // payment_events
pub mod self_mod; // self_mod_mutations, rollback_points
pub mod survival; // survival_snapshots
pub mod turns; // turns, turn_telemetry
pub mod unlock_sessions; // unlock_sessions
