//! Aethernet core — the autonomous runtime of a wallet-native agent.
//!
//! The crate is organized around a single [`runtime::AgentRuntime`] that owns
//! the state store, the brain client, the wallet session, and the action
//! executor, and drives the think→decide→act loop from the daemon scheduler.
//! Host surfaces (CLI, HTTP) construct the runtime, call `initialize()` once,
//! then `run_daemon()` until cancellation.

pub mod actions;
pub mod alerting;
pub mod brain;
pub mod chain;
pub mod commands;
pub mod config;
pub mod constitution;
pub mod db;
pub mod providers;
pub mod redaction;
pub mod runtime;
pub mod self_mod;
pub mod skills;
pub mod survival;
pub mod test_support;
pub mod tools;
pub mod transport;
pub mod validator;
pub mod wallet;

pub use config::AgentConfig;
pub use db::Database;
pub use runtime::{AgentRuntime, RuntimeError};
