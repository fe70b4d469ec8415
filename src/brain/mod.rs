//! Brain integration: the external language model that plans each turn.
//!
//! `types` defines the turn-input/turn-output wire contract and the lenient
//! sanitizer; `client` is the HTTP client with timeout/retry/backoff. Every
//! transport or parsing failure becomes a `malformed` TurnOutput so the
//! orchestrator has a single code path.

pub mod client;
pub mod types;

pub use client::HttpBrainClient;
pub use types::{
    Action, ActionType, Integrity, MemoryWrites, TurnInput, TurnOutput, ALLOWED_ACTION_TYPES,
};

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum BrainError {
    #[error("brain request failed: {0}")]
    Request(String),
}

/// The planning provider the orchestrator talks to. Implementations should
/// prefer returning a `malformed` output over an error; the error path
/// exists for hosts and tests that need a hard failure.
#[async_trait]
pub trait BrainProvider: Send + Sync {
    async fn generate_turn(&self, input: &TurnInput) -> Result<TurnOutput, BrainError>;
}
