//! Messaging transport interface.
//!
//! The core never speaks a wire protocol itself: inbound sync and outbound
//! sends go through this trait. The daemon polls once per tick and upserts
//! whatever arrives into the message table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("transport poll failed: {0}")]
    Poll(String),
}

/// A message delivered by the transport, not yet persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub thread_id: Option<String>,
    pub content: String,
    pub received_at: String,
}

#[async_trait]
pub trait MessagingTransport: Send + Sync {
    /// Fetch messages received after `since` (RFC3339), bounded by `limit`.
    async fn poll(
        &self,
        since: Option<&str>,
        limit: usize,
    ) -> Result<Vec<InboundMessage>, TransportError>;

    /// Deliver a message. Returns the transport-assigned message id.
    async fn send(
        &self,
        to: &str,
        content: &str,
        thread_id: Option<&str>,
    ) -> Result<String, TransportError>;
}

/// A transport with no peers. Polls return nothing and sends succeed
/// locally; useful for air-gapped operation and as a safe default.
pub struct NullTransport;

#[async_trait]
impl MessagingTransport for NullTransport {
    async fn poll(
        &self,
        _since: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<InboundMessage>, TransportError> {
        Ok(Vec::new())
    }

    async fn send(
        &self,
        to: &str,
        _content: &str,
        _thread_id: Option<&str>,
    ) -> Result<String, TransportError> {
        log::debug!("[TRANSPORT] null transport dropping message to {}", to);
        Ok(uuid::Uuid::new_v4().to_string())
    }
}
