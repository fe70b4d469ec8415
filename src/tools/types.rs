//! Shared tool types: invocation, outcome, context, and the adapter trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::ToolSourceConfig;
use crate::db::Database;

/// A request to run one tool through one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub source_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: Value,
}

/// The uniform result shape every adapter returns. Failures are data, not
/// errors: `ok == false` with an explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolOutcome {
    pub fn success(output: Value) -> Self {
        ToolOutcome {
            ok: true,
            output: Some(output),
            error: None,
            metadata: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        ToolOutcome {
            ok: false,
            output: None,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn failure_with_metadata(error: impl Into<String>, metadata: Value) -> Self {
        ToolOutcome {
            ok: false,
            output: None,
            error: Some(error.into()),
            metadata: Some(metadata),
        }
    }
}

/// Runtime state handed to adapters. Read access only.
#[derive(Clone)]
pub struct ToolContext {
    pub db: Arc<Database>,
    pub agent_address: String,
    pub agent_name: String,
}

/// An adapter executes tools for sources routed to it.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn invoke(
        &self,
        source: &ToolSourceConfig,
        tool_name: &str,
        input: &Value,
        context: &ToolContext,
    ) -> ToolOutcome;
}
