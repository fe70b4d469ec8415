//! Internal tool adapter: a fixed read-only window over runtime state.
//!
//! Performs no writes. Tools outside the fixed surface are refused.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::ToolSourceConfig;
use crate::db::tables::kv::keys;
use crate::tools::types::{ToolAdapter, ToolContext, ToolOutcome};

pub struct InternalAdapter;

const FACT_LIMIT: usize = 50;
const EPISODE_LIMIT: usize = 50;
const THREAD_LIMIT: usize = 20;

#[async_trait]
impl ToolAdapter for InternalAdapter {
    async fn invoke(
        &self,
        _source: &ToolSourceConfig,
        tool_name: &str,
        input: &Value,
        context: &ToolContext,
    ) -> ToolOutcome {
        let result = match tool_name {
            "agent_status" => agent_status(context),
            "memory_facts" => memory_facts(context),
            "memory_episodes" => memory_episodes(context),
            "message_threads" => message_threads(context, input),
            "survival_snapshot" => survival_snapshot(context),
            "queue_depth" => queue_depth(context),
            other => {
                return ToolOutcome::failure(format!(
                    "internal adapter has no tool '{}'",
                    other
                ))
            }
        };
        match result {
            Ok(output) => ToolOutcome::success(output),
            Err(e) => ToolOutcome::failure(format!("internal tool failed: {}", e)),
        }
    }
}

fn agent_status(context: &ToolContext) -> Result<Value, rusqlite::Error> {
    let state = context
        .db
        .kv_get(keys::AGENT_STATE)?
        .unwrap_or_else(|| "unknown".to_string());
    let started_at = context.db.kv_get(keys::STARTED_AT)?;
    let snapshot = context.db.latest_survival_snapshot()?;
    Ok(json!({
        "address": context.agent_address,
        "name": context.agent_name,
        "state": state,
        "startedAt": started_at,
        "survivalTier": snapshot.as_ref().map(|s| s.tier.clone()),
        "estimatedUsd": snapshot.map(|s| s.estimated_usd),
        "queueDepth": context.db.count_unprocessed_messages()?,
        "turns": context.db.count_turns()?,
    }))
}

fn memory_facts(context: &ToolContext) -> Result<Value, rusqlite::Error> {
    let facts = context.db.list_memory_facts(FACT_LIMIT)?;
    Ok(serde_json::to_value(facts).unwrap_or(Value::Null))
}

fn memory_episodes(context: &ToolContext) -> Result<Value, rusqlite::Error> {
    let episodes = context.db.list_memory_episodes(EPISODE_LIMIT)?;
    Ok(serde_json::to_value(episodes).unwrap_or(Value::Null))
}

fn message_threads(context: &ToolContext, input: &Value) -> Result<Value, rusqlite::Error> {
    if let Some(thread_id) = input.get("threadId").and_then(Value::as_str) {
        let messages = context.db.list_thread_messages(thread_id, 100)?;
        return Ok(serde_json::to_value(messages).unwrap_or(Value::Null));
    }
    let threads = context.db.list_threads(THREAD_LIMIT)?;
    Ok(json!({ "threads": threads }))
}

fn survival_snapshot(context: &ToolContext) -> Result<Value, rusqlite::Error> {
    let snapshot = context.db.latest_survival_snapshot()?;
    Ok(serde_json::to_value(snapshot).unwrap_or(Value::Null))
}

fn queue_depth(context: &ToolContext) -> Result<Value, rusqlite::Error> {
    Ok(json!({ "queueDepth": context.db.count_unprocessed_messages()? }))
}
