//! Turn input/output contract with the brain, and the output sanitizer.
//!
//! The wire format is camelCase JSON. The sanitizer is deliberately lenient:
//! whatever shape the model returns is coerced into a `TurnOutput` with safe
//! defaults, and `integrity` records whether anything usable survived.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{MemoryEpisodeRow, MemoryFactRow, MessageRow};
use crate::skills::SkillSummary;

/// The closed set of action kinds the runtime can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendMessage,
    Replicate,
    SelfModify,
    RecordFact,
    RecordEpisode,
    InvokeTool,
    Sleep,
    Noop,
}

pub const ALLOWED_ACTION_TYPES: [ActionType; 8] = [
    ActionType::SendMessage,
    ActionType::Replicate,
    ActionType::SelfModify,
    ActionType::RecordFact,
    ActionType::RecordEpisode,
    ActionType::InvokeTool,
    ActionType::Sleep,
    ActionType::Noop,
];

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::SendMessage => "send_message",
            ActionType::Replicate => "replicate",
            ActionType::SelfModify => "self_modify",
            ActionType::RecordFact => "record_fact",
            ActionType::RecordEpisode => "record_episode",
            ActionType::InvokeTool => "invoke_tool",
            ActionType::Sleep => "sleep",
            ActionType::Noop => "noop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "send_message" => Some(ActionType::SendMessage),
            "replicate" => Some(ActionType::Replicate),
            "self_modify" => Some(ActionType::SelfModify),
            "record_fact" => Some(ActionType::RecordFact),
            "record_episode" => Some(ActionType::RecordEpisode),
            "invoke_tool" => Some(ActionType::InvokeTool),
            "sleep" => Some(ActionType::Sleep),
            "noop" => Some(ActionType::Noop),
            _ => None,
        }
    }

    /// Mutating actions are refused under emergency stop or a dead tier.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ActionType::SendMessage | ActionType::Replicate | ActionType::SelfModify
        )
    }
}

/// One element of the brain's plan. `kind` stays a raw string until the
/// validator has applied the allowlist, so disallowed kinds are observable
/// as validation errors rather than silently vanishing at parse time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub params: Value,
}

impl Action {
    pub fn noop(reason: &str) -> Self {
        Action {
            kind: ActionType::Noop.as_str().to_string(),
            reason: Some(reason.to_string()),
            params: Value::Object(Default::default()),
        }
    }

    pub fn action_type(&self) -> Option<ActionType> {
        ActionType::parse(&self.kind)
    }

    /// Log form used in turn metadata: `<type>:<reason or none>`.
    pub fn log_label(&self) -> String {
        format!("{}:{}", self.kind, self.reason.as_deref().unwrap_or("none"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Integrity {
    Ok,
    Malformed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FactWrite {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeWrite {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryWrites {
    #[serde(default)]
    pub facts: Vec<FactWrite>,
    #[serde(default)]
    pub episodes: Vec<EpisodeWrite>,
}

/// The brain's structured plan for one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutput {
    pub summary: String,
    pub next_actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_writes: Option<MemoryWrites>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_ms: Option<i64>,
    pub integrity: Integrity,
}

impl TurnOutput {
    /// A malformed output carrying a single annotated noop.
    pub fn malformed(reason: &str) -> Self {
        TurnOutput {
            summary: String::new(),
            next_actions: vec![Action::noop(reason)],
            memory_writes: None,
            sleep_ms: None,
            integrity: Integrity::Malformed,
        }
    }
}

/// Coerce an arbitrary JSON value into a `TurnOutput`.
///
/// Missing or mistyped fields become safe defaults; action entries survive
/// only if they are objects with a string `type`. Integrity is `ok` when a
/// non-empty summary and at least one action came through.
pub fn sanitize_output(value: &Value) -> TurnOutput {
    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let mut next_actions = Vec::new();
    if let Some(entries) = value.get("nextActions").and_then(Value::as_array) {
        for entry in entries {
            let Some(kind) = entry.get("type").and_then(Value::as_str) else {
                continue;
            };
            let kind = kind.trim();
            if kind.is_empty() {
                continue;
            }
            let reason = entry
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string);
            let params = match entry.get("params") {
                Some(Value::Object(map)) => Value::Object(map.clone()),
                _ => Value::Object(Default::default()),
            };
            next_actions.push(Action {
                kind: kind.to_string(),
                reason,
                params,
            });
        }
    }

    let memory_writes = value
        .get("memoryWrites")
        .and_then(|v| serde_json::from_value::<MemoryWrites>(v.clone()).ok())
        .filter(|w| !w.facts.is_empty() || !w.episodes.is_empty());

    let sleep_ms = value.get("sleepMs").and_then(Value::as_f64).map(|v| v as i64);

    let provider_malformed = value
        .get("integrity")
        .and_then(Value::as_str)
        .map(|s| s == "malformed")
        .unwrap_or(false);

    let integrity = if !provider_malformed && !summary.is_empty() && !next_actions.is_empty() {
        Integrity::Ok
    } else {
        Integrity::Malformed
    };

    TurnOutput {
        summary,
        next_actions,
        memory_writes,
        sleep_ms,
        integrity,
    }
}

// ---- Turn input ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub address: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSummaryView {
    pub id: String,
    pub timestamp: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub facts: Vec<MemoryFactRow>,
    pub episodes: Vec<MemoryEpisodeRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSourceView {
    pub id: String,
    pub name: String,
    pub source_type: String,
    pub enabled: bool,
}

/// Everything the brain sees for one turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInput {
    pub agent: AgentIdentity,
    pub survival_tier: String,
    pub estimated_usd: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_prompt: Option<String>,
    pub inbox_messages: Vec<MessageRow>,
    pub recent_turns: Vec<TurnSummaryView>,
    pub memory: MemorySnapshot,
    pub skills: Vec<SkillSummary>,
    pub tool_sources: Vec<ToolSourceView>,
    pub available_actions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_well_formed() {
        let value = json!({
            "summary": "check inbox and reply",
            "nextActions": [
                {"type": "send_message", "params": {"to": "0xpeer", "content": "hi"}},
                {"type": "noop"}
            ],
            "sleepMs": 30000,
        });
        let output = sanitize_output(&value);
        assert_eq!(output.integrity, Integrity::Ok);
        assert_eq!(output.next_actions.len(), 2);
        assert_eq!(output.sleep_ms, Some(30000));
    }

    #[test]
    fn test_sanitize_missing_summary_is_malformed() {
        let value = json!({"nextActions": [{"type": "noop"}]});
        let output = sanitize_output(&value);
        assert_eq!(output.integrity, Integrity::Malformed);
    }

    #[test]
    fn test_sanitize_keeps_unknown_kinds_for_validator() {
        // Unknown kinds must survive sanitization so the validator can
        // report them as allowlist violations.
        let value = json!({
            "summary": "go",
            "nextActions": [
                {"type": "exec", "params": {"cmd": "rm -rf /"}},
                {"type": "noop"}
            ],
        });
        let output = sanitize_output(&value);
        assert_eq!(output.next_actions[0].kind, "exec");
        assert!(output.next_actions[0].action_type().is_none());
    }

    #[test]
    fn test_sanitize_drops_garbage_entries() {
        let value = json!({
            "summary": "go",
            "nextActions": [
                "not-an-object",
                {"noType": true},
                {"type": 42},
                {"type": "noop"}
            ],
        });
        let output = sanitize_output(&value);
        assert_eq!(output.next_actions.len(), 1);
    }

    #[test]
    fn test_sanitize_respects_provider_malformed_flag() {
        let value = json!({
            "summary": "looks fine",
            "nextActions": [{"type": "noop"}],
            "integrity": "malformed",
        });
        let output = sanitize_output(&value);
        assert_eq!(output.integrity, Integrity::Malformed);
    }

    #[test]
    fn test_sanitize_non_numeric_sleep_dropped() {
        let value = json!({
            "summary": "go",
            "nextActions": [{"type": "noop"}],
            "sleepMs": "soon",
        });
        assert_eq!(sanitize_output(&value).sleep_ms, None);
    }

    #[test]
    fn test_action_log_label() {
        assert_eq!(Action::noop("no_actions").log_label(), "noop:no_actions");
        let bare = Action {
            kind: "noop".to_string(),
            reason: None,
            params: Value::Object(Default::default()),
        };
        assert_eq!(bare.log_label(), "noop:none");
    }

    #[test]
    fn test_mutating_classification() {
        assert!(ActionType::SendMessage.is_mutating());
        assert!(ActionType::Replicate.is_mutating());
        assert!(ActionType::SelfModify.is_mutating());
        assert!(!ActionType::RecordFact.is_mutating());
        assert!(!ActionType::Sleep.is_mutating());
    }
}
