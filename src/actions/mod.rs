//! Action execution: gates, side effects, and failure classification.
//!
//! The executor runs one validated action at a time. Failures are returned
//! as data with the incident code pinned to the gate that refused (never
//! inferred from message text); the orchestrator writes the incidents.

pub mod replicate;

use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::brain::types::{Action, ActionType};
use crate::chain::{ChainCapability, ChainRegistry};
use crate::db::tables::kv::keys;
use crate::db::{Database, IncidentCode, Severity};
use crate::providers::ComputeProvider;
use crate::self_mod::{SelfModEngine, SelfModError};
use crate::survival::SurvivalTier;
use crate::tools::{ToolContext, ToolInvocation, ToolRegistry};
use crate::transport::MessagingTransport;
use crate::wallet::WalletSession;

/// A classified action failure. The code drives the incident record.
#[derive(Debug, Clone)]
pub struct ActionFailure {
    pub code: IncidentCode,
    pub message: String,
}

impl ActionFailure {
    pub(crate) fn new(code: IncidentCode, message: impl Into<String>) -> Self {
        ActionFailure {
            code,
            message: message.into(),
        }
    }
}

/// A successful action, plus any non-fatal warnings the orchestrator should
/// record as incidents.
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub label: String,
    pub detail: Value,
    pub warnings: Vec<(IncidentCode, Severity, String)>,
}

impl ActionReport {
    pub(crate) fn new(label: &str, detail: Value) -> Self {
        ActionReport {
            label: label.to_string(),
            detail,
            warnings: Vec::new(),
        }
    }
}

/// Policy knobs the executor enforces per action.
#[derive(Debug, Clone)]
pub struct ExecutorPolicy {
    pub strict_allowlist: bool,
    pub allowlist: HashSet<ActionType>,
    pub allow_self_modify: bool,
    pub max_sleep_ms: i64,
    pub default_funding_usdc: String,
}

impl Default for ExecutorPolicy {
    fn default() -> Self {
        ExecutorPolicy {
            strict_allowlist: true,
            allowlist: crate::brain::ALLOWED_ACTION_TYPES.iter().copied().collect(),
            allow_self_modify: false,
            max_sleep_ms: 3_600_000,
            default_funding_usdc: "0".to_string(),
        }
    }
}

pub struct ActionExecutor {
    db: Arc<Database>,
    chains: ChainRegistry,
    transport: Arc<dyn MessagingTransport>,
    compute: Arc<dyn ComputeProvider>,
    tools: Arc<ToolRegistry>,
    self_mod: Arc<SelfModEngine>,
    wallet: Arc<Mutex<WalletSession>>,
    policy: ExecutorPolicy,
    agent_name: String,
}

impl ActionExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        chains: ChainRegistry,
        transport: Arc<dyn MessagingTransport>,
        compute: Arc<dyn ComputeProvider>,
        tools: Arc<ToolRegistry>,
        self_mod: Arc<SelfModEngine>,
        wallet: Arc<Mutex<WalletSession>>,
        policy: ExecutorPolicy,
        agent_name: String,
    ) -> Self {
        ActionExecutor {
            db,
            chains,
            transport,
            compute,
            tools,
            self_mod,
            wallet,
            policy,
            agent_name,
        }
    }

    /// Run one action through the gate chain and its handler.
    pub async fn execute(&self, action: &Action) -> Result<ActionReport, ActionFailure> {
        let kind = match action.action_type() {
            Some(kind) => kind,
            None => {
                return Err(ActionFailure::new(
                    IncidentCode::ActionBlocked,
                    format!("action '{}' is not in the allowlist", action.kind),
                ))
            }
        };

        if self.policy.strict_allowlist && !self.policy.allowlist.contains(&kind) {
            return Err(ActionFailure::new(
                IncidentCode::ActionBlocked,
                format!("action '{}' is not in the allowlist", action.kind),
            ));
        }

        if kind.is_mutating() {
            self.check_emergency_and_survival()?;
        }

        if matches!(kind, ActionType::SendMessage | ActionType::Replicate) {
            self.check_wallet_session()?;
            self.check_chain_capability(kind, &action.params)?;
        }

        if kind == ActionType::SelfModify && !self.policy.allow_self_modify {
            return Err(ActionFailure::new(
                IncidentCode::ActionBlocked,
                "self_modify is disabled by autonomy policy",
            ));
        }

        match kind {
            ActionType::SendMessage => self.run_send_message(&action.params).await,
            ActionType::Replicate => {
                replicate::run_replicate(
                    &self.db,
                    self.compute.as_ref(),
                    self.transport.as_ref(),
                    self.agent_address().unwrap_or_default(),
                    &self.policy.default_funding_usdc,
                    &action.params,
                )
                .await
            }
            ActionType::SelfModify => self.run_self_modify(&action.params),
            ActionType::RecordFact => self.run_record_fact(&action.params),
            ActionType::RecordEpisode => self.run_record_episode(&action.params),
            ActionType::InvokeTool => self.run_invoke_tool(&action.params).await,
            ActionType::Sleep => self.run_sleep(&action.params),
            ActionType::Noop => Ok(ActionReport::new("noop", json!({}))),
        }
    }

    // ---- gates ----

    /// Re-read emergency and survival state at every gate; both are shared
    /// with concurrent host surfaces.
    fn check_emergency_and_survival(&self) -> Result<(), ActionFailure> {
        let emergency = self
            .db
            .get_emergency_state()
            .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;
        if emergency.enabled {
            return Err(ActionFailure::new(
                IncidentCode::ActionBlocked,
                "mutating action refused: emergency stop is enabled",
            ));
        }
        let snapshot = self
            .db
            .latest_survival_snapshot()
            .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;
        if let Some(snapshot) = snapshot {
            if SurvivalTier::parse(&snapshot.tier) == Some(SurvivalTier::Dead) {
                return Err(ActionFailure::new(
                    IncidentCode::ActionBlocked,
                    "mutating action refused: survival tier is dead",
                ));
            }
        }
        Ok(())
    }

    fn check_wallet_session(&self) -> Result<(), ActionFailure> {
        let unlocked = self
            .wallet
            .lock()
            .map(|session| session.is_unlocked())
            .unwrap_or(false);
        if !unlocked {
            return Err(ActionFailure::new(
                IncidentCode::WalletLocked,
                "Wallet is locked: unlock a session before signing actions",
            ));
        }
        Ok(())
    }

    fn check_chain_capability(
        &self,
        kind: ActionType,
        params: &Value,
    ) -> Result<(), ActionFailure> {
        let selection = ["chain", "network", "caip2"]
            .iter()
            .find_map(|key| params.get(*key).and_then(Value::as_str));

        let Some(profile) = self.chains.resolve(selection) else {
            return Err(ActionFailure::new(
                IncidentCode::ChainCapabilityBlocked,
                format!(
                    "unsupported chain '{}'",
                    selection.unwrap_or(self.chains.default_caip2())
                ),
            ));
        };

        let required = match kind {
            ActionType::SendMessage => Some(ChainCapability::Messaging),
            ActionType::Replicate => {
                let funding = replicate::funding_amount(params, &self.policy.default_funding_usdc);
                if funding > 0.0 {
                    Some(ChainCapability::Payments)
                } else {
                    None
                }
            }
            _ => None,
        };

        if let Some(capability) = required {
            if !profile.supports.supports(capability) {
                return Err(ActionFailure::new(
                    IncidentCode::ChainCapabilityBlocked,
                    format!(
                        "chain '{}' does not support {}",
                        profile.caip2,
                        capability.as_str()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn agent_address(&self) -> Option<String> {
        self.wallet.lock().ok().and_then(|session| session.address())
    }

    // ---- handlers ----

    async fn run_send_message(&self, params: &Value) -> Result<ActionReport, ActionFailure> {
        let to = require_string(params, "to")?;
        let content = require_string(params, "content")?;
        let thread_id = optional_string(params, "threadId");

        let transport_id = self
            .transport
            .send(&to, &content, thread_id.as_deref())
            .await
            .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;

        let sender = self.agent_address().unwrap_or_default();
        self.db
            .insert_outbound_message(&sender, &to, thread_id.as_deref(), &content)
            .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;

        Ok(ActionReport::new(
            "send_message",
            json!({"to": to, "threadId": thread_id, "transportId": transport_id}),
        ))
    }

    fn run_self_modify(&self, params: &Value) -> Result<ActionReport, ActionFailure> {
        let target_path = require_string(params, "targetPath")?;
        let content = require_string(params, "content")?;
        let reason = optional_string(params, "reason");

        let outcome = self
            .self_mod
            .apply(
                std::path::Path::new(&target_path),
                &content,
                reason.as_deref(),
            )
            .map_err(classify_self_mod_error)?;

        Ok(ActionReport::new(
            "self_modify",
            json!({
                "path": outcome.path,
                "mutationId": outcome.mutation_id,
                "beforeHash": outcome.before_hash,
                "afterHash": outcome.after_hash,
            }),
        ))
    }

    fn run_record_fact(&self, params: &Value) -> Result<ActionReport, ActionFailure> {
        let key = require_string(params, "key")?;
        let value = match params.get("value") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => {
                return Err(ActionFailure::new(
                    IncidentCode::ActionFailed,
                    "record_fact requires params.value",
                ))
            }
        };
        let confidence = params
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5);
        let source = optional_string(params, "source").unwrap_or_else(|| "brain".to_string());

        self.db
            .upsert_memory_fact(&key, &value, confidence, &source)
            .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;
        Ok(ActionReport::new("record_fact", json!({"key": key})))
    }

    fn run_record_episode(&self, params: &Value) -> Result<ActionReport, ActionFailure> {
        let summary = require_string(params, "summary")?;
        let outcome = optional_string(params, "outcome");
        let action_type = optional_string(params, "actionType");

        let id = self
            .db
            .insert_memory_episode(
                &summary,
                outcome.as_deref(),
                action_type.as_deref(),
                params.get("metadata").unwrap_or(&Value::Null),
            )
            .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;
        Ok(ActionReport::new("record_episode", json!({"episodeId": id})))
    }

    async fn run_invoke_tool(&self, params: &Value) -> Result<ActionReport, ActionFailure> {
        let tool_name = optional_string(params, "toolName")
            .or_else(|| optional_string(params, "name"))
            .ok_or_else(|| {
                ActionFailure::new(
                    IncidentCode::ActionFailed,
                    "invoke_tool requires params.toolName",
                )
            })?;
        let source_id = optional_string(params, "sourceId")
            .unwrap_or_else(|| crate::tools::registry::INTERNAL_SOURCE_ID.to_string());
        let input = params.get("input").cloned().unwrap_or(json!({}));

        let invocation = ToolInvocation {
            source_id: source_id.clone(),
            tool_name: tool_name.clone(),
            input,
        };
        let context = ToolContext {
            db: self.db.clone(),
            agent_address: self.agent_address().unwrap_or_default(),
            agent_name: self.agent_name.clone(),
        };
        let outcome = self.tools.invoke(&invocation, &context).await;
        if !outcome.ok {
            return Err(ActionFailure::new(
                IncidentCode::ActionFailed,
                format!(
                    "tool '{}' via '{}' failed: {}",
                    tool_name,
                    source_id,
                    outcome.error.unwrap_or_else(|| "unknown error".to_string())
                ),
            ));
        }
        Ok(ActionReport::new(
            "invoke_tool",
            json!({"tool": tool_name, "source": source_id, "output": outcome.output}),
        ))
    }

    fn run_sleep(&self, params: &Value) -> Result<ActionReport, ActionFailure> {
        let requested = params
            .get("sleepMs")
            .or_else(|| params.get("durationMs"))
            .and_then(Value::as_f64)
            .ok_or_else(|| {
                ActionFailure::new(IncidentCode::ActionFailed, "sleep requires params.sleepMs")
            })?;
        let clamped = (requested as i64).clamp(0, self.policy.max_sleep_ms.max(0));
        self.db
            .kv_set(keys::NEXT_SLEEP_MS, &clamped.to_string())
            .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;
        Ok(ActionReport::new("sleep", json!({"sleepMs": clamped})))
    }
}

/// Map a self-mod engine refusal onto its incident code. Policy refusals
/// are `ACTION_BLOCKED`; security gates are `SECURITY_POLICY_VIOLATION`;
/// plumbing failures stay `ACTION_FAILED`.
fn classify_self_mod_error(error: SelfModError) -> ActionFailure {
    let code = match &error {
        SelfModError::Disabled => IncidentCode::ActionBlocked,
        SelfModError::EmergencyStop
        | SelfModError::SurvivalDead
        | SelfModError::RateLimited
        | SelfModError::ProtectedPath(_)
        | SelfModError::OutOfScope(_) => IncidentCode::SecurityPolicyViolation,
        SelfModError::MissingBackup(_)
        | SelfModError::NoRollbackPoint(_)
        | SelfModError::Io(_)
        | SelfModError::Store(_) => IncidentCode::ActionFailed,
    };
    ActionFailure::new(code, error.to_string())
}

fn require_string(params: &Value, key: &str) -> Result<String, ActionFailure> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ActionFailure::new(
                IncidentCode::ActionFailed,
                format!("missing required string param '{}'", key),
            )
        })
}

fn optional_string(params: &Value, key: &str) -> Option<String> {
    // Accept both camelCase and snake_case spellings from the brain.
    let snake: String = key
        .chars()
        .flat_map(|c| {
            if c.is_ascii_uppercase() {
                vec!['_', c.to_ascii_lowercase()]
            } else {
                vec![c]
            }
        })
        .collect();
    params
        .get(key)
        .or_else(|| params.get(&snake))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainCapabilities, ChainProfile};
    use crate::providers::LocalComputeProvider;
    use crate::transport::NullTransport;
    use crate::wallet::{WalletSession, KEYSTORE_FILE};

    const PASSPHRASE: &str = "Correct-Horse-42";

    struct Harness {
        executor: ActionExecutor,
        db: Arc<Database>,
        wallet: Arc<Mutex<WalletSession>>,
        _home: tempfile::TempDir,
    }

    fn harness(policy: ExecutorPolicy) -> Harness {
        let home = tempfile::tempdir().unwrap();
        WalletSession::create_keystore(home.path(), PASSPHRASE).unwrap();
        let db = Arc::new(Database::new(":memory:").unwrap());
        let wallet = Arc::new(Mutex::new(WalletSession::new(
            home.path().join(KEYSTORE_FILE),
        )));
        let chains = ChainRegistry::new(
            "eip155:8453".to_string(),
            vec![
                ChainProfile {
                    caip2: "eip155:8453".to_string(),
                    chain_id: 8453,
                    name: "base".to_string(),
                    supports: ChainCapabilities::all(),
                },
                ChainProfile {
                    caip2: "eip155:1".to_string(),
                    chain_id: 1,
                    name: "mainnet".to_string(),
                    supports: ChainCapabilities {
                        payments: true,
                        ..ChainCapabilities::default()
                    },
                },
            ],
        );
        let self_mod = Arc::new(crate::self_mod::SelfModEngine::new(
            db.clone(),
            home.path(),
            &home.path().join("data").join("rollbacks"),
            &["constitution.md".to_string()],
            policy.allow_self_modify,
        ));
        let tools = Arc::new(ToolRegistry::new(&[], false));
        let executor = ActionExecutor::new(
            db.clone(),
            chains,
            Arc::new(NullTransport),
            Arc::new(LocalComputeProvider::new(&home.path().join("data"))),
            tools,
            self_mod,
            wallet.clone(),
            policy,
            "aethernet".to_string(),
        );
        Harness {
            executor,
            db,
            wallet,
            _home: home,
        }
    }

    fn action(kind: &str, params: Value) -> Action {
        Action {
            kind: kind.to_string(),
            reason: None,
            params,
        }
    }

    fn unlock(harness: &Harness) {
        harness
            .wallet
            .lock()
            .unwrap()
            .unlock(&harness.db, PASSPHRASE, 300)
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_kind_blocked() {
        let h = harness(ExecutorPolicy::default());
        let err = h
            .executor
            .execute(&action("exec", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code, IncidentCode::ActionBlocked);
    }

    #[tokio::test]
    async fn test_send_message_requires_unlocked_wallet() {
        let h = harness(ExecutorPolicy::default());
        let err = h
            .executor
            .execute(&action(
                "send_message",
                json!({"to": "0xpeer", "content": "hi"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code, IncidentCode::WalletLocked);
        assert!(err.message.contains("Wallet is locked"));
    }

    #[tokio::test]
    async fn test_send_message_happy_path() {
        let h = harness(ExecutorPolicy::default());
        unlock(&h);
        let report = h
            .executor
            .execute(&action(
                "send_message",
                json!({"to": "0xpeer", "content": "hi", "threadId": "t1"}),
            ))
            .await
            .unwrap();
        assert_eq!(report.label, "send_message");
        assert_eq!(h.db.list_thread_messages("t1", 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_chain_blocked() {
        let h = harness(ExecutorPolicy::default());
        unlock(&h);
        let err = h
            .executor
            .execute(&action(
                "send_message",
                json!({"to": "0xpeer", "content": "hi", "chain": "eip155:999"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code, IncidentCode::ChainCapabilityBlocked);
        assert!(err.message.contains("unsupported chain"));
    }

    #[tokio::test]
    async fn test_chain_without_messaging_blocked() {
        let h = harness(ExecutorPolicy::default());
        unlock(&h);
        let err = h
            .executor
            .execute(&action(
                "send_message",
                json!({"to": "0xpeer", "content": "hi", "chain": "eip155:1"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code, IncidentCode::ChainCapabilityBlocked);
        assert!(err.message.contains("does not support messaging"));
    }

    #[tokio::test]
    async fn test_emergency_stop_refuses_mutating() {
        let h = harness(ExecutorPolicy::default());
        unlock(&h);
        h.db.set_emergency_stop(true, Some("halt")).unwrap();
        let err = h
            .executor
            .execute(&action(
                "send_message",
                json!({"to": "0xpeer", "content": "hi"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code, IncidentCode::ActionBlocked);

        // Non-mutating actions still run.
        let report = h
            .executor
            .execute(&action("record_fact", json!({"key": "k", "value": "v"})))
            .await
            .unwrap();
        assert_eq!(report.label, "record_fact");
    }

    #[tokio::test]
    async fn test_dead_tier_refuses_mutating() {
        let h = harness(ExecutorPolicy::default());
        unlock(&h);
        h.db.insert_survival_snapshot("dead", 0).unwrap();
        let err = h
            .executor
            .execute(&action(
                "send_message",
                json!({"to": "0xpeer", "content": "hi"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code, IncidentCode::ActionBlocked);
    }

    #[tokio::test]
    async fn test_self_modify_policy_gate() {
        let h = harness(ExecutorPolicy::default());
        let err = h
            .executor
            .execute(&action(
                "self_modify",
                json!({"targetPath": "notes.md", "content": "x"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code, IncidentCode::ActionBlocked);
        assert!(err.message.contains("disabled by autonomy policy"));
    }

    #[tokio::test]
    async fn test_self_modify_protected_path_is_security_violation() {
        let h = harness(ExecutorPolicy {
            allow_self_modify: true,
            ..ExecutorPolicy::default()
        });
        let protected = h._home.path().join("constitution.md");
        let err = h
            .executor
            .execute(&action(
                "self_modify",
                json!({"targetPath": protected.to_str().unwrap(), "content": "x"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code, IncidentCode::SecurityPolicyViolation);
    }

    #[tokio::test]
    async fn test_record_fact_and_episode() {
        let h = harness(ExecutorPolicy::default());
        h.executor
            .execute(&action(
                "record_fact",
                json!({"key": "peer.alice", "value": "trusted", "confidence": 0.8}),
            ))
            .await
            .unwrap();
        assert_eq!(
            h.db.get_memory_fact("peer.alice").unwrap().unwrap().value,
            "trusted"
        );

        h.executor
            .execute(&action("record_episode", json!({"summary": "met alice"})))
            .await
            .unwrap();
        assert_eq!(h.db.count_memory_episodes().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sleep_clamps_and_persists() {
        let h = harness(ExecutorPolicy::default());
        let report = h
            .executor
            .execute(&action("sleep", json!({"sleepMs": 99_999_999})))
            .await
            .unwrap();
        assert_eq!(report.detail["sleepMs"], 3_600_000);
        assert_eq!(
            h.db.kv_get("autonomy_next_sleep_ms").unwrap().as_deref(),
            Some("3600000")
        );
    }

    #[tokio::test]
    async fn test_invoke_tool_internal() {
        let h = harness(ExecutorPolicy::default());
        let report = h
            .executor
            .execute(&action("invoke_tool", json!({"toolName": "queue_depth"})))
            .await
            .unwrap();
        assert_eq!(report.detail["output"]["queueDepth"], 0);
    }

    #[tokio::test]
    async fn test_invoke_tool_failure_classified() {
        let h = harness(ExecutorPolicy::default());
        let err = h
            .executor
            .execute(&action("invoke_tool", json!({"toolName": "no_such_tool"})))
            .await
            .unwrap_err();
        assert_eq!(err.code, IncidentCode::ActionFailed);
    }

    #[tokio::test]
    async fn test_replicate_requires_wallet() {
        let h = harness(ExecutorPolicy::default());
        let err = h
            .executor
            .execute(&action("replicate", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code, IncidentCode::WalletLocked);
    }

    #[tokio::test]
    async fn test_replicate_happy_path() {
        let h = harness(ExecutorPolicy::default());
        unlock(&h);
        let report = h
            .executor
            .execute(&action("replicate", json!({"name": "junior"})))
            .await
            .unwrap();
        assert_eq!(report.label, "replicate");
        let children = h.db.list_children(5).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "junior");
    }
}
