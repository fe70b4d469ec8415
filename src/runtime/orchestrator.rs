//! One tick of the think→decide→act loop.
//!
//! Ordering within a tick is fixed: inbox sync → inbox claim → brain →
//! validate → execute in plan order → memory writes → turn row → telemetry
//! row → alert evaluation. Per-action failures are recoverable; emergency
//! stop, a dead survival tier, and a brain failure streak at threshold are
//! fatal tick errors surfaced to the daemon.

use chrono::Utc;
use serde_json::json;
use std::time::Instant;
use uuid::Uuid;

use crate::alerting::AlertContext;
use crate::brain::types::{Action, MemorySnapshot, TurnInput, TurnOutput};
use crate::brain::types::{AgentIdentity, ToolSourceView, TurnSummaryView};
use crate::db::tables::kv::keys;
use crate::db::{IncidentCode, Severity, TurnTelemetryRow};
use crate::runtime::{AgentRuntime, RuntimeError};
use crate::survival::{self, SurvivalTier};
use crate::validator::{validate_turn, ValidatorLimits, ValidatorPolicy};

/// Inbound messages fetched from the transport per tick.
const TRANSPORT_POLL_LIMIT: usize = 50;
/// Inbox messages claimed per tick.
const INBOX_CLAIM_LIMIT: usize = 25;
/// Recent turns surfaced to the brain.
const RECENT_TURN_LIMIT: usize = 20;
/// Memory rows surfaced to the brain.
const MEMORY_LIMIT: usize = 150;

/// What one tick did, for the daemon and for tests.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub turn_id: String,
    pub malformed: bool,
    pub actions_total: i64,
    pub action_failures: i64,
    pub next_sleep_ms: i64,
}

impl AgentRuntime {
    /// Run one autonomy tick.
    pub async fn tick(&self) -> Result<TickReport, RuntimeError> {
        let tick_started = Utc::now();

        // Gate 1: emergency stop refuses the whole tick.
        if self.db().get_emergency_state()?.enabled {
            return Err(RuntimeError::EmergencyStop);
        }

        // Gate 2: survival tier. The snapshot is written before the gate so
        // a dead tier is observable in the store.
        let estimated_usd = self.config().survival.resolve_estimated_usd();
        let tier = survival::evaluate_tier(estimated_usd, &self.config().survival);
        self.db().insert_survival_snapshot(tier.as_str(), estimated_usd)?;
        self.db().kv_set(keys::AGENT_STATE, "running")?;
        if tier.is_dead() {
            // Route the dead-tier alert before raising; the daemon stops us.
            let streak = self.brain_failure_streak()?;
            let context = AlertContext {
                survival_tier: tier,
                queue_depth: self.db().count_unprocessed_messages()?,
                brain_failure_streak: streak,
            };
            if let Err(e) = self.alerts().evaluate(&context).await {
                log::error!("[TICK] alert evaluation failed: {}", e);
            }
            return Err(RuntimeError::SurvivalDead);
        }

        if self.config().autonomy.dry_run {
            return self.dry_run_tick(tier, estimated_usd);
        }

        // Step 4: transport sync. Failures degrade to an incident.
        self.sync_inbound().await?;

        // Step 5: snapshot depth, then claim the inbox for this turn.
        let queue_depth = self.db().count_unprocessed_messages()?;
        let inbox = self.db().poll_messages(INBOX_CLAIM_LIMIT)?;
        for message in &inbox {
            self.db().mark_message_processed(&message.id)?;
        }

        // Step 6: assemble the turn input.
        let input = self.assemble_turn_input(tier, estimated_usd, inbox)?;

        // Step 7: ask the brain, timed.
        let brain_started = Instant::now();
        let (output, brain_errored) = match self.brain().generate_turn(&input).await {
            Ok(output) => (output, false),
            Err(e) => {
                self.db().insert_incident(
                    IncidentCode::BrainRequestFailed,
                    Severity::Error,
                    "brain",
                    &e.to_string(),
                    &serde_json::Value::Null,
                )?;
                (TurnOutput::malformed("request_failed"), true)
            }
        };
        let brain_duration_ms = brain_started.elapsed().as_millis() as i64;

        // Step 8: validate.
        let limits = ValidatorLimits {
            max_actions: self.config().autonomy.max_actions_per_turn,
            max_sleep_ms: self.config().autonomy.max_sleep_ms as i64,
        };
        let policy = ValidatorPolicy {
            strict_allowlist: self.config().autonomy.strict_action_allowlist,
            ..ValidatorPolicy::default()
        };
        let validated = validate_turn(&output, &limits, &policy);
        if validated.malformed {
            self.db().insert_incident(
                IncidentCode::BrainOutputMalformed,
                Severity::Error,
                "brain",
                &format!("brain output malformed: {}", validated.errors.join(", ")),
                &json!({"errors": validated.errors}),
            )?;
        }

        // Step 9: failure streak bookkeeping.
        let brain_failed = validated.malformed || brain_errored;
        let streak = if brain_failed {
            self.db().kv_increment(keys::BRAIN_FAILURE_STREAK, 1)?
        } else {
            self.db().kv_set(keys::BRAIN_FAILURE_STREAK, "0")?;
            0
        };
        let max_failures = self.config().autonomy.max_brain_failures_before_stop;
        if brain_failed && streak >= max_failures as i64 {
            self.db().insert_incident(
                IncidentCode::BrainRequestFailed,
                Severity::Critical,
                "brain",
                &format!(
                    "brain failure streak {}/{} reached, stopping autonomy",
                    streak, max_failures
                ),
                &serde_json::Value::Null,
            )?;
            return Err(RuntimeError::BrainFailureStreak {
                streak,
                max: max_failures,
            });
        }

        // Step 10: the executable plan. A malformed turn degrades to noop.
        let forced_noop = vec![Action::noop("forced")];
        let plan: &[Action] = if validated.malformed {
            &forced_noop
        } else {
            &validated.output.next_actions
        };

        // Step 11: execute in plan order.
        let mut action_log: Vec<String> = Vec::new();
        let mut executed_ok = 0i64;
        let mut action_failures = 0i64;
        let mut sleep_action_ms: Option<i64> = None;
        for action in plan {
            if !self.is_running() {
                log::info!("[TICK] cancellation observed, skipping remaining actions");
                break;
            }
            match self.executor().execute(action).await {
                Ok(report) => {
                    executed_ok += 1;
                    if let Some(ms) = report.detail.get("sleepMs").and_then(|v| v.as_i64()) {
                        sleep_action_ms = Some(ms);
                    }
                    for (code, severity, message) in &report.warnings {
                        self.db()
                            .insert_incident(*code, *severity, "action", message, &report.detail)?;
                    }
                    log::info!("[TICK] action {} ok", report.label);
                }
                Err(failure) => {
                    action_failures += 1;
                    self.db().insert_incident(
                        failure.code,
                        Severity::Warning,
                        "action",
                        &failure.message,
                        &json!({"action": action.kind}),
                    )?;
                    log::warn!(
                        "[TICK] action {} failed [{}]: {}",
                        action.kind,
                        failure.code.as_str(),
                        failure.message
                    );
                }
            }
        }
        for action in &validated.output.next_actions {
            action_log.push(action.log_label());
        }

        // Step 12: memory writes from a well-formed plan.
        if !validated.malformed {
            if let Some(writes) = &validated.output.memory_writes {
                for fact in &writes.facts {
                    if fact.key.trim().is_empty() {
                        continue;
                    }
                    self.db().upsert_memory_fact(
                        &fact.key,
                        &fact.value,
                        fact.confidence.unwrap_or(0.5),
                        fact.source.as_deref().unwrap_or("brain"),
                    )?;
                }
                for episode in &writes.episodes {
                    if episode.summary.trim().is_empty() {
                        continue;
                    }
                    self.db().insert_memory_episode(
                        &episode.summary,
                        episode.outcome.as_deref(),
                        episode.action_type.as_deref(),
                        &serde_json::Value::Null,
                    )?;
                }
            }
        }

        // Step 13: the turn's own episode.
        let episode_kind = if executed_ok > 0 {
            "autonomy_turn"
        } else {
            "autonomy_idle"
        };
        self.db().insert_memory_episode(
            &validated.output.summary,
            None,
            Some(episode_kind),
            &json!({"queueDepth": queue_depth}),
        )?;

        // Step 14: next sleep hint. An explicit plan-level sleepMs wins,
        // then a sleep action's value, then the configured interval.
        let next_sleep_ms = validated
            .output
            .sleep_ms
            .or(sleep_action_ms)
            .unwrap_or(self.config().autonomy.default_interval_ms as i64);
        self.db()
            .kv_set(keys::NEXT_SLEEP_MS, &next_sleep_ms.to_string())?;

        // Step 15: turn + telemetry rows.
        let turn_id = Uuid::new_v4().to_string();
        let action_count = if validated.malformed { 0 } else { executed_ok };
        let metadata = json!({
            "summary": validated.output.summary,
            "actions": action_log,
            "actionCount": action_count,
            "actionFailures": action_failures,
            "queueDepth": queue_depth,
            "brainDurationMs": brain_duration_ms,
            "malformed": validated.malformed,
            "validationErrors": validated.errors,
        });
        let input_snapshot = json!({
            "operatorPrompt": input.operator_prompt,
            "inboxCount": input.inbox_messages.len(),
            "survivalTier": input.survival_tier,
            "estimatedUsd": input.estimated_usd,
        });
        let output_snapshot = serde_json::to_string(&validated.output).ok();
        self.db().insert_turn(
            &turn_id,
            "completed",
            Some(&input_snapshot.to_string()),
            output_snapshot.as_deref(),
            &metadata,
        )?;

        let spend_proxy_usd = self.db().sum_outbound_payments_since(tick_started)?;
        self.db().insert_turn_telemetry(&TurnTelemetryRow {
            turn_id: turn_id.clone(),
            survival_tier: tier.as_str().to_string(),
            estimated_usd,
            queue_depth,
            spend_proxy_usd,
            actions_total: plan.len() as i64,
            action_failures,
            brain_duration_ms,
            brain_failures: if brain_failed { 1 } else { 0 },
        })?;

        // Step 16: alert evaluation with the post-tick picture.
        let context = AlertContext {
            survival_tier: tier,
            queue_depth,
            brain_failure_streak: streak,
        };
        if let Err(e) = self.alerts().evaluate(&context).await {
            log::error!("[TICK] alert evaluation failed: {}", e);
        }

        // Step 17: back to sleep.
        self.db().kv_set(keys::AGENT_STATE, "sleeping")?;

        Ok(TickReport {
            turn_id,
            malformed: validated.malformed,
            actions_total: plan.len() as i64,
            action_failures,
            next_sleep_ms,
        })
    }

    fn dry_run_tick(
        &self,
        tier: SurvivalTier,
        estimated_usd: i64,
    ) -> Result<TickReport, RuntimeError> {
        let turn_id = Uuid::new_v4().to_string();
        self.db().insert_turn(
            &turn_id,
            "dry_run",
            None,
            None,
            &json!({"dryRun": true, "survivalTier": tier.as_str()}),
        )?;
        self.db().insert_turn_telemetry(&TurnTelemetryRow {
            turn_id: turn_id.clone(),
            survival_tier: tier.as_str().to_string(),
            estimated_usd,
            queue_depth: self.db().count_unprocessed_messages()?,
            spend_proxy_usd: 0.0,
            actions_total: 0,
            action_failures: 0,
            brain_duration_ms: 0,
            brain_failures: 0,
        })?;
        self.db().kv_set(keys::AGENT_STATE, "sleeping")?;
        Ok(TickReport {
            turn_id,
            malformed: false,
            actions_total: 0,
            action_failures: 0,
            next_sleep_ms: self.config().autonomy.default_interval_ms as i64,
        })
    }

    /// Pull fresh inbound messages from the transport into the store.
    async fn sync_inbound(&self) -> Result<(), RuntimeError> {
        let since = self.db().kv_get(keys::LAST_POLL_AT)?;
        match self
            .transport()
            .poll(since.as_deref(), TRANSPORT_POLL_LIMIT)
            .await
        {
            Ok(messages) => {
                for message in messages {
                    self.db().upsert_inbound_message(
                        &message.id,
                        &message.from,
                        &message.to,
                        message.thread_id.as_deref(),
                        &message.content,
                        &message.received_at,
                    )?;
                }
            }
            Err(e) => {
                self.db().insert_incident(
                    IncidentCode::ProviderFailure,
                    Severity::Warning,
                    "transport",
                    &format!("inbound poll failed: {}", e),
                    &serde_json::Value::Null,
                )?;
            }
        }
        self.db()
            .kv_set(keys::LAST_POLL_AT, &Utc::now().to_rfc3339())?;
        Ok(())
    }

    fn assemble_turn_input(
        &self,
        tier: SurvivalTier,
        estimated_usd: i64,
        inbox: Vec<crate::db::MessageRow>,
    ) -> Result<TurnInput, RuntimeError> {
        let recent_turns = self
            .db()
            .list_recent_turns(RECENT_TURN_LIMIT)?
            .into_iter()
            .map(|turn| TurnSummaryView {
                id: turn.id,
                timestamp: turn.timestamp,
                summary: turn
                    .metadata
                    .get("summary")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&turn.state)
                    .to_string(),
            })
            .collect();

        let memory = MemorySnapshot {
            facts: self.db().list_memory_facts(MEMORY_LIMIT)?,
            episodes: self.db().list_memory_episodes(MEMORY_LIMIT)?,
        };

        let enabled_ids: Vec<String> = self
            .db()
            .kv_get_json(keys::ENABLED_SKILL_IDS)?
            .unwrap_or_else(|| self.config().enabled_skill_ids.clone());
        let skills = self.skills().list_enabled(&enabled_ids);

        let tool_sources = self
            .tools()
            .sources()
            .into_iter()
            .map(|source| ToolSourceView {
                id: source.id.clone(),
                name: source.name.clone(),
                source_type: source.source_type.clone(),
                enabled: source.enabled,
            })
            .collect();

        let address = self
            .wallet()
            .lock()
            .ok()
            .and_then(|session| session.address())
            .unwrap_or_else(|| "locked".to_string());

        Ok(TurnInput {
            agent: AgentIdentity {
                address,
                name: self.config().agent_name.clone(),
            },
            survival_tier: tier.as_str().to_string(),
            estimated_usd,
            operator_prompt: self.config().operator_prompt.clone(),
            inbox_messages: inbox,
            recent_turns,
            memory,
            skills,
            tool_sources,
            available_actions: crate::brain::ALLOWED_ACTION_TYPES
                .iter()
                .map(|a| a.as_str().to_string())
                .collect(),
        })
    }

    pub(crate) fn brain_failure_streak(&self) -> Result<i64, RuntimeError> {
        Ok(self
            .db()
            .kv_get(keys::BRAIN_FAILURE_STREAK)?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0))
    }
}
