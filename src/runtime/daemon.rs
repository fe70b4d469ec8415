//! The daemon scheduler: serial ticks with adaptive sleep and a
//! consecutive-error stop.
//!
//! A dead survival tier stops the loop with agent state `dead`; a brain
//! failure streak at threshold or too many consecutive failed ticks stop
//! it with state `stopped`. Cancellation is observed between ticks and
//! between actions.

use serde_json::json;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::db::tables::kv::keys;
use crate::db::{IncidentCode, Severity};
use crate::runtime::{AgentRuntime, RuntimeError};

/// How the daemon loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonExit {
    /// Host cancellation.
    Cancelled,
    /// Stopped after repeated failures; agent state is `stopped`.
    Stopped,
    /// Survival tier went dead; agent state is `dead`.
    Dead,
}

impl AgentRuntime {
    /// Run ticks until cancellation or a stop condition.
    pub async fn run_daemon(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<DaemonExit, RuntimeError> {
        let interval_ms = if self.config().autonomy.default_interval_ms > 0 {
            self.config().autonomy.default_interval_ms
        } else {
            self.config().heartbeat_interval_ms
        };
        let max_consecutive = self.config().autonomy.max_consecutive_errors.max(1);
        let mut consecutive_errors: u32 = 0;

        log::info!(
            "[DAEMON] started (interval {}ms, max consecutive errors {})",
            interval_ms,
            max_consecutive
        );

        loop {
            if *shutdown.borrow() {
                self.request_stop();
                log::info!("[DAEMON] cancellation observed, exiting");
                return Ok(DaemonExit::Cancelled);
            }

            self.db()
                .kv_set(keys::LAST_HEARTBEAT_AT, &chrono::Utc::now().to_rfc3339())?;

            match self.tick().await {
                Ok(report) => {
                    consecutive_errors = 0;
                    log::info!(
                        "[DAEMON] tick {} ok ({} actions, {} failures, sleep {}ms)",
                        report.turn_id,
                        report.actions_total,
                        report.action_failures,
                        report.next_sleep_ms
                    );
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let dead = matches!(e, RuntimeError::SurvivalDead);
                    let streak_stop = matches!(e, RuntimeError::BrainFailureStreak { .. });
                    let severity = if dead {
                        Severity::Critical
                    } else {
                        Severity::Warning
                    };
                    self.db().insert_incident(
                        IncidentCode::DaemonFailure,
                        severity,
                        "daemon",
                        &format!("tick failed ({} consecutive): {}", consecutive_errors, e),
                        &json!({"consecutiveErrors": consecutive_errors}),
                    )?;

                    if dead {
                        self.db().kv_set(keys::AGENT_STATE, "dead")?;
                        log::error!("[DAEMON] survival tier is dead, stopping");
                        return Ok(DaemonExit::Dead);
                    }
                    if streak_stop {
                        self.db().kv_set(keys::AGENT_STATE, "stopped")?;
                        log::error!("[DAEMON] stopping: {}", e);
                        return Ok(DaemonExit::Stopped);
                    }
                    if consecutive_errors >= max_consecutive {
                        self.db().kv_set(keys::AGENT_STATE, "stopped")?;
                        log::error!(
                            "[DAEMON] {} consecutive failures, stopping",
                            consecutive_errors
                        );
                        return Ok(DaemonExit::Stopped);
                    }
                }
            }

            let sleep_ms = self.next_sleep_ms(interval_ms);
            tokio::select! {
                _ = sleep(Duration::from_millis(sleep_ms)) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.request_stop();
                        log::info!("[DAEMON] cancellation observed during sleep, exiting");
                        return Ok(DaemonExit::Cancelled);
                    }
                }
            }
        }
    }

    /// Adaptive inter-tick sleep: the KV hint when valid, else the
    /// configured interval. Always clamped to the autonomy ceiling.
    fn next_sleep_ms(&self, interval_ms: u64) -> u64 {
        let max_sleep = self.config().autonomy.max_sleep_ms;
        let hint = self
            .db()
            .kv_get(keys::NEXT_SLEEP_MS)
            .ok()
            .flatten()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|ms| *ms >= 0)
            .map(|ms| ms as u64);
        hint.unwrap_or(interval_ms).min(max_sleep)
    }
}
