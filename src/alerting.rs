//! Alert evaluation and routing.
//!
//! After each tick the engine checks the alert candidates (dead tier,
//! critical-incident burst, brain failure streak, queue depth), suppresses
//! repeats within a 60 second window, persists survivors as alerts mirrored
//! by an `ALERT_TRIGGERED` incident, and routes them.

use chrono::{Duration, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use crate::config::{AlertRoute, AlertingConfig};
use crate::db::tables::kv::keys;
use crate::db::{Database, IncidentCode, Severity};
use crate::survival::SurvivalTier;

/// Identical (severity, message) pairs within this window fire once.
const DEDUP_WINDOW_MS: i64 = 60_000;

const WEBHOOK_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// Per-tick inputs to alert evaluation.
#[derive(Debug, Clone)]
pub struct AlertContext {
    pub survival_tier: SurvivalTier,
    pub queue_depth: i64,
    pub brain_failure_streak: i64,
}

pub struct AlertEngine {
    db: Arc<Database>,
    config: AlertingConfig,
    http: reqwest::Client,
}

impl AlertEngine {
    pub fn new(db: Arc<Database>, config: AlertingConfig) -> Self {
        AlertEngine {
            db,
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Evaluate thresholds and route any non-suppressed alerts. Returns the
    /// ids of alert rows written.
    pub async fn evaluate(&self, context: &AlertContext) -> Result<Vec<String>, rusqlite::Error> {
        if !self.config.enabled {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(Severity, String)> = Vec::new();

        if context.survival_tier.is_dead() {
            candidates.push((
                Severity::Critical,
                "survival tier is dead: agent liquidity exhausted".to_string(),
            ));
        }

        let window_start = Utc::now() - Duration::minutes(self.config.evaluation_window_minutes);
        let critical_count = self
            .db
            .count_incidents_by_severity_since(Severity::Critical, window_start)?;
        if critical_count >= self.config.critical_incident_threshold as i64 {
            // Message stays stable while the condition persists so de-dup
            // can suppress repeats; the live count goes in metadata.
            candidates.push((
                Severity::Critical,
                format!(
                    "critical incident threshold exceeded in the last {} minutes",
                    self.config.evaluation_window_minutes
                ),
            ));
        }

        if context.brain_failure_streak >= self.config.brain_failure_threshold as i64 {
            candidates.push((
                Severity::Critical,
                format!(
                    "brain failure streak reached {}",
                    context.brain_failure_streak
                ),
            ));
        }

        if context.queue_depth >= self.config.queue_depth_threshold as i64 {
            candidates.push((
                Severity::Warning,
                format!("message queue depth is {}", context.queue_depth),
            ));
        }

        let mut written = Vec::new();
        for (severity, message) in candidates {
            if self.suppressed(severity, &message)? {
                log::debug!("[ALERTS] suppressed duplicate: {}", message);
                continue;
            }
            let metadata = json!({
                "survivalTier": context.survival_tier.as_str(),
                "queueDepth": context.queue_depth,
                "brainFailureStreak": context.brain_failure_streak,
                "criticalIncidentsInWindow": critical_count,
            });
            let alert_id = self.db.insert_alert(
                IncidentCode::AlertTriggered.as_str(),
                severity,
                self.config.route.as_str(),
                &message,
                &metadata,
            )?;
            self.db.insert_incident(
                IncidentCode::AlertTriggered,
                severity,
                "alert",
                &message,
                &metadata,
            )?;
            self.route(severity, &message).await?;
            written.push(alert_id);
        }
        Ok(written)
    }

    /// True when the same (severity, message) fired within the window. A
    /// surviving check stamps the marker.
    fn suppressed(&self, severity: Severity, message: &str) -> Result<bool, rusqlite::Error> {
        let mut hasher = Sha256::new();
        hasher.update(message.as_bytes());
        let digest = hex::encode(hasher.finalize());
        let key = format!(
            "{}{}:{}",
            keys::ALERT_DEDUP_PREFIX,
            severity.as_str(),
            &digest[..16]
        );

        let now = Utc::now().timestamp_millis();
        if let Some(last) = self.db.kv_get(&key)? {
            if let Ok(last_ms) = last.parse::<i64>() {
                if now - last_ms < DEDUP_WINDOW_MS {
                    return Ok(true);
                }
            }
        }
        self.db.kv_set(&key, &now.to_string())?;
        Ok(false)
    }

    async fn route(&self, severity: Severity, message: &str) -> Result<(), rusqlite::Error> {
        match self.config.route {
            AlertRoute::Db => {}
            AlertRoute::Stdout => {
                if severity >= Severity::Critical {
                    eprintln!("[ALERT:{}] {}", severity.as_str(), message);
                } else {
                    println!("[ALERT:{}] {}", severity.as_str(), message);
                }
            }
            AlertRoute::Webhook => {
                let Some(url) = self.config.webhook_url.as_deref() else {
                    return Ok(());
                };
                let envelope = json!({
                    "source": "aethernet-core",
                    "severity": severity.as_str(),
                    "message": message,
                    "timestamp": Utc::now().to_rfc3339(),
                });
                let result = self
                    .http
                    .post(url)
                    .timeout(WEBHOOK_TIMEOUT)
                    .json(&envelope)
                    .send()
                    .await;
                match result {
                    Ok(response) if response.status().is_success() => {}
                    Ok(response) => {
                        self.db.insert_incident(
                            IncidentCode::ProviderFailure,
                            Severity::Warning,
                            "alerting",
                            &format!(
                                "alert webhook returned status {}",
                                response.status().as_u16()
                            ),
                            &serde_json::Value::Null,
                        )?;
                    }
                    Err(e) => {
                        self.db.insert_incident(
                            IncidentCode::ProviderFailure,
                            Severity::Warning,
                            "alerting",
                            &format!("alert webhook failed: {}", e),
                            &serde_json::Value::Null,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}
