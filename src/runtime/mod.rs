//! The agent runtime: owns every subsystem and drives the autonomy loop.
//!
//! Lifecycle: construct with config and providers, call `initialize()`
//! once, then `run_daemon()` until cancellation, then `close()`. There are
//! no process-wide globals; host surfaces share the one runtime instance.

mod daemon;
mod orchestrator;

pub use daemon::DaemonExit;
pub use orchestrator::TickReport;

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::actions::{ActionExecutor, ExecutorPolicy};
use crate::alerting::AlertEngine;
use crate::brain::types::ActionType;
use crate::brain::BrainProvider;
use crate::chain::ChainRegistry;
use crate::config::{self, AgentConfig};
use crate::constitution;
use crate::db::tables::kv::keys;
use crate::db::{Database, IncidentCode, Severity, StoreError};
use crate::providers::ComputeProvider;
use crate::self_mod::SelfModEngine;
use crate::skills::SkillRegistry;
use crate::tools::ToolRegistry;
use crate::transport::MessagingTransport;
use crate::wallet::{WalletError, WalletSession};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("tick refused: emergency stop is enabled")]
    EmergencyStop,
    #[error("survival tier is dead")]
    SurvivalDead,
    #[error("brain failure streak {streak}/{max} reached")]
    BrainFailureStreak { streak: i64, max: u32 },
    #[error("configuration invalid: {0}")]
    Config(String),
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("constitution verification failed: {0}")]
    Constitution(#[from] constitution::ConstitutionError),
    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Point-in-time view of the agent, for host surfaces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub name: String,
    pub address: Option<String>,
    pub state: String,
    pub survival_tier: Option<String>,
    pub estimated_usd: Option<i64>,
    pub queue_depth: i64,
    pub turns: i64,
    pub started_at: Option<String>,
    pub emergency_stop: bool,
}

pub struct AgentRuntime {
    config: AgentConfig,
    db: Arc<Database>,
    brain: Arc<dyn BrainProvider>,
    transport: Arc<dyn MessagingTransport>,
    tools: Arc<ToolRegistry>,
    skills: SkillRegistry,
    wallet: Arc<Mutex<WalletSession>>,
    self_mod: Arc<SelfModEngine>,
    executor: ActionExecutor,
    alerts: AlertEngine,
    running: AtomicBool,
}

impl AgentRuntime {
    /// Build the runtime. Opens the state store and wires every subsystem;
    /// fatal config diagnostics are recorded as `CONFIG_INVALID` incidents
    /// before the error returns.
    pub fn new(
        config: AgentConfig,
        brain: Arc<dyn BrainProvider>,
        transport: Arc<dyn MessagingTransport>,
        compute: Arc<dyn ComputeProvider>,
    ) -> Result<Self, RuntimeError> {
        let db = Arc::new(Database::new(
            config.db_path.to_str().unwrap_or(":memory:"),
        )?);

        let diagnostics = config.validate();
        if config::has_errors(&diagnostics) {
            for diag in &diagnostics {
                db.insert_incident(
                    IncidentCode::ConfigInvalid,
                    Severity::Error,
                    "config",
                    &format!("{} [{}]: {}", diag.field, diag.code, diag.message),
                    &serde_json::Value::Null,
                )?;
            }
            let summary = diagnostics
                .iter()
                .map(|d| format!("{}: {}", d.field, d.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RuntimeError::Config(summary));
        }

        let chains = ChainRegistry::new(config.chain_default.clone(), config.chain_profiles.clone());
        let wallet = Arc::new(Mutex::new(WalletSession::new(config.keystore_path())));
        let self_mod = Arc::new(SelfModEngine::new(
            db.clone(),
            &config.home_dir,
            &config.rollbacks_dir(),
            &config.constitution_policy.protected_paths,
            config.autonomy.allow_self_modify_action,
        ));
        let tools = Arc::new(ToolRegistry::new(
            &config.tool_sources,
            config.tooling.allow_external_sources,
        ));
        let skills = SkillRegistry::new(config.skills_dir());

        let allowlist: HashSet<ActionType> =
            crate::brain::ALLOWED_ACTION_TYPES.iter().copied().collect();
        let policy = ExecutorPolicy {
            strict_allowlist: config.autonomy.strict_action_allowlist,
            allowlist,
            allow_self_modify: config.autonomy.allow_self_modify_action,
            max_sleep_ms: config.autonomy.max_sleep_ms as i64,
            default_funding_usdc: "0".to_string(),
        };
        let executor = ActionExecutor::new(
            db.clone(),
            chains,
            transport.clone(),
            compute,
            tools.clone(),
            self_mod.clone(),
            wallet.clone(),
            policy,
            config.agent_name.clone(),
        );
        let alerts = AlertEngine::new(db.clone(), config.alerting.clone());

        Ok(AgentRuntime {
            config,
            db,
            brain,
            transport,
            tools,
            skills,
            wallet,
            self_mod,
            executor,
            alerts,
            running: AtomicBool::new(true),
        })
    }

    /// One-time startup: home layout, governance verification, and KV
    /// bookkeeping.
    pub fn initialize(&self) -> Result<(), RuntimeError> {
        for dir in [
            self.config.home_dir.clone(),
            self.config.data_dir.clone(),
            self.config.rollbacks_dir(),
            self.config.skills_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700));
            }
        }

        if let Err(e) = constitution::verify_governance_files(&self.config, &self.db) {
            self.db.insert_incident(
                IncidentCode::SecurityPolicyViolation,
                Severity::Critical,
                "constitution",
                &e.to_string(),
                &serde_json::Value::Null,
            )?;
            return Err(e.into());
        }

        if self.db.kv_get(keys::STARTED_AT)?.is_none() {
            self.db
                .kv_set(keys::STARTED_AT, &chrono::Utc::now().to_rfc3339())?;
        }
        self.db
            .kv_set_json(keys::ENABLED_SKILL_IDS, &self.config.enabled_skill_ids)?;
        self.db.kv_set(keys::AGENT_STATE, "running")?;
        log::info!(
            "[RUNTIME] initialized (home {}, chain {})",
            self.config.home_dir.display(),
            self.config.chain_default
        );
        Ok(())
    }

    /// Signal the loop (and any in-flight tick) to stop between steps.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Release in-memory secrets. Safe to call more than once.
    pub fn close(&self) -> Result<(), RuntimeError> {
        if let Ok(mut session) = self.wallet.lock() {
            if session.is_unlocked() {
                session.lock(&self.db)?;
            }
        }
        log::info!("[RUNTIME] closed");
        Ok(())
    }

    // ---- host surface passthroughs ----

    pub fn unlock_wallet(&self, passphrase: &str) -> Result<String, RuntimeError> {
        let mut session = self
            .wallet
            .lock()
            .map_err(|_| RuntimeError::Config("wallet session poisoned".to_string()))?;
        Ok(session.unlock(&self.db, passphrase, self.config.wallet_session_ttl_sec)?)
    }

    pub fn lock_wallet(&self) -> Result<(), RuntimeError> {
        let mut session = self
            .wallet
            .lock()
            .map_err(|_| RuntimeError::Config("wallet session poisoned".to_string()))?;
        Ok(session.lock(&self.db)?)
    }

    pub fn rotate_wallet(&self, old: &str, new: &str) -> Result<(), RuntimeError> {
        let mut session = self
            .wallet
            .lock()
            .map_err(|_| RuntimeError::Config("wallet session poisoned".to_string()))?;
        Ok(session.rotate(&self.db, old, new)?)
    }

    pub fn set_emergency_stop(&self, enabled: bool, reason: Option<&str>) -> Result<(), RuntimeError> {
        self.db.set_emergency_stop(enabled, reason)?;
        log::warn!(
            "[RUNTIME] emergency stop {} ({})",
            if enabled { "ENABLED" } else { "cleared" },
            reason.unwrap_or("no reason given")
        );
        Ok(())
    }

    pub fn status(&self) -> Result<AgentStatus, RuntimeError> {
        let snapshot = self.db.latest_survival_snapshot()?;
        Ok(AgentStatus {
            name: self.config.agent_name.clone(),
            address: self.wallet.lock().ok().and_then(|s| s.address()),
            state: self
                .db
                .kv_get(keys::AGENT_STATE)?
                .unwrap_or_else(|| "unknown".to_string()),
            survival_tier: snapshot.as_ref().map(|s| s.tier.clone()),
            estimated_usd: snapshot.map(|s| s.estimated_usd),
            queue_depth: self.db.count_unprocessed_messages()?,
            turns: self.db.count_turns()?,
            started_at: self.db.kv_get(keys::STARTED_AT)?,
            emergency_stop: self.db.get_emergency_state()?.enabled,
        })
    }

    // ---- internal accessors shared with the orchestrator/daemon ----

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn self_mod(&self) -> &Arc<SelfModEngine> {
        &self.self_mod
    }

    pub(crate) fn brain(&self) -> &Arc<dyn BrainProvider> {
        &self.brain
    }

    pub(crate) fn transport(&self) -> &Arc<dyn MessagingTransport> {
        &self.transport
    }

    pub(crate) fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub(crate) fn skills(&self) -> &SkillRegistry {
        &self.skills
    }

    pub(crate) fn wallet(&self) -> &Arc<Mutex<WalletSession>> {
        &self.wallet
    }

    pub(crate) fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    pub(crate) fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }
}
