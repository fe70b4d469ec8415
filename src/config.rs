//! Agent configuration: file layout, JSON config loading, env overrides,
//! and startup validation.
//!
//! The config file lives at `<home>/config.json`. Every section has full
//! serde defaults so a missing file yields a runnable configuration; the
//! validator still refuses to start on semantically broken values.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::chain::{ChainCapabilities, ChainProfile};

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const HOME_DIR: &str = "AETHERNET_HOME";
    pub const TREASURY_USD: &str = "AETHERNET_TREASURY_USD";
    pub const OPERATOR_PROMPT: &str = "AETHERNET_OPERATOR_PROMPT";
    pub const BRAIN_API_KEY: &str = "AETHERNET_BRAIN_API_KEY";
}

/// Default values
pub mod defaults {
    pub const AGENT_NAME: &str = "aethernet";
    pub const CHAIN_DEFAULT: &str = "eip155:8453";
    pub const BRAIN_MODEL: &str = "gpt-4.1-mini";
    pub const BRAIN_API_URL: &str = "https://api.openai.com/v1/responses";
    pub const DEFAULT_INTERVAL_MS: u64 = 60_000;
    pub const MAX_ACTIONS_PER_TURN: usize = 5;
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;
    pub const MAX_SLEEP_MS: u64 = 3_600_000;
    pub const MAX_BRAIN_FAILURES_BEFORE_STOP: u32 = 5;
    pub const WALLET_SESSION_TTL_SEC: u64 = 900;
    pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;
    pub const ESTIMATED_USD: i64 = 100;
}

/// Brain (language-model endpoint) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrainConfig {
    pub model: String,
    pub api_url: String,
    /// Name of the env var holding the API key. The key itself never lives
    /// in the config file.
    pub api_key_env: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for BrainConfig {
    fn default() -> Self {
        BrainConfig {
            model: defaults::BRAIN_MODEL.to_string(),
            api_url: defaults::BRAIN_API_URL.to_string(),
            api_key_env: env_vars::BRAIN_API_KEY.to_string(),
            temperature: 0.3,
            max_output_tokens: 2000,
            timeout_ms: 30_000,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

/// Autonomy loop limits and policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomyConfig {
    pub default_interval_ms: u64,
    pub max_actions_per_turn: usize,
    pub max_consecutive_errors: u32,
    pub max_sleep_ms: u64,
    pub max_brain_failures_before_stop: u32,
    pub strict_action_allowlist: bool,
    pub allow_self_modify_action: bool,
    /// When set, ticks only record a dry-run turn row.
    pub dry_run: bool,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        AutonomyConfig {
            default_interval_ms: defaults::DEFAULT_INTERVAL_MS,
            max_actions_per_turn: defaults::MAX_ACTIONS_PER_TURN,
            max_consecutive_errors: defaults::MAX_CONSECUTIVE_ERRORS,
            max_sleep_ms: defaults::MAX_SLEEP_MS,
            max_brain_failures_before_stop: defaults::MAX_BRAIN_FAILURES_BEFORE_STOP,
            strict_action_allowlist: true,
            allow_self_modify_action: false,
            dry_run: false,
        }
    }
}

/// Where alerts go once thresholds fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertRoute {
    Db,
    Stdout,
    Webhook,
}

impl AlertRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertRoute::Db => "db",
            AlertRoute::Stdout => "stdout",
            AlertRoute::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub enabled: bool,
    pub route: AlertRoute,
    pub webhook_url: Option<String>,
    pub critical_incident_threshold: u32,
    pub brain_failure_threshold: u32,
    pub queue_depth_threshold: u32,
    pub evaluation_window_minutes: i64,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        AlertingConfig {
            enabled: true,
            route: AlertRoute::Db,
            webhook_url: None,
            critical_incident_threshold: 1,
            brain_failure_threshold: 3,
            queue_depth_threshold: 10,
            evaluation_window_minutes: 10,
        }
    }
}

/// Liquidity thresholds driving the survival tier. Invariant:
/// `low_compute_usd >= critical_usd >= dead_usd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurvivalConfig {
    pub low_compute_usd: i64,
    pub critical_usd: i64,
    pub dead_usd: i64,
    /// Liquidity estimate used when the treasury env var is unset.
    pub estimated_usd: i64,
}

impl Default for SurvivalConfig {
    fn default() -> Self {
        SurvivalConfig {
            low_compute_usd: 25,
            critical_usd: 10,
            dead_usd: 2,
            estimated_usd: defaults::ESTIMATED_USD,
        }
    }
}

impl SurvivalConfig {
    /// Current liquidity estimate: env override, else configured value.
    pub fn resolve_estimated_usd(&self) -> i64 {
        env::var(env_vars::TREASURY_USD)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.estimated_usd)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolingConfig {
    pub allow_external_sources: bool,
}

impl Default for ToolingConfig {
    fn default() -> Self {
        ToolingConfig {
            allow_external_sources: false,
        }
    }
}

/// A registered tool source. The builtin `internal.runtime` source is always
/// appended if the config omits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSourceConfig {
    pub id: String,
    pub name: String,
    /// `internal`, `api`, or `mcp`
    #[serde(alias = "type")]
    pub source_type: String,
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Env var name holding the bearer token for `api` sources.
    #[serde(default)]
    pub auth_env: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Governance file policy: hash-pinned files and paths self-mod must never
/// touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstitutionPolicy {
    pub constitution_path: String,
    pub laws_path: String,
    pub protected_paths: Vec<String>,
    pub hash_algorithm: String,
}

impl Default for ConstitutionPolicy {
    fn default() -> Self {
        ConstitutionPolicy {
            constitution_path: "constitution.md".to_string(),
            laws_path: "laws.md".to_string(),
            protected_paths: vec![
                "constitution.md".to_string(),
                "laws.md".to_string(),
                "wallet.enc.json".to_string(),
                "config.json".to_string(),
                "data".to_string(),
            ],
            hash_algorithm: "sha256".to_string(),
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub agent_name: String,
    pub home_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub operator_prompt: Option<String>,
    pub chain_default: String,
    pub chain_profiles: Vec<ChainProfile>,
    pub brain: BrainConfig,
    pub autonomy: AutonomyConfig,
    pub alerting: AlertingConfig,
    pub survival: SurvivalConfig,
    pub tooling: ToolingConfig,
    pub tool_sources: Vec<ToolSourceConfig>,
    pub enabled_skill_ids: Vec<String>,
    pub constitution_policy: ConstitutionPolicy,
    pub wallet_session_ttl_sec: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        let home = default_home_dir();
        Self::default_under(&home)
    }
}

/// Resolve the agent home: env override, else `~/.aethernet`.
pub fn default_home_dir() -> PathBuf {
    if let Ok(dir) = env::var(env_vars::HOME_DIR) {
        return PathBuf::from(dir);
    }
    let base = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&base).join(".aethernet")
}

impl AgentConfig {
    /// A full default configuration rooted at `home`.
    pub fn default_under(home: &Path) -> Self {
        AgentConfig {
            agent_name: defaults::AGENT_NAME.to_string(),
            home_dir: home.to_path_buf(),
            data_dir: home.join("data"),
            db_path: home.join("data").join("state.db"),
            config_path: home.join("config.json"),
            operator_prompt: None,
            chain_default: defaults::CHAIN_DEFAULT.to_string(),
            chain_profiles: vec![ChainProfile {
                caip2: defaults::CHAIN_DEFAULT.to_string(),
                chain_id: 8453,
                name: "base".to_string(),
                supports: ChainCapabilities::all(),
            }],
            brain: BrainConfig::default(),
            autonomy: AutonomyConfig::default(),
            alerting: AlertingConfig::default(),
            survival: SurvivalConfig::default(),
            tooling: ToolingConfig::default(),
            tool_sources: Vec::new(),
            enabled_skill_ids: Vec::new(),
            constitution_policy: ConstitutionPolicy::default(),
            wallet_session_ttl_sec: defaults::WALLET_SESSION_TTL_SEC,
            heartbeat_interval_ms: defaults::HEARTBEAT_INTERVAL_MS,
        }
    }

    /// Load `<home>/config.json`, falling back to defaults when the file is
    /// absent. Relative data paths in the file are resolved against `home`.
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join("config.json");
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
            serde_json::from_str::<AgentConfig>(&raw)
                .map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))?
        } else {
            AgentConfig::default_under(home)
        };

        config.home_dir = home.to_path_buf();
        if config.data_dir.as_os_str().is_empty() {
            config.data_dir = home.join("data");
        } else if config.data_dir.is_relative() {
            config.data_dir = home.join(&config.data_dir);
        }
        if config.db_path.as_os_str().is_empty() {
            config.db_path = config.data_dir.join("state.db");
        } else if config.db_path.is_relative() {
            config.db_path = config.data_dir.join(&config.db_path);
        }
        config.config_path = path;

        if config.operator_prompt.is_none() {
            config.operator_prompt = env::var(env_vars::OPERATOR_PROMPT).ok();
        }
        Ok(config)
    }

    /// The wallet keystore file inside the agent home.
    pub fn keystore_path(&self) -> PathBuf {
        self.home_dir.join("wallet.enc.json")
    }

    /// The skills directory inside the agent home.
    pub fn skills_dir(&self) -> PathBuf {
        self.home_dir.join("skills")
    }

    /// The self-mod backup directory inside the data dir.
    pub fn rollbacks_dir(&self) -> PathBuf {
        self.data_dir.join("rollbacks")
    }

    /// Governance file paths resolved against the agent home.
    pub fn constitution_file(&self) -> PathBuf {
        self.home_dir.join(&self.constitution_policy.constitution_path)
    }

    pub fn laws_file(&self) -> PathBuf {
        self.home_dir.join(&self.constitution_policy.laws_path)
    }

    /// Validate the configuration. Any `error` diagnostic prevents startup.
    pub fn validate(&self) -> Vec<ConfigDiagnostic> {
        let mut diags = Vec::new();

        if self.survival.low_compute_usd < self.survival.critical_usd
            || self.survival.critical_usd < self.survival.dead_usd
        {
            diags.push(ConfigDiagnostic::error(
                "survival",
                "threshold_order",
                "survival thresholds must satisfy low_compute_usd >= critical_usd >= dead_usd",
            ));
        }

        if self.wallet_session_ttl_sec < 60 {
            diags.push(ConfigDiagnostic::error(
                "wallet_session_ttl_sec",
                "ttl_too_short",
                "wallet session TTL must be at least 60 seconds",
            ));
        }

        if self.heartbeat_interval_ms < 5000 {
            diags.push(ConfigDiagnostic::error(
                "heartbeat_interval_ms",
                "interval_too_short",
                "heartbeat interval must be at least 5000 ms",
            ));
        }

        if self.autonomy.max_actions_per_turn == 0 {
            diags.push(ConfigDiagnostic::warning(
                "autonomy.max_actions_per_turn",
                "zero_actions",
                "max_actions_per_turn of 0 is treated as 1",
            ));
        }

        if !self
            .chain_profiles
            .iter()
            .any(|p| p.caip2 == self.chain_default)
        {
            diags.push(ConfigDiagnostic::error(
                "chain_default",
                "unknown_chain",
                format!(
                    "default chain '{}' is not present in chain_profiles",
                    self.chain_default
                ),
            ));
        }

        if self.alerting.route == AlertRoute::Webhook && self.alerting.webhook_url.is_none() {
            diags.push(ConfigDiagnostic::error(
                "alerting.webhook_url",
                "missing_webhook_url",
                "alert route 'webhook' requires alerting.webhook_url",
            ));
        }

        for source in &self.tool_sources {
            match source.source_type.as_str() {
                "internal" | "api" | "mcp" => {}
                other => diags.push(ConfigDiagnostic::error(
                    "tool_sources",
                    "unknown_source_type",
                    format!("tool source '{}' has unknown type '{}'", source.id, other),
                )),
            }
            if source.source_type == "api" && source.base_url.is_none() {
                diags.push(ConfigDiagnostic::error(
                    "tool_sources",
                    "missing_base_url",
                    format!("api tool source '{}' requires base_url", source.id),
                ));
            }
        }

        if self.brain.timeout_ms == 0 {
            diags.push(ConfigDiagnostic::error(
                "brain.timeout_ms",
                "zero_timeout",
                "brain request timeout must be positive",
            ));
        }

        if self.constitution_policy.hash_algorithm != "sha256" {
            diags.push(ConfigDiagnostic::error(
                "constitution_policy.hash_algorithm",
                "unsupported_hash",
                format!(
                    "unsupported hash algorithm '{}'",
                    self.constitution_policy.hash_algorithm
                ),
            ));
        }

        diags
    }
}

/// One structured validation finding.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigDiagnostic {
    pub field: String,
    pub code: String,
    pub severity: DiagnosticSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Warning,
    Error,
}

impl ConfigDiagnostic {
    fn error(field: &str, code: &str, message: impl Into<String>) -> Self {
        ConfigDiagnostic {
            field: field.to_string(),
            code: code.to_string(),
            severity: DiagnosticSeverity::Error,
            message: message.into(),
        }
    }

    fn warning(field: &str, code: &str, message: impl Into<String>) -> Self {
        ConfigDiagnostic {
            field: field.to_string(),
            code: code.to_string(),
            severity: DiagnosticSeverity::Warning,
            message: message.into(),
        }
    }
}

/// True when any diagnostic is fatal.
pub fn has_errors(diags: &[ConfigDiagnostic]) -> bool {
    diags
        .iter()
        .any(|d| d.severity == DiagnosticSeverity::Error)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    Io(String, String),
    #[error("failed to parse config {0}: {1}")]
    Parse(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates_clean() {
        let config = AgentConfig::default_under(Path::new("/tmp/agent-home"));
        let diags = config.validate();
        assert!(!has_errors(&diags), "unexpected errors: {:?}", diags);
    }

    #[test]
    fn test_survival_threshold_order_enforced() {
        let mut config = AgentConfig::default_under(Path::new("/tmp/agent-home"));
        config.survival.dead_usd = 50;
        let diags = config.validate();
        assert!(has_errors(&diags));
        assert!(diags.iter().any(|d| d.code == "threshold_order"));
    }

    #[test]
    fn test_webhook_route_requires_url() {
        let mut config = AgentConfig::default_under(Path::new("/tmp/agent-home"));
        config.alerting.route = AlertRoute::Webhook;
        config.alerting.webhook_url = None;
        assert!(has_errors(&config.validate()));
    }

    #[test]
    fn test_short_ttl_rejected() {
        let mut config = AgentConfig::default_under(Path::new("/tmp/agent-home"));
        config.wallet_session_ttl_sec = 30;
        let diags = config.validate();
        assert!(diags.iter().any(|d| d.code == "ttl_too_short"));
    }

    #[test]
    fn test_unknown_default_chain_rejected() {
        let mut config = AgentConfig::default_under(Path::new("/tmp/agent-home"));
        config.chain_default = "eip155:424242".to_string();
        assert!(has_errors(&config.validate()));
    }
}
