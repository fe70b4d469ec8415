//! The replicate action: spawn a child agent into a fresh sandbox.
//!
//! Builds a plan from the action params, allocates a sandbox through the
//! compute provider, provisions a fresh child signer, writes the genesis
//! and keystore files, optionally requests funding, and records the child
//! plus its lineage edge. The lineage-init message is best-effort.

use chrono::Utc;
use serde_json::{json, Value};
use std::path::Path;

use crate::actions::{ActionFailure, ActionReport};
use crate::db::{Database, IncidentCode, Severity};
use crate::providers::ComputeProvider;
use crate::transport::MessagingTransport;
use crate::wallet::WalletSession;

pub const DEFAULT_CHILD_NAME: &str = "aethernet-child";
pub const DEFAULT_GENESIS_PROMPT: &str =
    "You are a newly replicated Aethernet agent. Establish your identity, \
     conserve funds, and report to your parent.";

/// The resolved replication plan.
#[derive(Debug, Clone)]
pub struct ReplicatePlan {
    pub name: String,
    pub genesis_prompt: String,
    pub parent: String,
    pub creator: String,
    pub initial_funding_usdc: String,
}

impl ReplicatePlan {
    pub fn from_params(params: &Value, agent_address: &str, default_funding: &str) -> Self {
        let get = |key: &str| {
            params
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        ReplicatePlan {
            name: get("name").unwrap_or_else(|| DEFAULT_CHILD_NAME.to_string()),
            genesis_prompt: get("genesisPrompt")
                .unwrap_or_else(|| DEFAULT_GENESIS_PROMPT.to_string()),
            parent: get("parent").unwrap_or_else(|| agent_address.to_string()),
            creator: get("creator").unwrap_or_else(|| agent_address.to_string()),
            initial_funding_usdc: get("initialFundingUsdc")
                .unwrap_or_else(|| default_funding.to_string()),
        }
    }
}

/// Parse the requested funding amount; malformed amounts count as zero.
pub fn funding_amount(params: &Value, default_funding: &str) -> f64 {
    params
        .get("initialFundingUsdc")
        .and_then(Value::as_str)
        .unwrap_or(default_funding)
        .trim()
        .parse::<f64>()
        .unwrap_or(0.0)
}

pub async fn run_replicate(
    db: &Database,
    compute: &dyn ComputeProvider,
    transport: &dyn MessagingTransport,
    agent_address: String,
    default_funding: &str,
    params: &Value,
) -> Result<ActionReport, ActionFailure> {
    let plan = ReplicatePlan::from_params(params, &agent_address, default_funding);

    let sandbox = compute
        .allocate_sandbox(&plan.name)
        .await
        .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;

    // Fresh child signer, encrypted with a bootstrap passphrase the child
    // reads from its genesis file on first start.
    let bootstrap_passphrase = format!("Ae1-{}", hex::encode(rand::random::<[u8; 16]>()));
    let child_address = WalletSession::create_keystore(&sandbox.root_dir, &bootstrap_passphrase)
        .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;

    write_genesis(&sandbox.root_dir, &plan, &child_address, &bootstrap_passphrase)
        .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;

    let mut funded = "0".to_string();
    let amount = funding_amount(params, default_funding);
    if amount > 0.0 {
        let reference = compute
            .request_funding(&child_address, &plan.initial_funding_usdc)
            .await
            .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;
        db.insert_payment_event(
            "outbound",
            &plan.initial_funding_usdc,
            Some(&child_address),
            Some(&reference),
            &json!({"purpose": "child_funding", "child": plan.name}),
        )
        .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;
        funded = plan.initial_funding_usdc.clone();
    }

    let child_id = db
        .insert_child(&plan.name, &child_address, Some(&sandbox.id), &funded)
        .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;
    db.insert_lineage_edge(&agent_address, &child_id)
        .map_err(|e| ActionFailure::new(IncidentCode::ActionFailed, e.to_string()))?;

    let mut report = ActionReport::new(
        "replicate",
        json!({
            "childId": child_id,
            "childAddress": child_address,
            "sandboxId": sandbox.id,
            "fundedUsdc": funded,
        }),
    );

    // Lineage-init is best-effort: the child may not be reachable yet.
    let lineage = json!({
        "type": "lineage_init",
        "parent": agent_address,
        "child": child_address,
        "name": plan.name,
    });
    if let Err(e) = transport
        .send(&child_address, &lineage.to_string(), None)
        .await
    {
        report.warnings.push((
            IncidentCode::ProviderFailure,
            Severity::Warning,
            format!("lineage-init message failed: {}", e),
        ));
    }

    Ok(report)
}

fn write_genesis(
    sandbox_dir: &Path,
    plan: &ReplicatePlan,
    child_address: &str,
    bootstrap_passphrase: &str,
) -> std::io::Result<()> {
    let genesis = json!({
        "name": plan.name,
        "genesisPrompt": plan.genesis_prompt,
        "parent": plan.parent,
        "creator": plan.creator,
        "childAddress": child_address,
        "initialFundingUsdc": plan.initial_funding_usdc,
        "bootstrapPassphrase": bootstrap_passphrase,
        "createdAt": Utc::now().to_rfc3339(),
    });
    let path = sandbox_dir.join("genesis.json");
    std::fs::write(&path, serde_json::to_string_pretty(&genesis)?)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(())
}
