//! Chain profiles and capability resolution.
//!
//! Every chain the agent can touch is described by a [`ChainProfile`] keyed
//! by its CAIP-2 identifier. Actions that reach a chain declare the
//! capability they need (`messaging`, `payments`, ...) and the executor
//! resolves the profile before performing any side effect.

use serde::{Deserialize, Serialize};

/// Per-chain feature flags. A capability that is `false` blocks any action
/// that requires it on that chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainCapabilities {
    #[serde(default)]
    pub identity: bool,
    #[serde(default)]
    pub reputation: bool,
    #[serde(default)]
    pub payments: bool,
    #[serde(default)]
    pub auth: bool,
    #[serde(default)]
    pub messaging: bool,
}

impl ChainCapabilities {
    pub fn all() -> Self {
        ChainCapabilities {
            identity: true,
            reputation: true,
            payments: true,
            auth: true,
            messaging: true,
        }
    }

    pub fn supports(&self, capability: ChainCapability) -> bool {
        match capability {
            ChainCapability::Identity => self.identity,
            ChainCapability::Reputation => self.reputation,
            ChainCapability::Payments => self.payments,
            ChainCapability::Auth => self.auth,
            ChainCapability::Messaging => self.messaging,
        }
    }
}

/// The capability an action requires from its selected chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainCapability {
    Identity,
    Reputation,
    Payments,
    Auth,
    Messaging,
}

impl ChainCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainCapability::Identity => "identity",
            ChainCapability::Reputation => "reputation",
            ChainCapability::Payments => "payments",
            ChainCapability::Auth => "auth",
            ChainCapability::Messaging => "messaging",
        }
    }
}

/// A configured chain, addressed by CAIP-2 id (e.g. `eip155:8453`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainProfile {
    pub caip2: String,
    pub chain_id: u64,
    pub name: String,
    #[serde(default)]
    pub supports: ChainCapabilities,
}

impl Default for ChainCapabilities {
    fn default() -> Self {
        ChainCapabilities {
            identity: false,
            reputation: false,
            payments: false,
            auth: false,
            messaging: false,
        }
    }
}

/// Chain registry resolved from config. Lookup is by exact CAIP-2 string.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    default_caip2: String,
    profiles: Vec<ChainProfile>,
}

impl ChainRegistry {
    pub fn new(default_caip2: String, profiles: Vec<ChainProfile>) -> Self {
        ChainRegistry {
            default_caip2,
            profiles,
        }
    }

    pub fn default_caip2(&self) -> &str {
        &self.default_caip2
    }

    /// Resolve a chain selection, falling back to the configured default.
    pub fn resolve(&self, selection: Option<&str>) -> Option<&ChainProfile> {
        let caip2 = selection.unwrap_or(&self.default_caip2);
        self.profiles.iter().find(|p| p.caip2 == caip2)
    }

    pub fn profiles(&self) -> &[ChainProfile] {
        &self.profiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ChainRegistry {
        ChainRegistry::new(
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
        )
    }

    #[test]
    fn test_resolve_default() {
        let reg = registry();
        let profile = reg.resolve(None).expect("default chain");
        assert_eq!(profile.chain_id, 8453);
    }

    #[test]
    fn test_resolve_unknown_chain() {
        let reg = registry();
        assert!(reg.resolve(Some("eip155:999")).is_none());
    }

    #[test]
    fn test_capability_check() {
        let reg = registry();
        let mainnet = reg.resolve(Some("eip155:1")).unwrap();
        assert!(mainnet.supports.supports(ChainCapability::Payments));
        assert!(!mainnet.supports.supports(ChainCapability::Messaging));
    }
}
