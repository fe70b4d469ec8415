//! Registry that routes tool invocations to adapters under the
//! external-source policy.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ToolSourceConfig;
use crate::tools::internal::InternalAdapter;
use crate::tools::readonly_api::ReadonlyApiAdapter;
use crate::tools::types::{ToolAdapter, ToolContext, ToolInvocation, ToolOutcome};

/// The always-present internal source id.
pub const INTERNAL_SOURCE_ID: &str = "internal.runtime";

pub struct ToolRegistry {
    sources: HashMap<String, ToolSourceConfig>,
    adapters: HashMap<String, Arc<dyn ToolAdapter>>,
    allow_external_sources: bool,
}

impl ToolRegistry {
    /// Build a registry from configured sources. The internal source and the
    /// two builtin adapters are always registered.
    pub fn new(configured: &[ToolSourceConfig], allow_external_sources: bool) -> Self {
        let mut sources: HashMap<String, ToolSourceConfig> = configured
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        sources
            .entry(INTERNAL_SOURCE_ID.to_string())
            .or_insert_with(|| ToolSourceConfig {
                id: INTERNAL_SOURCE_ID.to_string(),
                name: "Runtime introspection".to_string(),
                source_type: "internal".to_string(),
                enabled: true,
                base_url: None,
                auth_env: None,
                metadata: None,
            });

        let mut adapters: HashMap<String, Arc<dyn ToolAdapter>> = HashMap::new();
        adapters.insert("internal".to_string(), Arc::new(InternalAdapter));
        adapters.insert("readonly_api".to_string(), Arc::new(ReadonlyApiAdapter::new()));

        ToolRegistry {
            sources,
            adapters,
            allow_external_sources,
        }
    }

    /// Register an additional adapter by name (e.g. an `mcp` bridge).
    pub fn register_adapter(&mut self, name: &str, adapter: Arc<dyn ToolAdapter>) {
        self.adapters.insert(name.to_string(), adapter);
    }

    /// Sources visible to the brain.
    pub fn sources(&self) -> Vec<&ToolSourceConfig> {
        let mut sources: Vec<&ToolSourceConfig> = self.sources.values().collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        sources
    }

    /// Adapter name for a source: explicit metadata override first, then the
    /// type-derived default.
    fn adapter_name(source: &ToolSourceConfig) -> String {
        if let Some(name) = source
            .metadata
            .as_ref()
            .and_then(|m| m.get("adapter"))
            .and_then(|v| v.as_str())
        {
            return name.to_string();
        }
        match source.source_type.as_str() {
            "internal" => "internal".to_string(),
            "api" => "readonly_api".to_string(),
            other => other.to_string(),
        }
    }

    /// Dispatch one invocation under the source policy.
    pub async fn invoke(&self, invocation: &ToolInvocation, context: &ToolContext) -> ToolOutcome {
        let Some(source) = self.sources.get(&invocation.source_id) else {
            return ToolOutcome::failure(format!(
                "unknown tool source '{}'",
                invocation.source_id
            ));
        };

        if !source.enabled {
            return ToolOutcome::failure(format!("tool source '{}' is disabled", source.id));
        }

        if source.source_type != "internal" && !self.allow_external_sources {
            return ToolOutcome::failure(
                "external tool sources are disabled by runtime policy".to_string(),
            );
        }

        let adapter_name = Self::adapter_name(source);
        let Some(adapter) = self.adapters.get(&adapter_name) else {
            return ToolOutcome::failure(format!(
                "no adapter '{}' registered for source '{}'",
                adapter_name, source.id
            ));
        };

        adapter
            .invoke(source, &invocation.tool_name, &invocation.input, context)
            .await
    }
}
