//! Read-only API adapter.
//!
//! Proxies tool calls to a remote host as
//! `GET <base_url>/v1/tools/<tool>?<query>`. Only GET is permitted; a
//! bearer token is attached when the source names an env var holding one.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::ToolSourceConfig;
use crate::tools::types::{ToolAdapter, ToolContext, ToolOutcome};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub struct ReadonlyApiAdapter {
    client: reqwest::Client,
}

impl ReadonlyApiAdapter {
    pub fn new() -> Self {
        ReadonlyApiAdapter {
            client: reqwest::Client::new(),
        }
    }

    fn build_url(base_url: &str, tool_name: &str, input: &Value) -> String {
        let mut url = format!(
            "{}/v1/tools/{}",
            base_url.trim_end_matches('/'),
            tool_name
        );
        if let Some(query) = input.get("query").and_then(Value::as_object) {
            let mut pairs = Vec::new();
            for (key, value) in query {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                pairs.push(format!(
                    "{}={}",
                    urlencode(key),
                    urlencode(&rendered)
                ));
            }
            if !pairs.is_empty() {
                url.push('?');
                url.push_str(&pairs.join("&"));
            }
        }
        url
    }
}

impl Default for ReadonlyApiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

#[async_trait]
impl ToolAdapter for ReadonlyApiAdapter {
    async fn invoke(
        &self,
        source: &ToolSourceConfig,
        tool_name: &str,
        input: &Value,
        _context: &ToolContext,
    ) -> ToolOutcome {
        if let Some(method) = input.get("method").and_then(Value::as_str) {
            if !method.eq_ignore_ascii_case("GET") {
                return ToolOutcome::failure(format!(
                    "read-only API adapter permits only GET, refused {}",
                    method
                ));
            }
        }

        let Some(base_url) = source.base_url.as_deref() else {
            return ToolOutcome::failure(format!(
                "tool source '{}' has no base_url configured",
                source.id
            ));
        };

        let url = Self::build_url(base_url, tool_name, input);
        let mut request = self.client.get(&url).timeout(REQUEST_TIMEOUT);
        if let Some(auth_env) = source.auth_env.as_deref() {
            if let Ok(token) = std::env::var(auth_env) {
                request = request.bearer_auth(token);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return ToolOutcome::failure(format!("request failed: {}", e)),
        };

        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("json"))
            .unwrap_or(false);
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return ToolOutcome::failure_with_metadata(
                format!("tool host returned status {}", status.as_u16()),
                serde_json::json!({"status": status.as_u16(), "body": body}),
            );
        }

        let output = if is_json {
            serde_json::from_str(&body).unwrap_or(Value::String(body))
        } else {
            Value::String(body)
        };
        ToolOutcome::success(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;
    use std::sync::Arc;

    fn source(base_url: Option<&str>) -> ToolSourceConfig {
        ToolSourceConfig {
            id: "api.remote".to_string(),
            name: "Remote".to_string(),
            source_type: "api".to_string(),
            enabled: true,
            base_url: base_url.map(str::to_string),
            auth_env: None,
            metadata: None,
        }
    }

    fn context() -> ToolContext {
        ToolContext {
            db: Arc::new(Database::new(":memory:").unwrap()),
            agent_address: "0xagent".to_string(),
            agent_name: "aethernet".to_string(),
        }
    }

    #[test]
    fn test_url_construction() {
        let url = ReadonlyApiAdapter::build_url(
            "https://tools.example/",
            "price",
            &json!({"query": {"symbol": "ETH/USD", "limit": 5}}),
        );
        assert!(url.starts_with("https://tools.example/v1/tools/price?"));
        assert!(url.contains("symbol=ETH%2FUSD"));
        assert!(url.contains("limit=5"));
    }

    #[tokio::test]
    async fn test_non_get_refused() {
        let adapter = ReadonlyApiAdapter::new();
        let outcome = adapter
            .invoke(
                &source(Some("http://localhost:1")),
                "price",
                &json!({"method": "POST"}),
                &context(),
            )
            .await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("only GET"));
    }

    #[tokio::test]
    async fn test_missing_base_url_refused() {
        let adapter = ReadonlyApiAdapter::new();
        let outcome = adapter
            .invoke(&source(None), "price", &json!({}), &context())
            .await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("base_url"));
    }
}
