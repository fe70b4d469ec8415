//! HTTP brain client.
//!
//! Posts the turn input to the configured LM endpoint and coerces whatever
//! comes back into a `TurnOutput`. Transport failures, bad statuses, and
//! unparseable bodies all produce a `malformed` output rather than an error
//! so the orchestrator's single recovery path is exercised.

use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;

use async_trait::async_trait;

use crate::brain::types::{sanitize_output, TurnInput, TurnOutput, ALLOWED_ACTION_TYPES};
use crate::brain::{BrainError, BrainProvider};
use crate::config::BrainConfig;

/// Statuses worth retrying; everything else fails the attempt outright.
const RETRYABLE_STATUSES: [u16; 8] = [408, 409, 425, 429, 500, 502, 503, 504];

/// Upper bound on a single backoff pause.
const MAX_BACKOFF_MS: u64 = 30_000;

pub struct HttpBrainClient {
    client: reqwest::Client,
    config: BrainConfig,
}

impl HttpBrainClient {
    pub fn new(config: BrainConfig) -> Self {
        HttpBrainClient {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn system_prompt() -> String {
        let actions: Vec<&str> = ALLOWED_ACTION_TYPES.iter().map(|a| a.as_str()).collect();
        format!(
            "You are the planning brain of an autonomous wallet-native agent. \
             Respond with a single JSON object: {{\"summary\": string, \
             \"nextActions\": [{{\"type\": string, \"params\": object}}], \
             \"memoryWrites\": optional, \"sleepMs\": optional number}}. \
             The only permitted action types are: {}. \
             Never request shell commands, process execution, or any action \
             outside that list.",
            actions.join(", ")
        )
    }

    fn request_body(&self, input: &TurnInput) -> Value {
        let user_text = serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string());
        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_output_tokens": self.config.max_output_tokens,
            "input": [
                {
                    "role": "system",
                    "content": [{"type": "input_text", "text": Self::system_prompt()}]
                },
                {
                    "role": "user",
                    "content": [{"type": "input_text", "text": user_text}]
                }
            ]
        })
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_backoff_ms.max(100);
        let delay = base.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
        Duration::from_millis(delay.min(MAX_BACKOFF_MS))
    }

    /// POST the request, retrying on transport errors and retryable
    /// statuses. Returns the response body on success.
    async fn post_with_retries(&self, body: &Value) -> Result<Value, String> {
        let max_attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = self.backoff_delay(attempt);
                log::warn!(
                    "[BRAIN] Retry attempt {}/{} after {}ms: {}",
                    attempt,
                    self.config.max_retries,
                    delay.as_millis(),
                    last_error
                );
                tokio::time::sleep(delay).await;
            }

            let result = self
                .client
                .post(&self.config.api_url)
                .bearer_auth(self.api_key().unwrap_or_default())
                .timeout(Duration::from_millis(self.config.timeout_ms))
                .json(body)
                .send()
                .await;

            match result {
                Err(e) => {
                    last_error = format!("transport error: {}", e);
                    continue;
                }
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|e| format!("body decode error: {}", e));
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    last_error = format!("status {}: {}", status.as_u16(), body_text);
                    if !is_retryable(status) {
                        return Err(last_error);
                    }
                }
            }
        }
        Err(last_error)
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    RETRYABLE_STATUSES.contains(&status.as_u16())
}

/// Pull the generated text out of the response: prefer a top-level
/// `output_text`, else concatenate the text segments of an array-shaped
/// `output`.
pub fn extract_response_text(response: &Value) -> Option<String> {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    let output = response.get("output")?.as_array()?;
    let mut collected = String::new();
    for item in output {
        if let Some(content) = item.get("content").and_then(Value::as_array) {
            for segment in content {
                if let Some(text) = segment.get("text").and_then(Value::as_str) {
                    collected.push_str(text);
                }
            }
        }
    }
    if collected.is_empty() {
        None
    } else {
        Some(collected)
    }
}

/// Parse the model text as JSON; on failure, fall back to the first
/// balanced `{...}` block inside it.
pub fn parse_json_lenient(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        if value.is_object() {
            return Some(value);
        }
    }
    let block = first_json_block(text)?;
    serde_json::from_str(&block).ok()
}

/// Extract the first balanced brace block, respecting string literals.
fn first_json_block(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[async_trait]
impl BrainProvider for HttpBrainClient {
    async fn generate_turn(&self, input: &TurnInput) -> Result<TurnOutput, BrainError> {
        if self.api_key().is_none() {
            log::warn!(
                "[BRAIN] API key env '{}' not set, skipping request",
                self.config.api_key_env
            );
            return Ok(TurnOutput::malformed("missing_api_key"));
        }

        let body = self.request_body(input);
        let response = match self.post_with_retries(&body).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("[BRAIN] Request failed after retries: {}", e);
                return Ok(TurnOutput::malformed("request_failed"));
            }
        };

        let Some(text) = extract_response_text(&response) else {
            return Ok(TurnOutput::malformed("empty_response"));
        };
        let Some(value) = parse_json_lenient(&text) else {
            return Ok(TurnOutput::malformed("invalid_json"));
        };
        Ok(sanitize_output(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_top_level_output_text() {
        let response = json!({"output_text": "{\"summary\":\"hi\"}"});
        assert_eq!(
            extract_response_text(&response).as_deref(),
            Some("{\"summary\":\"hi\"}")
        );
    }

    #[test]
    fn test_extract_segmented_output() {
        let response = json!({
            "output": [
                {"content": [{"text": "{\"summary\""}, {"text": ":\"hi\"}"}]}
            ]
        });
        assert_eq!(
            extract_response_text(&response).as_deref(),
            Some("{\"summary\":\"hi\"}")
        );
    }

    #[test]
    fn test_parse_strict_json() {
        let value = parse_json_lenient("{\"summary\": \"ok\"}").unwrap();
        assert_eq!(value["summary"], "ok");
    }

    #[test]
    fn test_parse_embedded_block() {
        let text = "Sure! Here is the plan:\n{\"summary\": \"ok\", \"nested\": {\"a\": 1}}\nDone.";
        let value = parse_json_lenient(text).unwrap();
        assert_eq!(value["nested"]["a"], 1);
    }

    #[test]
    fn test_parse_block_with_braces_in_strings() {
        let text = "prefix {\"summary\": \"uses { and } inside\"} suffix";
        let value = parse_json_lenient(text).unwrap();
        assert_eq!(value["summary"], "uses { and } inside");
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(parse_json_lenient("no json here at all").is_none());
    }

    #[test]
    fn test_backoff_growth_and_cap() {
        let client = HttpBrainClient::new(crate::config::BrainConfig {
            retry_backoff_ms: 500,
            ..Default::default()
        });
        assert_eq!(client.backoff_delay(1).as_millis(), 500);
        assert_eq!(client.backoff_delay(2).as_millis(), 1000);
        assert_eq!(client.backoff_delay(3).as_millis(), 2000);
        assert_eq!(client.backoff_delay(10).as_millis(), 30_000);
    }

    #[test]
    fn test_backoff_floor() {
        let client = HttpBrainClient::new(crate::config::BrainConfig {
            retry_backoff_ms: 10,
            ..Default::default()
        });
        assert_eq!(client.backoff_delay(1).as_millis(), 100);
    }

    #[tokio::test]
    async fn test_missing_api_key_short_circuits() {
        let env_name = "AE_TEST_MISSING_KEY_VAR";
        std::env::remove_var(env_name);
        let client = HttpBrainClient::new(crate::config::BrainConfig {
            api_key_env: env_name.to_string(),
            ..Default::default()
        });
        let input = crate::brain::types::TurnInput {
            agent: crate::brain::types::AgentIdentity {
                address: "0xagent".to_string(),
                name: "aethernet".to_string(),
            },
            survival_tier: "normal".to_string(),
            estimated_usd: 100,
            operator_prompt: None,
            inbox_messages: vec![],
            recent_turns: vec![],
            memory: crate::brain::types::MemorySnapshot {
                facts: vec![],
                episodes: vec![],
            },
            skills: vec![],
            tool_sources: vec![],
            available_actions: vec![],
        };
        let output = client.generate_turn(&input).await.unwrap();
        assert_eq!(output.integrity, crate::brain::types::Integrity::Malformed);
        assert_eq!(
            output.next_actions[0].reason.as_deref(),
            Some("missing_api_key")
        );
    }
}
