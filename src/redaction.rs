//! Secret redaction applied to everything the store persists as free text.
//!
//! Two layers: key-based redaction for metadata objects (any value stored
//! under a secret-looking key is replaced wholesale) and pattern-based
//! redaction for strings (bearer tokens, 0x-prefixed 32-byte hex, signed
//! header forms). Patterns are compiled once via a lazy singleton.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

/// Keys whose values are always redacted, wherever they appear in metadata.
static SECRET_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(api[_-]?key|private[_-]?key|passphrase|authorization|secret|token|ciphertext|salt|iv|tag|signature)$",
    )
    .unwrap()
});

struct TextPattern {
    regex: Regex,
}

/// Substring patterns scrubbed from free text. Order matters: the most
/// specific forms run first.
static TEXT_PATTERNS: Lazy<Vec<TextPattern>> = Lazy::new(|| {
    vec![
        // Bearer tokens
        TextPattern {
            regex: Regex::new(r"Bearer\s+[A-Za-z0-9_\-\.=]+").unwrap(),
        },
        // 32-byte hex blobs with 0x prefix (private keys, raw signatures)
        TextPattern {
            regex: Regex::new(r"0x[0-9a-fA-F]{64}").unwrap(),
        },
        // Named header forms: x-nonce: ..., signature=...
        TextPattern {
            regex: Regex::new(r"(?i)\b(x-)?(nonce|signature)\s*[:=]\s*\S+").unwrap(),
        },
    ]
});

/// Redact secrets from a free-text string.
pub fn redact_text(input: &str) -> String {
    let mut out = input.to_string();
    for pattern in TEXT_PATTERNS.iter() {
        out = pattern.regex.replace_all(&out, REDACTED).to_string();
    }
    out
}

/// Redact a JSON value in place: secret keys lose their values entirely,
/// string leaves get pattern redaction.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if SECRET_KEY_PATTERN.is_match(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact_value(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        Value::String(s) => Value::String(redact_text(s)),
        other => other.clone(),
    }
}

/// Redact and serialize a metadata value for storage.
pub fn redact_metadata_json(value: &Value) -> String {
    redact_value(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bearer_token_redacted() {
        let input = "called api with Authorization: Bearer abc123def456";
        let out = redact_text(input);
        assert!(!out.contains("abc123def456"));
        assert!(out.contains(REDACTED));
    }

    #[test]
    fn test_hex_private_key_redacted() {
        let input = format!("leaked key 0x{}", "ab".repeat(32));
        let out = redact_text(&input);
        assert!(!out.contains("abababab"));
    }

    #[test]
    fn test_nonce_header_redacted() {
        let out = redact_text("x-nonce: 938271 something");
        assert!(!out.contains("938271"));
    }

    #[test]
    fn test_signature_assignment_redacted() {
        let out = redact_text("signature=deadbeefcafe");
        assert!(!out.contains("deadbeefcafe"));
    }

    #[test]
    fn test_plain_text_untouched() {
        let input = "queue depth is 12 and the tier is normal";
        assert_eq!(redact_text(input), input);
    }

    #[test]
    fn test_secret_keys_redacted_in_metadata() {
        let value = json!({
            "api_key": "sk-live-verysecret",
            "privateKey": "0xdeadbeef",
            "passphrase": "hunter2hunter2",
            "detail": {"token": "abc", "count": 3},
            "plain": "hello",
        });
        let out = redact_value(&value);
        assert_eq!(out["api_key"], REDACTED);
        assert_eq!(out["privateKey"], REDACTED);
        assert_eq!(out["passphrase"], REDACTED);
        assert_eq!(out["detail"]["token"], REDACTED);
        assert_eq!(out["detail"]["count"], 3);
        assert_eq!(out["plain"], "hello");
    }

    #[test]
    fn test_nested_array_strings_scrubbed() {
        let value = json!({"log": [format!("sent Bearer tok_{}", "x".repeat(30))]});
        let out = redact_value(&value);
        let entry = out["log"][0].as_str().unwrap();
        assert!(!entry.contains("tok_"));
    }
}
