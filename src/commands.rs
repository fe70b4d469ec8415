//! Operator command parsing.
//!
//! Inbound message content may carry a typed JSON command. This parser is
//! offered to host surfaces that want to inject operator commands; the
//! autonomy tick itself hands raw inbox messages to the brain and never
//! calls it.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    SelfMod { target_path: String, content: String },
    Replicate { plan: Value },
    Noop,
}

/// Parse message content as an operator command. Unrecognized content is
/// ignored (returns None), never an error.
pub fn parse_operator_command(content: &str) -> Option<OperatorCommand> {
    let value: Value = serde_json::from_str(content.trim()).ok()?;
    match value.get("type").and_then(Value::as_str)? {
        "self_mod" => {
            let target_path = value.get("targetPath").and_then(Value::as_str)?;
            let content = value.get("content").and_then(Value::as_str)?;
            Some(OperatorCommand::SelfMod {
                target_path: target_path.to_string(),
                content: content.to_string(),
            })
        }
        "replicate" => Some(OperatorCommand::Replicate {
            plan: value.get("plan").cloned().unwrap_or(Value::Null),
        }),
        "noop" => Some(OperatorCommand::Noop),
        _ => None,
    }
}
