//! Turn output validation.
//!
//! The validator is the single enforcement point for the action allowlist
//! and the numeric bounds on a plan. It never rejects a turn outright:
//! a plan that fails validation is flagged `malformed` and the cleaned
//! output always carries at least one executable action.

use std::collections::HashSet;

use crate::brain::types::{Action, ActionType, Integrity, TurnOutput, ALLOWED_ACTION_TYPES};

/// Fallback summary when the brain returned none.
pub const DEFAULT_SUMMARY: &str = "Autonomous turn completed.";

#[derive(Debug, Clone)]
pub struct ValidatorLimits {
    pub max_actions: usize,
    pub max_sleep_ms: i64,
}

#[derive(Debug, Clone)]
pub struct ValidatorPolicy {
    pub strict_allowlist: bool,
    pub allowlist: HashSet<ActionType>,
}

impl Default for ValidatorPolicy {
    fn default() -> Self {
        ValidatorPolicy {
            strict_allowlist: true,
            allowlist: ALLOWED_ACTION_TYPES.iter().copied().collect(),
        }
    }
}

/// Validation verdict plus the cleaned output.
#[derive(Debug, Clone)]
pub struct ValidatedTurn {
    pub malformed: bool,
    pub errors: Vec<String>,
    pub output: TurnOutput,
}

/// Validate and normalize a brain plan.
///
/// Idempotent: feeding the returned output back through yields the same
/// output with `malformed == false` and no errors.
pub fn validate_turn(
    output: &TurnOutput,
    limits: &ValidatorLimits,
    policy: &ValidatorPolicy,
) -> ValidatedTurn {
    let mut errors = Vec::new();
    // Structural errors make the turn malformed even under a lax allowlist.
    let mut structural_errors = 0usize;

    if output.summary.trim().is_empty() {
        errors.push("missing_summary".to_string());
        structural_errors += 1;
    }
    if output.next_actions.is_empty() {
        errors.push("missing_actions".to_string());
        structural_errors += 1;
    }
    if output.integrity == Integrity::Malformed {
        errors.push("provider_marked_malformed".to_string());
        structural_errors += 1;
    }

    let max_actions = limits.max_actions.max(1);
    let mut actions: Vec<Action> = Vec::new();
    for action in output.next_actions.iter().take(max_actions) {
        match action.action_type() {
            Some(kind) if policy.allowlist.contains(&kind) => actions.push(action.clone()),
            _ => errors.push(format!("action_not_allowed:{}", action.kind)),
        }
    }

    if actions.is_empty() {
        actions.push(Action::noop("no_actions"));
    }

    let sleep_ms = output
        .sleep_ms
        .map(|ms| ms.clamp(0, limits.max_sleep_ms.max(0)));

    let malformed = if policy.strict_allowlist {
        !errors.is_empty()
    } else {
        structural_errors > 0
    };

    let summary = {
        let trimmed = output.summary.trim();
        if trimmed.is_empty() {
            DEFAULT_SUMMARY.to_string()
        } else {
            trimmed.to_string()
        }
    };

    ValidatedTurn {
        malformed,
        errors,
        output: TurnOutput {
            summary,
            next_actions: actions,
            memory_writes: output.memory_writes.clone(),
            sleep_ms,
            integrity: Integrity::Ok,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn limits() -> ValidatorLimits {
        ValidatorLimits {
            max_actions: 5,
            max_sleep_ms: 3_600_000,
        }
    }

    fn output_with(actions: Vec<Action>) -> TurnOutput {
        TurnOutput {
            summary: "plan".to_string(),
            next_actions: actions,
            memory_writes: None,
            sleep_ms: None,
            integrity: Integrity::Ok,
        }
    }

    fn action(kind: &str) -> Action {
        Action {
            kind: kind.to_string(),
            reason: None,
            params: Value::Object(Default::default()),
        }
    }

    #[test]
    fn test_clean_plan_passes() {
        let output = output_with(vec![action("record_fact"), action("noop")]);
        let result = validate_turn(&output, &limits(), &ValidatorPolicy::default());
        assert!(!result.malformed);
        assert!(result.errors.is_empty());
        assert_eq!(result.output.next_actions.len(), 2);
    }

    #[test]
    fn test_disallowed_kind_filtered_and_flagged_when_strict() {
        let output = output_with(vec![action("exec"), action("noop")]);
        let result = validate_turn(&output, &limits(), &ValidatorPolicy::default());
        assert!(result.malformed);
        assert!(result
            .errors
            .contains(&"action_not_allowed:exec".to_string()));
        assert_eq!(result.output.next_actions.len(), 1);
        assert_eq!(result.output.next_actions[0].kind, "noop");
    }

    #[test]
    fn test_disallowed_kind_not_malformed_when_lax() {
        let output = output_with(vec![action("exec"), action("noop")]);
        let policy = ValidatorPolicy {
            strict_allowlist: false,
            ..ValidatorPolicy::default()
        };
        let result = validate_turn(&output, &limits(), &policy);
        assert!(!result.malformed);
        assert!(!result.errors.is_empty());
        assert_eq!(result.output.next_actions[0].kind, "noop");
    }

    #[test]
    fn test_truncation_preserves_order() {
        let output = output_with(vec![
            action("noop"),
            action("record_fact"),
            action("record_episode"),
        ]);
        let tight = ValidatorLimits {
            max_actions: 2,
            max_sleep_ms: 1000,
        };
        let result = validate_turn(&output, &tight, &ValidatorPolicy::default());
        assert_eq!(result.output.next_actions.len(), 2);
        assert_eq!(result.output.next_actions[0].kind, "noop");
        assert_eq!(result.output.next_actions[1].kind, "record_fact");
    }

    #[test]
    fn test_zero_max_actions_keeps_one() {
        let output = output_with(vec![action("noop"), action("record_fact")]);
        let tight = ValidatorLimits {
            max_actions: 0,
            max_sleep_ms: 1000,
        };
        let result = validate_turn(&output, &tight, &ValidatorPolicy::default());
        assert_eq!(result.output.next_actions.len(), 1);
    }

    #[test]
    fn test_sleep_clamped() {
        let mut output = output_with(vec![action("noop")]);
        output.sleep_ms = Some(10_000_000);
        let result = validate_turn(&output, &limits(), &ValidatorPolicy::default());
        assert_eq!(result.output.sleep_ms, Some(3_600_000));

        output.sleep_ms = Some(-50);
        let result = validate_turn(&output, &limits(), &ValidatorPolicy::default());
        assert_eq!(result.output.sleep_ms, Some(0));
    }

    #[test]
    fn test_missing_summary_and_actions() {
        let output = TurnOutput {
            summary: "  ".to_string(),
            next_actions: vec![],
            memory_writes: None,
            sleep_ms: None,
            integrity: Integrity::Ok,
        };
        let result = validate_turn(&output, &limits(), &ValidatorPolicy::default());
        assert!(result.malformed);
        assert!(result.errors.contains(&"missing_summary".to_string()));
        assert!(result.errors.contains(&"missing_actions".to_string()));
        assert_eq!(result.output.summary, DEFAULT_SUMMARY);
        assert_eq!(result.output.next_actions[0].kind, "noop");
        assert_eq!(
            result.output.next_actions[0].reason.as_deref(),
            Some("no_actions")
        );
    }

    #[test]
    fn test_provider_malformed_flag_counts() {
        let mut output = output_with(vec![action("noop")]);
        output.integrity = Integrity::Malformed;
        let result = validate_turn(&output, &limits(), &ValidatorPolicy::default());
        assert!(result.malformed);
        assert!(result
            .errors
            .contains(&"provider_marked_malformed".to_string()));
    }

    #[test]
    fn test_validator_idempotent() {
        let output = TurnOutput {
            summary: "".to_string(),
            next_actions: vec![action("exec"), action("record_fact")],
            memory_writes: None,
            sleep_ms: Some(99_999_999),
            integrity: Integrity::Malformed,
        };
        let first = validate_turn(&output, &limits(), &ValidatorPolicy::default());
        let second = validate_turn(&first.output, &limits(), &ValidatorPolicy::default());
        assert!(!second.malformed);
        assert!(second.errors.is_empty());
        assert_eq!(second.output, first.output);
    }
}
