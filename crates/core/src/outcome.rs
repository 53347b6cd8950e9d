//! The `action_required` envelope.
//!
//! Mirrors the original implementation's convention of returning a plain
//! dict with a `status: "action_required"` field instead of raising —
//! every expected failure mode in this crate (malformed plan, failed
//! lint, failed validation, preflight refusal) is one of these, not a
//! [`crate::error::VoicePartError`].

use serde_json::{Map, Value};

/// A structured "this call cannot proceed" response.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActionRequired {
    pub status: &'static str,
    pub action: String,
    pub code: String,
    pub message: String,
    #[serde(flatten)]
    pub context: Map<String, Value>,
}

impl ActionRequired {
    pub fn new(action: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: "action_required",
            action: action.into(),
            code: code.into(),
            message: message.into(),
            context: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

impl std::fmt::Display for ActionRequired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.action, self.code, self.message)
    }
}

/// Shorthand for a plan-parser rejection: `action = "plan_invalid"`.
pub fn plan_invalid(code: &str, message: impl Into<String>) -> ActionRequired {
    ActionRequired::new("plan_invalid", code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_inserts_context_fields() {
        let ar = ActionRequired::new("plan_invalid", "non_contiguous_sections", "gap found")
            .with("target_index", 2);
        assert_eq!(ar.context.get("target_index").and_then(|v| v.as_i64()), Some(2));
    }

    #[test]
    fn display_includes_action_code_and_message() {
        let ar = plan_invalid("invalid_plan_payload", "targets missing");
        let rendered = ar.to_string();
        assert!(rendered.contains("plan_invalid"));
        assert!(rendered.contains("invalid_plan_payload"));
        assert!(rendered.contains("targets missing"));
    }
}
