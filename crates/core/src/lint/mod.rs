//! Plan Linter (§4.3): cross-references a parsed plan against the
//! analyzed score and emits structured findings before execution.

mod engine;
mod rules;

pub use engine::{lint_plan, LintFinding};
pub use rules::{render_lint_rules_for_prompt, LintRuleSpec, ALL_RULES, LINT_RULE_SPECS};
