//! Voice-Part Preprocessing Engine.
//!
//! Transforms a multi-voice [`Score`] plus a declarative [`plan::Plan`]
//! payload into a materialized single-voice "derived part", through the
//! pipeline Plan Parser → Plan Linter → Plan Executor → Sibling Generator
//! → Materializer. See each module's doc-comment for its component of
//! the design; this file wires the public entry points named in §6 of
//! the specification.

pub mod analyzer;
pub mod candidates;
pub mod config;
pub mod coverage;
pub mod error;
pub mod exec;
pub mod lint;
pub mod materialize;
pub mod outcome;
pub mod plan;
pub mod preflight;
pub mod repair;
pub mod siblings;
pub mod types;
pub mod validate;

use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use analyzer::{analyze_part, PartAnalysis};
use candidates::{measure_lyric_coverage, measure_presence, source_candidate_hints, MeasureLyricCoverage, MeasurePresence, TargetCandidateHints};
use exec::{execute_plan, TargetOutcome};
use lint::lint_plan;
use outcome::ActionRequired;
use plan::parse_voice_part_plan;
use types::Score;

pub use preflight::synthesize_preflight_action_required;
pub use lint::{render_lint_rules_for_prompt, LintFinding, LintRuleSpec, ALL_RULES, LINT_RULE_SPECS};

/// Successful result of [`preprocess_voice_parts`]. Flattens the primary
/// target's outcome fields to the top level per §6's success shape;
/// `additional_targets` carries any further targets when the plan names
/// more than one.
#[derive(Debug, Clone, Serialize)]
pub struct PreprocessOutcome {
    pub score: Score,
    #[serde(flatten)]
    pub primary: TargetOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_targets: Vec<TargetOutcome>,
}

/// Run the full pipeline: parse `plan` against `score`, lint it, execute
/// it, and materialize the result. `score` is never mutated; the
/// returned [`PreprocessOutcome::score`] is a separate, transformed
/// clone (§9 "deep clone discipline").
pub fn preprocess_voice_parts(score: &Score, plan: &Value) -> Result<PreprocessOutcome, ActionRequired> {
    if score.parts.is_empty() {
        return Err(ActionRequired::new("execution_failed", "missing_score_parts", "score has no parts to derive from"));
    }

    let analyses: Vec<PartAnalysis> = score.parts.iter().enumerate().map(|(i, part)| analyze_part(part, i)).collect();

    info!("parsing voice-part plan");
    let parsed_plan = parse_voice_part_plan(plan, score, &analyses)?;

    info!("linting plan with {} target(s)", parsed_plan.targets.len());
    let findings = lint_plan(&parsed_plan, score, &analyses);
    if !findings.is_empty() {
        warn!("plan lint failed with {} finding(s)", findings.len());
        let findings_value = serde_json::to_value(&findings).unwrap_or(Value::Array(Vec::new()));
        return Err(ActionRequired::new("plan_lint_failed", "plan_lint_failed", "plan failed lint validation")
            .with("lint_findings", findings_value));
    }

    info!("executing plan");
    let (materialized_score, mut outcomes) = execute_plan(score, &parsed_plan)?;
    let primary = outcomes.remove(0);

    Ok(PreprocessOutcome { score: materialized_score, primary, additional_targets: outcomes })
}

/// The Score Analyzer's output for every part, plus the Analyze API
/// extras named in §6: ranked alternative-source hints, per-measure
/// lyric coverage, and per-measure staff/voice presence.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreVoicePartAnalysis {
    pub parts: Vec<PartAnalysis>,
    pub source_candidate_hints: Vec<TargetCandidateHints>,
    pub measure_lyric_coverage: Vec<MeasureLyricCoverage>,
    pub measure_presence: Vec<MeasurePresence>,
}

/// Analyze every part of `score` without requiring a plan. `verse_number`
/// is accepted for interface parity with the original implementation but
/// does not affect analysis — verse selection only matters once lyric
/// propagation runs.
pub fn analyze_score_voice_parts(score: &Score, _verse_number: Option<&str>) -> ScoreVoicePartAnalysis {
    let analyses: Vec<PartAnalysis> = score.parts.iter().enumerate().map(|(i, part)| analyze_part(part, i)).collect();
    let hints = source_candidate_hints(score, &analyses);
    let coverage = measure_lyric_coverage(score, &analyses);
    let presence = measure_presence(score);
    ScoreVoicePartAnalysis { parts: analyses, source_candidate_hints: hints, measure_lyric_coverage: coverage, measure_presence: presence }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use types::{Note, Part};

    fn note(voice: &str, measure: i64, offset: f64, pitch: f64, lyric: Option<&str>) -> Note {
        Note {
            offset_beats: offset,
            duration_beats: 1.0,
            pitch_midi: Some(pitch),
            lyric: lyric.map(|s| s.to_string()),
            syllabic: None,
            lyric_is_extended: false,
            is_rest: false,
            tie_type: None,
            voice: voice.to_string(),
            staff: "1".to_string(),
            measure_number: measure,
            lyric_exempt: false,
        }
    }

    fn sample_score() -> Score {
        let part = Part {
            part_id: "P1".to_string(),
            part_name: "SOPRANO ALTO".to_string(),
            notes: vec![
                note("1", 1, 0.0, 72.0, Some("a")),
                note("1", 1, 1.0, 74.0, Some("men")),
                note("2", 1, 0.0, 60.0, None),
                note("2", 1, 1.0, 62.0, None),
            ],
        };
        let mut score = Score::new(Some("Test".to_string()));
        score.parts.push(part);
        score
    }

    #[test]
    fn preprocess_voice_parts_runs_scenario_s1() {
        let score = sample_score();
        let plan_json = json!({
            "targets": [{
                "target": {"part_index": 0, "voice_part_id": "alto"},
                "sections": [{
                    "start_measure": 1,
                    "end_measure": 1,
                    "mode": "derive",
                    "decision_type": "EXTRACT_FROM_VOICE",
                    "melody_source": {"part_index": 0, "voice_part_id": "alto"},
                    "lyric_source": {"part_index": 0, "voice_part_id": "soprano"},
                    "lyric_strategy": "strict_onset"
                }]
            }]
        });

        let outcome = preprocess_voice_parts(&score, &plan_json).unwrap();
        assert!(matches!(outcome.primary.status, "ready" | "ready_with_warnings"));
        assert_eq!(outcome.primary.part_index, 0);
        assert!(outcome.score.parts.len() >= 2);
    }

    #[test]
    fn preprocess_voice_parts_rejects_malformed_plan() {
        let score = sample_score();
        let err = preprocess_voice_parts(&score, &json!("not a plan")).unwrap_err();
        assert_eq!(err.code, "invalid_plan_payload");
    }

    #[test]
    fn preprocess_voice_parts_surfaces_lint_failures() {
        let score = sample_score();
        let plan_json = json!({
            "targets": [{
                "target": {"part_index": 0, "voice_part_id": "alto"},
                "sections": [{
                    "start_measure": 1,
                    "end_measure": 1,
                    "mode": "derive",
                    "decision_type": "SPLIT_CHORDS_SELECT_NOTES",
                    "melody_source": {"part_index": 0, "voice_part_id": "alto"}
                }]
            }]
        });
        let err = preprocess_voice_parts(&score, &plan_json).unwrap_err();
        assert_eq!(err.action, "plan_lint_failed");
        assert!(err.context.get("lint_findings").is_some());
    }

    #[test]
    fn analyze_score_voice_parts_reports_both_lanes_and_hints() {
        let score = sample_score();
        let analysis = analyze_score_voice_parts(&score, None);
        assert_eq!(analysis.parts.len(), 1);
        assert_eq!(analysis.parts[0].voice_parts.len(), 2);
        assert_eq!(analysis.source_candidate_hints.len(), 2);
        assert!(!analysis.measure_lyric_coverage.is_empty());
        assert!(!analysis.measure_presence.is_empty());
    }
}
