//! The lint rule registry (§4.3): a flat table of rule metadata, not a
//! class hierarchy — each rule is a record the engine's single loop
//! evaluates against every target/section. Message templates echo the
//! language of the original registry (`voice_part_lint_rules.py`) where
//! the two overlap; §4.3's 13 codes are authoritative per SPEC_FULL §9.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy)]
pub struct LintRuleSpec {
    pub code: &'static str,
    pub name: &'static str,
    pub definition: &'static str,
    pub fail_condition: &'static str,
    pub suggestion: &'static str,
    pub message_template: &'static str,
    pub severity: &'static str,
}

macro_rules! rule {
    ($code:expr, $name:expr, $definition:expr, $fail_condition:expr, $suggestion:expr, $message_template:expr, $severity:expr) => {
        LintRuleSpec {
            code: $code,
            name: $name,
            definition: $definition,
            fail_condition: $fail_condition,
            suggestion: $suggestion,
            message_template: $message_template,
            severity: $severity,
        }
    };
}

lazy_static::lazy_static! {
    pub static ref LINT_RULE_SPECS: BTreeMap<&'static str, LintRuleSpec> = {
        let mut m = BTreeMap::new();
        for spec in ALL_RULES.iter() {
            m.insert(spec.code, *spec);
        }
        m
    };
}

pub const ALL_RULES: &[LintRuleSpec] = &[
    rule!(
        "plan_requires_sections",
        "Plan requires a sections timeline",
        "Fires when a target has no sections but the source part has chord regions or NEEDS_SPLIT regions.",
        "target.sections is empty and the part contains chord or NEEDS_SPLIT regions",
        "Add a sections timeline covering the target's sung span.",
        "Target {voice_part_id} in part {part_index} needs an explicit sections timeline because the part contains chord regions.",
        "error"
    ),
    rule!(
        "mixed_region_requires_sections",
        "Plan requires sections for mixed regions",
        "Fires when a target has no sections but the part mixes RESOLVED with UNASSIGNED_SOURCE regions.",
        "target.sections is empty and the part mixes RESOLVED and UNASSIGNED_SOURCE regions",
        "Add a sections timeline that explicitly handles the unassigned-source ranges.",
        "Target {voice_part_id} in part {part_index} mixes resolved and unassigned-source regions; a sections timeline is required.",
        "error"
    ),
    rule!(
        "section_timeline_contiguous_no_gaps",
        "Section timeline must be contiguous",
        "Fires when sections for one target are out-of-order, overlap, or have gaps.",
        "sections for a target do not form a contiguous, non-overlapping cover",
        "Re-order or adjust section boundaries so they form a contiguous cover with no gaps or overlaps.",
        "Target {voice_part_id} in part {part_index} has a non-contiguous section timeline.",
        "error"
    ),
    rule!(
        "trivial_method_requires_equal_chord_voice_part_count",
        "Trivial chord split requires matching lane count",
        "Fires when a SPLIT_CHORDS_SELECT_NOTES section uses method=trivial but the source chord's max simultaneous note count does not equal the number of target lanes consuming this section.",
        "expected_simultaneous_note_count != target_lane_count",
        "Use method=ranked with explicit rank_index, or add/remove target lanes to match the chord's note count.",
        "Section {start_measure}-{end_measure} of target {voice_part_id} expects {expected_simultaneous_note_count} simultaneous notes but only {target_lane_count} target lanes consume it.",
        "error"
    ),
    rule!(
        "cross_staff_melody_source_when_local_available",
        "Cross-staff melody source with local alternative",
        "Fires when a derive section pulls melody from a different part while the target part has local sung material in range.",
        "melody_source.part_index != target.part_index and the target part has native sung notes in range",
        "Prefer a melody_source within the same part when local material exists.",
        "Section {start_measure}-{end_measure} of target {voice_part_id} pulls melody from part {source_part_index} although part {part_index} has native material in range.",
        "warning"
    ),
    rule!(
        "cross_staff_lyric_source_with_stronger_local_alternative",
        "Cross-staff lyric source with stronger local alternative",
        "Fires when a derive section pulls lyrics from a different part while the target part has local word lyrics in range.",
        "lyric_source.part_index != target.part_index and the target part has native word-lyric notes in range",
        "Prefer a lyric_source within the same part when local word lyrics exist.",
        "Section {start_measure}-{end_measure} of target {voice_part_id} pulls lyrics from part {source_part_index} although part {part_index} has local word lyrics in range.",
        "warning"
    ),
    rule!(
        "extension_only_lyric_source_with_word_alternative",
        "Extension-only lyric source with word alternative",
        "Fires when the chosen same-part lyric source has only '+' extension lyrics in range and a sibling has real words.",
        "lyric_source has extension_lyric_note_count > 0 and word_lyric_note_count == 0, and a sibling voice-part has word_lyric_note_count > 0",
        "Choose the sibling voice-part with real word lyrics as the lyric source.",
        "Lyric source {source_voice_part_id} for target {voice_part_id} has only extension lyrics; sibling {suggested_lyric_source} has word lyrics.",
        "warning"
    ),
    rule!(
        "empty_lyric_source_with_word_alternative",
        "Empty lyric source with word alternative",
        "Fires when the chosen same-part lyric source has no lyrics in range and a sibling has real words.",
        "lyric_source has sung_note_count > 0 and word_lyric_note_count == 0 and extension_lyric_note_count == 0, and a sibling has word_lyric_note_count > 0",
        "Choose the sibling voice-part with word lyrics as the lyric source.",
        "Lyric source {source_voice_part_id} for target {voice_part_id} has no lyrics at all; sibling {suggested_lyric_source} has word lyrics.",
        "warning"
    ),
    rule!(
        "weak_lyric_source_with_better_alternative",
        "Weak lyric source with stronger alternative",
        "Fires when the chosen lyric source's word-coverage ratio is below a configured floor while a sibling exceeds it by a configured delta.",
        "lyric_source.word_lyric_coverage_ratio <= weak_max_ratio and a sibling exceeds it by >= min_ratio_delta and >= min_word_delta words",
        "Switch the lyric source to the stronger sibling.",
        "Lyric source {source_voice_part_id} for target {voice_part_id} has weak word coverage ({word_lyric_coverage_ratio}); sibling {suggested_lyric_source} is substantially stronger.",
        "warning"
    ),
    rule!(
        "lyric_source_without_target_notes",
        "Lyric source without target notes",
        "Fires when a derive section supplies a lyric source but no melody source, and the target lane has no native sung notes in the range.",
        "lyric_source is set, melody_source is unset, and the target has no native sung notes in range",
        "Supply a melody_source, or restrict the lyric_source range to where the target already has sung notes.",
        "Section {start_measure}-{end_measure} of target {voice_part_id} supplies a lyric source but the target has no native sung notes in range.",
        "error"
    ),
    rule!(
        "no_rest_when_target_has_native_notes",
        "Rest section overlaps native notes",
        "Fires when a rest section overlaps measures where the target lane has native sung notes.",
        "a rest-mode section's range overlaps measures with target native sung notes",
        "Narrow the rest section to exclude measures where the target already has sung material, or switch to a derive section.",
        "Rest section {start_measure}-{end_measure} of target {voice_part_id} overlaps measures with native sung notes.",
        "warning"
    ),
    rule!(
        "same_clef_claim_coverage",
        "Targets must jointly cover all sung measures",
        "Fires when the union of derive-section ranges across the targets of a part misses a sung measure.",
        "a sung measure of the part is not covered by any target's derive sections",
        "Add a target or section covering the missing measure.",
        "Part {part_index} has sung measure {measure} not covered by any target's derive sections.",
        "error"
    ),
    rule!(
        "same_part_target_completeness",
        "Sibling targets must be named together",
        "Fires when the targets of a part name at least one non-default sibling but omit others.",
        "at least one non-default sibling voice-part of a part is targeted and at least one other is not",
        "Add the missing sibling voice-parts as targets, or rely on the sibling generator.",
        "Part {part_index} targets {voice_part_id} but omits sibling voice-part(s) {missing_siblings}.",
        "warning"
    ),
];

/// A human-readable bulleted listing of all rules, for agent instructions.
pub fn render_lint_rules_for_prompt() -> String {
    let mut out = String::new();
    for spec in ALL_RULES {
        out.push_str(&format!(
            "- **{}** ({}): {}\n  Fails when: {}\n  Suggestion: {}\n",
            spec.code, spec.name, spec.definition, spec.fail_condition, spec.suggestion
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_thirteen_rules() {
        assert_eq!(ALL_RULES.len(), 13);
        assert_eq!(LINT_RULE_SPECS.len(), 13);
    }

    #[test]
    fn registry_lookup_by_code() {
        let spec = LINT_RULE_SPECS.get("plan_requires_sections").unwrap();
        assert_eq!(spec.name, "Plan requires a sections timeline");
    }

    #[test]
    fn render_lint_rules_for_prompt_lists_every_code() {
        let rendered = render_lint_rules_for_prompt();
        for spec in ALL_RULES {
            assert!(rendered.contains(spec.code), "missing {} in rendered prompt", spec.code);
        }
    }
}
