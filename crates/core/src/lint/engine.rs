//! The Plan Linter (§4.3): a loop over rules over targets over sections,
//! accumulating findings. Never short-circuits — every rule is evaluated
//! against every applicable target/section so callers see the full
//! diagnostic set in one pass.

use std::collections::{BTreeSet, HashMap};

use serde_json::{json, Map, Value};

use crate::analyzer::PartAnalysis;
use crate::config;
use crate::coverage::compute_coverage;
use crate::plan::{DecisionType, Method, Plan, SectionMode, Target};
use crate::types::{RegionStatus, Score, DEFAULT_VOICE};

use super::rules::LINT_RULE_SPECS;

#[derive(Debug, Clone, serde::Serialize)]
pub struct LintFinding {
    pub code: String,
    pub name: String,
    pub message: String,
    pub severity: String,
    pub target_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_index: Option<usize>,
    #[serde(flatten)]
    pub failing_attributes: Map<String, Value>,
}

fn emit(code: &str, target_index: usize, section_index: Option<usize>, attrs: Map<String, Value>) -> LintFinding {
    let spec = LINT_RULE_SPECS.get(code).expect("unknown lint rule code");
    let message = render_template(spec.message_template, &attrs);
    LintFinding {
        code: code.to_string(),
        name: spec.name.to_string(),
        message,
        severity: spec.severity.to_string(),
        target_index,
        section_index,
        failing_attributes: attrs,
    }
}

fn render_template(template: &str, attrs: &Map<String, Value>) -> String {
    let mut out = template.to_string();
    for (key, value) in attrs {
        let token = format!("{{{}}}", key);
        let rendered = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        out = out.replace(&token, &rendered);
    }
    out
}

/// Run every rule against every target/section of `plan`. Returns all
/// findings, in rule-registration order across targets, then rule-order
/// within target (§5 Ordering Guarantees).
pub fn lint_plan(plan: &Plan, score: &Score, analyses: &[PartAnalysis]) -> Vec<LintFinding> {
    let mut findings = Vec::new();

    for (target_index, target) in plan.targets.iter().enumerate() {
        findings.extend(check_requires_sections(target, target_index, analyses));
        findings.extend(check_contiguous_timeline(target, target_index));

        if let Some(sections) = &target.sections {
            for (section_index, section) in sections.iter().enumerate() {
                findings.extend(check_trivial_method_chord_count(
                    plan, target, section, target_index, section_index, score,
                ));
                findings.extend(check_cross_staff_melody(target, section, target_index, section_index, score, analyses));
                findings.extend(check_cross_staff_lyric(target, section, target_index, section_index, score, analyses));
                findings.extend(check_weak_lyric_sources(target, section, target_index, section_index, score, analyses));
                findings.extend(check_lyric_source_without_target_notes(target, section, target_index, section_index, score));
                findings.extend(check_rest_overlaps_native(target, section, target_index, section_index, score));
            }
        }
    }

    findings.extend(check_same_clef_claim_coverage(plan, analyses));
    findings.extend(check_same_part_target_completeness(plan, analyses));

    findings
}

fn target_analysis<'a>(target: &Target, analyses: &'a [PartAnalysis]) -> Option<&'a PartAnalysis> {
    analyses.get(target.target.part_index)
}

fn check_requires_sections(target: &Target, target_index: usize, analyses: &[PartAnalysis]) -> Vec<LintFinding> {
    if target.sections.is_some() {
        return Vec::new();
    }
    let Some(analysis) = target_analysis(target, analyses) else { return Vec::new() };

    let has_chord_or_needs_split = !analysis.chord_measures.is_empty()
        || analysis
            .regions
            .values()
            .flatten()
            .any(|r| r.status == RegionStatus::NeedsSplit);
    if has_chord_or_needs_split {
        let attrs = attrs([("voice_part_id", json!(target.target.voice_part_id)), ("part_index", json!(target.target.part_index))]);
        return vec![emit("plan_requires_sections", target_index, None, attrs)];
    }

    let statuses: BTreeSet<RegionStatus> = analysis.regions.values().flatten().map(|r| r.status).collect();
    if statuses.contains(&RegionStatus::Resolved) && statuses.contains(&RegionStatus::UnassignedSource) {
        let attrs = attrs([("voice_part_id", json!(target.target.voice_part_id)), ("part_index", json!(target.target.part_index))]);
        return vec![emit("mixed_region_requires_sections", target_index, None, attrs)];
    }

    Vec::new()
}

fn check_contiguous_timeline(target: &Target, target_index: usize) -> Vec<LintFinding> {
    let Some(sections) = &target.sections else { return Vec::new() };
    let mut sorted: Vec<_> = sections.iter().collect();
    sorted.sort_by_key(|s| s.start_measure);
    for pair in sorted.windows(2) {
        if pair[0].end_measure + 1 != pair[1].start_measure {
            let attrs = attrs([("voice_part_id", json!(target.target.voice_part_id)), ("part_index", json!(target.target.part_index))]);
            return vec![emit("section_timeline_contiguous_no_gaps", target_index, None, attrs)];
        }
    }
    Vec::new()
}

fn check_trivial_method_chord_count(
    plan: &Plan,
    target: &Target,
    section: &crate::plan::Section,
    target_index: usize,
    section_index: usize,
    score: &Score,
) -> Vec<LintFinding> {
    if section.decision_type != DecisionType::SplitChordsSelectNotes || section.method != Method::Trivial {
        return Vec::new();
    }
    let Some(melody_source) = &section.melody_source else { return Vec::new() };
    let Some(source_part) = score.parts.get(melody_source.part_index) else { return Vec::new() };

    let expected = max_simultaneous_notes_in_range(source_part, section.start_measure, section.end_measure);

    let target_lane_count = plan
        .targets
        .iter()
        .filter(|t| t.target.part_index == target.target.part_index)
        .filter(|t| {
            t.sections
                .as_ref()
                .is_some_and(|secs| secs.iter().any(|s| s.overlaps_range(section.start_measure, section.end_measure) && s.decision_type == DecisionType::SplitChordsSelectNotes))
        })
        .count();

    if expected != target_lane_count {
        let attrs = attrs([
            ("voice_part_id", json!(target.target.voice_part_id)),
            ("start_measure", json!(section.start_measure)),
            ("end_measure", json!(section.end_measure)),
            ("expected_simultaneous_note_count", json!(expected)),
            ("target_lane_count", json!(target_lane_count)),
        ]);
        return vec![emit("trivial_method_requires_equal_chord_voice_part_count", target_index, Some(section_index), attrs)];
    }
    Vec::new()
}

fn max_simultaneous_notes_in_range(part: &crate::types::Part, start: i64, end: i64) -> usize {
    let mut groups: HashMap<(i64, u64), usize> = HashMap::new();
    for note in &part.notes {
        if note.is_rest || !note.in_measure_range((start, end)) {
            continue;
        }
        let key = (note.measure_number, crate::types::round6(note.offset_beats).to_bits());
        *groups.entry(key).or_insert(0) += 1;
    }
    groups.values().copied().max().unwrap_or(0)
}

fn check_cross_staff_melody(
    target: &Target,
    section: &crate::plan::Section,
    target_index: usize,
    section_index: usize,
    score: &Score,
    analyses: &[PartAnalysis],
) -> Vec<LintFinding> {
    let Some(melody_source) = &section.melody_source else { return Vec::new() };
    if melody_source.part_index == target.target.part_index {
        return Vec::new();
    }
    if target_has_native_notes_in_range(target, section.start_measure, section.end_measure, score, analyses) {
        let attrs = attrs([
            ("voice_part_id", json!(target.target.voice_part_id)),
            ("part_index", json!(target.target.part_index)),
            ("source_part_index", json!(melody_source.part_index)),
            ("start_measure", json!(section.start_measure)),
            ("end_measure", json!(section.end_measure)),
        ]);
        return vec![emit("cross_staff_melody_source_when_local_available", target_index, Some(section_index), attrs)];
    }
    Vec::new()
}

fn check_cross_staff_lyric(
    target: &Target,
    section: &crate::plan::Section,
    target_index: usize,
    section_index: usize,
    score: &Score,
    analyses: &[PartAnalysis],
) -> Vec<LintFinding> {
    let Some(lyric_source) = &section.lyric_source else { return Vec::new() };
    if lyric_source.part_index == target.target.part_index {
        return Vec::new();
    }
    let has_local_words = target_analysis(target, analyses)
        .and_then(|a| a.voice_part(&target.target.voice_part_id))
        .map(|vp| {
            let part = &score.parts[target.target.part_index];
            compute_coverage(part, &vp.source_voice_id, section.start_measure, section.end_measure).word_lyric_note_count > 0
        })
        .unwrap_or(false);
    if has_local_words {
        let attrs = attrs([
            ("voice_part_id", json!(target.target.voice_part_id)),
            ("part_index", json!(target.target.part_index)),
            ("source_part_index", json!(lyric_source.part_index)),
            ("start_measure", json!(section.start_measure)),
            ("end_measure", json!(section.end_measure)),
        ]);
        return vec![emit("cross_staff_lyric_source_with_stronger_local_alternative", target_index, Some(section_index), attrs)];
    }
    Vec::new()
}

fn target_has_native_notes_in_range(
    target: &Target,
    start: i64,
    end: i64,
    score: &Score,
    analyses: &[PartAnalysis],
) -> bool {
    let Some(vp) = target_analysis(target, analyses).and_then(|a| a.voice_part(&target.target.voice_part_id)) else {
        return false;
    };
    let Some(part) = score.parts.get(target.target.part_index) else { return false };
    part.notes
        .iter()
        .any(|n| !n.is_rest && n.voice == vp.source_voice_id && n.in_measure_range((start, end)))
}

fn check_weak_lyric_sources(
    target: &Target,
    section: &crate::plan::Section,
    target_index: usize,
    section_index: usize,
    score: &Score,
    analyses: &[PartAnalysis],
) -> Vec<LintFinding> {
    let Some(lyric_source) = &section.lyric_source else { return Vec::new() };
    if lyric_source.part_index != target.target.part_index {
        return Vec::new();
    }
    let Some(analysis) = analyses.get(lyric_source.part_index) else { return Vec::new() };
    let Some(chosen_vp) = analysis.voice_part(&lyric_source.voice_part_id) else { return Vec::new() };
    let Some(part) = score.parts.get(lyric_source.part_index) else { return Vec::new() };

    let chosen_stats = compute_coverage(part, &chosen_vp.source_voice_id, section.start_measure, section.end_measure);

    let siblings: Vec<_> = analysis
        .voice_parts
        .iter()
        .filter(|vp| vp.voice_part_id != chosen_vp.voice_part_id && vp.source_voice_id != DEFAULT_VOICE)
        .collect();

    // extension_only_lyric_source_with_word_alternative
    if chosen_stats.extension_lyric_note_count > 0 && chosen_stats.word_lyric_note_count == 0 {
        if let Some(sibling) = siblings.iter().find(|vp| {
            compute_coverage(part, &vp.source_voice_id, section.start_measure, section.end_measure).word_lyric_note_count > 0
        }) {
            let attrs = attrs([
                ("source_voice_part_id", json!(chosen_vp.voice_part_id)),
                ("voice_part_id", json!(target.target.voice_part_id)),
                ("suggested_lyric_source", json!(sibling.voice_part_id)),
            ]);
            return vec![emit("extension_only_lyric_source_with_word_alternative", target_index, Some(section_index), attrs)];
        }
    }

    // empty_lyric_source_with_word_alternative
    if chosen_stats.sung_note_count > 0 && chosen_stats.word_lyric_note_count == 0 && chosen_stats.extension_lyric_note_count == 0 {
        if let Some(sibling) = siblings.iter().find(|vp| {
            compute_coverage(part, &vp.source_voice_id, section.start_measure, section.end_measure).word_lyric_note_count > 0
        }) {
            let attrs = attrs([
                ("source_voice_part_id", json!(chosen_vp.voice_part_id)),
                ("voice_part_id", json!(target.target.voice_part_id)),
                ("suggested_lyric_source", json!(sibling.voice_part_id)),
            ]);
            return vec![emit("empty_lyric_source_with_word_alternative", target_index, Some(section_index), attrs)];
        }
    }

    // weak_lyric_source_with_better_alternative
    let weak_max_ratio = config::env_float("VOICE_PART_WEAK_LYRIC_SOURCE_MAX_WORD_RATIO", 0.35);
    let min_ratio_delta = config::env_float("VOICE_PART_WEAK_LYRIC_SOURCE_MIN_RATIO_DELTA", 0.25);
    let min_word_delta = config::env_int("VOICE_PART_WEAK_LYRIC_SOURCE_MIN_WORD_DELTA", 2);

    if chosen_stats.word_lyric_coverage_ratio <= weak_max_ratio {
        for sibling in &siblings {
            let sibling_stats = compute_coverage(part, &sibling.source_voice_id, section.start_measure, section.end_measure);
            let ratio_gain = sibling_stats.word_lyric_coverage_ratio - chosen_stats.word_lyric_coverage_ratio;
            let word_gain = sibling_stats.word_lyric_note_count as i64 - chosen_stats.word_lyric_note_count as i64;
            if ratio_gain >= min_ratio_delta && word_gain >= min_word_delta {
                let attrs = attrs([
                    ("source_voice_part_id", json!(chosen_vp.voice_part_id)),
                    ("voice_part_id", json!(target.target.voice_part_id)),
                    ("word_lyric_coverage_ratio", json!(chosen_stats.word_lyric_coverage_ratio)),
                    ("suggested_lyric_source", json!(sibling.voice_part_id)),
                ]);
                return vec![emit("weak_lyric_source_with_better_alternative", target_index, Some(section_index), attrs)];
            }
        }
    }

    Vec::new()
}

fn check_lyric_source_without_target_notes(
    target: &Target,
    section: &crate::plan::Section,
    target_index: usize,
    section_index: usize,
    score: &Score,
) -> Vec<LintFinding> {
    if section.lyric_source.is_none() || section.melody_source.is_some() {
        return Vec::new();
    }
    let Some(part) = score.parts.get(target.target.part_index) else { return Vec::new() };
    let vp_source_voice = target.target.voice_part_id.clone();
    let has_native = part
        .notes
        .iter()
        .any(|n| !n.is_rest && n.voice == vp_source_voice && n.in_measure_range((section.start_measure, section.end_measure)));
    if !has_native {
        let attrs = attrs([
            ("voice_part_id", json!(target.target.voice_part_id)),
            ("start_measure", json!(section.start_measure)),
            ("end_measure", json!(section.end_measure)),
            ("native_sung_measure_overlap", json!(false)),
        ]);
        return vec![emit("lyric_source_without_target_notes", target_index, Some(section_index), attrs)];
    }
    Vec::new()
}

fn check_rest_overlaps_native(
    target: &Target,
    section: &crate::plan::Section,
    target_index: usize,
    section_index: usize,
    score: &Score,
) -> Vec<LintFinding> {
    if section.mode != SectionMode::Rest {
        return Vec::new();
    }
    let Some(part) = score.parts.get(target.target.part_index) else { return Vec::new() };
    let has_native = part
        .notes
        .iter()
        .any(|n| !n.is_rest && n.voice == target.target.voice_part_id && n.in_measure_range((section.start_measure, section.end_measure)));
    if has_native {
        let attrs = attrs([
            ("voice_part_id", json!(target.target.voice_part_id)),
            ("start_measure", json!(section.start_measure)),
            ("end_measure", json!(section.end_measure)),
        ]);
        return vec![emit("no_rest_when_target_has_native_notes", target_index, Some(section_index), attrs)];
    }
    Vec::new()
}

fn check_same_clef_claim_coverage(plan: &Plan, analyses: &[PartAnalysis]) -> Vec<LintFinding> {
    let mut findings = Vec::new();
    let part_indices: BTreeSet<usize> = plan.targets.iter().map(|t| t.target.part_index).collect();

    for part_index in part_indices {
        let Some(analysis) = analyses.get(part_index) else { continue };
        let sung_measures: BTreeSet<i64> = analysis
            .regions
            .values()
            .flatten()
            .filter(|r| r.status != RegionStatus::NoMusic)
            .flat_map(|r| r.start_measure..=r.end_measure)
            .collect();

        let covered: BTreeSet<i64> = plan
            .targets
            .iter()
            .filter(|t| t.target.part_index == part_index)
            .flat_map(|t| t.sections.iter().flatten())
            .filter(|s| s.mode == SectionMode::Derive)
            .flat_map(|s| s.start_measure..=s.end_measure)
            .collect();

        for measure in sung_measures.difference(&covered) {
            // Only meaningful when this part actually uses sections-based
            // targets; legacy-action targets have no per-measure ranges.
            if plan.targets.iter().any(|t| t.target.part_index == part_index && t.is_sections_based()) {
                let attrs = attrs([("part_index", json!(part_index)), ("measure", json!(measure))]);
                findings.push(emit("same_clef_claim_coverage", 0, None, attrs));
            }
        }
    }
    findings
}

fn check_same_part_target_completeness(plan: &Plan, analyses: &[PartAnalysis]) -> Vec<LintFinding> {
    let mut findings = Vec::new();
    let part_indices: BTreeSet<usize> = plan.targets.iter().map(|t| t.target.part_index).collect();

    for part_index in part_indices {
        let Some(analysis) = analyses.get(part_index) else { continue };
        let siblings: Vec<&str> = analysis
            .voice_parts
            .iter()
            .filter(|vp| vp.source_voice_id != DEFAULT_VOICE)
            .map(|vp| vp.voice_part_id.as_str())
            .collect();
        if siblings.len() < 2 {
            continue;
        }
        let targeted: BTreeSet<&str> = plan
            .targets
            .iter()
            .filter(|t| t.target.part_index == part_index)
            .map(|t| t.target.voice_part_id.as_str())
            .collect();

        let targeted_siblings: Vec<&str> = siblings.iter().copied().filter(|s| targeted.contains(s)).collect();
        if targeted_siblings.is_empty() || targeted_siblings.len() == siblings.len() {
            continue;
        }
        let missing: Vec<&str> = siblings.iter().copied().filter(|s| !targeted.contains(s)).collect();
        let target_index = plan
            .targets
            .iter()
            .position(|t| t.target.part_index == part_index && targeted_siblings.contains(&t.target.voice_part_id.as_str()))
            .unwrap_or(0);
        let attrs = attrs([
            ("part_index", json!(part_index)),
            ("voice_part_id", json!(targeted_siblings[0])),
            ("missing_siblings", json!(missing.join(", "))),
        ]);
        findings.push(emit("same_part_target_completeness", target_index, None, attrs));
    }
    findings
}

fn attrs<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    let mut m = Map::new();
    for (k, v) in pairs {
        m.insert(k.to_string(), v);
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_part;
    use crate::plan::{DecisionType as DT, LyricStrategy, Section, SectionMode as SM, SharedNotePolicy, TargetRef};
    use crate::types::{Note, Part};

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

    fn build_score() -> (Score, Vec<PartAnalysis>) {
        let notes = vec![
            note("1", 1, 0.0, 72.0, Some("a")),
            note("1", 1, 1.0, 72.0, Some("ma")),
            note("2", 1, 0.0, 60.0, None),
            note("2", 1, 1.0, 60.0, None),
        ];
        let mut score = Score::new(Some("Test".to_string()));
        score.parts.push(Part { part_id: "P1".to_string(), part_name: "SOPRANO ALTO".to_string(), notes });
        let analyses = vec![analyze_part(&score.parts[0], 0)];
        (score, analyses)
    }

    fn section(start: i64, end: i64, lyric_source: Option<TargetRef>, melody_source: Option<TargetRef>) -> Section {
        Section {
            start_measure: start,
            end_measure: end,
            mode: SM::Derive,
            decision_type: DT::ExtractFromVoice,
            method: Method::Trivial,
            rank_index: 0,
            rank_fallback: crate::plan::RankFallback::Greedy,
            melody_source,
            lyric_source,
            lyric_strategy: LyricStrategy::StrictOnset,
            lyric_policy: crate::plan::LyricPolicy::FillMissingOnly,
        }
    }

    #[test]
    fn empty_lyric_source_with_word_alternative_fires() {
        let (score, analyses) = build_score();
        let target = Target {
            target: TargetRef { part_index: 0, voice_part_id: "alto".to_string() },
            sections: Some(vec![section(
                1,
                1,
                Some(TargetRef { part_index: 0, voice_part_id: "alto".to_string() }),
                Some(TargetRef { part_index: 0, voice_part_id: "alto".to_string() }),
            )]),
            actions: None,
            split_shared_note_policy: SharedNotePolicy::DuplicateToAll,
        };
        let plan = Plan { targets: vec![target] };
        let findings = lint_plan(&plan, &score, &analyses);
        assert!(findings.iter().any(|f| f.code == "empty_lyric_source_with_word_alternative"));
    }

    #[test]
    fn no_findings_for_clean_plan() {
        let (score, analyses) = build_score();
        let target = Target {
            target: TargetRef { part_index: 0, voice_part_id: "alto".to_string() },
            sections: Some(vec![section(
                1,
                1,
                Some(TargetRef { part_index: 0, voice_part_id: "soprano".to_string() }),
                Some(TargetRef { part_index: 0, voice_part_id: "alto".to_string() }),
            )]),
            actions: None,
            split_shared_note_policy: SharedNotePolicy::DuplicateToAll,
        };
        let other = Target {
            target: TargetRef { part_index: 0, voice_part_id: "soprano".to_string() },
            sections: Some(vec![section(1, 1, None, Some(TargetRef { part_index: 0, voice_part_id: "soprano".to_string() }))]),
            actions: None,
            split_shared_note_policy: SharedNotePolicy::DuplicateToAll,
        };
        let plan = Plan { targets: vec![target, other] };
        let findings = lint_plan(&plan, &score, &analyses);
        assert!(findings.iter().all(|f| f.code != "lyric_source_without_target_notes"));
    }
}
