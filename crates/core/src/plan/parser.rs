//! Plan Parser (§4.2): validates a raw JSON plan payload and produces a
//! [`Plan`], or an [`ActionRequired`] with a structured `code` identifying
//! the first validation pass that failed. Never partially executes.

use serde_json::Value;

use crate::analyzer::PartAnalysis;
use crate::outcome::{plan_invalid, ActionRequired};
use crate::types::Score;

use super::model::*;

/// Parse and validate a raw plan payload against the analyzed score.
///
/// This is a pure function: it never mutates `score` and produces the
/// same `Plan` for the same inputs (Parser/Linter law, §8).
pub fn parse_voice_part_plan(raw: &Value, score: &Score, analyses: &[PartAnalysis]) -> Result<Plan, ActionRequired> {
    let obj = raw.as_object().ok_or_else(|| {
        plan_invalid("invalid_plan_payload", "plan payload must be a JSON object")
    })?;

    let targets_raw = obj
        .get("targets")
        .and_then(Value::as_array)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| plan_invalid("invalid_plan_payload", "plan must contain a non-empty 'targets' list"))?;

    let mut targets = Vec::with_capacity(targets_raw.len());
    for (target_index, raw_target) in targets_raw.iter().enumerate() {
        targets.push(parse_target(raw_target, target_index, score, analyses)?);
    }

    Ok(Plan { targets })
}

fn parse_target(
    raw: &Value,
    target_index: usize,
    score: &Score,
    analyses: &[PartAnalysis],
) -> Result<Target, ActionRequired> {
    let obj = raw.as_object().ok_or_else(|| {
        plan_invalid("invalid_plan_target_ref", "target entry must be an object").with("target_index", target_index as i64)
    })?;

    let target_ref = parse_target_ref(obj.get("target"), target_index)?;
    validate_target_ref_resolves(&target_ref, score, analyses, target_index)?;

    let sections_raw = obj.get("sections").and_then(Value::as_array);
    let actions_raw = obj.get("actions").and_then(Value::as_array);

    let has_sections = sections_raw.is_some_and(|s| !s.is_empty());
    let has_actions = actions_raw.is_some_and(|a| !a.is_empty());
    if has_sections == has_actions {
        return Err(plan_invalid(
            "empty_section_source",
            "target must define exactly one non-empty source: 'sections' or 'actions'",
        )
        .with("target_index", target_index as i64));
    }

    let split_shared_note_policy = parse_shared_note_policy(obj.get("split_shared_note_policy"), target_index)?;

    let (part_start, part_end) = sung_span(&target_ref, analyses).ok_or_else(|| {
        plan_invalid("invalid_plan_target_ref", "target voice-part has no sung notes")
            .with("target_index", target_index as i64)
    })?;

    if has_sections {
        let sections = parse_sections(sections_raw.unwrap(), target_index, part_start, part_end)?;
        Ok(Target { target: target_ref, sections: Some(sections), actions: None, split_shared_note_policy })
    } else {
        let actions = parse_actions(actions_raw.unwrap(), target_index)?;
        Ok(Target { target: target_ref, sections: None, actions: Some(actions), split_shared_note_policy })
    }
}

fn parse_target_ref(raw: Option<&Value>, target_index: usize) -> Result<TargetRef, ActionRequired> {
    let obj = raw
        .and_then(Value::as_object)
        .ok_or_else(|| plan_invalid("invalid_plan_target_ref", "missing 'target' reference").with("target_index", target_index as i64))?;

    let part_index = obj
        .get("part_index")
        .and_then(Value::as_u64)
        .ok_or_else(|| plan_invalid("invalid_plan_target_ref", "'target.part_index' must be a non-negative integer").with("target_index", target_index as i64))?
        as usize;

    let voice_part_id = obj
        .get("voice_part_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| plan_invalid("invalid_plan_target_ref", "'target.voice_part_id' must be a non-empty string").with("target_index", target_index as i64))?
        .to_string();

    Ok(TargetRef { part_index, voice_part_id })
}

fn validate_target_ref_resolves(
    target_ref: &TargetRef,
    score: &Score,
    analyses: &[PartAnalysis],
    target_index: usize,
) -> Result<(), ActionRequired> {
    if target_ref.part_index >= score.parts.len() {
        return Err(plan_invalid("invalid_plan_target_ref", "target.part_index out of range").with("target_index", target_index as i64));
    }
    let analysis = &analyses[target_ref.part_index];
    if analysis.voice_part(&target_ref.voice_part_id).is_none() {
        return Err(plan_invalid("invalid_plan_target_ref", "target voice-part not found in analyzed score")
            .with("target_index", target_index as i64));
    }
    Ok(())
}

fn sung_span(target_ref: &TargetRef, analyses: &[PartAnalysis]) -> Option<(i64, i64)> {
    let analysis = analyses.get(target_ref.part_index)?;
    let regions = analysis.regions.get(&target_ref.voice_part_id)?;
    let sung: Vec<&crate::types::Region> = regions
        .iter()
        .filter(|r| r.status != crate::types::RegionStatus::NoMusic)
        .collect();
    if sung.is_empty() {
        return None;
    }
    let start = sung.iter().map(|r| r.start_measure).min()?;
    let end = sung.iter().map(|r| r.end_measure).max()?;
    Some((start, end))
}

fn parse_shared_note_policy(raw: Option<&Value>, target_index: usize) -> Result<SharedNotePolicy, ActionRequired> {
    match raw.and_then(Value::as_str) {
        None => Ok(SharedNotePolicy::DuplicateToAll),
        Some("duplicate_to_all") => Ok(SharedNotePolicy::DuplicateToAll),
        Some("assign_primary_only") => Ok(SharedNotePolicy::AssignPrimaryOnly),
        Some(_) => Err(plan_invalid("invalid_plan_enum", "unrecognized split_shared_note_policy").with("target_index", target_index as i64)),
    }
}

fn parse_sections(
    raw_sections: &[Value],
    target_index: usize,
    part_start: i64,
    part_end: i64,
) -> Result<Vec<Section>, ActionRequired> {
    let mut sections = Vec::with_capacity(raw_sections.len());
    for (section_index, raw) in raw_sections.iter().enumerate() {
        sections.push(parse_section(raw, target_index, section_index)?);
    }

    sections.sort_by_key(|s| s.start_measure);

    let mut expected_start = part_start;
    for section in &sections {
        if section.start_measure != expected_start {
            return Err(if section.start_measure > expected_start {
                plan_invalid("non_contiguous_sections", "gap in section timeline").with("target_index", target_index as i64)
            } else {
                plan_invalid("overlapping_sections", "sections overlap").with("target_index", target_index as i64)
            });
        }
        if section.end_measure < section.start_measure {
            return Err(plan_invalid("invalid_section_mode", "section end precedes start").with("target_index", target_index as i64));
        }
        expected_start = section.end_measure + 1;
    }
    if expected_start - 1 != part_end {
        return Err(plan_invalid("non_contiguous_sections", "sections do not cover the full sung span").with("target_index", target_index as i64));
    }

    Ok(sections)
}

fn parse_section(raw: &Value, target_index: usize, section_index: usize) -> Result<Section, ActionRequired> {
    let obj = raw.as_object().ok_or_else(|| {
        plan_invalid("invalid_section_mode", "section entry must be an object")
            .with("target_index", target_index as i64)
            .with("section_index", section_index as i64)
    })?;

    let err = |code: &str, msg: &str| {
        plan_invalid(code, msg)
            .with("target_index", target_index as i64)
            .with("section_index", section_index as i64)
    };

    let start_measure = obj.get("start_measure").and_then(Value::as_i64).ok_or_else(|| err("invalid_section_mode", "missing start_measure"))?;
    let end_measure = obj.get("end_measure").and_then(Value::as_i64).ok_or_else(|| err("invalid_section_mode", "missing end_measure"))?;

    let mode = match obj.get("mode").and_then(Value::as_str) {
        Some("rest") => SectionMode::Rest,
        Some("derive") => SectionMode::Derive,
        _ => return Err(err("invalid_section_mode", "mode must be 'rest' or 'derive'")),
    };

    let decision_type = match obj.get("decision_type").and_then(Value::as_str) {
        Some("EXTRACT_FROM_VOICE") => DecisionType::ExtractFromVoice,
        Some("SPLIT_CHORDS_SELECT_NOTES") => DecisionType::SplitChordsSelectNotes,
        Some("COPY_UNISON_SECTION") => DecisionType::CopyUnisonSection,
        Some("INSERT_RESTS") => DecisionType::InsertRests,
        Some("DROP_NOTES_IF_NEEDED") => DecisionType::DropNotesIfNeeded,
        None if mode == SectionMode::Rest => DecisionType::InsertRests,
        _ => return Err(err("invalid_plan_enum", "unrecognized decision_type")),
    };

    // Public parser only ever constructs trivial/ranked (§9: A/B are
    // internal-only and reachable solely via the repair loop).
    let method = match obj.get("method").and_then(Value::as_str) {
        None => Method::Trivial,
        Some("trivial") => Method::Trivial,
        Some("ranked") => Method::Ranked,
        Some(_) => return Err(err("invalid_plan_enum", "method must be 'trivial' or 'ranked'")),
    };

    let rank_index = obj.get("rank_index").and_then(Value::as_u64).unwrap_or(0) as usize;

    let rank_fallback = match obj.get("rank_fallback").and_then(Value::as_str) {
        None => RankFallback::Greedy,
        Some("greedy") => RankFallback::Greedy,
        Some("skip") => RankFallback::Skip,
        Some(_) => return Err(err("invalid_plan_enum", "unrecognized rank_fallback")),
    };

    let melody_source = parse_optional_ref(obj.get("melody_source"), &err)?;
    let lyric_source = parse_optional_ref(obj.get("lyric_source"), &err)?;

    if mode == SectionMode::Rest && (melody_source.is_some() || lyric_source.is_some()) {
        return Err(err("invalid_section_mode", "rest sections may not carry source fields"));
    }
    if mode == SectionMode::Derive && melody_source.is_none() && lyric_source.is_none() {
        return Err(err("invalid_section_mode", "derive sections require at least one source"));
    }

    let lyric_strategy = match obj.get("lyric_strategy").and_then(Value::as_str) {
        None => LyricStrategy::StrictOnset,
        Some("strict_onset") => LyricStrategy::StrictOnset,
        Some("overlap_best_match") => LyricStrategy::OverlapBestMatch,
        Some("syllable_flow") => LyricStrategy::SyllableFlow,
        Some(_) => return Err(err("invalid_plan_enum", "unrecognized lyric_strategy")),
    };

    let lyric_policy = match obj.get("lyric_policy").and_then(Value::as_str) {
        None => LyricPolicy::FillMissingOnly,
        Some("fill_missing_only") => LyricPolicy::FillMissingOnly,
        Some("replace_all") => LyricPolicy::ReplaceAll,
        Some("preserve_existing") => LyricPolicy::PreserveExisting,
        Some(_) => return Err(err("invalid_plan_enum", "unrecognized lyric_policy")),
    };

    Ok(Section {
        start_measure,
        end_measure,
        mode,
        decision_type,
        method,
        rank_index,
        rank_fallback,
        melody_source,
        lyric_source,
        lyric_strategy,
        lyric_policy,
    })
}

fn parse_optional_ref(
    raw: Option<&Value>,
    err: &dyn Fn(&str, &str) -> ActionRequired,
) -> Result<Option<TargetRef>, ActionRequired> {
    let Some(raw) = raw else { return Ok(None) };
    if raw.is_null() {
        return Ok(None);
    }
    let obj = raw.as_object().ok_or_else(|| err("invalid_plan_target_ref", "source ref must be an object"))?;
    let part_index = obj
        .get("part_index")
        .and_then(Value::as_u64)
        .ok_or_else(|| err("invalid_plan_target_ref", "source.part_index must be a non-negative integer"))? as usize;
    let voice_part_id = obj
        .get("voice_part_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err("invalid_plan_target_ref", "source.voice_part_id must be a non-empty string"))?
        .to_string();
    Ok(Some(TargetRef { part_index, voice_part_id }))
}

fn parse_actions(raw_actions: &[Value], target_index: usize) -> Result<Vec<LegacyAction>, ActionRequired> {
    let mut actions = Vec::with_capacity(raw_actions.len());
    for (action_index, raw) in raw_actions.iter().enumerate() {
        actions.push(parse_action(raw, target_index, action_index)?);
    }
    Ok(actions)
}

fn parse_action(raw: &Value, target_index: usize, action_index: usize) -> Result<LegacyAction, ActionRequired> {
    let obj = raw.as_object().ok_or_else(|| {
        plan_invalid("invalid_plan_enum", "action entry must be an object")
            .with("target_index", target_index as i64)
            .with("action_index", action_index as i64)
    })?;

    let err = |code: &str, msg: &str| {
        plan_invalid(code, msg)
            .with("target_index", target_index as i64)
            .with("action_index", action_index as i64)
    };

    let action_type = match obj.get("action_type").and_then(Value::as_str) {
        Some("split_voice_part") => LegacyActionType::SplitVoicePart,
        Some("duplicate_section_to_all_voice_parts") => LegacyActionType::DuplicateSectionToAllVoiceParts,
        Some("propagate_lyrics") => LegacyActionType::PropagateLyrics,
        _ => return Err(err("invalid_plan_enum", "unrecognized action_type")),
    };

    let melody_source = parse_optional_ref(obj.get("melody_source"), &err)?;
    let lyric_source = parse_optional_ref(obj.get("lyric_source"), &err)?;

    let lyric_strategy = match obj.get("lyric_strategy").and_then(Value::as_str) {
        None => LyricStrategy::StrictOnset,
        Some("strict_onset") => LyricStrategy::StrictOnset,
        Some("overlap_best_match") => LyricStrategy::OverlapBestMatch,
        Some("syllable_flow") => LyricStrategy::SyllableFlow,
        Some(_) => return Err(err("invalid_plan_enum", "unrecognized lyric_strategy")),
    };

    let verse_number = obj.get("verse_number").and_then(Value::as_str).unwrap_or("1").to_string();
    let copy_all_verses = obj.get("copy_all_verses").and_then(Value::as_bool).unwrap_or(false);
    let split_shared_note_policy = parse_shared_note_policy(obj.get("split_shared_note_policy"), target_index)?;

    Ok(LegacyAction {
        action_type,
        melody_source,
        lyric_source,
        lyric_strategy,
        verse_number,
        copy_all_verses,
        split_shared_note_policy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_part;
    use crate::types::{Note, Part, Score};
    use serde_json::json;

    fn build_score() -> (Score, Vec<PartAnalysis>) {
        let notes = vec![
            Note {
                offset_beats: 0.0,
                duration_beats: 1.0,
                pitch_midi: Some(72.0),
                lyric: Some("a".to_string()),
                syllabic: None,
                lyric_is_extended: false,
                is_rest: false,
                tie_type: None,
                voice: "1".to_string(),
                staff: "1".to_string(),
                measure_number: 1,
                lyric_exempt: false,
            },
            Note {
                offset_beats: 0.0,
                duration_beats: 1.0,
                pitch_midi: Some(60.0),
                lyric: None,
                syllabic: None,
                lyric_is_extended: false,
                is_rest: false,
                tie_type: None,
                voice: "2".to_string(),
                staff: "1".to_string(),
                measure_number: 1,
                lyric_exempt: false,
            },
        ];
        let mut score = Score::new(Some("Test".to_string()));
        score.parts.push(Part { part_id: "P1".to_string(), part_name: "SOPRANO ALTO".to_string(), notes });
        let analyses = vec![analyze_part(&score.parts[0], 0)];
        (score, analyses)
    }

    #[test]
    fn rejects_non_object_payload() {
        let (score, analyses) = build_score();
        let err = parse_voice_part_plan(&json!("not an object"), &score, &analyses).unwrap_err();
        assert_eq!(err.code, "invalid_plan_payload");
    }

    #[test]
    fn rejects_empty_targets() {
        let (score, analyses) = build_score();
        let err = parse_voice_part_plan(&json!({"targets": []}), &score, &analyses).unwrap_err();
        assert_eq!(err.code, "invalid_plan_payload");
    }

    #[test]
    fn accepts_well_formed_single_section_target() {
        let (score, analyses) = build_score();
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
        let plan = parse_voice_part_plan(&plan_json, &score, &analyses).unwrap();
        assert_eq!(plan.targets.len(), 1);
        assert_eq!(plan.targets[0].sections.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn rejects_public_method_b() {
        let (score, analyses) = build_score();
        let plan_json = json!({
            "targets": [{
                "target": {"part_index": 0, "voice_part_id": "alto"},
                "sections": [{
                    "start_measure": 1,
                    "end_measure": 1,
                    "mode": "derive",
                    "decision_type": "SPLIT_CHORDS_SELECT_NOTES",
                    "method": "B",
                    "melody_source": {"part_index": 0, "voice_part_id": "alto"}
                }]
            }]
        });
        let err = parse_voice_part_plan(&plan_json, &score, &analyses).unwrap_err();
        assert_eq!(err.code, "invalid_plan_enum");
    }

    #[test]
    fn rejects_both_sections_and_actions() {
        let (score, analyses) = build_score();
        let plan_json = json!({
            "targets": [{
                "target": {"part_index": 0, "voice_part_id": "alto"},
                "sections": [{"start_measure": 1, "end_measure": 1, "mode": "rest", "decision_type": "INSERT_RESTS"}],
                "actions": [{"action_type": "split_voice_part"}]
            }]
        });
        let err = parse_voice_part_plan(&plan_json, &score, &analyses).unwrap_err();
        assert_eq!(err.code, "empty_section_source");
    }
}
