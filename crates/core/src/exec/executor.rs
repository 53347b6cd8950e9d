//! Plan Executor (§4.4): the top-level entry point. Dispatches each
//! target to the Section/Timeline Executor or the legacy Action
//! Executor, runs the sections-path Repair Loop on structural failure,
//! finalizes through the Materializer, and triggers the Sibling
//! Generator — all against a private clone of the caller's score (§9
//! "deep clone discipline": the input score is never mutated).

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::analyzer::{analyze_part, PartAnalysis};
use crate::exec::legacy::{execute_legacy_actions, RepairAttempt};
use crate::exec::timeline::{execute_timeline, SectionResult};
use crate::materialize::finalize;
use crate::outcome::ActionRequired;
use crate::plan::{Plan, SharedNotePolicy, Target};
use crate::repair::attempt_structural_repair;
use crate::siblings::generate_siblings;
use crate::types::{AppendedPartRef, Note, Score};

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RepairLoopMetadata {
    Structural { reason: &'static str, repaired_section_count: usize },
    Legacy(Vec<RepairAttempt>),
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetMetadata {
    pub plan_applied: bool,
    pub plan_mode: &'static str,
    pub section_count: usize,
    pub split_shared_note_policy: SharedNotePolicy,
    pub section_results: Vec<SectionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_same_part_voice_parts: Option<Vec<AppendedPartRef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair_loop: Option<RepairLoopMetadata>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetValidation {
    pub structural_hard_fail: bool,
    pub max_simultaneous_notes: usize,
    pub lyric_coverage_ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetOutcome {
    pub status: &'static str,
    pub part_index: usize,
    pub transform_id: String,
    pub score_fingerprint: String,
    pub transform_hash: String,
    pub appended_part_ref: AppendedPartRef,
    pub modified_musicxml_path: Option<String>,
    pub reused_transform: bool,
    pub hidden_default_lane: bool,
    pub warnings: Vec<String>,
    pub validation: TargetValidation,
    pub metadata: TargetMetadata,
}

/// Execute every target of `plan` in order against a private clone of
/// `score`, returning the materialized clone plus one [`TargetOutcome`]
/// per target in plan order. `score` itself is never mutated.
pub fn execute_plan(score: &Score, plan: &Plan) -> Result<(Score, Vec<TargetOutcome>), ActionRequired> {
    if score.parts.is_empty() {
        return Err(ActionRequired::new("execution_failed", "missing_score_parts", "score has no parts to derive from"));
    }

    let analyses: Vec<PartAnalysis> = score.parts.iter().enumerate().map(|(i, part)| analyze_part(part, i)).collect();

    let mut already_named_by_part: HashMap<usize, HashSet<String>> = HashMap::new();
    for target in &plan.targets {
        already_named_by_part.entry(target.target.part_index).or_default().insert(target.target.voice_part_id.clone());
    }

    let mut working_score = score.clone();
    let mut outcomes = Vec::with_capacity(plan.targets.len());

    for target in &plan.targets {
        let part_index = target.target.part_index;
        if part_index >= analyses.len() {
            return Err(ActionRequired::new("execution_failed", "invalid_part_index", "target part_index is out of range")
                .with("part_index", part_index as i64));
        }
        let analysis = &analyses[part_index];
        if analysis.voice_parts.is_empty() {
            return Err(ActionRequired::new("execution_failed", "missing_voice_parts", "part has no voice-parts to derive")
                .with("part_index", part_index as i64));
        }
        if analysis.voice_part(&target.target.voice_part_id).is_none() {
            return Err(ActionRequired::new(
                "execution_failed",
                "target_voice_part_not_found",
                "target voice_part_id not found in part analysis",
            )
            .with("part_index", part_index as i64)
            .with("voice_part_id", target.target.voice_part_id.clone()));
        }

        let outcome = execute_one_target(&mut working_score, &analyses, target, &already_named_by_part)?;
        outcomes.push(outcome);
    }

    Ok((working_score, outcomes))
}

fn execute_one_target(
    score: &mut Score,
    analyses: &[PartAnalysis],
    target: &Target,
    already_named_by_part: &HashMap<usize, HashSet<String>>,
) -> Result<TargetOutcome, ActionRequired> {
    let part_index = target.target.part_index;
    let voice_part_id = target.target.voice_part_id.clone();
    let analysis = &analyses[part_index];
    let own_vp = analysis.voice_part(&voice_part_id).expect("checked by execute_plan");
    let source_voice_id = own_vp.source_voice_id.clone();
    let source_part_name = score.parts[part_index].part_name.clone();
    let source_part_id = score.parts[part_index].part_id.clone();

    let (status, notes, validation, metadata, propagated_lyrics): (&'static str, Vec<Note>, TargetValidation, TargetMetadata, bool) =
        if let Some(sections) = &target.sections {
            let mut timeline_result = execute_timeline(score, analyses, part_index, &voice_part_id, sections, target.split_shared_note_policy);
            let mut repair_report = None;

            if let Err(err) = &timeline_result {
                if err.code == "structural_validation_failed" {
                    let failing_measures: Vec<i64> = err
                        .context
                        .get("structural_unresolved_measures")
                        .and_then(|v| v.as_array())
                        .map(|arr| arr.iter().filter_map(|v| v.as_i64()).collect())
                        .unwrap_or_default();
                    if let Ok(Some((repaired_outcome, report))) = attempt_structural_repair(
                        score,
                        analyses,
                        part_index,
                        &voice_part_id,
                        sections,
                        target.split_shared_note_policy,
                        failing_measures,
                    ) {
                        repair_report = Some(report);
                        timeline_result = Ok(repaired_outcome);
                    }
                }
            }

            let outcome = timeline_result?;
            let propagated = sections.iter().any(|s| s.lyric_source.is_some());
            let validation = TargetValidation {
                structural_hard_fail: outcome.structural.hard_fail,
                max_simultaneous_notes: outcome.structural.max_simultaneous_notes,
                lyric_coverage_ratio: outcome.lyric_coverage_ratio,
                code: outcome.lyric_validation_code.clone(),
            };
            let metadata = TargetMetadata {
                plan_applied: true,
                plan_mode: "timeline_sections",
                section_count: sections.len(),
                split_shared_note_policy: target.split_shared_note_policy,
                section_results: outcome.section_results.clone(),
                generated_same_part_voice_parts: None,
                repair_loop: repair_report
                    .map(|r| RepairLoopMetadata::Structural { reason: r.reason, repaired_section_count: r.repaired_section_count }),
            };
            (outcome.status, outcome.notes, validation, metadata, propagated)
        } else {
            let actions = target.actions.as_deref().unwrap_or(&[]);
            let outcome = execute_legacy_actions(score, analyses, part_index, &voice_part_id, actions, target.split_shared_note_policy)?;
            let propagated = actions.iter().any(|a| a.lyric_source.is_some());
            let validation = TargetValidation {
                structural_hard_fail: outcome.structural.hard_fail,
                max_simultaneous_notes: outcome.structural.max_simultaneous_notes,
                lyric_coverage_ratio: outcome.lyric_coverage_ratio,
                code: outcome.lyric_validation_code.clone(),
            };
            let metadata = TargetMetadata {
                plan_applied: true,
                plan_mode: "legacy_actions",
                section_count: 0,
                split_shared_note_policy: target.split_shared_note_policy,
                section_results: Vec::new(),
                generated_same_part_voice_parts: None,
                repair_loop: outcome.repair_loop.map(RepairLoopMetadata::Legacy),
            };
            (outcome.status, outcome.notes, validation, metadata, propagated)
        };

    if status == "fail" {
        return Err(ActionRequired::new(
            "execution_failed",
            validation.code.clone().unwrap_or_else(|| "validation_failed_needs_review".to_string()),
            "lyric coverage validation failed",
        )
        .with("part_index", part_index as i64)
        .with("voice_part_id", voice_part_id.clone()));
    }

    let finalize_outcome = finalize(
        score,
        part_index,
        &voice_part_id,
        Some(source_voice_id.as_str()),
        part_index,
        &source_part_name,
        &source_part_id,
        propagated_lyrics,
        notes,
    )
    .map_err(|e| ActionRequired::new("execution_failed", "materialization_failed", e.to_string()))?;

    if let Some(path) = &finalize_outcome.modified_musicxml_path {
        score.source_musicxml_path = Some(path.clone());
    }

    let already_named = already_named_by_part.get(&part_index).cloned().unwrap_or_default();
    let sibling_outcomes = generate_siblings(score, &analyses[part_index], part_index, &already_named, &voice_part_id)
        .map_err(|e| ActionRequired::new("execution_failed", "materialization_failed", e.to_string()))?;

    let mut metadata = metadata;
    if !sibling_outcomes.is_empty() {
        metadata.generated_same_part_voice_parts = Some(sibling_outcomes.iter().map(|o| o.appended_part_ref.clone()).collect());
    }

    Ok(TargetOutcome {
        status,
        part_index,
        transform_id: finalize_outcome.transform_id,
        score_fingerprint: finalize_outcome.score_fingerprint,
        transform_hash: finalize_outcome.transform_hash,
        appended_part_ref: finalize_outcome.appended_part_ref,
        modified_musicxml_path: finalize_outcome.modified_musicxml_path,
        reused_transform: finalize_outcome.reused_transform,
        hidden_default_lane: finalize_outcome.hidden_default_lane,
        warnings: Vec::new(),
        validation,
        metadata,
    })
}
