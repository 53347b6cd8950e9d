//! Legacy Action Executor: runs a target's ordered list of non-timeline
//! actions (the pre-sections plan contract), reusing the same melody and
//! lyric building blocks as the Section/Timeline Executor but driven by
//! each action's own verse/strategy fields. Also owns the "legacy actions
//! path coverage failure" repair retries (§4.8): when the final lyric
//! validation fails, alternate strategies are tried before giving up.

use serde::Serialize;

use crate::analyzer::PartAnalysis;
use crate::config;
use crate::exec::chord_splitter::split_chords;
use crate::exec::lyrics::propagate_lyrics;
use crate::exec::monophony::{enforce_monophony, prefers_high};
use crate::exec::timeline::{in_range, re_voice_strip_lyrics, resolve_source_notes, select_native_notes};
use crate::outcome::ActionRequired;
use crate::plan::{LegacyAction, LegacyActionType, LyricPolicy, LyricStrategy, Method, RankFallback, SharedNotePolicy, TargetRef};
use crate::types::{Note, Part, Score};
use crate::validate::{validate_lyric_coverage, validate_structural_singability, LyricValidationStatus, StructuralValidation};

#[derive(Debug, Clone, Serialize)]
pub struct RepairAttempt {
    pub attempt: usize,
    pub strategy: LyricStrategy,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LegacyOutcome {
    pub status: &'static str,
    pub notes: Vec<Note>,
    pub source_notes_for_validation: Vec<Note>,
    pub structural: StructuralValidation,
    pub lyric_coverage_ratio: f64,
    pub lyric_validation_code: Option<String>,
    pub repair_loop: Option<Vec<RepairAttempt>>,
}

/// The target part's full active measure range, the same bound
/// `analyzer::compute_regions` uses before slicing by region status.
fn sung_span(part: &Part) -> (i64, i64) {
    let measures: Vec<i64> = part.notes.iter().map(|n| n.measure_number).collect();
    if measures.is_empty() {
        (1, 1)
    } else {
        (*measures.iter().min().unwrap(), *measures.iter().max().unwrap())
    }
}

fn status_str(status: &LyricValidationStatus) -> &'static str {
    match status {
        LyricValidationStatus::Ready => "ready",
        LyricValidationStatus::ReadyWithWarnings => "ready_with_warnings",
        LyricValidationStatus::Fail => "fail",
    }
}

fn apply_lyrics(
    notes: &mut [Note],
    score: &Score,
    analyses: &[PartAnalysis],
    lyric_ref: &TargetRef,
    strategy: LyricStrategy,
    verse_number: &str,
    copy_all_verses: bool,
    start: i64,
    end: i64,
) {
    let source_notes: Vec<Note> =
        resolve_source_notes(score, analyses, lyric_ref).into_iter().filter(|n| in_range(n, start, end)).collect();
    propagate_lyrics(notes, &source_notes, strategy, LyricPolicy::FillMissingOnly, verse_number, copy_all_verses);
}

/// Execute `actions` in order against `target_voice_part_id`'s native
/// notes, then validate and (on lyric-coverage failure only) retry with
/// alternate lyric strategies.
pub fn execute_legacy_actions(
    score: &Score,
    analyses: &[PartAnalysis],
    target_part_index: usize,
    target_voice_part_id: &str,
    actions: &[LegacyAction],
    shared_note_policy: SharedNotePolicy,
) -> Result<LegacyOutcome, ActionRequired> {
    let part = &score.parts[target_part_index];
    let analysis = &analyses[target_part_index];
    let own_ref = TargetRef { part_index: target_part_index, voice_part_id: target_voice_part_id.to_string() };
    let (start, end) = sung_span(part);
    let prefer_high = prefers_high(target_voice_part_id);

    let mut working_notes = select_native_notes(part, analysis, target_voice_part_id, shared_note_policy);
    let source_notes_for_validation = working_notes.clone();

    let mut lyric_call: Option<(TargetRef, LyricStrategy, String, bool)> = None;

    for action in actions {
        match action.action_type {
            LegacyActionType::SplitVoicePart => {
                let source_ref = action.melody_source.clone().unwrap_or_else(|| own_ref.clone());
                let source_notes: Vec<Note> =
                    resolve_source_notes(score, analyses, &source_ref).into_iter().filter(|n| in_range(n, start, end)).collect();
                let rests: Vec<Note> =
                    source_notes.iter().filter(|n| n.is_rest).cloned().map(|n| re_voice_strip_lyrics(n, target_voice_part_id)).collect();
                let non_rest: Vec<Note> = source_notes.into_iter().filter(|n| !n.is_rest).collect();
                let target_vp = analysis.voice_part(target_voice_part_id).expect("target voice part must exist");
                let mut split = split_chords(
                    &non_rest,
                    Method::Trivial,
                    0,
                    RankFallback::Greedy,
                    target_vp.rank,
                    analysis.voice_parts.len(),
                    prefer_high,
                    target_voice_part_id,
                );
                split.extend(rests);
                working_notes = split;
            }
            LegacyActionType::DuplicateSectionToAllVoiceParts => {
                let source_ref = action.melody_source.clone().unwrap_or_else(|| own_ref.clone());
                let source_notes: Vec<Note> =
                    resolve_source_notes(score, analyses, &source_ref).into_iter().filter(|n| in_range(n, start, end)).collect();
                working_notes = source_notes.into_iter().map(|n| re_voice_strip_lyrics(n, target_voice_part_id)).collect();
            }
            LegacyActionType::PropagateLyrics => {}
        }

        if let Some(lyric_ref) = &action.lyric_source {
            lyric_call = Some((lyric_ref.clone(), action.lyric_strategy, action.verse_number.clone(), action.copy_all_verses));
        }
    }

    let melody_only = working_notes.clone();
    if let Some((lyric_ref, strategy, verse, copy_all)) = &lyric_call {
        apply_lyrics(&mut working_notes, score, analyses, lyric_ref, *strategy, verse, *copy_all, start, end);
    }

    let notes = enforce_monophony(working_notes, target_voice_part_id);
    let structural = validate_structural_singability(&notes);
    if structural.hard_fail {
        return Err(ActionRequired::new(
            "legacy_execution_failed",
            "structural_validation_failed",
            "derived voice-part is not monophonic",
        )
        .with("simultaneous_conflict_count", structural.simultaneous_conflict_count as i64)
        .with("overlap_conflict_count", structural.overlap_conflict_count as i64));
    }

    let lyric_validation = validate_lyric_coverage(&notes, &source_notes_for_validation);

    if lyric_validation.status != LyricValidationStatus::Fail {
        return Ok(LegacyOutcome {
            status: status_str(&lyric_validation.status),
            notes,
            source_notes_for_validation,
            structural,
            lyric_coverage_ratio: lyric_validation.lyric_coverage_ratio,
            lyric_validation_code: lyric_validation.code,
            repair_loop: None,
        });
    }

    let Some((lyric_ref, original_strategy, verse, copy_all)) = lyric_call else {
        return Ok(LegacyOutcome {
            status: status_str(&lyric_validation.status),
            notes,
            source_notes_for_validation,
            structural,
            lyric_coverage_ratio: lyric_validation.lyric_coverage_ratio,
            lyric_validation_code: lyric_validation.code,
            repair_loop: None,
        });
    };

    if !config::feature_flag_enabled("VOICEPARTS_REPAIR_LOOP_ENABLED", true) {
        return Ok(LegacyOutcome {
            status: status_str(&lyric_validation.status),
            notes,
            source_notes_for_validation,
            structural,
            lyric_coverage_ratio: lyric_validation.lyric_coverage_ratio,
            lyric_validation_code: lyric_validation.code,
            repair_loop: None,
        });
    }

    let max_attempts = config::repair_max_attempts().max(0) as usize;
    let candidates: Vec<LyricStrategy> = [LyricStrategy::OverlapBestMatch, LyricStrategy::SyllableFlow, LyricStrategy::StrictOnset]
        .into_iter()
        .filter(|s| *s != original_strategy)
        .collect();

    let mut attempts = Vec::new();
    let mut best = (notes, structural, lyric_validation);

    for (i, alt) in candidates.into_iter().take(max_attempts).enumerate() {
        let mut retry_notes = melody_only.clone();
        apply_lyrics(&mut retry_notes, score, analyses, &lyric_ref, alt, &verse, copy_all, start, end);
        let retry_final = enforce_monophony(retry_notes, target_voice_part_id);
        let retry_structural = validate_structural_singability(&retry_final);
        if retry_structural.hard_fail {
            attempts.push(RepairAttempt { attempt: i + 1, strategy: alt, status: "structural_fail".to_string(), validation_code: None });
            continue;
        }
        let retry_lyric = validate_lyric_coverage(&retry_final, &source_notes_for_validation);
        attempts.push(RepairAttempt {
            attempt: i + 1,
            strategy: alt,
            status: status_str(&retry_lyric.status).to_string(),
            validation_code: retry_lyric.code.clone(),
        });
        let improved = retry_lyric.status != LyricValidationStatus::Fail;
        if improved {
            best = (retry_final, retry_structural, retry_lyric);
            break;
        }
    }

    let (final_notes, final_structural, final_lyric) = best;
    Ok(LegacyOutcome {
        status: status_str(&final_lyric.status),
        notes: final_notes,
        source_notes_for_validation,
        structural: final_structural,
        lyric_coverage_ratio: final_lyric.lyric_coverage_ratio,
        lyric_validation_code: final_lyric.code,
        repair_loop: Some(attempts),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_part;

    fn note(voice: &str, measure: i64, offset: f64, duration: f64, pitch: f64, lyric: Option<&str>) -> Note {
        Note {
            offset_beats: offset,
            duration_beats: duration,
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

    fn sample_score() -> (Score, Vec<PartAnalysis>) {
        let part = Part {
            part_id: "P1".to_string(),
            part_name: "SOPRANO ALTO".to_string(),
            notes: vec![
                note("1", 1, 0.0, 1.0, 72.0, Some("a")),
                note("1", 1, 1.0, 1.0, 74.0, Some("men")),
                note("2", 1, 0.0, 1.0, 60.0, None),
                note("2", 1, 1.0, 1.0, 62.0, None),
            ],
        };
        let analysis = analyze_part(&part, 0);
        let mut score = Score::new(Some("Test".to_string()));
        score.parts.push(part);
        (score, vec![analysis])
    }

    #[test]
    fn split_voice_part_action_derives_single_line_from_own_voice() {
        let (score, analyses) = sample_score();
        let action = LegacyAction {
            action_type: LegacyActionType::SplitVoicePart,
            melody_source: None,
            lyric_source: None,
            lyric_strategy: LyricStrategy::StrictOnset,
            verse_number: "1".to_string(),
            copy_all_verses: false,
            split_shared_note_policy: SharedNotePolicy::DuplicateToAll,
        };
        let outcome = execute_legacy_actions(&score, &analyses, 0, "alto", &[action], SharedNotePolicy::DuplicateToAll).unwrap();
        assert_eq!(outcome.notes.len(), 2);
        // alto carries no native lyrics and this action names no lyric_source,
        // so coverage against its own (lyric-less) baseline fails outright.
        assert_eq!(outcome.status, "fail");
    }

    #[test]
    fn propagate_lyrics_action_fills_missing_lyrics_from_source() {
        let (score, analyses) = sample_score();
        let soprano_ref = TargetRef { part_index: 0, voice_part_id: "soprano".to_string() };
        let action = LegacyAction {
            action_type: LegacyActionType::PropagateLyrics,
            melody_source: None,
            lyric_source: Some(soprano_ref),
            lyric_strategy: LyricStrategy::StrictOnset,
            verse_number: "1".to_string(),
            copy_all_verses: false,
            split_shared_note_policy: SharedNotePolicy::DuplicateToAll,
        };
        let outcome = execute_legacy_actions(&score, &analyses, 0, "alto", &[action], SharedNotePolicy::DuplicateToAll).unwrap();
        assert_eq!(outcome.status, "ready");
        assert!(outcome.notes.iter().all(|n| n.lyric.is_some()));
    }
}
