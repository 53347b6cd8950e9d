//! Section/Timeline Executor (§4.5): executes one target's ordered
//! sections against its part, producing the final derived note sequence
//! plus per-section diagnostics.

use serde::Serialize;

use crate::analyzer::PartAnalysis;
use crate::exec::chord_splitter::split_chords;
use crate::exec::lyrics::{propagate_lyrics, DroppedSourceLyric};
use crate::exec::monophony::{enforce_monophony, prefers_high};
use crate::outcome::ActionRequired;
use crate::plan::{DecisionType, Section, SectionMode, SharedNotePolicy, TargetRef};
use crate::types::{round6, Note, Part, Score};
use crate::validate::{validate_lyric_coverage, validate_structural_singability, LyricValidationStatus, StructuralValidation};

#[derive(Debug, Clone, Serialize)]
pub struct SectionResult {
    pub section_mode: SectionMode,
    pub decision_type: DecisionType,
    pub start_measure: i64,
    pub end_measure: i64,
    pub copied_note_count: usize,
    pub copied_lyric_count: usize,
    pub copied_word_lyric_count: usize,
    pub copied_extension_lyric_count: usize,
    pub missing_lyric_sung_note_count: usize,
    pub source_lyric_candidates_count: usize,
    pub mapped_source_lyrics_count: usize,
    pub dropped_source_lyrics_count: usize,
    pub dropped_source_lyrics: Vec<DroppedSourceLyric>,
}

#[derive(Debug, Clone)]
pub struct TimelineOutcome {
    pub status: &'static str,
    pub notes: Vec<Note>,
    pub source_notes_for_validation: Vec<Note>,
    pub section_results: Vec<SectionResult>,
    pub structural: StructuralValidation,
    pub lyric_coverage_ratio: f64,
    pub lyric_validation_code: Option<String>,
}

fn signature(n: &Note) -> (i64, u64, u64, Option<u64>) {
    (n.measure_number, round6(n.offset_beats).to_bits(), n.duration_beats.to_bits(), n.pitch_midi.map(|p| p.to_bits()))
}

/// Step 1: select the target's native notes, applying the shared-note
/// policy for notes whose `(measure, offset, duration, pitch)` signature
/// is shared with a sibling voice.
pub(crate) fn select_native_notes(part: &Part, analysis: &PartAnalysis, target_voice_part_id: &str, policy: SharedNotePolicy) -> Vec<Note> {
    let target = analysis.voice_part(target_voice_part_id).expect("target voice part must exist in analysis");

    let mut sig_voices: std::collections::HashMap<(i64, u64, u64, Option<u64>), std::collections::HashSet<String>> =
        std::collections::HashMap::new();
    for note in &part.notes {
        if note.is_rest {
            continue;
        }
        sig_voices.entry(signature(note)).or_default().insert(note.voice.clone());
    }
    let rank_of = |voice_id: &str| analysis.voice_parts.iter().find(|vp| vp.source_voice_id == voice_id).map(|vp| vp.rank);

    part.notes
        .iter()
        .filter(|n| n.voice == target.source_voice_id)
        .filter(|n| {
            if n.is_rest || policy == SharedNotePolicy::DuplicateToAll {
                return true;
            }
            let voices = sig_voices.get(&signature(n));
            match voices {
                Some(v) if v.len() >= 2 => {
                    let min_rank = v.iter().filter_map(|voice_id| rank_of(voice_id)).min();
                    min_rank == Some(target.rank)
                }
                _ => true,
            }
        })
        .cloned()
        .collect()
}

pub(crate) fn resolve_source_notes(
    score: &Score,
    analyses: &[PartAnalysis],
    target_ref: &TargetRef,
) -> Vec<Note> {
    let part = &score.parts[target_ref.part_index];
    let analysis = &analyses[target_ref.part_index];
    let Some(vp) = analysis.voice_part(&target_ref.voice_part_id) else { return Vec::new() };
    part.notes.iter().filter(|n| n.voice == vp.source_voice_id).cloned().collect()
}

pub(crate) fn in_range(note: &Note, start: i64, end: i64) -> bool {
    note.measure_number >= start && note.measure_number <= end
}

pub(crate) fn re_voice_strip_lyrics(mut note: Note, target_voice: &str) -> Note {
    note.voice = target_voice.to_string();
    note.lyric = None;
    note.syllabic = None;
    note.lyric_is_extended = false;
    note
}

/// Apply §4.5a melody derivation for one `derive` section, returning the
/// section's replacement notes (to splice into the working set).
fn derive_melody(
    score: &Score,
    analyses: &[PartAnalysis],
    own_ref: &TargetRef,
    section: &Section,
) -> Vec<Note> {
    let source_ref = section.melody_source.clone().unwrap_or_else(|| own_ref.clone());
    let source_notes: Vec<Note> =
        resolve_source_notes(score, analyses, &source_ref).into_iter().filter(|n| in_range(n, section.start_measure, section.end_measure)).collect();

    let target_voice_part_id = &own_ref.voice_part_id;
    let analysis = &analyses[own_ref.part_index];
    let target = analysis.voice_part(target_voice_part_id).expect("target voice part must exist");
    let prefer_high = prefers_high(target_voice_part_id);

    match section.decision_type {
        DecisionType::SplitChordsSelectNotes => {
            let rests: Vec<Note> = source_notes.iter().filter(|n| n.is_rest).cloned().map(|n| re_voice_strip_lyrics(n, target_voice_part_id)).collect();
            let non_rest: Vec<Note> = source_notes.into_iter().filter(|n| !n.is_rest).collect();
            let mut melody = split_chords(
                &non_rest,
                section.method,
                section.rank_index,
                section.rank_fallback,
                target.rank,
                analysis.voice_parts.len(),
                prefer_high,
                target_voice_part_id,
            );
            melody.extend(rests);
            melody
        }
        DecisionType::ExtractFromVoice | DecisionType::CopyUnisonSection => {
            source_notes.into_iter().map(|n| re_voice_strip_lyrics(n, target_voice_part_id)).collect()
        }
        DecisionType::InsertRests | DecisionType::DropNotesIfNeeded => Vec::new(),
    }
}

/// §4.5b lyric derivation for one `derive` section. Mutates the section's
/// melody notes in place; returns propagation diagnostics plus whether
/// the source had word lyrics available in range.
fn derive_lyrics(
    score: &Score,
    analyses: &[PartAnalysis],
    section: &Section,
    melody_notes: &mut [Note],
) -> Result<(crate::exec::lyrics::PropagationDiagnostics, bool), ActionRequired> {
    let Some(lyric_ref) = &section.lyric_source else {
        return Ok((crate::exec::lyrics::PropagationDiagnostics::default(), false));
    };

    if section.melody_source.is_none() {
        let has_sung_notes = melody_notes.iter().any(|n| !n.is_rest);
        if !has_sung_notes {
            return Err(ActionRequired::new(
                "timeline_execution_failed",
                "lyric_source_without_target_notes",
                "lyric_source is set without melody_source, but the target lane has no sung notes in range",
            )
            .with("start_measure", section.start_measure as i64)
            .with("end_measure", section.end_measure as i64));
        }
    }

    let source_notes: Vec<Note> = resolve_source_notes(score, analyses, lyric_ref)
        .into_iter()
        .filter(|n| in_range(n, section.start_measure, section.end_measure))
        .collect();
    let source_has_words = source_notes
        .iter()
        .any(|n| !n.is_rest && n.lyric.as_deref().is_some_and(|l| !l.is_empty() && l != "+" && !n.lyric_is_extended));

    let diagnostics = propagate_lyrics(melody_notes, &source_notes, section.lyric_strategy, section.lyric_policy, "1", true);
    Ok((diagnostics, source_has_words))
}

fn synth_section_rests(part: &Part, start: i64, end: i64, target_voice_part_id: &str) -> Vec<Note> {
    let mut rests = Vec::new();
    for measure in start..=end {
        let activity: Vec<&Note> = part.notes.iter().filter(|n| n.measure_number == measure).collect();
        if activity.is_empty() {
            continue;
        }
        let min_start = activity.iter().map(|n| n.offset_beats).fold(f64::INFINITY, f64::min);
        let max_end = activity.iter().map(|n| n.end_offset()).fold(f64::NEG_INFINITY, f64::max);
        rests.push(Note {
            offset_beats: min_start,
            duration_beats: (max_end - min_start).max(0.0),
            pitch_midi: None,
            lyric: None,
            syllabic: None,
            lyric_is_extended: false,
            is_rest: true,
            tie_type: None,
            voice: target_voice_part_id.to_string(),
            staff: "1".to_string(),
            measure_number: measure,
            lyric_exempt: false,
        });
    }
    rests
}

/// Execute the full ordered section timeline for one target.
pub fn execute_timeline(
    score: &Score,
    analyses: &[PartAnalysis],
    target_part_index: usize,
    target_voice_part_id: &str,
    sections: &[Section],
    shared_note_policy: SharedNotePolicy,
) -> Result<TimelineOutcome, ActionRequired> {
    let part = &score.parts[target_part_index];
    let analysis = &analyses[target_part_index];
    let own_ref = TargetRef { part_index: target_part_index, voice_part_id: target_voice_part_id.to_string() };

    let mut working_notes = select_native_notes(part, analysis, target_voice_part_id, shared_note_policy);
    let source_notes_for_validation = working_notes.clone();
    let mut section_results = Vec::with_capacity(sections.len());

    for section in sections {
        let existing_in_range: Vec<Note> =
            working_notes.iter().filter(|n| in_range(n, section.start_measure, section.end_measure)).cloned().collect();
        working_notes.retain(|n| !in_range(n, section.start_measure, section.end_measure));

        match section.mode {
            SectionMode::Rest => {
                let rests = synth_section_rests(part, section.start_measure, section.end_measure, target_voice_part_id);
                let copied_note_count = rests.len();
                working_notes.extend(rests);
                section_results.push(SectionResult {
                    section_mode: section.mode,
                    decision_type: section.decision_type,
                    start_measure: section.start_measure,
                    end_measure: section.end_measure,
                    copied_note_count,
                    copied_lyric_count: 0,
                    copied_word_lyric_count: 0,
                    copied_extension_lyric_count: 0,
                    missing_lyric_sung_note_count: 0,
                    source_lyric_candidates_count: 0,
                    mapped_source_lyrics_count: 0,
                    dropped_source_lyrics_count: 0,
                    dropped_source_lyrics: Vec::new(),
                });
            }
            SectionMode::Derive => {
                let mut melody_notes = if section.melody_source.is_none() && section.lyric_source.is_some() {
                    existing_in_range
                } else {
                    derive_melody(score, analyses, &own_ref, section)
                };
                let (diagnostics, source_has_words) = derive_lyrics(score, analyses, section, &mut melody_notes)?;

                let copied_lyric_count = melody_notes.iter().filter(|n| !n.is_rest && n.lyric.as_deref().is_some_and(|l| !l.is_empty())).count();
                let copied_word_lyric_count = melody_notes
                    .iter()
                    .filter(|n| !n.is_rest && n.lyric.as_deref().is_some_and(|l| !l.is_empty() && l != "+") && !n.lyric_is_extended)
                    .count();
                let copied_extension_lyric_count = melody_notes.iter().filter(|n| !n.is_rest && n.lyric_is_extended).count();
                let sung_count = melody_notes.iter().filter(|n| !n.is_rest).count();
                let missing_lyric_sung_note_count = sung_count.saturating_sub(copied_lyric_count);

                if source_has_words && sung_count > 0 && copied_word_lyric_count == 0 && copied_extension_lyric_count > 0 {
                    return Err(ActionRequired::new(
                        "timeline_execution_failed",
                        "section_lyric_quality_failed",
                        "source had word lyrics in range but the derived section ended up with only extension lyrics",
                    )
                    .with("start_measure", section.start_measure as i64)
                    .with("end_measure", section.end_measure as i64));
                }

                let copied_note_count = melody_notes.len();
                section_results.push(SectionResult {
                    section_mode: section.mode,
                    decision_type: section.decision_type,
                    start_measure: section.start_measure,
                    end_measure: section.end_measure,
                    copied_note_count,
                    copied_lyric_count,
                    copied_word_lyric_count,
                    copied_extension_lyric_count,
                    missing_lyric_sung_note_count,
                    source_lyric_candidates_count: diagnostics.source_lyric_candidates_count,
                    mapped_source_lyrics_count: diagnostics.mapped_source_lyrics_count,
                    dropped_source_lyrics_count: diagnostics.dropped_source_lyrics.len(),
                    dropped_source_lyrics: diagnostics.dropped_source_lyrics,
                });
                working_notes.extend(melody_notes);
            }
        }
    }

    working_notes.sort_by(|a, b| {
        a.measure_number
            .cmp(&b.measure_number)
            .then(a.offset_beats.partial_cmp(&b.offset_beats).unwrap_or(std::cmp::Ordering::Equal))
            .then(
                a.pitch_midi
                    .unwrap_or(f64::NEG_INFINITY)
                    .partial_cmp(&b.pitch_midi.unwrap_or(f64::NEG_INFINITY))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
    let notes = enforce_monophony(working_notes, target_voice_part_id);

    let structural = validate_structural_singability(&notes);
    if structural.hard_fail {
        return Err(ActionRequired::new("timeline_execution_failed", "structural_validation_failed", "derived voice-part is not monophonic")
            .with("structural_unresolved_measures", serde_json::to_value(&structural.structural_unresolved_measures).unwrap_or_default())
            .with("simultaneous_conflict_count", structural.simultaneous_conflict_count as i64)
            .with("overlap_conflict_count", structural.overlap_conflict_count as i64));
    }

    let lyric_validation = validate_lyric_coverage(&notes, &source_notes_for_validation);
    let status = match lyric_validation.status {
        LyricValidationStatus::Ready => "ready",
        LyricValidationStatus::ReadyWithWarnings => "ready_with_warnings",
        LyricValidationStatus::Fail => "fail",
    };

    Ok(TimelineOutcome {
        status,
        notes,
        source_notes_for_validation,
        section_results,
        structural,
        lyric_coverage_ratio: lyric_validation.lyric_coverage_ratio,
        lyric_validation_code: lyric_validation.code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_part;
    use crate::plan::{DecisionType, LyricPolicy, LyricStrategy, Method, RankFallback, SectionMode};

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

    fn section(decision_type: DecisionType, melody_source: Option<TargetRef>, lyric_source: Option<TargetRef>) -> Section {
        Section {
            start_measure: 1,
            end_measure: 1,
            mode: SectionMode::Derive,
            decision_type,
            method: Method::Trivial,
            rank_index: 0,
            rank_fallback: RankFallback::Greedy,
            melody_source,
            lyric_source,
            lyric_strategy: LyricStrategy::StrictOnset,
            lyric_policy: LyricPolicy::FillMissingOnly,
        }
    }

    #[test]
    fn extract_from_voice_copies_source_melody_and_lyrics() {
        let (score, analyses) = sample_score();
        let soprano_ref = TargetRef { part_index: 0, voice_part_id: "soprano".to_string() };
        let sections = vec![section(DecisionType::ExtractFromVoice, Some(soprano_ref.clone()), Some(soprano_ref))];
        let outcome = execute_timeline(&score, &analyses, 0, "alto", &sections, SharedNotePolicy::DuplicateToAll).unwrap();
        assert_eq!(outcome.notes.len(), 2);
        assert_eq!(outcome.notes[0].lyric.as_deref(), Some("a"));
        assert_eq!(outcome.status, "ready");
    }

    #[test]
    fn rest_section_synthesizes_full_measure_rest() {
        let (score, analyses) = sample_score();
        let mut sections = section(DecisionType::InsertRests, None, None);
        sections.mode = SectionMode::Rest;
        let outcome = execute_timeline(&score, &analyses, 0, "alto", &[sections], SharedNotePolicy::DuplicateToAll).unwrap();
        assert_eq!(outcome.notes.len(), 1);
        assert!(outcome.notes[0].is_rest);
    }

    #[test]
    fn lyric_source_without_melody_source_requires_existing_sung_notes() {
        let part = Part {
            part_id: "P1".to_string(),
            part_name: "SOPRANO ALTO".to_string(),
            notes: vec![
                note("1", 1, 0.0, 1.0, 72.0, Some("a")),
                note("2", 1, 0.0, 1.0, 60.0, None),
                // measure 2 has soprano activity only; alto has no native notes there.
                note("1", 2, 0.0, 1.0, 74.0, Some("men")),
            ],
        };
        let analysis = analyze_part(&part, 0);
        let mut score = Score::new(Some("Test".to_string()));
        score.parts.push(part);
        let analyses = vec![analysis];

        let soprano_ref = TargetRef { part_index: 0, voice_part_id: "soprano".to_string() };
        let mut sections_entry = section(DecisionType::ExtractFromVoice, None, Some(soprano_ref));
        sections_entry.start_measure = 2;
        sections_entry.end_measure = 2;
        let result = execute_timeline(&score, &analyses, 0, "alto", &[sections_entry], SharedNotePolicy::DuplicateToAll);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code, "lyric_source_without_target_notes");
    }
}
