//! Repair Loop (§4.8), sections path: on structural validation failure,
//! promote every section whose range overlaps a failing measure range to
//! `method=B` (DP) / `lyric_policy=replace_all` / `lyric_strategy=syllable_flow`,
//! fabricating a `melody_source` pointing at the target itself when the
//! section had none, then re-execute once with repairs disallowed (no
//! nested repair — the caller must not call this twice for one target).
//! The legacy actions path's coverage-failure retries live directly in
//! [`crate::exec::legacy`] since they operate on a single flat note list
//! rather than a section list.

use crate::analyzer::PartAnalysis;
use crate::exec::timeline::{execute_timeline, TimelineOutcome};
use crate::outcome::ActionRequired;
use crate::plan::{LyricPolicy, LyricStrategy, Method, Section, SharedNotePolicy, TargetRef};
use crate::types::Score;

#[derive(Debug, Clone, serde::Serialize)]
pub struct RepairLoopReport {
    pub reason: &'static str,
    pub repaired_section_count: usize,
}

fn overlaps_any(section: &Section, failing_ranges: &[(i64, i64)]) -> bool {
    failing_ranges.iter().any(|&(s, e)| section.overlaps_range(s, e))
}

/// Collapse a list of measure numbers into contiguous `[start, end]`
/// ranges, mirroring the shape of `structural_unresolved_measures`.
pub fn collapse_measure_ranges(mut measures: Vec<i64>) -> Vec<(i64, i64)> {
    measures.sort_unstable();
    measures.dedup();
    let mut ranges = Vec::new();
    let mut iter = measures.into_iter();
    if let Some(first) = iter.next() {
        let mut start = first;
        let mut prev = first;
        for m in iter {
            if m == prev + 1 {
                prev = m;
                continue;
            }
            ranges.push((start, prev));
            start = m;
            prev = m;
        }
        ranges.push((start, prev));
    }
    ranges
}

/// Attempt the sections-path structural repair once. `Ok(None)` means no
/// section overlapped a failing range, so there was nothing to repair and
/// the original failure should be returned to the caller unchanged.
pub fn attempt_structural_repair(
    score: &Score,
    analyses: &[PartAnalysis],
    target_part_index: usize,
    target_voice_part_id: &str,
    sections: &[Section],
    shared_note_policy: SharedNotePolicy,
    failing_measures: Vec<i64>,
) -> Result<Option<(TimelineOutcome, RepairLoopReport)>, ActionRequired> {
    let failing_ranges = collapse_measure_ranges(failing_measures);
    if failing_ranges.is_empty() {
        return Ok(None);
    }

    let mut repaired = 0usize;
    let repaired_sections: Vec<Section> = sections
        .iter()
        .cloned()
        .map(|mut section| {
            if overlaps_any(&section, &failing_ranges) {
                section.method = Method::B;
                section.lyric_policy = LyricPolicy::ReplaceAll;
                section.lyric_strategy = LyricStrategy::SyllableFlow;
                if section.melody_source.is_none() {
                    section.melody_source =
                        Some(TargetRef { part_index: target_part_index, voice_part_id: target_voice_part_id.to_string() });
                }
                repaired += 1;
            }
            section
        })
        .collect();

    if repaired == 0 {
        return Ok(None);
    }

    let outcome = execute_timeline(score, analyses, target_part_index, target_voice_part_id, &repaired_sections, shared_note_policy)?;
    Ok(Some((outcome, RepairLoopReport { reason: "structural_validation_failed", repaired_section_count: repaired })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_part;
    use crate::plan::{DecisionType, RankFallback, SectionMode};
    use crate::types::{Note, Part};

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

    #[test]
    fn collapse_measure_ranges_groups_consecutive_runs() {
        let ranges = collapse_measure_ranges(vec![3, 1, 2, 5]);
        assert_eq!(ranges, vec![(1, 3), (5, 5)]);
    }

    #[test]
    fn repair_promotes_overlapping_sections_and_reexecutes() {
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
        let analyses = vec![analysis];

        let soprano_ref = TargetRef { part_index: 0, voice_part_id: "soprano".to_string() };
        let sections = vec![Section {
            start_measure: 1,
            end_measure: 1,
            mode: SectionMode::Derive,
            decision_type: DecisionType::ExtractFromVoice,
            method: Method::Trivial,
            rank_index: 0,
            rank_fallback: RankFallback::Greedy,
            melody_source: None,
            lyric_source: Some(soprano_ref),
            lyric_strategy: LyricStrategy::StrictOnset,
            lyric_policy: LyricPolicy::FillMissingOnly,
        }];

        let result = attempt_structural_repair(&score, &analyses, 0, "alto", &sections, SharedNotePolicy::DuplicateToAll, vec![1]).unwrap();
        let (outcome, report) = result.expect("section overlapped the failing range");
        assert_eq!(report.repaired_section_count, 1);
        assert_eq!(outcome.status, "ready");
        // fabricated melody_source let the section pull alto's own notes.
        assert_eq!(outcome.notes.len(), 2);
    }

    #[test]
    fn no_overlap_returns_none() {
        let part = Part { part_id: "P1".to_string(), part_name: "SOPRANO ALTO".to_string(), notes: vec![note("1", 1, 0.0, 1.0, 72.0, None)] };
        let analysis = analyze_part(&part, 0);
        let mut score = Score::new(Some("Test".to_string()));
        score.parts.push(part);
        let analyses = vec![analysis];

        let sections = vec![Section {
            start_measure: 1,
            end_measure: 1,
            mode: SectionMode::Derive,
            decision_type: DecisionType::ExtractFromVoice,
            method: Method::Trivial,
            rank_index: 0,
            rank_fallback: RankFallback::Greedy,
            melody_source: None,
            lyric_source: None,
            lyric_strategy: LyricStrategy::StrictOnset,
            lyric_policy: LyricPolicy::FillMissingOnly,
        }];
        let result = attempt_structural_repair(&score, &analyses, 0, "soprano", &sections, SharedNotePolicy::DuplicateToAll, vec![5]).unwrap();
        assert!(result.is_none());
    }
}
