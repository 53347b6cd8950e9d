//! Structural Validator and Lyric Coverage Validator (§4.6).

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config;
use crate::coverage::{classify_lyric, LyricClass};
use crate::types::{Note, EPSILON};

#[derive(Debug, Clone, Default, Serialize)]
pub struct StructuralValidation {
    pub hard_fail: bool,
    pub max_simultaneous_notes: usize,
    pub simultaneous_conflict_count: usize,
    pub overlap_conflict_count: usize,
    pub structural_unresolved_measures: Vec<i64>,
}

/// Validate that `notes` (sorted or not) are monophonic. Hard-fails on
/// any simultaneous-onset or sustain-overlap conflict.
pub fn validate_structural_singability(notes: &[Note]) -> StructuralValidation {
    let mut sorted: Vec<&Note> = notes.iter().filter(|n| !n.is_rest).collect();
    sorted.sort_by(|a, b| {
        a.measure_number
            .cmp(&b.measure_number)
            .then(a.offset_beats.partial_cmp(&b.offset_beats).unwrap_or(std::cmp::Ordering::Equal))
    });

    let mut onset_buckets: BTreeMap<(i64, u64), usize> = BTreeMap::new();
    for note in &sorted {
        let key = (note.measure_number, crate::types::round6(note.offset_beats).to_bits());
        *onset_buckets.entry(key).or_insert(0) += 1;
    }

    let max_simultaneous_notes = onset_buckets.values().copied().max().unwrap_or(0);
    let mut unresolved = BTreeSet::new();
    let mut simultaneous_conflict_count = 0;
    for ((measure, _), count) in &onset_buckets {
        if *count >= 2 {
            simultaneous_conflict_count += count - 1;
            unresolved.insert(*measure);
        }
    }

    let mut overlap_conflict_count = 0;
    for pair in sorted.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.measure_number != b.measure_number {
            continue;
        }
        if a.end_offset() > b.offset_beats + EPSILON {
            overlap_conflict_count += 1;
            unresolved.insert(a.measure_number);
        }
    }

    StructuralValidation {
        hard_fail: simultaneous_conflict_count > 0 || overlap_conflict_count > 0,
        max_simultaneous_notes,
        simultaneous_conflict_count,
        overlap_conflict_count,
        structural_unresolved_measures: unresolved.into_iter().collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LyricValidationStatus {
    Ready,
    ReadyWithWarnings,
    Fail,
}

#[derive(Debug, Clone, Serialize)]
pub struct LyricValidation {
    pub status: LyricValidationStatus,
    pub lyric_coverage_ratio: f64,
    pub word_lyric_coverage_ratio: f64,
    pub extension_lyric_ratio: f64,
    pub source_alignment_ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Validate lyric coverage of `target_notes` against `source_notes` used
/// for lyric derivation. `sung` excludes rests; `lyric_exempt` notes are
/// excluded from both numerator and denominator per §3's supplement.
pub fn validate_lyric_coverage(target_notes: &[Note], source_notes: &[Note]) -> LyricValidation {
    let countable: Vec<&Note> = target_notes.iter().filter(|n| !n.is_rest && !n.lyric_exempt).collect();
    let sung = countable.len();
    let missing = countable.iter().filter(|n| n.lyric.as_deref().unwrap_or("").is_empty()).count();
    let exempt = target_notes.iter().filter(|n| !n.is_rest && n.lyric_exempt).count();
    let effective_total = (sung.saturating_sub(exempt)).max(1);

    let lyric_coverage_ratio = round4((sung.saturating_sub(missing)) as f64 / effective_total as f64);

    let word_count = countable.iter().filter(|n| classify_lyric(n) == LyricClass::Word).count();
    let extension_count = countable.iter().filter(|n| classify_lyric(n) == LyricClass::Extension).count();
    let word_lyric_coverage_ratio = round4(word_count as f64 / effective_total as f64);
    let extension_lyric_ratio = round4(extension_count as f64 / effective_total as f64);

    let source_onsets: BTreeSet<u64> = source_notes
        .iter()
        .filter(|n| !n.is_rest && n.lyric.as_deref().is_some_and(|l| !l.is_empty()))
        .map(|n| crate::types::round6(n.offset_beats).to_bits())
        .collect();
    let lyric_bearing_targets: Vec<&Note> = countable
        .iter()
        .copied()
        .filter(|n| n.lyric.as_deref().is_some_and(|l| !l.is_empty()))
        .collect();
    let source_alignment_ratio = if lyric_bearing_targets.is_empty() {
        1.0
    } else {
        let matched = lyric_bearing_targets
            .iter()
            .filter(|n| source_onsets.contains(&crate::types::round6(n.offset_beats).to_bits()))
            .count();
        round4(matched as f64 / lyric_bearing_targets.len() as f64)
    };

    let min_word_ratio = config::env_float("VOICE_PART_MIN_WORD_LYRIC_COVERAGE_RATIO", 0.15);
    let warn_floor = config::env_float("VOICE_PART_MIN_WORD_LYRIC_WARN_FLOOR_RATIO", 0.75);
    let source_has_words = source_notes.iter().any(|n| !n.is_rest && classify_lyric(n) == LyricClass::Word);

    let (status, code) = if missing > 0 && lyric_coverage_ratio < 0.90 {
        (LyricValidationStatus::Fail, Some("validation_failed_needs_review".to_string()))
    } else if source_has_words && word_lyric_coverage_ratio < min_word_ratio {
        if word_lyric_coverage_ratio >= min_word_ratio * warn_floor {
            (LyricValidationStatus::ReadyWithWarnings, Some("word_lyric_coverage_too_low".to_string()))
        } else {
            (LyricValidationStatus::Fail, Some("word_lyric_coverage_too_low".to_string()))
        }
    } else if missing > 0 {
        (LyricValidationStatus::ReadyWithWarnings, Some("partial_lyric_coverage".to_string()))
    } else {
        (LyricValidationStatus::Ready, None)
    };

    LyricValidation {
        status,
        lyric_coverage_ratio,
        word_lyric_coverage_ratio,
        extension_lyric_ratio,
        source_alignment_ratio,
        code,
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(measure: i64, offset: f64, duration: f64, lyric: Option<&str>, exempt: bool) -> Note {
        Note {
            offset_beats: offset,
            duration_beats: duration,
            pitch_midi: Some(60.0),
            lyric: lyric.map(|s| s.to_string()),
            syllabic: None,
            lyric_is_extended: false,
            is_rest: false,
            tie_type: None,
            voice: "alto".to_string(),
            staff: "1".to_string(),
            measure_number: measure,
            lyric_exempt: exempt,
        }
    }

    #[test]
    fn structural_passes_for_monophonic_sequence() {
        let notes = vec![note(1, 0.0, 1.0, None, false), note(1, 1.0, 1.0, None, false)];
        let result = validate_structural_singability(&notes);
        assert!(!result.hard_fail);
        assert_eq!(result.max_simultaneous_notes, 1);
    }

    #[test]
    fn structural_fails_on_simultaneous_onset() {
        let notes = vec![note(1, 0.0, 1.0, None, false), note(1, 0.0, 1.0, None, false)];
        let result = validate_structural_singability(&notes);
        assert!(result.hard_fail);
        assert_eq!(result.simultaneous_conflict_count, 1);
    }

    #[test]
    fn structural_fails_on_sustain_overlap() {
        let notes = vec![note(1, 0.0, 2.0, None, false), note(1, 1.0, 1.0, None, false)];
        let result = validate_structural_singability(&notes);
        assert!(result.hard_fail);
        assert_eq!(result.overlap_conflict_count, 1);
    }

    #[test]
    fn lyric_validation_is_ready_when_full_coverage() {
        let notes = vec![note(1, 0.0, 1.0, Some("a"), false), note(1, 1.0, 1.0, Some("ma"), false)];
        let result = validate_lyric_coverage(&notes, &notes);
        assert_eq!(result.status, LyricValidationStatus::Ready);
        assert_eq!(result.lyric_coverage_ratio, 1.0);
    }

    #[test]
    fn lyric_exempt_notes_excluded_from_denominator() {
        let notes = vec![note(1, 0.0, 1.0, Some("a"), false), note(1, 1.0, 1.0, None, true)];
        let result = validate_lyric_coverage(&notes, &notes);
        assert_eq!(result.status, LyricValidationStatus::Ready);
    }

    #[test]
    fn low_coverage_fails_validation() {
        let notes = vec![
            note(1, 0.0, 1.0, Some("a"), false),
            note(1, 1.0, 1.0, None, false),
            note(1, 2.0, 1.0, None, false),
            note(1, 3.0, 1.0, None, false),
        ];
        let result = validate_lyric_coverage(&notes, &notes);
        assert_eq!(result.status, LyricValidationStatus::Fail);
        assert_eq!(result.code.as_deref(), Some("validation_failed_needs_review"));
    }
}
