//! Analyze API extras (§6): ranked alternative-source hints, per-measure
//! lyric coverage, and per-measure staff/voice presence. These supplement
//! the Score Analyzer's `PartAnalysis` output for callers building plans
//! interactively rather than deriving them from the original XML (score
//! parsing from serialized formats is out of scope; staff/voice presence
//! is read back off the already-parsed `Note` fields instead).

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::analyzer::PartAnalysis;
use crate::coverage::compute_coverage;
use crate::types::{round6, Score, VoicePartRef};

#[derive(Debug, Clone, Serialize)]
pub struct SourceCandidateHint {
    pub part_index: usize,
    pub voice_part_id: String,
    pub score: f64,
    pub onset_overlap: f64,
    pub lyric_density: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetCandidateHints {
    pub target: VoicePartRef,
    pub candidates: Vec<SourceCandidateHint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeasureLyricCoverage {
    pub part_index: usize,
    pub voice_part_id: String,
    pub measure: i64,
    pub word_lyric_coverage_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeasurePresence {
    pub part_index: usize,
    pub measure: i64,
    pub staves: Vec<String>,
    pub voices: Vec<String>,
}

fn onset_set(part: &crate::types::Part, voice: &str) -> HashSet<(i64, u64)> {
    part.notes.iter().filter(|n| !n.is_rest && n.voice == voice).map(|n| (n.measure_number, round6(n.offset_beats).to_bits())).collect()
}

fn onset_overlap(target_onsets: &HashSet<(i64, u64)>, candidate_onsets: &HashSet<(i64, u64)>) -> f64 {
    if target_onsets.is_empty() {
        return 0.0;
    }
    let shared = target_onsets.intersection(candidate_onsets).count();
    round4(shared as f64 / target_onsets.len() as f64)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// For every target voice-part of every analyzed part, rank the other
/// voice-parts of that same part as candidate melody/lyric sources,
/// scored `0.7*onset_overlap + 0.3*lyric_density` (§6).
pub fn source_candidate_hints(score: &Score, analyses: &[PartAnalysis]) -> Vec<TargetCandidateHints> {
    let mut out = Vec::new();
    for (part_index, analysis) in analyses.iter().enumerate() {
        let Some(part) = score.parts.get(part_index) else { continue };
        for target_vp in &analysis.voice_parts {
            let target_onsets = onset_set(part, &target_vp.source_voice_id);
            let mut candidates = Vec::new();
            for candidate_vp in &analysis.voice_parts {
                if candidate_vp.voice_part_id == target_vp.voice_part_id {
                    continue;
                }
                let candidate_onsets = onset_set(part, &candidate_vp.source_voice_id);
                let overlap = onset_overlap(&target_onsets, &candidate_onsets);
                let stats = compute_coverage(part, &candidate_vp.source_voice_id, i64::MIN, i64::MAX);
                let lyric_density = stats.word_lyric_coverage_ratio;
                let score = round4(0.7 * overlap + 0.3 * lyric_density);
                candidates.push(SourceCandidateHint {
                    part_index,
                    voice_part_id: candidate_vp.voice_part_id.clone(),
                    score,
                    onset_overlap: overlap,
                    lyric_density,
                });
            }
            candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            out.push(TargetCandidateHints {
                target: VoicePartRef { part_index, voice_part_id: target_vp.voice_part_id.clone() },
                candidates,
            });
        }
    }
    out
}

/// Per-measure word-lyric coverage ratio for every voice-part of every
/// analyzed part, over the part's full sung span.
pub fn measure_lyric_coverage(score: &Score, analyses: &[PartAnalysis]) -> Vec<MeasureLyricCoverage> {
    let mut out = Vec::new();
    for (part_index, analysis) in analyses.iter().enumerate() {
        let Some(part) = score.parts.get(part_index) else { continue };
        for vp in &analysis.voice_parts {
            let measures: BTreeSet<i64> =
                part.notes.iter().filter(|n| !n.is_rest && n.voice == vp.source_voice_id).map(|n| n.measure_number).collect();
            for measure in measures {
                let stats = compute_coverage(part, &vp.source_voice_id, measure, measure);
                out.push(MeasureLyricCoverage {
                    part_index,
                    voice_part_id: vp.voice_part_id.clone(),
                    measure,
                    word_lyric_coverage_ratio: stats.word_lyric_coverage_ratio,
                });
            }
        }
    }
    out
}

/// Per-measure staff/voice presence, read off each part's notes directly
/// rather than re-inspecting the original serialized score.
pub fn measure_presence(score: &Score) -> Vec<MeasurePresence> {
    let mut out = Vec::new();
    for (part_index, part) in score.parts.iter().enumerate() {
        let measures: BTreeSet<i64> = part.notes.iter().map(|n| n.measure_number).collect();
        for measure in measures {
            let mut staves: BTreeSet<String> = BTreeSet::new();
            let mut voices: BTreeSet<String> = BTreeSet::new();
            for note in part.notes.iter().filter(|n| n.measure_number == measure) {
                staves.insert(note.staff.clone());
                voices.insert(note.voice.clone());
            }
            out.push(MeasurePresence {
                part_index,
                measure,
                staves: staves.into_iter().collect(),
                voices: voices.into_iter().collect(),
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_part;
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

    fn sample() -> (Score, Vec<PartAnalysis>) {
        let part = Part {
            part_id: "P1".to_string(),
            part_name: "SOPRANO ALTO".to_string(),
            notes: vec![
                note("1", 1, 0.0, 72.0, Some("a")),
                note("1", 1, 1.0, 72.0, Some("men")),
                note("2", 1, 0.0, 60.0, None),
                note("2", 1, 1.0, 60.0, None),
            ],
        };
        let analysis = analyze_part(&part, 0);
        let mut score = Score::new(Some("Test".to_string()));
        score.parts.push(part);
        (score, vec![analysis])
    }

    #[test]
    fn alto_candidate_hints_rank_soprano_first() {
        let (score, analyses) = sample();
        let hints = source_candidate_hints(&score, &analyses);
        let alto_hints = hints.iter().find(|h| h.target.voice_part_id == "alto").unwrap();
        assert_eq!(alto_hints.candidates.len(), 1);
        assert_eq!(alto_hints.candidates[0].voice_part_id, "soprano");
        assert_eq!(alto_hints.candidates[0].onset_overlap, 1.0);
    }

    #[test]
    fn measure_lyric_coverage_reports_full_coverage_for_soprano() {
        let (score, analyses) = sample();
        let coverage = measure_lyric_coverage(&score, &analyses);
        let soprano_m1 = coverage.iter().find(|c| c.voice_part_id == "soprano" && c.measure == 1).unwrap();
        assert_eq!(soprano_m1.word_lyric_coverage_ratio, 1.0);
    }

    #[test]
    fn measure_presence_lists_both_voices() {
        let (score, _) = sample();
        let presence = measure_presence(&score);
        let m1 = presence.iter().find(|p| p.measure == 1).unwrap();
        assert_eq!(m1.voices, vec!["1".to_string(), "2".to_string()]);
    }
}
