//! Lyric Propagator (§4.5b): maps source lyric tokens onto target notes
//! using one of three alignment strategies.

use serde::Serialize;

use crate::config;
use crate::plan::{LyricPolicy, LyricStrategy};
use crate::types::{round6, Note, Syllabic};

/// One lyric-bearing entry in the source timeline.
#[derive(Debug, Clone)]
struct SourceEntry {
    start: f64,
    duration: f64,
    lyric: Option<String>,
    syllabic: Option<Syllabic>,
    lyric_is_extended: bool,
    lyric_confidence: f64,
    source_index: usize,
}

impl SourceEntry {
    fn end(&self) -> f64 {
        self.start + self.duration
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DroppedSourceLyric {
    pub source_index: usize,
    pub lyric: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PropagationDiagnostics {
    pub source_lyric_candidates_count: usize,
    pub mapped_source_lyrics_count: usize,
    pub dropped_source_lyrics: Vec<DroppedSourceLyric>,
}

/// Build the ordered, verse-filtered timeline of lyric-bearing source
/// notes. A lyric starting with `"N."` belongs to verse `N`; when
/// `verse_number` is set and `copy_all_verses` is false, other verses are
/// dropped. Untagged lyrics always pass.
fn build_source_timeline(source_notes: &[Note], verse_number: &str, copy_all_verses: bool) -> Vec<SourceEntry> {
    let mut entries = Vec::new();
    for (source_index, note) in source_notes.iter().enumerate() {
        if note.is_rest {
            continue;
        }
        let Some(lyric) = note.lyric.as_deref() else { continue };
        if lyric.is_empty() {
            continue;
        }

        if !copy_all_verses {
            if let Some((verse, _)) = lyric.split_once('.') {
                if verse.chars().all(|c| c.is_ascii_digit()) && !verse.is_empty() && verse != verse_number {
                    continue;
                }
            }
        }

        let is_extension = lyric == "+" || note.lyric_is_extended;
        entries.push(SourceEntry {
            start: note.offset_beats,
            duration: note.duration_beats,
            lyric: Some(lyric.to_string()),
            syllabic: note.syllabic,
            lyric_is_extended: is_extension,
            lyric_confidence: if is_extension { 0.5 } else { 1.0 },
            source_index,
        });
    }
    entries.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
    entries
}

/// Propagate lyrics from `source_notes` onto `target_notes` (mutated in
/// place) using `strategy`/`policy`. Returns diagnostics, including
/// `dropped_source_lyrics` for entries that were never mapped.
pub fn propagate_lyrics(
    target_notes: &mut [Note],
    source_notes: &[Note],
    strategy: LyricStrategy,
    policy: LyricPolicy,
    verse_number: &str,
    copy_all_verses: bool,
) -> PropagationDiagnostics {
    let strategy = if strategy == LyricStrategy::SyllableFlow && !config::syllable_flow_enabled() {
        LyricStrategy::StrictOnset
    } else {
        strategy
    };

    let timeline = build_source_timeline(source_notes, verse_number, copy_all_verses);
    let mut mapped: Vec<bool> = vec![false; timeline.len()];

    let mut cursor = 0usize;
    let mut prev_target_offset: Option<f64> = None;
    let mut reset_cursor_next = false;

    for note in target_notes.iter_mut() {
        if note.is_rest {
            continue;
        }
        match policy {
            LyricPolicy::FillMissingOnly | LyricPolicy::PreserveExisting => {
                if note.lyric.as_deref().is_some_and(|l| !l.is_empty()) {
                    continue;
                }
            }
            LyricPolicy::ReplaceAll => {}
        }

        let gap_boundary = prev_target_offset.map(|p| note.offset_beats - p >= 1.0).unwrap_or(false);
        if reset_cursor_next || gap_boundary {
            cursor = nearest_entry_index(&timeline, note.offset_beats);
            reset_cursor_next = false;
        }

        let chosen = match strategy {
            LyricStrategy::StrictOnset => strict_onset(&timeline, note.offset_beats),
            LyricStrategy::OverlapBestMatch => overlap_best_match(&timeline, note),
            LyricStrategy::SyllableFlow => syllable_flow(&timeline, cursor),
        };

        if let Some(idx) = chosen {
            let entry = &timeline[idx];
            note.lyric = entry.lyric.clone();
            note.syllabic = entry.syllabic;
            note.lyric_is_extended = entry.lyric_is_extended;
            mapped[idx] = true;
            if strategy == LyricStrategy::SyllableFlow {
                cursor = idx + 1;
            }
        }

        if note.duration_beats >= 4.0 {
            reset_cursor_next = true;
        }
        prev_target_offset = Some(note.offset_beats);
    }

    let dropped_source_lyrics = timeline
        .iter()
        .zip(mapped.iter())
        .filter(|(_, &m)| !m)
        .map(|(entry, _)| DroppedSourceLyric {
            source_index: entry.source_index,
            lyric: entry.lyric.clone().unwrap_or_default(),
            reason: "not_mapped_to_any_target_note".to_string(),
        })
        .collect();

    PropagationDiagnostics {
        source_lyric_candidates_count: timeline.len(),
        mapped_source_lyrics_count: mapped.iter().filter(|m| **m).count(),
        dropped_source_lyrics,
    }
}

fn nearest_entry_index(timeline: &[SourceEntry], offset: f64) -> usize {
    timeline
        .iter()
        .position(|e| e.start >= offset)
        .unwrap_or(timeline.len().saturating_sub(1))
}

fn strict_onset(timeline: &[SourceEntry], offset: f64) -> Option<usize> {
    let target_rounded = round6(offset);
    timeline.iter().position(|e| round6(e.start) == target_rounded)
}

fn overlap_best_match(timeline: &[SourceEntry], target: &Note) -> Option<usize> {
    let target_start = target.offset_beats;
    let target_end = target.offset_beats + target.duration_beats;
    let target_duration = target.duration_beats.max(1e-9);

    // (idx, score, confidence, abs_delta, source_index)
    let mut best: Option<(usize, f64, f64, f64, usize)> = None;
    for (idx, entry) in timeline.iter().enumerate() {
        let overlap = (target_end.min(entry.end()) - target_start.max(entry.start)).max(0.0);
        if overlap <= 0.0 {
            continue;
        }
        let overlap_ratio = overlap / target_duration.min(entry.duration.max(1e-9));
        let delta = (target.offset_beats - entry.start).abs();
        let onset_proximity = (1.0 - delta / target_duration.max(1.0)).max(0.0);
        let score = 0.7 * overlap_ratio + 0.3 * onset_proximity;

        let better = match &best {
            None => true,
            Some((_, best_score, best_confidence, best_delta, best_source_index)) => {
                if (score - best_score).abs() > 1e-9 {
                    score > *best_score
                } else if (entry.lyric_confidence - best_confidence).abs() > 1e-9 {
                    entry.lyric_confidence > *best_confidence
                } else if (delta - best_delta).abs() > 1e-9 {
                    delta < *best_delta
                } else {
                    entry.source_index < *best_source_index
                }
            }
        };
        if better {
            best = Some((idx, score, entry.lyric_confidence, delta, entry.source_index));
        }
    }
    best.map(|(idx, ..)| idx)
}

fn syllable_flow(timeline: &[SourceEntry], cursor: usize) -> Option<usize> {
    if cursor >= timeline.len() {
        return None;
    }
    Some(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lyric_note(offset: f64, duration: f64, lyric: &str) -> Note {
        Note {
            offset_beats: offset,
            duration_beats: duration,
            pitch_midi: Some(60.0),
            lyric: Some(lyric.to_string()),
            syllabic: None,
            lyric_is_extended: false,
            is_rest: false,
            tie_type: None,
            voice: "soprano".to_string(),
            staff: "1".to_string(),
            measure_number: 1,
            lyric_exempt: false,
        }
    }

    fn plain_note(offset: f64, duration: f64) -> Note {
        Note {
            offset_beats: offset,
            duration_beats: duration,
            pitch_midi: Some(65.0),
            lyric: None,
            syllabic: None,
            lyric_is_extended: false,
            is_rest: false,
            tie_type: None,
            voice: "alto".to_string(),
            staff: "1".to_string(),
            measure_number: 1,
            lyric_exempt: false,
        }
    }

    #[test]
    fn strict_onset_matches_exact_offsets() {
        let source = vec![lyric_note(0.0, 1.0, "a"), lyric_note(1.0, 1.0, "ma")];
        let mut target = vec![plain_note(0.0, 1.0), plain_note(1.0, 1.0)];
        let diag = propagate_lyrics(&mut target, &source, LyricStrategy::StrictOnset, LyricPolicy::FillMissingOnly, "1", false);
        assert_eq!(target[0].lyric.as_deref(), Some("a"));
        assert_eq!(target[1].lyric.as_deref(), Some("ma"));
        assert_eq!(diag.mapped_source_lyrics_count, 2);
        assert!(diag.dropped_source_lyrics.is_empty());
    }

    #[test]
    fn fill_missing_only_skips_notes_with_existing_lyric() {
        let source = vec![lyric_note(0.0, 1.0, "a")];
        let mut target = vec![lyric_note(0.0, 1.0, "existing")];
        propagate_lyrics(&mut target, &source, LyricStrategy::StrictOnset, LyricPolicy::FillMissingOnly, "1", false);
        assert_eq!(target[0].lyric.as_deref(), Some("existing"));
    }

    #[test]
    fn replace_all_overwrites_existing_lyric() {
        let source = vec![lyric_note(0.0, 1.0, "a")];
        let mut target = vec![lyric_note(0.0, 1.0, "existing")];
        propagate_lyrics(&mut target, &source, LyricStrategy::StrictOnset, LyricPolicy::ReplaceAll, "1", false);
        assert_eq!(target[0].lyric.as_deref(), Some("a"));
    }

    #[test]
    fn verse_filter_drops_other_verses_when_not_copying_all() {
        let source = vec![lyric_note(0.0, 1.0, "1.a"), lyric_note(0.0, 1.0, "2.b")];
        let mut target = vec![plain_note(0.0, 1.0)];
        propagate_lyrics(&mut target, &source, LyricStrategy::StrictOnset, LyricPolicy::FillMissingOnly, "1", false);
        assert_eq!(target[0].lyric.as_deref(), Some("1.a"));
    }

    #[test]
    fn unmapped_source_entries_are_reported_as_dropped() {
        let source = vec![lyric_note(5.0, 1.0, "orphan")];
        let mut target = vec![plain_note(0.0, 1.0)];
        let diag = propagate_lyrics(&mut target, &source, LyricStrategy::StrictOnset, LyricPolicy::FillMissingOnly, "1", false);
        assert_eq!(diag.dropped_source_lyrics.len(), 1);
        assert_eq!(diag.dropped_source_lyrics[0].lyric, "orphan");
    }
}
