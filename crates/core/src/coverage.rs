//! Lyric coverage statistics, shared by the Plan Linter (§4.3) and the
//! Lyric Coverage Validator (§4.6). Computed once per `(part, voice,
//! range)` and reused, per §4.3's "computed once... and reused across
//! rules" note.

use crate::types::{Note, Part};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LyricClass {
    Word,
    Extension,
    Empty,
}

/// Classify a note's lyric per §4.3: word (real text), extension (`+` or
/// `lyric_is_extended`), or empty.
pub fn classify_lyric(note: &Note) -> LyricClass {
    if note.lyric_is_extended {
        return LyricClass::Extension;
    }
    match note.lyric.as_deref() {
        None => LyricClass::Empty,
        Some("") => LyricClass::Empty,
        Some("+") => LyricClass::Extension,
        Some(_) => LyricClass::Word,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CoverageStats {
    pub sung_note_count: usize,
    pub word_lyric_note_count: usize,
    pub extension_lyric_note_count: usize,
    pub word_lyric_coverage_ratio: f64,
    pub extension_lyric_ratio: f64,
}

/// Coverage statistics for notes of `voice` within `part` whose measure
/// falls in `[start, end]`.
pub fn compute_coverage(part: &Part, voice: &str, start: i64, end: i64) -> CoverageStats {
    let notes: Vec<&Note> = part
        .notes
        .iter()
        .filter(|n| !n.is_rest && n.voice == voice && n.in_measure_range((start, end)))
        .collect();

    let sung_note_count = notes.len();
    let word_lyric_note_count = notes.iter().filter(|n| classify_lyric(n) == LyricClass::Word).count();
    let extension_lyric_note_count = notes.iter().filter(|n| classify_lyric(n) == LyricClass::Extension).count();

    let denom = sung_note_count.max(1) as f64;
    CoverageStats {
        sung_note_count,
        word_lyric_note_count,
        extension_lyric_note_count,
        word_lyric_coverage_ratio: round4(word_lyric_note_count as f64 / denom),
        extension_lyric_ratio: round4(extension_lyric_note_count as f64 / denom),
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
