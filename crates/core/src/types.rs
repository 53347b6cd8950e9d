//! Score data model: notes, parts, scores, and the analyzer's voice-part
//! and region types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Tolerance used throughout for onset/offset comparisons, in beats.
pub const EPSILON: f64 = 1e-5;

/// Sentinel voice label meaning "no explicit voice assigned".
pub const DEFAULT_VOICE: &str = "_default";

/// Tie state carried on a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieType {
    Start,
    Stop,
    Continue,
}

/// Syllabic role of a lyric token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Syllabic {
    Single,
    Begin,
    Middle,
    End,
}

/// A timed event within a part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub offset_beats: f64,
    pub duration_beats: f64,
    /// Floating MIDI pitch; `None` for rests.
    pub pitch_midi: Option<f64>,
    pub lyric: Option<String>,
    pub syllabic: Option<Syllabic>,
    #[serde(default)]
    pub lyric_is_extended: bool,
    #[serde(default)]
    pub is_rest: bool,
    pub tie_type: Option<TieType>,
    pub voice: String,
    pub staff: String,
    pub measure_number: i64,
    /// Excludes this note from lyric-coverage denominators; carried over
    /// from the original implementation's `lyric_exempt` flag.
    #[serde(default)]
    pub lyric_exempt: bool,
}

impl Note {
    pub fn end_offset(&self) -> f64 {
        self.offset_beats + self.duration_beats.max(0.0)
    }

    pub fn rounded_offset(&self) -> f64 {
        round6(self.offset_beats)
    }

    pub fn in_measure_range(&self, range: (i64, i64)) -> bool {
        self.measure_number >= range.0 && self.measure_number <= range.1
    }
}

/// Round to 6 decimal places, matching the original's `round(x, 6)`.
pub fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

/// An ordered sequence of notes belonging to one instrumental/vocal part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub part_id: String,
    pub part_name: String,
    pub notes: Vec<Note>,
}

/// A tempo change event; pass-through only, never interpreted by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TempoEvent {
    pub beat: f64,
    pub bpm: f64,
}

/// A cached prior transform, keyed by the composite key the Materializer
/// builds in `materialize::index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformRecord {
    pub part_index: usize,
    pub target_voice_part_id: String,
    pub source_voice_part_id: Option<String>,
    pub source_part_index: usize,
    pub propagated_lyrics: bool,
    pub score_fingerprint: Option<String>,
    pub transform_hash: Option<String>,
    pub transform_id: Option<String>,
    pub appended_part_ref: Option<AppendedPartRef>,
    pub modified_musicxml_path: Option<String>,
}

/// A full score: ordered parts plus pass-through metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub title: Option<String>,
    #[serde(default)]
    pub tempos: Vec<TempoEvent>,
    pub parts: Vec<Part>,
    pub source_musicxml_path: Option<String>,
    /// Per-call cache of prior derivations, attached to the score for
    /// inspection/debug. Not shared across invocations.
    #[serde(default)]
    pub voice_part_transforms: BTreeMap<String, TransformRecord>,
}

impl Score {
    pub fn new(title: Option<String>) -> Self {
        Self {
            title,
            tempos: Vec::new(),
            parts: Vec::new(),
            source_musicxml_path: None,
            voice_part_transforms: BTreeMap::new(),
        }
    }
}

/// The analyzer's decomposition of one voice label within a part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoicePart {
    pub source_voice_id: String,
    pub voice_part_id: String,
    pub note_count: usize,
    pub lyric_note_count: usize,
    pub missing_lyrics: usize,
    pub avg_pitch_midi: f64,
    /// Rank among siblings of the same part, 0 = highest mean pitch.
    pub rank: usize,
}

/// Per-measure classification produced by the Score Analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegionStatus {
    Resolved,
    NeedsSplit,
    UnassignedSource,
    NoMusic,
}

/// A contiguous run of measures sharing one [`RegionStatus`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub status: RegionStatus,
    pub start_measure: i64,
    pub end_measure: i64,
}

/// Reference to a voice-part: `(part_index, voice_part_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
pub struct VoicePartRef {
    pub part_index: usize,
    pub voice_part_id: String,
}

/// Result of appending a derived part to a score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppendedPartRef {
    pub part_id: String,
    pub part_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_index: Option<usize>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden_default_lane: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(measure: i64, offset: f64, duration: f64, pitch: Option<f64>) -> Note {
        Note {
            offset_beats: offset,
            duration_beats: duration,
            pitch_midi: pitch,
            lyric: None,
            syllabic: None,
            lyric_is_extended: false,
            is_rest: pitch.is_none(),
            tie_type: None,
            voice: "1".to_string(),
            staff: "1".to_string(),
            measure_number: measure,
            lyric_exempt: false,
        }
    }

    #[test]
    fn end_offset_adds_duration() {
        let n = note(1, 0.0, 2.0, Some(60.0));
        assert!((n.end_offset() - 2.0).abs() < EPSILON);
    }

    #[test]
    fn round6_matches_python_semantics() {
        assert_eq!(round6(0.1234567), 0.123457);
        assert_eq!(round6(1.0), 1.0);
    }

    #[test]
    fn in_measure_range_is_inclusive() {
        let n = note(3, 0.0, 1.0, Some(60.0));
        assert!(n.in_measure_range((1, 3)));
        assert!(n.in_measure_range((3, 3)));
        assert!(!n.in_measure_range((4, 5)));
    }

    #[test]
    fn score_new_has_empty_transform_cache() {
        let score = Score::new(Some("Title".to_string()));
        assert!(score.voice_part_transforms.is_empty());
        assert!(score.parts.is_empty());
    }
}
