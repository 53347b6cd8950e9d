//! Preflight API (§6): a cheap pre-check callers can run before ever
//! building a plan, to decide whether synthesizing `part_index` directly
//! (skipping voice-part preprocessing entirely) is safe.

use log::debug;
use serde_json::json;

use crate::analyzer::{analyze_part, PartAnalysis};
use crate::outcome::ActionRequired;
use crate::types::{Score, DEFAULT_VOICE};

/// Returns `None` when `part_index` can be synthesized as-is; otherwise a
/// `preprocessing_required` [`ActionRequired`] with structured
/// `diagnostics` naming every reason synthesis would be unsafe.
pub fn synthesize_preflight_action_required(score: &Score, part_index: usize) -> Option<ActionRequired> {
    let part = score.parts.get(part_index)?;
    let analysis = analyze_part(part, part_index);

    let mut diagnostics = Vec::new();

    let non_default: Vec<&str> =
        analysis.voice_parts.iter().filter(|vp| vp.source_voice_id != DEFAULT_VOICE).map(|vp| vp.voice_part_id.as_str()).collect();
    if non_default.len() > 1 {
        diagnostics.push(json!({
            "reason": "multi_voice_detected",
            "voice_part_ids": non_default,
        }));
    }

    if !analysis.chord_measures.is_empty() {
        diagnostics.push(json!({
            "reason": "chord_measures_detected",
            "measure_count": analysis.chord_measures.len(),
        }));
    }

    let missing_lyrics_total: usize = analysis.voice_parts.iter().map(|vp| vp.missing_lyrics).sum();
    let sung_total: usize = analysis.voice_parts.iter().map(|vp| vp.note_count).sum();
    if sung_total > 0 && missing_lyrics_total == sung_total {
        diagnostics.push(json!({
            "reason": "missing_lyrics_detected",
            "missing_lyric_note_count": missing_lyrics_total,
        }));
    }

    if heuristics_failed(&analysis) {
        diagnostics.push(json!({ "reason": "derived_target_heuristics_failed" }));
    }

    if diagnostics.is_empty() {
        debug!("preflight: part {} is safe to synthesize directly", part_index);
        return None;
    }

    debug!("preflight: part {} requires preprocessing ({} diagnostic(s))", part_index, diagnostics.len());
    Some(
        ActionRequired::new("preprocessing_required", "preprocessing_required", "voice-part preprocessing is required before synthesis")
            .with("part_index", part_index as i64)
            .with("diagnostics", serde_json::Value::Array(diagnostics)),
    )
}

/// A part with no voice-parts at all (e.g. entirely rests) can't be
/// derived into anything a synthesizer could use.
fn heuristics_failed(analysis: &PartAnalysis) -> bool {
    analysis.voice_parts.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Note, Part};

    fn note(voice: &str, measure: i64, offset: f64, pitch: Option<f64>, lyric: Option<&str>) -> Note {
        Note {
            offset_beats: offset,
            duration_beats: 1.0,
            pitch_midi: pitch,
            lyric: lyric.map(|s| s.to_string()),
            syllabic: None,
            lyric_is_extended: false,
            is_rest: pitch.is_none(),
            tie_type: None,
            voice: voice.to_string(),
            staff: "1".to_string(),
            measure_number: measure,
            lyric_exempt: false,
        }
    }

    #[test]
    fn single_voice_fully_lyricized_part_is_safe() {
        let mut score = Score::new(Some("Test".to_string()));
        score.parts.push(Part {
            part_id: "P1".to_string(),
            part_name: "Soprano".to_string(),
            notes: vec![note("1", 1, 0.0, Some(72.0), Some("a")), note("1", 1, 1.0, Some(72.0), Some("men"))],
        });
        assert!(synthesize_preflight_action_required(&score, 0).is_none());
    }

    #[test]
    fn multi_voice_part_requires_preprocessing() {
        let mut score = Score::new(Some("Test".to_string()));
        score.parts.push(Part {
            part_id: "P1".to_string(),
            part_name: "SOPRANO ALTO".to_string(),
            notes: vec![note("1", 1, 0.0, Some(72.0), Some("a")), note("2", 1, 0.0, Some(60.0), Some("a"))],
        });
        let result = synthesize_preflight_action_required(&score, 0).unwrap();
        assert_eq!(result.code, "preprocessing_required");
        let diagnostics = result.context.get("diagnostics").unwrap().as_array().unwrap();
        assert!(diagnostics.iter().any(|d| d["reason"] == "multi_voice_detected"));
    }

    #[test]
    fn out_of_range_part_index_returns_none() {
        let score = Score::new(Some("Test".to_string()));
        assert!(synthesize_preflight_action_required(&score, 0).is_none());
    }
}
