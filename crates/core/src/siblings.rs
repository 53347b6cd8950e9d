//! Sibling Generator (§4.9): after a target is materialized, automatically
//! derive the part's other non-default split-lanes that the plan didn't
//! name explicitly, so downstream tools can address the whole family.

use std::collections::HashSet;

use anyhow::Result;

use crate::analyzer::PartAnalysis;
use crate::exec::monophony::enforce_monophony;
use crate::materialize::{finalize, FinalizeOutcome};
use crate::types::{Score, DEFAULT_VOICE};

/// Derive every sibling voice-part of `part_index` not present in
/// `already_named` and not equal to `primary_voice_part_id`. No lyric
/// propagation is performed; each sibling's native notes (under
/// `duplicate_to_all`) are monophony-enforced and materialized in turn,
/// chaining each output's artifact path forward as the source for the
/// next.
pub fn generate_siblings(
    score: &mut Score,
    analysis: &PartAnalysis,
    part_index: usize,
    already_named: &HashSet<String>,
    primary_voice_part_id: &str,
) -> Result<Vec<FinalizeOutcome>> {
    let mut outcomes = Vec::new();

    let part_name = score.parts[part_index].part_name.clone();
    let part_id = score.parts[part_index].part_id.clone();

    let siblings: Vec<_> = analysis
        .voice_parts
        .iter()
        .filter(|vp| vp.source_voice_id != DEFAULT_VOICE)
        .filter(|vp| vp.voice_part_id != primary_voice_part_id)
        .filter(|vp| !already_named.contains(&vp.voice_part_id))
        .cloned()
        .collect();

    for sibling in siblings {
        let native_notes: Vec<_> =
            score.parts[part_index].notes.iter().filter(|n| n.voice == sibling.source_voice_id).cloned().collect();
        let notes = enforce_monophony(native_notes, &sibling.voice_part_id);

        let outcome = finalize(
            score,
            part_index,
            &sibling.voice_part_id,
            Some(sibling.source_voice_id.as_str()),
            part_index,
            &part_name,
            &part_id,
            false,
            notes,
        )?;

        if let Some(path) = &outcome.modified_musicxml_path {
            score.source_musicxml_path = Some(path.clone());
        }
        outcomes.push(outcome);
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_part;
    use crate::types::{Note, Part};

    fn note(voice: &str, measure: i64, offset: f64, pitch: f64) -> Note {
        Note {
            offset_beats: offset,
            duration_beats: 1.0,
            pitch_midi: Some(pitch),
            lyric: None,
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
    fn generates_one_sibling_for_unnamed_alto_when_soprano_is_primary() {
        let part = Part {
            part_id: "P1".to_string(),
            part_name: "SOPRANO ALTO".to_string(),
            notes: vec![note("1", 1, 0.0, 72.0), note("2", 1, 0.0, 60.0)],
        };
        let analysis = analyze_part(&part, 0);
        let mut score = Score::new(Some("Test".to_string()));
        score.parts.push(part);

        let already_named = HashSet::new();
        let outcomes = generate_siblings(&mut score, &analysis, 0, &already_named, "soprano").unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(score.parts.len(), 2);
    }

    #[test]
    fn skips_siblings_already_named_in_the_plan() {
        let part = Part {
            part_id: "P1".to_string(),
            part_name: "SOPRANO ALTO".to_string(),
            notes: vec![note("1", 1, 0.0, 72.0), note("2", 1, 0.0, 60.0)],
        };
        let analysis = analyze_part(&part, 0);
        let mut score = Score::new(Some("Test".to_string()));
        score.parts.push(part);

        let mut already_named = HashSet::new();
        already_named.insert("alto".to_string());
        let outcomes = generate_siblings(&mut score, &analysis, 0, &already_named, "soprano").unwrap();
        assert!(outcomes.is_empty());
    }
}
