//! Materializer & Artifact Index (§4.10): turns a finished set of derived
//! notes into an appended score part, reusing prior work via the
//! process-global artifact index and writing to disk (or a temp
//! fallback) when a source MusicXML path is known.

pub mod hash;
pub mod index;
pub mod xml;

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::types::{AppendedPartRef, Note, Part, Score, TransformRecord, DEFAULT_VOICE};

#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub transform_id: String,
    pub score_fingerprint: String,
    pub transform_hash: String,
    pub appended_part_ref: AppendedPartRef,
    pub modified_musicxml_path: Option<String>,
    pub reused_transform: bool,
    pub hidden_default_lane: bool,
}

#[derive(Serialize)]
struct TransformPayload<'a> {
    part_index: usize,
    target_voice_part_id: &'a str,
    source_voice_part_id: Option<&'a str>,
    source_part_index: usize,
    propagated: bool,
    notes: &'a [Note],
}

/// Run the finalize contract under the per-artifact lock: reuse, hidden
/// default lane, on-disk append, or in-memory-only append, then update
/// the score's in-memory parts list and transform cache.
#[allow(clippy::too_many_arguments)]
pub fn finalize(
    score: &mut Score,
    part_index: usize,
    target_voice_part_id: &str,
    source_voice_part_id: Option<&str>,
    source_part_index: usize,
    source_part_name: &str,
    source_part_id: &str,
    propagated_lyrics: bool,
    notes: Vec<Note>,
) -> Result<FinalizeOutcome> {
    let score_fingerprint = hash::score_fingerprint(score)?;
    let payload = TransformPayload {
        part_index,
        target_voice_part_id,
        source_voice_part_id,
        source_part_index,
        propagated: propagated_lyrics,
        notes: &notes,
    };
    let transform_hash = hash::transform_hash(&payload)?;
    let artifact_key = index::artifact_key(&score_fingerprint, &transform_hash);
    let lock_key = index::lock_key(score.source_musicxml_path.as_deref(), &artifact_key);

    let lock = index::get_artifact_lock(&lock_key);
    let _guard = lock.lock().expect("artifact lock poisoned");

    if let Some(entry) = index::get_artifact(&artifact_key) {
        let is_live = entry.modified_musicxml_path.as_deref().map(|p| Path::new(p).exists()).unwrap_or(true);
        if is_live {
            let appended_part_ref = entry.appended_part_ref.clone().unwrap_or_else(|| AppendedPartRef {
                part_id: hash::derived_part_id(&transform_hash),
                part_name: hash::build_derived_part_name(source_part_name, source_part_id, source_part_index, target_voice_part_id),
                part_index: None,
                hidden_default_lane: false,
            });
            record_transform(score, target_voice_part_id, part_index, source_voice_part_id, source_part_index, propagated_lyrics, &score_fingerprint, &transform_hash, &entry.transform_id, &appended_part_ref, entry.modified_musicxml_path.clone());
            return Ok(FinalizeOutcome {
                transform_id: entry.transform_id,
                score_fingerprint,
                transform_hash,
                appended_part_ref,
                modified_musicxml_path: entry.modified_musicxml_path,
                reused_transform: true,
                hidden_default_lane: entry.appended_part_ref.as_ref().map(|r| r.hidden_default_lane).unwrap_or(false),
            });
        }
    }

    let transform_id = hash::transform_id(part_index, target_voice_part_id, &transform_hash);
    let derived_id = hash::derived_part_id(&transform_hash);
    let derived_name = hash::build_derived_part_name(source_part_name, source_part_id, source_part_index, target_voice_part_id);

    let hidden_default_lane = source_voice_part_id == Some(DEFAULT_VOICE);

    let modified_musicxml_path = if hidden_default_lane {
        None
    } else if let Some(source_path) = score.source_musicxml_path.clone() {
        Some(write_appended_xml(&source_path, &derived_id, &derived_name, Some(source_part_id), &notes, &transform_hash)?)
    } else {
        None
    };

    score.parts.push(Part { part_id: derived_id.clone(), part_name: derived_name.clone(), notes });
    let assigned_index = score.parts.len() - 1;

    let appended_part_ref =
        AppendedPartRef { part_id: derived_id, part_name: derived_name, part_index: Some(assigned_index), hidden_default_lane };

    index::store_artifact(
        &artifact_key,
        index::ArtifactEntry {
            transform_id: transform_id.clone(),
            transform_hash: transform_hash.clone(),
            score_fingerprint: score_fingerprint.clone(),
            appended_part_ref: Some(appended_part_ref.clone()),
            modified_musicxml_path: modified_musicxml_path.clone(),
        },
    );

    record_transform(
        score,
        target_voice_part_id,
        part_index,
        source_voice_part_id,
        source_part_index,
        propagated_lyrics,
        &score_fingerprint,
        &transform_hash,
        &transform_id,
        &appended_part_ref,
        modified_musicxml_path.clone(),
    );

    Ok(FinalizeOutcome {
        transform_id,
        score_fingerprint,
        transform_hash,
        appended_part_ref,
        modified_musicxml_path,
        reused_transform: false,
        hidden_default_lane,
    })
}

#[allow(clippy::too_many_arguments)]
fn record_transform(
    score: &mut Score,
    target_voice_part_id: &str,
    part_index: usize,
    source_voice_part_id: Option<&str>,
    source_part_index: usize,
    propagated_lyrics: bool,
    score_fingerprint: &str,
    transform_hash: &str,
    transform_id: &str,
    appended_part_ref: &AppendedPartRef,
    modified_musicxml_path: Option<String>,
) {
    score.voice_part_transforms.insert(
        transform_id.to_string(),
        TransformRecord {
            part_index,
            target_voice_part_id: target_voice_part_id.to_string(),
            source_voice_part_id: source_voice_part_id.map(|s| s.to_string()),
            source_part_index,
            propagated_lyrics,
            score_fingerprint: Some(score_fingerprint.to_string()),
            transform_hash: Some(transform_hash.to_string()),
            transform_id: Some(transform_id.to_string()),
            appended_part_ref: Some(appended_part_ref.clone()),
            modified_musicxml_path,
        },
    );
}

/// Serialize and append the derived part to `source_path`, naming the
/// output `<stem-without-prior-derived-suffix>.derived_<first-10-hex>.xml`.
/// Falls back to a temp directory when writing adjacent to the source
/// fails.
fn write_appended_xml(
    source_path: &str,
    part_id: &str,
    part_name: &str,
    reference_part_id: Option<&str>,
    notes: &[Note],
    transform_hash: &str,
) -> Result<String> {
    let source_xml = std::fs::read_to_string(source_path)?;
    let appended = xml::append_derived_part(&source_xml, part_id, part_name, reference_part_id, notes)?;

    let path = Path::new(source_path);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("score");
    let normalized_stem = xml::normalize_stem(stem);
    let suffix = &transform_hash[..10.min(transform_hash.len())];
    let file_name = format!("{}.derived_{}.xml", normalized_stem, suffix);

    let adjacent: PathBuf = path.with_file_name(&file_name);
    if std::fs::write(&adjacent, &appended).is_ok() {
        return Ok(adjacent.to_string_lossy().to_string());
    }

    let fallback = std::env::temp_dir().join(&file_name);
    std::fs::write(&fallback, &appended)?;
    Ok(fallback.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Score;

    fn note(measure: i64, offset: f64, duration: f64, pitch: f64, lyric: Option<&str>) -> Note {
        Note {
            offset_beats: offset,
            duration_beats: duration,
            pitch_midi: Some(pitch),
            lyric: lyric.map(|s| s.to_string()),
            syllabic: None,
            lyric_is_extended: false,
            is_rest: false,
            tie_type: None,
            voice: "alto".to_string(),
            staff: "1".to_string(),
            measure_number: measure,
            lyric_exempt: false,
        }
    }

    #[test]
    fn finalize_without_source_path_appends_in_memory_only() {
        let mut score = Score::new(Some("Hymn".to_string()));
        score.parts.push(Part { part_id: "P1".to_string(), part_name: "Soprano".to_string(), notes: vec![] });

        let outcome = finalize(
            &mut score,
            0,
            "alto",
            Some("soprano"),
            0,
            "Soprano",
            "P1",
            true,
            vec![note(1, 0.0, 1.0, 60.0, Some("la"))],
        )
        .unwrap();

        assert!(!outcome.reused_transform);
        assert!(!outcome.hidden_default_lane);
        assert!(outcome.modified_musicxml_path.is_none());
        assert_eq!(score.parts.len(), 2);
        assert_eq!(outcome.appended_part_ref.part_index, Some(1));
        assert!(score.voice_part_transforms.contains_key(&outcome.transform_id));
    }

    #[test]
    fn finalize_for_default_lane_is_hidden() {
        let mut score = Score::new(None);
        score.parts.push(Part { part_id: "P1".to_string(), part_name: "Soprano".to_string(), notes: vec![] });

        let outcome = finalize(
            &mut score,
            0,
            "alto",
            Some(DEFAULT_VOICE),
            0,
            "Soprano",
            "P1",
            false,
            vec![note(1, 0.0, 1.0, 60.0, None)],
        )
        .unwrap();

        assert!(outcome.hidden_default_lane);
        assert!(outcome.modified_musicxml_path.is_none());
        assert!(outcome.appended_part_ref.hidden_default_lane);
    }

    #[test]
    fn repeated_finalize_with_same_inputs_reuses_transform() {
        let mut score = Score::new(Some("Reuse Test".to_string()));
        score.parts.push(Part { part_id: "P1".to_string(), part_name: "Soprano".to_string(), notes: vec![] });
        let notes = vec![note(1, 0.0, 1.0, 60.0, Some("la"))];

        let first = finalize(&mut score, 0, "alto", Some("soprano"), 0, "Soprano", "P1", true, notes.clone()).unwrap();
        assert!(!first.reused_transform);

        let mut score2 = score.clone();
        score2.parts.truncate(1);
        let second = finalize(&mut score2, 0, "alto", Some("soprano"), 0, "Soprano", "P1", true, notes).unwrap();
        assert!(second.reused_transform);
        assert_eq!(second.transform_hash, first.transform_hash);
    }
}
