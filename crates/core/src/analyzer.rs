//! Score Analyzer (§4.1): decomposes a [`Part`] into ranked voice-parts
//! and classifies each measure of each voice-part into a [`RegionStatus`].

use std::collections::{BTreeMap, HashMap, HashSet};

use regex::Regex;
use serde::Serialize;

use crate::types::{Part, Region, RegionStatus, DEFAULT_VOICE};
use crate::types::VoicePart as VoicePartInfo;

lazy_static::lazy_static! {
    static ref GENERIC_PART_NAME: Regex = Regex::new(r"(?i)^voice\s+part\s+\d+$").unwrap();
}

/// The analyzer's full output for one part.
#[derive(Debug, Clone, Serialize)]
pub struct PartAnalysis {
    pub part_index: usize,
    pub voice_parts: Vec<VoicePartInfo>,
    /// Regions per `voice_part_id`.
    pub regions: HashMap<String, Vec<Region>>,
    /// Measures (by number) where a chord (≥2 simultaneous notes in one
    /// voice) was detected.
    pub chord_measures: HashSet<i64>,
    /// Measures where some non-rest note used the `_default` voice.
    pub default_voice_measures: HashSet<i64>,
}

impl PartAnalysis {
    pub fn voice_part(&self, voice_part_id: &str) -> Option<&VoicePartInfo> {
        self.voice_parts.iter().find(|vp| vp.voice_part_id == voice_part_id)
    }
}

/// Decompose `part` into ranked voice-parts and per-measure regions.
pub fn analyze_part(part: &Part, part_index: usize) -> PartAnalysis {
    let mut by_voice: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, note) in part.notes.iter().enumerate() {
        if note.is_rest {
            continue;
        }
        by_voice.entry(note.voice.clone()).or_default().push(i);
    }

    let mut ranked: Vec<(String, f64, usize, usize, usize)> = by_voice
        .iter()
        .map(|(voice, idxs)| {
            let note_count = idxs.len();
            let lyric_note_count = idxs
                .iter()
                .filter(|&&i| part.notes[i].lyric.as_deref().is_some_and(|l| !l.is_empty()))
                .count();
            let missing_lyrics = note_count - lyric_note_count;
            let sum_pitch: f64 = idxs.iter().filter_map(|&i| part.notes[i].pitch_midi).sum();
            let pitched = idxs.iter().filter(|&&i| part.notes[i].pitch_midi.is_some()).count().max(1);
            let avg_pitch = sum_pitch / pitched as f64;
            (voice.clone(), avg_pitch, note_count, lyric_note_count, missing_lyrics)
        })
        .collect();

    // descending mean pitch, ties broken by lexical source_voice_id (already
    // sorted lexically by the BTreeMap iteration order, stable sort keeps it)
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let names = canonical_names(&part.part_name, ranked.len());

    let voice_parts: Vec<VoicePartInfo> = ranked
        .iter()
        .enumerate()
        .map(|(rank, (voice, avg_pitch, note_count, lyric_note_count, missing_lyrics))| VoicePartInfo {
            source_voice_id: voice.clone(),
            voice_part_id: names[rank].clone(),
            note_count: *note_count,
            lyric_note_count: *lyric_note_count,
            missing_lyrics: *missing_lyrics,
            avg_pitch_midi: *avg_pitch,
            rank,
        })
        .collect();

    let chord_measures = detect_chord_measures(part);
    let default_voice_measures = detect_default_voice_measures(part);

    let mut regions = HashMap::new();
    for vp in &voice_parts {
        let r = compute_regions(part, vp, &chord_measures, &default_voice_measures);
        regions.insert(vp.voice_part_id.clone(), r);
    }

    PartAnalysis {
        part_index,
        voice_parts,
        regions,
        chord_measures,
        default_voice_measures,
    }
}

/// Canonical voice-part names per §4.1: soprano/alto, tenor/bass, or
/// "voice part N" in pitch-rank order.
fn canonical_names(part_name: &str, count: usize) -> Vec<String> {
    let upper = part_name.to_ascii_uppercase();
    if count == 2 && upper.contains("SOPRANO") && upper.contains("ALTO") {
        return vec!["soprano".to_string(), "alto".to_string()];
    }
    if count == 2 && upper.contains("TENOR") && upper.contains("BASS") {
        return vec!["tenor".to_string(), "bass".to_string()];
    }
    (0..count).map(|i| format!("voice part {}", i + 1)).collect()
}

/// True for part names the Materializer treats as "not human-facing"
/// (§4.10 derived-part naming cascade reuses this check).
pub fn is_generic_part_name(name: &str) -> bool {
    GENERIC_PART_NAME.is_match(name.trim())
}

fn detect_chord_measures(part: &Part) -> HashSet<i64> {
    let mut groups: HashMap<(String, i64, u64), usize> = HashMap::new();
    for note in &part.notes {
        if note.is_rest {
            continue;
        }
        let key = (note.voice.clone(), note.measure_number, crate::types::round6(note.offset_beats).to_bits());
        *groups.entry(key).or_insert(0) += 1;
    }
    groups
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|((_, measure, _), _)| measure)
        .collect()
}

fn detect_default_voice_measures(part: &Part) -> HashSet<i64> {
    part.notes
        .iter()
        .filter(|n| !n.is_rest && n.voice == DEFAULT_VOICE)
        .map(|n| n.measure_number)
        .collect()
}

fn compute_regions(
    part: &Part,
    vp: &VoicePartInfo,
    chord_measures: &HashSet<i64>,
    default_voice_measures: &HashSet<i64>,
) -> Vec<Region> {
    let measures: Vec<i64> = part.notes.iter().map(|n| n.measure_number).collect();
    if measures.is_empty() {
        return Vec::new();
    }
    let (part_start, part_end) = (*measures.iter().min().unwrap(), *measures.iter().max().unwrap());

    let active_measures: HashSet<i64> = part
        .notes
        .iter()
        .filter(|n| !n.is_rest && n.voice == vp.source_voice_id)
        .map(|n| n.measure_number)
        .collect();

    let mut statuses: Vec<(i64, RegionStatus)> = Vec::new();
    for measure in part_start..=part_end {
        if !active_measures.contains(&measure) {
            statuses.push((measure, RegionStatus::NoMusic));
            continue;
        }
        // Per §9 Open Questions: NEEDS_SPLIT and UNASSIGNED_SOURCE may both
        // apply to the same measure; emit whichever applies, preferring to
        // surface UNASSIGNED_SOURCE status alongside NEEDS_SPLIT via two
        // separate region entries rather than picking one.
        let needs_split = chord_measures.contains(&measure);
        let unassigned = vp.source_voice_id == DEFAULT_VOICE || default_voice_measures.contains(&measure);
        if needs_split {
            statuses.push((measure, RegionStatus::NeedsSplit));
        }
        if unassigned {
            statuses.push((measure, RegionStatus::UnassignedSource));
        }
        if !needs_split && !unassigned {
            statuses.push((measure, RegionStatus::Resolved));
        }
    }

    collapse_regions(statuses)
}

fn collapse_regions(mut statuses: Vec<(i64, RegionStatus)>) -> Vec<Region> {
    statuses.sort_by_key(|(m, s)| (status_rank(*s), *m));
    let mut by_status: BTreeMap<u8, Vec<i64>> = BTreeMap::new();
    for (measure, status) in &statuses {
        by_status.entry(status_rank(*status)).or_default().push(*measure);
    }

    let mut regions = Vec::new();
    for (rank, measures) in by_status {
        let status = status_from_rank(rank);
        let mut measures = measures;
        measures.sort_unstable();
        measures.dedup();
        let mut start = measures[0];
        let mut prev = measures[0];
        for &m in &measures[1..] {
            if m == prev + 1 {
                prev = m;
                continue;
            }
            regions.push(Region { status, start_measure: start, end_measure: prev });
            start = m;
            prev = m;
        }
        regions.push(Region { status, start_measure: start, end_measure: prev });
    }
    regions.sort_by_key(|r| r.start_measure);
    regions
}

fn status_rank(status: RegionStatus) -> u8 {
    match status {
        RegionStatus::Resolved => 0,
        RegionStatus::NeedsSplit => 1,
        RegionStatus::UnassignedSource => 2,
        RegionStatus::NoMusic => 3,
    }
}

fn status_from_rank(rank: u8) -> RegionStatus {
    match rank {
        0 => RegionStatus::Resolved,
        1 => RegionStatus::NeedsSplit,
        2 => RegionStatus::UnassignedSource,
        _ => RegionStatus::NoMusic,
    }
}
