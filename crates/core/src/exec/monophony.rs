//! Monophony enforcement (§4.5c): the last step of every section
//! executor pass. Groups candidate notes by rounded onset, keeps one per
//! group, then clips sustains so no note reaches the next onset.

use crate::types::{round6, Note, EPSILON};

/// True when `voice_part_id` should prefer the higher pitch when breaking
/// a same-onset tie (§4.5c: "voice part 1", "soprano", or "tenor").
pub fn prefers_high(voice_part_id: &str) -> bool {
    let lower = voice_part_id.to_ascii_lowercase();
    lower.contains("voice part 1") || lower.contains("soprano") || lower.contains("tenor")
}

/// Enforce monophony over `notes`, already sorted or not — this sorts by
/// `(measure, offset, pitch)` first.
pub fn enforce_monophony(mut notes: Vec<Note>, voice_part_id: &str) -> Vec<Note> {
    notes.sort_by(|a, b| {
        a.measure_number
            .cmp(&b.measure_number)
            .then(a.offset_beats.partial_cmp(&b.offset_beats).unwrap_or(std::cmp::Ordering::Equal))
            .then(
                a.pitch_midi
                    .unwrap_or(f64::NEG_INFINITY)
                    .partial_cmp(&b.pitch_midi.unwrap_or(f64::NEG_INFINITY))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let prefer_high = prefers_high(voice_part_id);
    let deduped = dedupe_by_onset(notes, prefer_high);
    clip_sustains(deduped)
}

fn dedupe_by_onset(notes: Vec<Note>, prefer_high: bool) -> Vec<Note> {
    use std::collections::BTreeMap;
    let mut groups: BTreeMap<(i64, u64), Vec<Note>> = BTreeMap::new();
    let mut order: Vec<(i64, u64)> = Vec::new();
    for note in notes {
        if note.is_rest {
            // rests never participate in monophony conflicts; pass through
            // keyed uniquely so they survive deduping.
            let key = (note.measure_number, note.offset_beats.to_bits() ^ (order.len() as u64));
            order.push(key);
            groups.entry(key).or_default().push(note);
            continue;
        }
        let key = (note.measure_number, round6(note.offset_beats).to_bits());
        if !groups.contains_key(&key) {
            order.push(key);
        }
        groups.entry(key).or_default().push(note);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(|mut group| {
            if group.len() == 1 {
                return group.remove(0);
            }
            group.sort_by(|a, b| {
                let lyric_rank = |n: &Note| if n.lyric.as_deref().is_some_and(|l| !l.is_empty()) { 0 } else { 1 };
                lyric_rank(a).cmp(&lyric_rank(b)).then_with(|| {
                    let (pa, pb) = (a.pitch_midi.unwrap_or(0.0), b.pitch_midi.unwrap_or(0.0));
                    if prefer_high {
                        pb.partial_cmp(&pa).unwrap_or(std::cmp::Ordering::Equal)
                    } else {
                        pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal)
                    }
                })
            });
            group.remove(0)
        })
        .collect()
}

fn clip_sustains(mut notes: Vec<Note>) -> Vec<Note> {
    notes.sort_by(|a, b| {
        a.measure_number
            .cmp(&b.measure_number)
            .then(a.offset_beats.partial_cmp(&b.offset_beats).unwrap_or(std::cmp::Ordering::Equal))
    });

    let n = notes.len();
    for i in 0..n {
        if notes[i].is_rest {
            continue;
        }
        if let Some(next) = notes[(i + 1)..].iter().find(|x| !x.is_rest) {
            let next_onset = absolute_beat(next);
            let this_onset = absolute_beat(&notes[i]);
            if notes[i].measure_number == next.measure_number && this_onset + notes[i].duration_beats > next_onset + EPSILON {
                notes[i].duration_beats = (next_onset - this_onset).max(0.0);
            }
        }
    }
    notes.retain(|n| n.is_rest || n.duration_beats > EPSILON);
    notes
}

fn absolute_beat(note: &Note) -> f64 {
    note.offset_beats
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn prefers_high_matches_soprano_tenor_and_voice_part_1() {
        assert!(prefers_high("soprano"));
        assert!(prefers_high("tenor"));
        assert!(prefers_high("voice part 1"));
        assert!(!prefers_high("alto"));
        assert!(!prefers_high("bass"));
    }

    #[test]
    fn dedupes_same_onset_preferring_lyric_bearing_note() {
        let notes = vec![note(1, 0.0, 1.0, 60.0, None), note(1, 0.0, 1.0, 65.0, Some("la"))];
        let result = enforce_monophony(notes, "alto");
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].pitch_midi, Some(65.0));
    }

    #[test]
    fn clips_sustain_to_not_reach_next_onset() {
        let notes = vec![note(1, 0.0, 2.0, 60.0, None), note(1, 1.0, 1.0, 64.0, None)];
        let result = enforce_monophony(notes, "alto");
        assert_eq!(result.len(), 2);
        assert!((result[0].duration_beats - 1.0).abs() < 1e-6);
    }

    #[test]
    fn no_conflict_leaves_notes_untouched() {
        let notes = vec![note(1, 0.0, 1.0, 60.0, None), note(1, 1.0, 1.0, 64.0, None)];
        let result = enforce_monophony(notes, "alto");
        assert_eq!(result[0].duration_beats, 1.0);
        assert_eq!(result[1].duration_beats, 1.0);
    }
}
