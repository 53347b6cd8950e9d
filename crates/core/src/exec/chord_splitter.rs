//! Chord Splitter (§4.5d): reduces a polyphonic onset group to a single
//! note per group, using one of four methods. `trivial`/`ranked` are
//! reachable from the public plan contract; `A`/`B` only via the repair
//! loop (§9).

use crate::plan::{Method, RankFallback};
use crate::types::{round6, Note};

/// One onset's worth of simultaneous source-note candidates.
#[derive(Debug, Clone)]
struct OnsetGroup {
    candidates: Vec<Note>,
}

/// Split polyphonic `source_notes` (already restricted to the section's
/// measure range) into one note per onset, re-voiced to `target_voice`.
#[allow(clippy::too_many_arguments)]
pub fn split_chords(
    source_notes: &[Note],
    method: Method,
    rank_index: usize,
    rank_fallback: RankFallback,
    sibling_rank: usize,
    sibling_count: usize,
    prefer_high: bool,
    target_voice: &str,
) -> Vec<Note> {
    let groups = group_by_onset(source_notes);

    let chosen: Vec<Option<Note>> = match method {
        Method::Trivial => choose_trivial(&groups, sibling_rank, sibling_count, prefer_high),
        Method::Ranked => choose_ranked(&groups, rank_index, rank_fallback),
        Method::A => choose_rule_based(&groups, prefer_high),
        Method::B => choose_dp(&groups, prefer_high),
    };

    chosen
        .into_iter()
        .flatten()
        .map(|mut note| {
            note.voice = target_voice.to_string();
            note.lyric = None;
            note.syllabic = None;
            note.lyric_is_extended = false;
            note
        })
        .collect()
}

fn group_by_onset(notes: &[Note]) -> Vec<OnsetGroup> {
    use std::collections::BTreeMap;
    let mut groups: BTreeMap<(i64, u64), Vec<Note>> = BTreeMap::new();
    for note in notes {
        if note.is_rest {
            continue;
        }
        let key = (note.measure_number, round6(note.offset_beats).to_bits());
        groups.entry(key).or_default().push(note.clone());
    }
    groups.into_values().map(|candidates| OnsetGroup { candidates }).collect()
}

fn sort_by_pitch_desc(candidates: &mut [Note]) {
    candidates.sort_by(|a, b| {
        b.pitch_midi
            .unwrap_or(f64::NEG_INFINITY)
            .partial_cmp(&a.pitch_midi.unwrap_or(f64::NEG_INFINITY))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn sort_by_preferred_direction(candidates: &mut [Note], prefer_high: bool) {
    candidates.sort_by(|a, b| {
        let (pa, pb) = (a.pitch_midi.unwrap_or(0.0), b.pitch_midi.unwrap_or(0.0));
        if prefer_high {
            pb.partial_cmp(&pa).unwrap_or(std::cmp::Ordering::Equal)
        } else {
            pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal)
        }
    });
}

fn choose_trivial(groups: &[OnsetGroup], sibling_rank: usize, sibling_count: usize, prefer_high: bool) -> Vec<Option<Note>> {
    let mut prev_pitch: Option<f64> = None;
    groups
        .iter()
        .map(|g| {
            if g.candidates.len() == 1 {
                prev_pitch = g.candidates[0].pitch_midi;
                return Some(g.candidates[0].clone());
            }
            let chosen = if g.candidates.len() == sibling_count {
                let mut sorted = g.candidates.clone();
                sort_by_pitch_desc(&mut sorted);
                sorted.get(sibling_rank).cloned().or_else(|| sorted.last().cloned())
            } else {
                rule_based_pick(&g.candidates, prefer_high, prev_pitch)
            };
            prev_pitch = chosen.as_ref().and_then(|n| n.pitch_midi).or(prev_pitch);
            chosen
        })
        .collect()
}

fn choose_ranked(groups: &[OnsetGroup], rank_index: usize, rank_fallback: RankFallback) -> Vec<Option<Note>> {
    groups
        .iter()
        .map(|g| {
            let mut sorted = g.candidates.clone();
            sort_by_pitch_desc(&mut sorted);
            if let Some(note) = sorted.get(rank_index) {
                return Some(note.clone());
            }
            match rank_fallback {
                RankFallback::Greedy => sorted.last().cloned(),
                RankFallback::Skip => None,
            }
        })
        .collect()
}

fn choose_rule_based(groups: &[OnsetGroup], prefer_high: bool) -> Vec<Option<Note>> {
    let mut prev_pitch: Option<f64> = None;
    groups
        .iter()
        .map(|g| {
            let chosen = rule_based_pick(&g.candidates, prefer_high, prev_pitch);
            prev_pitch = chosen.as_ref().and_then(|n| n.pitch_midi).or(prev_pitch);
            chosen
        })
        .collect()
}

fn rule_based_pick(candidates: &[Note], prefer_high: bool, prev_pitch: Option<f64>) -> Option<Note> {
    if candidates.is_empty() {
        return None;
    }
    let mut sorted = candidates.to_vec();
    sort_by_preferred_direction(&mut sorted, prefer_high);
    match prev_pitch {
        None => sorted.into_iter().next(),
        Some(prev) => sorted.into_iter().min_by(|a, b| {
            let da = (a.pitch_midi.unwrap_or(0.0) - prev).abs();
            let db = (b.pitch_midi.unwrap_or(0.0) - prev).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        }),
    }
}

/// Dynamic-programming (Viterbi) voice-leading optimizer (method `B`).
fn choose_dp(groups: &[OnsetGroup], prefer_high: bool) -> Vec<Option<Note>> {
    if groups.is_empty() {
        return Vec::new();
    }

    let ascending: Vec<Vec<Note>> = groups
        .iter()
        .map(|g| {
            let mut c = g.candidates.clone();
            c.sort_by(|a, b| a.pitch_midi.unwrap_or(0.0).partial_cmp(&b.pitch_midi.unwrap_or(0.0)).unwrap_or(std::cmp::Ordering::Equal));
            c
        })
        .collect();

    let extremity = |pitch: f64| -> f64 {
        if prefer_high {
            -0.05 * pitch
        } else {
            0.05 * pitch
        }
    };

    let transition = |from: f64, to: f64| -> f64 {
        let leap = (to - from).abs();
        if leap > 7.0 {
            leap * 1.5
        } else {
            leap
        }
    };

    let mut dp: Vec<Vec<f64>> = Vec::with_capacity(ascending.len());
    let mut backptr: Vec<Vec<usize>> = Vec::with_capacity(ascending.len());

    dp.push(
        ascending[0]
            .iter()
            .map(|n| extremity(n.pitch_midi.unwrap_or(0.0)))
            .collect(),
    );
    backptr.push(vec![0; ascending[0].len()]);

    for k in 1..ascending.len() {
        let mut costs = Vec::with_capacity(ascending[k].len());
        let mut backs = Vec::with_capacity(ascending[k].len());
        for cand in &ascending[k] {
            let to = cand.pitch_midi.unwrap_or(0.0);
            let mut best_cost = f64::INFINITY;
            let mut best_prev = 0usize;
            for (prev_idx, prev_cand) in ascending[k - 1].iter().enumerate() {
                let from = prev_cand.pitch_midi.unwrap_or(0.0);
                let cost = dp[k - 1][prev_idx] + transition(from, to);
                if cost < best_cost {
                    best_cost = cost;
                    best_prev = prev_idx;
                }
            }
            costs.push(best_cost + extremity(to));
            backs.push(best_prev);
        }
        dp.push(costs);
        backptr.push(backs);
    }

    let last = dp.len() - 1;
    let mut state = dp[last]
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut chosen = vec![None; ascending.len()];
    for k in (0..ascending.len()).rev() {
        chosen[k] = ascending[k].get(state).cloned();
        if k > 0 {
            state = backptr[k][state];
        }
    }
    chosen
}
