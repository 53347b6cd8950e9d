//! Plan value types. Mode/decision-type/method/strategy/policy are all
//! closed sums per §9 Design Notes: unrecognized values never parse, and
//! the internal-only chord-splitter methods (`A`, `B`) have variants here
//! but no public parser path constructs them (only [`crate::repair`]
//! does).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash, PartialOrd, Ord)]
pub struct TargetRef {
    pub part_index: usize,
    pub voice_part_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionMode {
    Rest,
    Derive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionType {
    ExtractFromVoice,
    SplitChordsSelectNotes,
    CopyUnisonSection,
    InsertRests,
    DropNotesIfNeeded,
}

/// Chord-splitter method. `Trivial`/`Ranked` are the only publicly
/// parseable variants; `A`/`B` are reachable only via the repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Trivial,
    Ranked,
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankFallback {
    Greedy,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LyricStrategy {
    StrictOnset,
    OverlapBestMatch,
    SyllableFlow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LyricPolicy {
    FillMissingOnly,
    ReplaceAll,
    PreserveExisting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedNotePolicy {
    DuplicateToAll,
    AssignPrimaryOnly,
}

impl Default for SharedNotePolicy {
    fn default() -> Self {
        SharedNotePolicy::DuplicateToAll
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub start_measure: i64,
    pub end_measure: i64,
    pub mode: SectionMode,
    pub decision_type: DecisionType,
    #[serde(default = "default_method")]
    pub method: Method,
    #[serde(default)]
    pub rank_index: usize,
    #[serde(default = "default_rank_fallback")]
    pub rank_fallback: RankFallback,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub melody_source: Option<TargetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyric_source: Option<TargetRef>,
    #[serde(default = "default_lyric_strategy")]
    pub lyric_strategy: LyricStrategy,
    #[serde(default = "default_lyric_policy")]
    pub lyric_policy: LyricPolicy,
}

fn default_method() -> Method {
    Method::Trivial
}
fn default_rank_fallback() -> RankFallback {
    RankFallback::Greedy
}
fn default_lyric_strategy() -> LyricStrategy {
    LyricStrategy::StrictOnset
}
fn default_lyric_policy() -> LyricPolicy {
    LyricPolicy::FillMissingOnly
}

impl Section {
    pub fn overlaps_measure(&self, measure: i64) -> bool {
        measure >= self.start_measure && measure <= self.end_measure
    }

    pub fn overlaps_range(&self, start: i64, end: i64) -> bool {
        self.start_measure <= end && start <= self.end_measure
    }
}

/// Legacy (non-timeline) action types from the original plan contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyActionType {
    SplitVoicePart,
    DuplicateSectionToAllVoiceParts,
    PropagateLyrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyAction {
    pub action_type: LegacyActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub melody_source: Option<TargetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyric_source: Option<TargetRef>,
    #[serde(default = "default_lyric_strategy")]
    pub lyric_strategy: LyricStrategy,
    #[serde(default = "default_verse_number")]
    pub verse_number: String,
    #[serde(default)]
    pub copy_all_verses: bool,
    #[serde(default)]
    pub split_shared_note_policy: SharedNotePolicy,
}

fn default_verse_number() -> String {
    "1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub target: TargetRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<Section>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<LegacyAction>>,
    #[serde(default)]
    pub split_shared_note_policy: SharedNotePolicy,
}

impl Target {
    pub fn is_sections_based(&self) -> bool {
        self.sections.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub targets: Vec<Target>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_overlaps_range_detects_intersection() {
        let s = Section {
            start_measure: 3,
            end_measure: 6,
            mode: SectionMode::Derive,
            decision_type: DecisionType::ExtractFromVoice,
            method: Method::Trivial,
            rank_index: 0,
            rank_fallback: RankFallback::Greedy,
            melody_source: None,
            lyric_source: None,
            lyric_strategy: LyricStrategy::StrictOnset,
            lyric_policy: LyricPolicy::FillMissingOnly,
        };
        assert!(s.overlaps_range(5, 8));
        assert!(!s.overlaps_range(7, 8));
    }

    #[test]
    fn method_variants_a_and_b_are_representable_but_unused_by_default() {
        assert_ne!(Method::A, Method::Trivial);
        assert_ne!(Method::B, Method::Ranked);
    }
}
