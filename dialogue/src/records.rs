//! Record types produced by turns and rounds.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

static MISMATCH_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:mismatch(?:ed)?|no match|not (?:an? )?(?:full |exact |complete )?match(?:ed|ing)?|(?:does|did) ?n[o']?t match|not correct|incorrect|wrong|unrelated)\b|不一致|不匹配|不对|错误|不正确|完全不同",
    )
    .expect("MISMATCH_LABEL_RE regex should compile")
});

static PARTIAL_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:partial(?:ly)?|partly|somewhat|mostly)\b|部分|基本|大致|大体")
        .expect("PARTIAL_LABEL_RE regex should compile")
});

static EXACT_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:exact(?:ly)?|full|complete|perfect|correct|match(?:es|ed)?)\b|完全一致|一致|准确|正确|完全相同",
    )
    .expect("EXACT_LABEL_RE regex should compile")
});

/// Comprehension fidelity on a 0–10 integer scale.
///
/// Service-reported values outside the range are clamped on construction,
/// so a stored score is always within `[0, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct FidelityScore(u8);

impl FidelityScore {
    /// Highest possible score.
    pub const MAX: u8 = 10;

    /// Score assigned when verification itself failed.
    pub const NEUTRAL: FidelityScore = FidelityScore(5);

    /// Clamp a raw score into range.
    pub fn new(raw: i64) -> Self {
        Self(raw.clamp(0, Self::MAX as i64) as u8)
    }

    /// Raw value.
    pub fn value(self) -> u8 {
        self.0
    }

    /// Whether the score meets an acceptance threshold.
    pub fn meets(self, threshold: u8) -> bool {
        self.0 >= threshold
    }
}

impl TryFrom<i64> for FidelityScore {
    type Error = std::convert::Infallible;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Ok(Self::new(raw))
    }
}

impl From<FidelityScore> for u8 {
    fn from(score: FidelityScore) -> Self {
        score.0
    }
}

impl std::fmt::Display for FidelityScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.0, Self::MAX)
    }
}

/// How the verifier classified the semantic match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchCategory {
    /// Reconstructed meaning matches the intent.
    Exact,
    /// Core idea recovered, details lost or wrong.
    Partial,
    /// Reconstructed meaning does not match.
    Mismatch,
    /// Verifier gave no usable classification.
    #[default]
    Unknown,
}

impl MatchCategory {
    /// Parse a free-form verifier label.
    ///
    /// The bare labels the verifier is asked for map directly. Otherwise the
    /// earliest category keyword wins, with negated phrases ahead of the
    /// positive ones they contain, so "完全不一致" and "not a full match"
    /// never read as exact.
    pub fn from_label(label: &str) -> Self {
        let lower = label.trim().to_lowercase();
        match lower.trim_matches(|c: char| !c.is_alphanumeric()) {
            "" => return Self::Unknown,
            "exact" => return Self::Exact,
            "partial" => return Self::Partial,
            "mismatch" => return Self::Mismatch,
            _ => {}
        }

        [
            (Self::Mismatch, &*MISMATCH_LABEL_RE),
            (Self::Partial, &*PARTIAL_LABEL_RE),
            (Self::Exact, &*EXACT_LABEL_RE),
        ]
        .into_iter()
        .filter_map(|(category, re)| re.find(&lower).map(|m| (category, m.start())))
        .min_by_key(|&(_, start)| start)
        .map(|(category, _)| category)
        .unwrap_or(Self::Unknown)
    }
}

impl std::fmt::Display for MatchCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Partial => write!(f, "partial"),
            Self::Mismatch => write!(f, "mismatch"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One speaker's output for a turn.
///
/// `listener_understanding` and `fidelity_score` stay `None` until the turn's
/// verification loop finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Turn index within the round (1-based).
    pub turn_index: u32,
    pub speaker: String,
    pub listener: String,
    /// Simulated time of the utterance.
    pub timestamp: NaiveDateTime,
    /// Symbolic string actually uttered.
    pub surface_form: String,
    /// Natural-language gloss of what the speaker meant.
    pub intended_meaning: String,
    pub scene_observation: String,
    pub reasoning_trace: String,
    #[serde(default)]
    pub listener_understanding: Option<String>,
    #[serde(default)]
    pub fidelity_score: Option<FidelityScore>,
}

impl Utterance {
    /// Whether the utterance has been through verification.
    pub fn is_scored(&self) -> bool {
        self.fidelity_score.is_some()
    }
}

/// Listener's reconstruction of a surface form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpretationResult {
    pub reconstructed_meaning: String,
    pub symbol_analysis: String,
    pub context_clues: String,
}

/// Verifier's judgement of one interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub match_category: MatchCategory,
    pub fidelity_score: FidelityScore,
    pub rationale: String,
    pub corrective_suggestion: String,
}

impl VerificationResult {
    /// Neutral result substituted when the verifier call fails.
    pub fn failed() -> Self {
        Self {
            match_category: MatchCategory::Unknown,
            fidelity_score: FidelityScore::NEUTRAL,
            rationale: "verification failed".to_string(),
            corrective_suggestion: String::new(),
        }
    }
}

/// Persisted outcome of one turn's final attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnderstandingRecord {
    pub round: u32,
    pub turn: u32,
    pub speaker: String,
    pub listener: String,
    pub intended_meaning: String,
    pub surface_form: String,
    pub reconstructed_meaning: String,
    pub symbol_analysis: String,
    pub match_category: MatchCategory,
    pub fidelity_score: FidelityScore,
    pub rationale: String,
    /// Interpretation attempts made (1 ..= max_retries + 1).
    #[serde(default)]
    pub attempts: u32,
    /// Whether the final score met the threshold.
    #[serde(default)]
    pub accepted: bool,
    /// Whether any call feeding this record fell back to a sentinel.
    #[serde(default)]
    pub degraded: bool,
}

/// Kind of round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    /// Two personas with verification.
    Pair,
    /// Whole roster, generation only.
    Group,
}

impl std::fmt::Display for RoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pair => write!(f, "pair"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// One completed round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round_number: u32,
    pub timestamp: NaiveDateTime,
    #[serde(rename = "type")]
    pub kind: RoundKind,
    pub participants: Vec<String>,
    pub scene_description: String,
    pub utterances: Vec<Utterance>,
    #[serde(default)]
    pub understanding_records: Vec<UnderstandingRecord>,
}

impl RoundRecord {
    /// Speaker names in turn order.
    pub fn speakers(&self) -> Vec<&str> {
        self.utterances.iter().map(|u| u.speaker.as_str()).collect()
    }

    pub fn is_group(&self) -> bool {
        self.kind == RoundKind::Group
    }

    /// Mean fidelity across the round's understanding records.
    pub fn mean_score(&self) -> Option<f64> {
        if self.understanding_records.is_empty() {
            return None;
        }
        let total: u32 = self
            .understanding_records
            .iter()
            .map(|r| r.fidelity_score.value() as u32)
            .sum();
        Some(total as f64 / self.understanding_records.len() as f64)
    }
}

/// Compact per-turn line for quick reading of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueSummaryEntry {
    /// Contiguous from 1 across the whole experiment.
    pub id: u64,
    #[serde(default)]
    pub round: u32,
    pub speaker: String,
    pub listener: String,
    pub intended_meaning: String,
    pub surface_form: String,
    pub understood_as: String,
    pub score: FidelityScore,
}

/// One spoken line in the conversation-by-time index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationLine {
    pub speaker: String,
    pub surface_form: String,
    pub intended_meaning: String,
}

impl From<&Utterance> for ConversationLine {
    fn from(u: &Utterance) -> Self {
        Self {
            speaker: u.speaker.clone(),
            surface_form: u.surface_form.clone(),
            intended_meaning: u.intended_meaning.clone(),
        }
    }
}

/// A conversation as indexed by simulated time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    #[serde(default)]
    pub round: u32,
    /// e.g. "Isabella → Maria @ Hobbs Cafe" or "group @ Hobbs Cafe".
    pub label: String,
    pub lines: Vec<ConversationLine>,
}
