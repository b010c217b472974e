//! Language-consistency repair for generated utterances.
//!
//! Models sometimes put the symbolic string in the intended-meaning field
//! and vice versa. When the intended meaning has no characters of the
//! expected natural-language script but the surface form does, the two are
//! swapped. When neither field is usable the intended meaning becomes a
//! placeholder. This is a best-effort heuristic, not a correctness check.

use serde::{Deserialize, Serialize};

/// Placeholder stored when no usable intended meaning was produced.
pub const UNPARSEABLE_MEANING: &str = "(unparseable intended meaning)";

/// Natural-language script the intended-meaning channel is written in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NaturalScript {
    /// CJK unified ideographs.
    #[default]
    Han,
    /// ASCII Latin letters.
    Latin,
    Cyrillic,
    /// Hiragana and katakana.
    Kana,
    Hangul,
}

impl NaturalScript {
    pub fn contains_char(self, c: char) -> bool {
        match self {
            Self::Han => ('\u{4e00}'..='\u{9fff}').contains(&c),
            Self::Latin => c.is_ascii_alphabetic(),
            Self::Cyrillic => ('\u{0400}'..='\u{04ff}').contains(&c),
            Self::Kana => ('\u{3040}'..='\u{30ff}').contains(&c),
            Self::Hangul => ('\u{ac00}'..='\u{d7af}').contains(&c),
        }
    }

    /// Whether any character of `text` belongs to this script.
    pub fn appears_in(self, text: &str) -> bool {
        text.chars().any(|c| self.contains_char(c))
    }
}

impl std::fmt::Display for NaturalScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Han => write!(f, "han"),
            Self::Latin => write!(f, "latin"),
            Self::Cyrillic => write!(f, "cyrillic"),
            Self::Kana => write!(f, "kana"),
            Self::Hangul => write!(f, "hangul"),
        }
    }
}

/// Which repair, if any, was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeaningRepair {
    /// Fields were consistent.
    Intact,
    /// Intended meaning and surface form were swapped.
    Swapped,
    /// Intended meaning replaced with [`UNPARSEABLE_MEANING`].
    Placeholder,
}

impl MeaningRepair {
    pub fn applied(self) -> bool {
        self != Self::Intact
    }
}

/// Fields after repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairedFields {
    pub intended_meaning: String,
    pub surface_form: String,
    pub repair: MeaningRepair,
}

/// Apply the swap-or-placeholder repair.
pub fn repair_meaning(
    intended_meaning: String,
    surface_form: String,
    script: NaturalScript,
) -> RepairedFields {
    if script.appears_in(&intended_meaning) {
        return RepairedFields {
            intended_meaning,
            surface_form,
            repair: MeaningRepair::Intact,
        };
    }

    if script.appears_in(&surface_form) {
        return RepairedFields {
            intended_meaning: surface_form,
            surface_form: intended_meaning,
            repair: MeaningRepair::Swapped,
        };
    }

    RepairedFields {
        intended_meaning: UNPARSEABLE_MEANING.to_string(),
        surface_form,
        repair: MeaningRepair::Placeholder,
    }
}
