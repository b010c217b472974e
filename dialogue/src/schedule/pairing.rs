//! Deterministic pairing table.

use serde::{Deserialize, Serialize};

use crate::error::{ExperimentError, ExperimentResult};
use crate::persona::Roster;

/// Two personas; `first` speaks first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonaPair {
    pub first: String,
    pub second: String,
}

impl PersonaPair {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            second: second.into(),
        }
    }

    pub fn includes(&self, name: &str) -> bool {
        self.first == name || self.second == name
    }
}

impl std::fmt::Display for PersonaPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ↔ {}", self.first, self.second)
    }
}

/// Pairs cycled by round index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingSchedule {
    pairs: Vec<PersonaPair>,
}

impl PairingSchedule {
    /// The standard table over four personas: (1,2), (3,4), (1,3), (2,4).
    ///
    /// Every persona takes part in exactly two of every four consecutive
    /// rounds.
    pub fn standard(names: &[String]) -> ExperimentResult<Self> {
        let [a, b, c, d] = names else {
            return Err(ExperimentError::config(format!(
                "the standard pairing needs exactly 4 personas, got {}; configure pairs explicitly",
                names.len()
            )));
        };
        Ok(Self {
            pairs: vec![
                PersonaPair::new(a.clone(), b.clone()),
                PersonaPair::new(c.clone(), d.clone()),
                PersonaPair::new(a.clone(), c.clone()),
                PersonaPair::new(b.clone(), d.clone()),
            ],
        })
    }

    pub fn from_pairs(pairs: Vec<(String, String)>) -> ExperimentResult<Self> {
        if pairs.is_empty() {
            return Err(ExperimentError::config("pairing table is empty"));
        }
        let mut table = Vec::with_capacity(pairs.len());
        for (index, (first, second)) in pairs.into_iter().enumerate() {
            if first == second {
                return Err(ExperimentError::config(format!(
                    "pair {} pairs '{}' with itself",
                    index + 1,
                    first
                )));
            }
            table.push(PersonaPair { first, second });
        }
        Ok(Self { pairs: table })
    }

    /// Pair for a 0-based round index.
    pub fn pair_for_round(&self, round_index: u32) -> &PersonaPair {
        &self.pairs[round_index as usize % self.pairs.len()]
    }

    pub fn pairs(&self) -> &[PersonaPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Fail if any pair names a persona missing from the roster.
    pub fn validate_against(&self, roster: &Roster) -> ExperimentResult<()> {
        for (index, pair) in self.pairs.iter().enumerate() {
            for name in [&pair.first, &pair.second] {
                if !roster.contains(name) {
                    return Err(ExperimentError::unknown_persona(
                        name,
                        &format!("pair {}", index + 1),
                    ));
                }
            }
        }
        Ok(())
    }
}
