//! Aggregate comprehension statistics.

use serde::{Deserialize, Serialize};

use crate::records::UnderstandingRecord;

/// Scores at or above this count as high.
pub const HIGH_SCORE: u8 = 7;
/// Scores below this count as low.
pub const LOW_SCORE: u8 = 5;

/// Summary over all understanding records of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnderstandingStats {
    pub total: usize,
    pub avg_score: f64,
    pub high_scores: usize,
    pub low_scores: usize,
    pub accepted: usize,
    pub degraded: usize,
}

impl UnderstandingStats {
    pub fn from_records(records: &[UnderstandingRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let scores: Vec<u8> = records.iter().map(|r| r.fidelity_score.value()).collect();
        let sum: u64 = scores.iter().map(|s| *s as u64).sum();

        Self {
            total: records.len(),
            avg_score: sum as f64 / records.len() as f64,
            high_scores: scores.iter().filter(|s| **s >= HIGH_SCORE).count(),
            low_scores: scores.iter().filter(|s| **s < LOW_SCORE).count(),
            accepted: records.iter().filter(|r| r.accepted).count(),
            degraded: records.iter().filter(|r| r.degraded).count(),
        }
    }

    /// Fraction of records accepted at the threshold.
    pub fn acceptance_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.accepted as f64 / self.total as f64
        }
    }
}

impl std::fmt::Display for UnderstandingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} records, avg {:.2}, {} high (>= {}), {} low (< {}), {} accepted",
            self.total,
            self.avg_score,
            self.high_scores,
            HIGH_SCORE,
            self.low_scores,
            LOW_SCORE,
            self.accepted
        )
    }
}
