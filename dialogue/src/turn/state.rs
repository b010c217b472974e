//! Turn state machine: phases, transitions, and session tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExperimentError;

/// Phase of a single dialogue turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TurnPhase {
    /// Speaker is producing the utterance.
    Generating,
    /// Listener is reconstructing the meaning.
    Interpreting,
    /// Speaker is scoring the reconstruction.
    Verifying,
    /// Score met the threshold.
    Accepted,
    /// Retry ceiling reached without acceptance.
    Exhausted,
}

impl TurnPhase {
    /// Whether this is a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Exhausted)
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [TurnPhase] {
        match self {
            Self::Generating => &[Self::Interpreting],
            Self::Interpreting => &[Self::Verifying],
            Self::Verifying => &[Self::Accepted, Self::Interpreting, Self::Exhausted],
            Self::Accepted | Self::Exhausted => &[],
        }
    }
}

impl std::fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generating => write!(f, "generating"),
            Self::Interpreting => write!(f, "interpreting"),
            Self::Verifying => write!(f, "verifying"),
            Self::Accepted => write!(f, "accepted"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnTransition {
    pub from: TurnPhase,
    pub to: TurnPhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Error for invalid state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: TurnPhase,
    pub to: TurnPhase,
    pub reason: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} → {}: {}",
            self.from, self.to, self.reason
        )
    }
}

impl std::error::Error for TransitionError {}

impl From<TransitionError> for ExperimentError {
    fn from(err: TransitionError) -> Self {
        ExperimentError::Transition(err.to_string())
    }
}

/// Phase history of one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnSession {
    pub round: u32,
    pub turn: u32,
    pub phase: TurnPhase,
    /// Interpretation attempts started so far.
    pub attempts: u32,
    pub transitions: Vec<TurnTransition>,
}

impl TurnSession {
    pub fn new(round: u32, turn: u32) -> Self {
        Self {
            round,
            turn,
            phase: TurnPhase::Generating,
            attempts: 0,
            transitions: Vec::new(),
        }
    }

    /// Transition to a new phase with a reason.
    pub fn transition(&mut self, to: TurnPhase, reason: &str) -> Result<(), TransitionError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.phase,
                to,
                reason: format!(
                    "not a valid transition (allowed: {:?})",
                    self.phase.valid_transitions()
                ),
            });
        }

        self.transitions.push(TurnTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;

        if to == TurnPhase::Interpreting {
            self.attempts += 1;
        }

        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] round {} turn {} | {} attempt(s)",
            self.phase, self.round, self.turn, self.attempts
        )
    }
}
