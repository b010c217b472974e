//! Round cadence: which round runs next, and what happens around it.
//!
//! ```text
//! Idle → RunningPairRound → [RunningGroupRound] → Saving → Idle
//!   └─ (round count exhausted) → Finished
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExperimentError, ExperimentResult};

/// Phase of the cadence driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CadencePhase {
    /// Between rounds.
    Idle,
    RunningPairRound,
    RunningGroupRound,
    /// Round finished; flushing if due.
    Saving,
    /// All configured rounds have run.
    Finished,
}

impl CadencePhase {
    pub fn is_terminal(self) -> bool {
        self == Self::Finished
    }

    /// Valid transitions from this phase.
    pub fn valid_transitions(self) -> &'static [CadencePhase] {
        match self {
            Self::Idle => &[Self::RunningPairRound, Self::Finished],
            Self::RunningPairRound => &[Self::RunningGroupRound, Self::Saving],
            Self::RunningGroupRound => &[Self::Saving],
            Self::Saving => &[Self::Idle],
            Self::Finished => &[],
        }
    }
}

impl std::fmt::Display for CadencePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::RunningPairRound => write!(f, "running_pair_round"),
            Self::RunningGroupRound => write!(f, "running_group_round"),
            Self::Saving => write!(f, "saving"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceTransition {
    pub from: CadencePhase,
    pub to: CadencePhase,
    pub round_index: u32,
    pub timestamp: DateTime<Utc>,
}

/// Cadence parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceConfig {
    /// Rounds to run in this invocation.
    pub rounds: u32,
    /// 0-based index of the first round to run.
    pub start_round: u32,
    /// Group session every N rounds; 0 disables.
    pub group_chat_interval: u32,
    /// Flush every N rounds; 0 flushes only on the final round.
    pub save_interval: u32,
    /// 1-based round before which the knowledge injection fires.
    pub injection_round: Option<u32>,
}

/// What to do for one round index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundPlan {
    pub round_index: u32,
    /// 1-based round number.
    pub round_number: u32,
    pub inject: bool,
    pub group: bool,
    pub persist: bool,
}

/// Drives the per-round cycle.
#[derive(Debug, Clone)]
pub struct CadenceDriver {
    config: CadenceConfig,
    phase: CadencePhase,
    next_index: u32,
    current: Option<RoundPlan>,
    transitions: Vec<CadenceTransition>,
}

impl CadenceDriver {
    pub fn new(config: CadenceConfig) -> Self {
        let next_index = config.start_round;
        Self {
            config,
            phase: CadencePhase::Idle,
            next_index,
            current: None,
            transitions: Vec::new(),
        }
    }

    /// One past the last round index to run.
    pub fn end_round(&self) -> u32 {
        self.config.start_round + self.config.rounds
    }

    pub fn phase(&self) -> CadencePhase {
        self.phase
    }

    pub fn transitions(&self) -> &[CadenceTransition] {
        &self.transitions
    }

    /// Plan for a round index.
    pub fn plan(&self, round_index: u32) -> RoundPlan {
        let round_number = round_index + 1;
        let is_final = round_number == self.end_round();
        let every = |interval: u32| interval > 0 && round_number % interval == 0;

        RoundPlan {
            round_index,
            round_number,
            inject: self.config.injection_round == Some(round_number),
            group: every(self.config.group_chat_interval),
            persist: every(self.config.save_interval) || is_final,
        }
    }

    fn transition(&mut self, to: CadencePhase) -> ExperimentResult<()> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(ExperimentError::Transition(format!(
                "cadence {} → {} (allowed: {:?})",
                self.phase,
                to,
                self.phase.valid_transitions()
            )));
        }
        self.transitions.push(CadenceTransition {
            from: self.phase,
            to,
            round_index: self.next_index,
            timestamp: Utc::now(),
        });
        self.phase = to;
        Ok(())
    }

    /// Start the next round, or finish when none remain.
    pub fn begin_round(&mut self) -> ExperimentResult<Option<RoundPlan>> {
        if self.next_index >= self.end_round() {
            self.transition(CadencePhase::Finished)?;
            return Ok(None);
        }
        self.transition(CadencePhase::RunningPairRound)?;
        let plan = self.plan(self.next_index);
        self.current = Some(plan);
        Ok(Some(plan))
    }

    pub fn enter_group(&mut self) -> ExperimentResult<()> {
        self.transition(CadencePhase::RunningGroupRound)
    }

    pub fn enter_saving(&mut self) -> ExperimentResult<()> {
        self.transition(CadencePhase::Saving)
    }

    /// Close the current round and return to idle.
    pub fn finish_round(&mut self) -> ExperimentResult<()> {
        self.transition(CadencePhase::Idle)?;
        self.current = None;
        self.next_index += 1;
        Ok(())
    }

    pub fn current(&self) -> Option<&RoundPlan> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rounds: u32) -> CadenceConfig {
        CadenceConfig {
            rounds,
            start_round: 0,
            group_chat_interval: 3,
            save_interval: 5,
            injection_round: Some(4),
        }
    }

    #[test]
    fn test_plan_flags() {
        let driver = CadenceDriver::new(config(7));
        let plans: Vec<RoundPlan> = (0..7).map(|i| driver.plan(i)).collect();
        let groups: Vec<u32> = plans.iter().filter(|p| p.group).map(|p| p.round_number).collect();
        let saves: Vec<u32> = plans.iter().filter(|p| p.persist).map(|p| p.round_number).collect();
        let injects: Vec<u32> = plans.iter().filter(|p| p.inject).map(|p| p.round_number).collect();
        assert_eq!(groups, vec![3, 6]);
        assert_eq!(saves, vec![5, 7]);
        assert_eq!(injects, vec![4]);
    }

    #[test]
    fn test_zero_intervals_disable() {
        let driver = CadenceDriver::new(CadenceConfig {
            rounds: 4,
            start_round: 0,
            group_chat_interval: 0,
            save_interval: 0,
            injection_round: None,
        });
        let plans: Vec<RoundPlan> = (0..4).map(|i| driver.plan(i)).collect();
        assert!(plans.iter().all(|p| !p.group && !p.inject));
        assert_eq!(plans.iter().filter(|p| p.persist).count(), 1);
        assert!(plans[3].persist);
    }

    #[test]
    fn test_full_cycle() {
        let mut driver = CadenceDriver::new(config(3));
        let mut ran = Vec::new();
        while let Some(plan) = driver.begin_round().unwrap() {
            if plan.group {
                driver.enter_group().unwrap();
            }
            driver.enter_saving().unwrap();
            driver.finish_round().unwrap();
            ran.push(plan.round_number);
        }
        assert_eq!(ran, vec![1, 2, 3]);
        assert_eq!(driver.phase(), CadencePhase::Finished);
        // 3 rounds × (pair, saving, idle) + 1 group + finished
        assert_eq!(driver.transitions().len(), 11);
    }

    #[test]
    fn test_resume_offsets_rounds() {
        let mut driver = CadenceDriver::new(CadenceConfig {
            start_round: 10,
            ..config(2)
        });
        let plan = driver.begin_round().unwrap().unwrap();
        assert_eq!(plan.round_number, 11);
        assert_eq!(driver.end_round(), 12);
        assert!(!driver.plan(10).persist);
        assert!(driver.plan(11).persist);
    }

    #[test]
    fn test_invalid_transition() {
        let mut driver = CadenceDriver::new(config(1));
        let err = driver.enter_saving().unwrap_err();
        assert!(err.to_string().contains("idle"));
        driver.begin_round().unwrap();
        assert!(driver.finish_round().is_err());
    }
}
