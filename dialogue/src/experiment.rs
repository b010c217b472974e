//! Experiment: wires roster, scheduler, cadence and log into a run.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ExperimentConfig;
use crate::context::ContextInjector;
use crate::error::{ExperimentError, ExperimentResult};
use crate::experiment_log::ExperimentLog;
use crate::persistence::LogStore;
use crate::persona::Roster;
use crate::resilience::{HealthBoard, ServiceHealth};
use crate::scene::SceneProvider;
use crate::schedule::{
    CadenceConfig, CadenceDriver, GroupSessionController, RoundContext, RoundScheduler,
};
use crate::stats::UnderstandingStats;
use crate::turn::TurnController;

/// Outcome of [`Experiment::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentSummary {
    pub name: String,
    /// 0-based index of the first round run by this invocation.
    pub start_round: u32,
    pub rounds_completed: u32,
    /// 1-based number of the last completed round.
    pub final_round: u32,
    pub group_sessions: u32,
    pub stats: UnderstandingStats,
    pub health: Vec<ServiceHealth>,
}

/// A configured, ready-to-run experiment.
pub struct Experiment {
    config: ExperimentConfig,
    roster: Roster,
    injector: ContextInjector,
    scene: Box<dyn SceneProvider>,
    log: ExperimentLog,
    rounds: RoundScheduler,
    groups: GroupSessionController,
    health: HealthBoard,
    language_rules: Option<String>,
    start_round: u32,
    next_round: u32,
    end_round: u32,
}

impl Experiment {
    /// Validate the configuration against the roster, open the log, and
    /// apply standing instructions.
    ///
    /// With `resume`, the log is reloaded and the run continues after the
    /// latest checkpoint; injections whose trigger round has already passed
    /// are re-applied, since side-channel state is not persisted.
    pub fn open(
        config: &ExperimentConfig,
        roster: Roster,
        scene: Box<dyn SceneProvider>,
        store: Box<dyn LogStore>,
        resume: bool,
    ) -> ExperimentResult<Self> {
        config.validate()?;

        let schedule = config.pairing_schedule()?;
        schedule.validate_against(&roster)?;

        let mut injector = ContextInjector::new();
        for (persona, instruction) in &config.instructions {
            roster.require(persona, "instructions")?;
            injector.set_instruction(persona, instruction.clone());
        }
        if let Some(injection) = &config.injection {
            for persona in &injection.personas {
                roster.require(persona, "injection")?;
            }
        }

        let language_rules = match &config.language_rules_path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    ExperimentError::config(format!(
                        "cannot read language rules {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                info!(path = %path.display(), chars = text.chars().count(), "Language rules loaded");
                Some(text)
            }
            None => None,
        };

        let (log, start_round) = ExperimentLog::open(store, &config.name, roster.names(), resume)?;

        if let Some(injection) = &config.injection {
            if injection.trigger_round <= start_round {
                info!(
                    trigger_round = injection.trigger_round,
                    "Re-applying knowledge injection from before the checkpoint"
                );
                injector.inject_knowledge(&injection.personas, &injection.text);
            }
        }

        let controller = TurnController::new(config.turn.clone());
        let rounds = RoundScheduler::new(schedule, config.turns_per_round, controller.clone());
        let groups = GroupSessionController::new(config.turns_per_round, controller);

        info!(
            name = %config.name,
            personas = roster.len(),
            start_round,
            rounds = config.rounds,
            "Experiment opened"
        );

        Ok(Self {
            config: config.clone(),
            roster,
            injector,
            scene,
            log,
            rounds,
            groups,
            health: HealthBoard::default(),
            language_rules,
            start_round,
            next_round: start_round,
            end_round: start_round + config.rounds,
        })
    }

    /// Side-channel state, for scripted scenarios.
    pub fn injector_mut(&mut self) -> &mut ContextInjector {
        &mut self.injector
    }

    pub fn injector(&self) -> &ContextInjector {
        &self.injector
    }

    pub fn log(&self) -> &ExperimentLog {
        &self.log
    }

    pub fn health(&self) -> &HealthBoard {
        &self.health
    }

    /// 0-based index of the next round to run.
    pub fn next_round(&self) -> u32 {
        self.next_round
    }

    /// Run the remaining rounds.
    ///
    /// A failed flush stops the run with a persistence error; the records
    /// stay in memory and a later call continues with the next round.
    pub async fn run(&mut self) -> ExperimentResult<ExperimentSummary> {
        let first = self.next_round;
        let mut driver = CadenceDriver::new(CadenceConfig {
            rounds: self.end_round.saturating_sub(self.next_round),
            start_round: self.next_round,
            group_chat_interval: self.config.group_chat_interval,
            save_interval: self.config.save_interval,
            injection_round: self.config.injection.as_ref().map(|i| i.trigger_round),
        });
        let mut group_sessions = 0;

        while let Some(plan) = driver.begin_round()? {
            if plan.inject {
                if let Some(injection) = &self.config.injection {
                    info!(
                        round = plan.round_number,
                        targets = ?injection.personas,
                        "Injecting knowledge"
                    );
                    self.injector
                        .inject_knowledge(&injection.personas, &injection.text);
                }
            }

            let ctx = RoundContext {
                roster: &self.roster,
                injector: &self.injector,
                scene: self.scene.as_ref(),
                language_rules: self.language_rules.as_deref(),
            };

            let run = self
                .rounds
                .run_round(plan.round_index, &ctx, &mut self.log)
                .await?;
            self.health.record_all(&run.calls);

            if plan.group {
                driver.enter_group()?;
                let group = self
                    .groups
                    .run_group_round(plan.round_number, &ctx, &mut self.log)
                    .await?;
                self.health.record_all(&group.calls);
                group_sessions += 1;
            }

            driver.enter_saving()?;
            self.next_round = plan.round_index + 1;
            self.scene.advance(self.config.scene.round_stride_minutes);
            if plan.persist {
                self.log.flush(plan.round_number)?;
            }
            driver.finish_round()?;
        }

        // A previous call may have stopped on a failed flush of the final round
        if self.next_round > self.start_round
            && self.log.last_flushed_round() != Some(self.next_round)
        {
            self.log.flush(self.next_round)?;
        }

        let stats = self.log.stats();
        if self.health.total_failures() > 0 {
            warn!(
                failures = self.health.total_failures(),
                "Some completion calls failed during the run"
            );
        }
        info!(
            name = %self.config.name,
            rounds = self.next_round - first,
            %stats,
            "Experiment finished"
        );

        Ok(ExperimentSummary {
            name: self.config.name.clone(),
            start_round: self.start_round,
            rounds_completed: self.next_round - first,
            final_round: self.next_round,
            group_sessions,
            stats,
            health: self.health.snapshot(),
        })
    }
}

impl std::fmt::Debug for Experiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.config.name)
            .field("roster", &self.roster)
            .field("next_round", &self.next_round)
            .field("end_round", &self.end_round)
            .finish()
    }
}
