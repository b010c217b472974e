//! Two-party rounds with role alternation.

use tracing::info;

use crate::context::ContextInjector;
use crate::error::ExperimentResult;
use crate::experiment_log::ExperimentLog;
use crate::persona::Roster;
use crate::records::{ConversationEntry, ConversationLine, RoundKind, RoundRecord};
use crate::resilience::ServiceCall;
use crate::scene::SceneProvider;
use crate::turn::{TurnController, TurnRequest};

use super::pairing::PairingSchedule;

/// Shared collaborators for running a round.
pub struct RoundContext<'a> {
    pub roster: &'a Roster,
    pub injector: &'a ContextInjector,
    pub scene: &'a dyn SceneProvider,
    pub language_rules: Option<&'a str>,
}

/// A completed round plus the calls it made.
#[derive(Debug, Clone)]
pub struct RoundRun {
    pub record: RoundRecord,
    pub calls: Vec<ServiceCall>,
    pub accepted_turns: usize,
}

/// Runs two-party rounds from a pairing table.
#[derive(Debug, Clone)]
pub struct RoundScheduler {
    schedule: PairingSchedule,
    turns_per_round: u32,
    controller: TurnController,
}

impl RoundScheduler {
    pub fn new(schedule: PairingSchedule, turns_per_round: u32, controller: TurnController) -> Self {
        Self {
            schedule,
            turns_per_round,
            controller,
        }
    }

    pub fn schedule(&self) -> &PairingSchedule {
        &self.schedule
    }

    /// Run the pair round for a 0-based round index.
    ///
    /// Understanding records, summary entries and the conversation are
    /// appended to `log`; the round record itself is appended last.
    pub async fn run_round(
        &self,
        round_index: u32,
        ctx: &RoundContext<'_>,
        log: &mut ExperimentLog,
    ) -> ExperimentResult<RoundRun> {
        let round_number = round_index + 1;
        let pair = self.schedule.pair_for_round(round_index);
        let referenced_by = format!("the pair for round {}", round_number);
        let first = ctx.roster.require(&pair.first, &referenced_by)?;
        let second = ctx.roster.require(&pair.second, &referenced_by)?;

        let scene_description = ctx.scene.pair_scene(first.name(), second.name());
        let timestamp = ctx.scene.now();
        info!(
            round = round_number,
            pair = %pair,
            turns = self.turns_per_round,
            "Starting pair round"
        );

        let (mut speaker, mut listener) = (&first, &second);
        let mut utterances = Vec::with_capacity(self.turns_per_round as usize);
        let mut records = Vec::with_capacity(self.turns_per_round as usize);
        let mut calls = Vec::new();
        let mut accepted_turns = 0;

        for turn in 1..=self.turns_per_round {
            let outcome = self
                .controller
                .run_turn(TurnRequest {
                    round: round_number,
                    turn,
                    speaker: speaker.as_ref(),
                    listener: listener.as_ref(),
                    scene_context: &scene_description,
                    history: &utterances,
                    timestamp,
                    injector: ctx.injector,
                    language_rules: ctx.language_rules,
                })
                .await?;

            if outcome.accepted {
                accepted_turns += 1;
            }
            calls.extend(outcome.calls);
            utterances.push(outcome.utterance);
            records.push(outcome.record);
            std::mem::swap(&mut speaker, &mut listener);
        }

        for record in &records {
            log.append_understanding(record.clone());
            log.append_summary(record);
        }

        let participants = vec![pair.first.clone(), pair.second.clone()];
        log.append_conversation(
            timestamp,
            ConversationEntry {
                round: round_number,
                label: format!(
                    "{} → {} @ {}",
                    pair.first,
                    pair.second,
                    ctx.scene.place(&participants)
                ),
                lines: utterances.iter().map(ConversationLine::from).collect(),
            },
        );

        let record = RoundRecord {
            round_number,
            timestamp,
            kind: RoundKind::Pair,
            participants,
            scene_description,
            utterances,
            understanding_records: records,
        };
        log.append_round(record.clone());

        info!(
            round = round_number,
            accepted = accepted_turns,
            turns = self.turns_per_round,
            mean_score = record.mean_score().unwrap_or_default(),
            "Pair round complete"
        );

        Ok(RoundRun {
            record,
            calls,
            accepted_turns,
        })
    }
}
