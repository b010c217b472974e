//! Group sessions: one speaker at a time addressing everyone.

use tracing::info;

use crate::error::ExperimentResult;
use crate::experiment_log::ExperimentLog;
use crate::persona::{Audience, GenerateRequest};
use crate::records::{ConversationEntry, ConversationLine, RoundKind, RoundRecord, Utterance};
use crate::turn::TurnController;

use super::round::{RoundContext, RoundRun};

/// Runs generation-only group rounds over the whole roster.
#[derive(Debug, Clone)]
pub struct GroupSessionController {
    turns_per_round: u32,
    controller: TurnController,
}

impl GroupSessionController {
    pub fn new(turns_per_round: u32, controller: TurnController) -> Self {
        Self {
            turns_per_round,
            controller,
        }
    }

    /// Run a group round. Speakers cycle the roster in order, wrapping.
    ///
    /// No interpretation or verification happens, so the returned record has
    /// no understanding records.
    pub async fn run_group_round(
        &self,
        round_number: u32,
        ctx: &RoundContext<'_>,
        log: &mut ExperimentLog,
    ) -> ExperimentResult<RoundRun> {
        let participants = ctx.roster.names();
        let audience = Audience::Everyone(participants.clone());
        let scene_description = ctx.scene.group_scene(&participants);
        let timestamp = ctx.scene.now();
        info!(
            round = round_number,
            participants = participants.len(),
            turns = self.turns_per_round,
            "Starting group session"
        );

        let mut transcript: Vec<Utterance> = Vec::with_capacity(self.turns_per_round as usize);
        let mut calls = Vec::new();

        for turn in 1..=self.turns_per_round {
            let speaker = ctx.roster.at(turn as usize - 1);
            let request = GenerateRequest {
                speaker: speaker.name().to_string(),
                audience: audience.clone(),
                context: ctx.injector.with_base(&scene_description, speaker.name()),
                history: transcript.clone(),
                language_rules: ctx.language_rules.map(str::to_string),
            };
            let generation = self.controller.generate(speaker.as_ref(), &request).await;
            calls.push(generation.call);
            let generated = generation.generated;

            transcript.push(Utterance {
                turn_index: turn,
                speaker: speaker.name().to_string(),
                listener: audience.name().to_string(),
                timestamp,
                surface_form: generated.surface_form,
                intended_meaning: generated.intended_meaning,
                scene_observation: generated.scene_observation,
                reasoning_trace: generated.reasoning_trace,
                listener_understanding: None,
                fidelity_score: None,
            });
        }

        log.append_conversation(
            timestamp,
            ConversationEntry {
                round: round_number,
                label: format!("group @ {}", ctx.scene.place(&participants)),
                lines: transcript.iter().map(ConversationLine::from).collect(),
            },
        );

        let record = RoundRecord {
            round_number,
            timestamp,
            kind: RoundKind::Group,
            participants,
            scene_description,
            utterances: transcript,
            understanding_records: Vec::new(),
        };
        log.append_round(record.clone());

        info!(round = round_number, "Group session complete");
        Ok(RoundRun {
            record,
            calls,
            accepted_turns: 0,
        })
    }
}
