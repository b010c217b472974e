//! In-memory experiment log with periodic flush to a [`LogStore`].

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ExperimentError, ExperimentResult};
use crate::persistence::{
    validate_checkpoint, Checkpoint, IntegrityStatus, LogSnapshot, LogStore, PersistenceError,
};
use crate::records::{
    ConversationEntry, DialogueSummaryEntry, RoundRecord, UnderstandingRecord,
};
use crate::stats::UnderstandingStats;

/// Key format of the conversation-by-time index.
pub const CONVERSATION_KEY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ordered record sequences for one experiment.
///
/// Appends only touch memory. [`ExperimentLog::flush`] writes everything;
/// on failure the records stay in memory for the next flush.
pub struct ExperimentLog {
    store: Box<dyn LogStore>,
    snapshot: LogSnapshot,
    run_id: Uuid,
    experiment_name: String,
    personas: Vec<String>,
    next_summary_id: u64,
    last_flushed_round: Option<u32>,
}

impl ExperimentLog {
    /// Open the log, optionally resuming from the latest checkpoint.
    ///
    /// Returns the log and the round index to start from.
    pub fn open(
        store: Box<dyn LogStore>,
        experiment_name: &str,
        personas: Vec<String>,
        resume: bool,
    ) -> ExperimentResult<(Self, u32)> {
        let stored = store.load()?;
        let mut start_round = 0;

        let snapshot = match (stored, resume) {
            (None, _) => {
                if resume {
                    info!(location = %store.location(), "Nothing to resume, starting fresh");
                }
                LogSnapshot::default()
            }
            (Some(_), false) => {
                return Err(ExperimentError::config(format!(
                    "{} already holds records for '{}'; resume it or choose another name",
                    store.location(),
                    experiment_name
                )));
            }
            (Some((_, None)), true) => {
                warn!(
                    location = %store.location(),
                    "Stored records have no checkpoint, starting fresh"
                );
                LogSnapshot::default()
            }
            (Some((mut snapshot, Some(checkpoint))), true) => {
                if checkpoint.personas != personas {
                    return Err(ExperimentError::config(format!(
                        "checkpoint roster {:?} does not match configured roster {:?}",
                        checkpoint.personas, personas
                    )));
                }
                match validate_checkpoint(&checkpoint, &snapshot) {
                    IntegrityStatus::Valid => {}
                    IntegrityStatus::Recoverable { warnings } => {
                        for warning in &warnings {
                            warn!(round = checkpoint.current_round, "{}", warning);
                        }
                    }
                    IntegrityStatus::Corrupted { errors } => {
                        return Err(PersistenceError::IntegrityCheckFailed {
                            reason: errors.join("; "),
                        }
                        .into());
                    }
                }
                snapshot.truncate_after(checkpoint.current_round);
                start_round = checkpoint.current_round;
                info!(
                    round = start_round,
                    rounds = snapshot.rounds.len(),
                    understanding = snapshot.understanding.len(),
                    "Resuming from checkpoint"
                );
                snapshot
            }
        };

        let next_summary_id = snapshot
            .dialogue_summary
            .iter()
            .map(|e| e.id)
            .max()
            .unwrap_or(0)
            + 1;

        let log = Self {
            store,
            snapshot,
            run_id: Uuid::new_v4(),
            experiment_name: experiment_name.to_string(),
            personas,
            next_summary_id,
            last_flushed_round: None,
        };
        Ok((log, start_round))
    }

    pub fn append_round(&mut self, record: RoundRecord) {
        self.snapshot.rounds.push(record);
    }

    pub fn append_understanding(&mut self, record: UnderstandingRecord) {
        self.snapshot.understanding.push(record);
    }

    /// Append a compact summary of a pair turn, assigning the next id.
    pub fn append_summary(&mut self, record: &UnderstandingRecord) -> u64 {
        let id = self.next_summary_id;
        self.next_summary_id += 1;
        self.snapshot.dialogue_summary.push(DialogueSummaryEntry {
            id,
            round: record.round,
            speaker: record.speaker.clone(),
            listener: record.listener.clone(),
            intended_meaning: record.intended_meaning.clone(),
            surface_form: record.surface_form.clone(),
            understood_as: record.reconstructed_meaning.clone(),
            score: record.fidelity_score,
        });
        id
    }

    /// Index a conversation under its simulated start time.
    pub fn append_conversation(&mut self, at: NaiveDateTime, entry: ConversationEntry) {
        self.snapshot
            .conversation
            .entry(at.format(CONVERSATION_KEY_FORMAT).to_string())
            .or_default()
            .push(entry);
    }

    pub fn rounds(&self) -> &[RoundRecord] {
        &self.snapshot.rounds
    }

    pub fn understanding(&self) -> &[UnderstandingRecord] {
        &self.snapshot.understanding
    }

    pub fn dialogue_summary(&self) -> &[DialogueSummaryEntry] {
        &self.snapshot.dialogue_summary
    }

    pub fn conversation(&self) -> &BTreeMap<String, Vec<ConversationEntry>> {
        &self.snapshot.conversation
    }

    pub fn snapshot(&self) -> &LogSnapshot {
        &self.snapshot
    }

    pub fn last_flushed_round(&self) -> Option<u32> {
        self.last_flushed_round
    }

    /// Write every record and a checkpoint for `current_round`.
    pub fn flush(&mut self, current_round: u32) -> ExperimentResult<Checkpoint> {
        let checkpoint = Checkpoint::new(
            self.run_id,
            &self.experiment_name,
            current_round,
            &self.snapshot,
            &self.personas,
        );
        if let Err(err) = self.store.save(&self.snapshot, &checkpoint) {
            warn!(
                round = current_round,
                location = %self.store.location(),
                error = %err,
                "Flush failed, records kept in memory"
            );
            return Err(err.into());
        }
        self.last_flushed_round = Some(current_round);
        Ok(checkpoint)
    }

    pub fn stats(&self) -> UnderstandingStats {
        UnderstandingStats::from_records(&self.snapshot.understanding)
    }
}

impl std::fmt::Debug for ExperimentLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentLog")
            .field("experiment_name", &self.experiment_name)
            .field("location", &self.store.location())
            .field("rounds", &self.snapshot.rounds.len())
            .field("understanding", &self.snapshot.understanding.len())
            .finish()
    }
}
