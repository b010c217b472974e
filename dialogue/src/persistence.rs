//! Experiment persistence: record files, checkpoints, and resume.
//!
//! A flush writes every record sequence in full, then a checkpoint naming
//! the round it covers. On resume the latest checkpoint is validated
//! against the stored records and the records are cut back to the
//! checkpointed prefix.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::records::{ConversationEntry, DialogueSummaryEntry, RoundRecord, UnderstandingRecord};

pub const ROUNDS_FILE: &str = "rounds.json";
pub const UNDERSTANDING_FILE: &str = "understanding.json";
pub const CONVERSATION_FILE: &str = "conversation.json";
pub const SUMMARY_FILE: &str = "dialogue_summary.json";

const CHECKPOINT_PREFIX: &str = "checkpoint-round-";
const CHECKPOINT_SUFFIX: &str = ".json";

/// Error during persistence operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Writing a file failed.
    Write { path: String, reason: String },
    /// Reading a file failed.
    Read { path: String, reason: String },
    /// Serialization failed.
    SerializeFailed { reason: String },
    /// Deserialization failed.
    DeserializeFailed { reason: String },
    /// Schema version mismatch.
    VersionMismatch { expected: u32, found: u32 },
    /// Integrity check failed on restore.
    IntegrityCheckFailed { reason: String },
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write { path, reason } => write!(f, "write {} failed: {}", path, reason),
            Self::Read { path, reason } => write!(f, "read {} failed: {}", path, reason),
            Self::SerializeFailed { reason } => write!(f, "serialize failed: {}", reason),
            Self::DeserializeFailed { reason } => write!(f, "deserialize failed: {}", reason),
            Self::VersionMismatch { expected, found } => {
                write!(
                    f,
                    "version mismatch: expected {}, found {}",
                    expected, found
                )
            }
            Self::IntegrityCheckFailed { reason } => {
                write!(f, "integrity check failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for PersistenceError {}

/// Progress marker written after each flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Schema version for forward compatibility.
    pub version: u32,
    /// Identifier of the process run that wrote this checkpoint.
    pub run_id: Uuid,
    pub experiment_name: String,
    /// Round indices completed so far; resume starts here.
    pub current_round: u32,
    pub total_rounds_recorded: usize,
    pub total_understanding_records: usize,
    pub personas: Vec<String>,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Current schema version.
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(
        run_id: Uuid,
        experiment_name: &str,
        current_round: u32,
        snapshot: &LogSnapshot,
        personas: &[String],
    ) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            run_id,
            experiment_name: experiment_name.to_string(),
            current_round,
            total_rounds_recorded: snapshot.rounds.len(),
            total_understanding_records: snapshot.understanding.len(),
            personas: personas.to_vec(),
            saved_at: Utc::now(),
        }
    }

    /// File name for this checkpoint.
    pub fn file_name(&self) -> String {
        format!(
            "{}{}{}",
            CHECKPOINT_PREFIX, self.current_round, CHECKPOINT_SUFFIX
        )
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        serde_json::to_string_pretty(self).map_err(|e| PersistenceError::SerializeFailed {
            reason: e.to_string(),
        })
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        let checkpoint: Self =
            serde_json::from_str(json).map_err(|e| PersistenceError::DeserializeFailed {
                reason: e.to_string(),
            })?;

        if checkpoint.version > Self::CURRENT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: checkpoint.version,
            });
        }

        Ok(checkpoint)
    }
}

/// Round number encoded in a checkpoint file name.
pub fn checkpoint_round(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(CHECKPOINT_PREFIX)?
        .strip_suffix(CHECKPOINT_SUFFIX)?
        .parse()
        .ok()
}

/// Everything the experiment log holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSnapshot {
    pub rounds: Vec<RoundRecord>,
    pub understanding: Vec<UnderstandingRecord>,
    /// Conversation index keyed by simulated timestamp.
    pub conversation: BTreeMap<String, Vec<ConversationEntry>>,
    pub dialogue_summary: Vec<DialogueSummaryEntry>,
}

impl LogSnapshot {
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
            && self.understanding.is_empty()
            && self.conversation.is_empty()
            && self.dialogue_summary.is_empty()
    }

    /// Drop every record belonging to a round after `round`.
    pub fn truncate_after(&mut self, round: u32) {
        self.rounds.retain(|r| r.round_number <= round);
        self.understanding.retain(|r| r.round <= round);
        self.dialogue_summary.retain(|e| e.round <= round);
        for entries in self.conversation.values_mut() {
            entries.retain(|e| e.round <= round);
        }
        self.conversation.retain(|_, entries| !entries.is_empty());
    }

    /// Highest round number present in the round records.
    pub fn last_round(&self) -> Option<u32> {
        self.rounds.iter().map(|r| r.round_number).max()
    }
}

/// Integrity check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    /// Checkpoint is valid and can be resumed.
    Valid,
    /// Checkpoint has minor issues but is recoverable.
    Recoverable { warnings: Vec<String> },
    /// Checkpoint is corrupted and cannot be used.
    Corrupted { errors: Vec<String> },
}

impl IntegrityStatus {
    /// Whether resume is safe.
    pub fn can_resume(&self) -> bool {
        matches!(self, Self::Valid | Self::Recoverable { .. })
    }
}

/// Validate a checkpoint against the records it claims to cover.
pub fn validate_checkpoint(checkpoint: &Checkpoint, snapshot: &LogSnapshot) -> IntegrityStatus {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();

    if checkpoint.version > Checkpoint::CURRENT_VERSION {
        errors.push(format!(
            "version {} > current {}",
            checkpoint.version,
            Checkpoint::CURRENT_VERSION
        ));
    }

    if checkpoint.personas.is_empty() {
        errors.push("checkpoint lists no personas".to_string());
    }

    // Records lost after the checkpoint was written
    if snapshot.rounds.len() < checkpoint.total_rounds_recorded {
        errors.push(format!(
            "checkpoint covers {} rounds but only {} are stored",
            checkpoint.total_rounds_recorded,
            snapshot.rounds.len()
        ));
    }
    if snapshot.understanding.len() < checkpoint.total_understanding_records {
        errors.push(format!(
            "checkpoint covers {} understanding records but only {} are stored",
            checkpoint.total_understanding_records,
            snapshot.understanding.len()
        ));
    }

    // Records written by a flush whose checkpoint never landed
    if let Some(last) = snapshot.last_round() {
        if last > checkpoint.current_round {
            warnings.push(format!(
                "records for round {} are newer than checkpoint round {} and will be discarded",
                last, checkpoint.current_round
            ));
        }
    }

    if !errors.is_empty() {
        IntegrityStatus::Corrupted { errors }
    } else if !warnings.is_empty() {
        IntegrityStatus::Recoverable { warnings }
    } else {
        IntegrityStatus::Valid
    }
}

/// Durable storage behind the experiment log.
pub trait LogStore: Send {
    /// Persist the full snapshot, then the checkpoint.
    fn save(&mut self, snapshot: &LogSnapshot, checkpoint: &Checkpoint)
        -> Result<(), PersistenceError>;

    /// Load stored records and the latest checkpoint, if anything is stored.
    fn load(&self) -> Result<Option<(LogSnapshot, Option<Checkpoint>)>, PersistenceError>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

/// Pretty JSON files in one experiment folder.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    dir: PathBuf,
}

impl JsonDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), PersistenceError> {
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(value).map_err(|e| {
            PersistenceError::SerializeFailed {
                reason: format!("{}: {}", name, e),
            }
        })?;
        std::fs::write(&path, json).map_err(|e| PersistenceError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn read_json<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, PersistenceError> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|e| PersistenceError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| PersistenceError::DeserializeFailed {
            reason: format!("{}: {}", path.display(), e),
        })
    }

    /// Latest checkpoint by round number.
    fn latest_checkpoint(&self) -> Result<Option<Checkpoint>, PersistenceError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| PersistenceError::Read {
            path: self.dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let latest = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                checkpoint_round(&name).map(|round| (round, entry.path()))
            })
            .max_by_key(|(round, _)| *round);

        let Some((round, path)) = latest else {
            return Ok(None);
        };
        debug!(round, path = %path.display(), "Loading checkpoint");
        let json = std::fs::read_to_string(&path).map_err(|e| PersistenceError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Checkpoint::from_json(&json).map(Some)
    }
}

impl LogStore for JsonDirStore {
    fn save(
        &mut self,
        snapshot: &LogSnapshot,
        checkpoint: &Checkpoint,
    ) -> Result<(), PersistenceError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PersistenceError::Write {
            path: self.dir.display().to_string(),
            reason: e.to_string(),
        })?;

        self.write_json(ROUNDS_FILE, &snapshot.rounds)?;
        self.write_json(CONVERSATION_FILE, &snapshot.conversation)?;
        self.write_json(UNDERSTANDING_FILE, &snapshot.understanding)?;
        self.write_json(SUMMARY_FILE, &snapshot.dialogue_summary)?;
        self.write_json(&checkpoint.file_name(), checkpoint)?;

        info!(
            round = checkpoint.current_round,
            rounds = snapshot.rounds.len(),
            dir = %self.dir.display(),
            "Progress saved"
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<(LogSnapshot, Option<Checkpoint>)>, PersistenceError> {
        if !self.dir.is_dir() {
            return Ok(None);
        }

        let snapshot = LogSnapshot {
            rounds: self.read_json(ROUNDS_FILE)?,
            understanding: self.read_json(UNDERSTANDING_FILE)?,
            conversation: self.read_json(CONVERSATION_FILE)?,
            dialogue_summary: self.read_json(SUMMARY_FILE)?,
        };
        let checkpoint = self.latest_checkpoint()?;

        if snapshot.is_empty() && checkpoint.is_none() {
            return Ok(None);
        }
        Ok(Some((snapshot, checkpoint)))
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    snapshot: Option<LogSnapshot>,
    checkpoints: Vec<Checkpoint>,
    failing: bool,
}

/// In-memory store; clones share state so tests can inspect saves.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.failing = failing;
        }
    }

    /// Checkpoints in save order.
    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.state
            .lock()
            .map(|s| s.checkpoints.clone())
            .unwrap_or_default()
    }

    /// Last saved snapshot.
    pub fn saved(&self) -> Option<LogSnapshot> {
        self.state.lock().ok().and_then(|s| s.snapshot.clone())
    }
}

impl LogStore for MemoryStore {
    fn save(
        &mut self,
        snapshot: &LogSnapshot,
        checkpoint: &Checkpoint,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().map_err(|e| PersistenceError::Write {
            path: "memory".to_string(),
            reason: e.to_string(),
        })?;
        if state.failing {
            return Err(PersistenceError::Write {
                path: "memory".to_string(),
                reason: "store is failing".to_string(),
            });
        }
        state.snapshot = Some(snapshot.clone());
        state.checkpoints.push(checkpoint.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<(LogSnapshot, Option<Checkpoint>)>, PersistenceError> {
        let state = self.state.lock().map_err(|e| PersistenceError::Read {
            path: "memory".to_string(),
            reason: e.to_string(),
        })?;
        let checkpoint = state
            .checkpoints
            .iter()
            .max_by_key(|c| c.current_round)
            .cloned();
        Ok(state.snapshot.clone().map(|s| (s, checkpoint)))
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
