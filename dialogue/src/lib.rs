//! Language-Emergence Dialogue Library
//!
//! This library provides:
//! - A turn protocol where a speaker encodes an intended meaning into a
//!   symbolic surface form, a listener reconstructs it, and a verifier scores
//!   the match with bounded listener retries
//! - Round scheduling over a fixed pairing table with role alternation
//! - Group sessions where one speaker at a time addresses everyone
//! - Per-persona side-channel context (secret instructions, injected knowledge)
//! - An experiment log with periodic checkpoints and resume
//!
//! # Turn Flow
//!
//! ```text
//! Generating → Interpreting → Verifying → [score >= threshold?]
//!                   ▲              │            │
//!                   │              │            ├─ Yes → Accepted
//!                   └──────────────┘            ├─ No, retries left → Interpreting (+ feedback)
//!                    (feedback note)            └─ No, ceiling hit → Exhausted
//! ```
//!
//! The surface form is produced once per turn. Retries only re-run the
//! listener with the verifier's corrective suggestion appended to its context.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dialogue::{Experiment, ExperimentConfig, JsonDirStore};
//!
//! let mut experiment = Experiment::open(&config, roster, scene, Box::new(store), false)?;
//! let summary = experiment.run().await?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod chat_client;
pub mod config;
pub mod context;
pub mod error;
pub mod experiment;
pub mod experiment_log;
pub mod persistence;
pub mod persona;
pub mod prompts;
pub mod records;
pub mod resilience;
pub mod scene;
pub mod schedule;
pub mod script;
pub mod stats;
pub mod turn;

pub use chat_client::{ChatCompletionPersona, LlmSettings};
pub use config::{ExperimentConfig, KnowledgeInjection, PersonaConfig, SceneConfig};
pub use context::{ContextInjector, SideChannelState};
pub use error::{ExperimentError, ExperimentResult};
pub use experiment::{Experiment, ExperimentSummary};
pub use experiment_log::ExperimentLog;
pub use persistence::{
    Checkpoint, IntegrityStatus, JsonDirStore, LogSnapshot, LogStore, MemoryStore,
    PersistenceError,
};
pub use persona::{
    Audience, GenerateRequest, GeneratedUtterance, InterpretRequest, Persona, PromptKind, Roster,
    ServiceError, VerifyRequest,
};
pub use records::{
    ConversationEntry, ConversationLine, DialogueSummaryEntry, FidelityScore,
    InterpretationResult, MatchCategory, RoundKind, RoundRecord, UnderstandingRecord, Utterance,
    VerificationResult,
};
pub use resilience::{DegradationLevel, HealthBoard, ServiceCall, ServiceHealth, ServiceOutcome};
pub use scene::{ClockedSceneProvider, SceneProvider};
pub use schedule::{
    CadenceConfig, CadenceDriver, CadencePhase, GroupSessionController, PairingSchedule,
    PersonaPair, RoundContext, RoundPlan, RoundRun, RoundScheduler,
};
pub use script::{MeaningRepair, NaturalScript};
pub use stats::UnderstandingStats;
pub use turn::{AttemptRecord, TurnConfig, TurnController, TurnOutcome, TurnPhase, TurnRequest};
