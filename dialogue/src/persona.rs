//! Persona seam: the completion capability the protocol consumes.
//!
//! A persona is a name plus three completion operations, one per prompt
//! kind. The protocol never looks inside a persona; the shipped HTTP
//! implementation lives in [`crate::chat_client`].

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{ExperimentError, ExperimentResult};
use crate::records::{InterpretationResult, Utterance, VerificationResult};

/// The three completion kinds the protocol issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Speaker produces intended meaning + surface form.
    GenerateChat,
    /// Listener reconstructs meaning from the surface form.
    UnderstandNovlang,
    /// Speaker scores the listener's reconstruction.
    VerifyUnderstanding,
}

impl PromptKind {
    pub const ALL: [PromptKind; 3] = [
        Self::GenerateChat,
        Self::UnderstandNovlang,
        Self::VerifyUnderstanding,
    ];
}

impl std::fmt::Display for PromptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GenerateChat => write!(f, "generate_chat"),
            Self::UnderstandNovlang => write!(f, "understand_novlang"),
            Self::VerifyUnderstanding => write!(f, "verify_understanding"),
        }
    }
}

/// Errors from a completion call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{kind} request failed: {message}")]
    RequestFailed { kind: PromptKind, message: String },

    #[error("{kind} timed out after {seconds}s")]
    Timeout { kind: PromptKind, seconds: u64 },

    #[error("{kind} response parse error: {message}")]
    Parse { kind: PromptKind, message: String },

    #[error("{kind} unavailable: {message}")]
    Unavailable { kind: PromptKind, message: String },
}

impl ServiceError {
    /// Prompt kind of the failed call.
    pub fn kind(&self) -> PromptKind {
        match self {
            Self::RequestFailed { kind, .. }
            | Self::Timeout { kind, .. }
            | Self::Parse { kind, .. }
            | Self::Unavailable { kind, .. } => *kind,
        }
    }

    pub fn parse(kind: PromptKind, message: impl Into<String>) -> Self {
        Self::Parse {
            kind,
            message: message.into(),
        }
    }

    pub fn request_failed(kind: PromptKind, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            kind,
            message: message.into(),
        }
    }
}

/// Who a generated utterance is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// A single listener in a pair round.
    Persona(String),
    /// Synthetic listener standing for the whole group.
    Everyone(Vec<String>),
}

impl Audience {
    /// Name used in records and prompts.
    pub fn name(&self) -> &str {
        match self {
            Self::Persona(name) => name,
            Self::Everyone(_) => "everyone",
        }
    }
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persona(name) => write!(f, "{}", name),
            Self::Everyone(members) => write!(f, "everyone ({})", members.join(", ")),
        }
    }
}

/// Input to `generate_chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub speaker: String,
    pub audience: Audience,
    /// Scene description plus the speaker's side-channel text.
    pub context: String,
    /// Prior utterances in the current round or session.
    pub history: Vec<Utterance>,
    /// Shared surface-language rules, if the experiment supplies any.
    pub language_rules: Option<String>,
}

/// Structured output of `generate_chat`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedUtterance {
    pub surface_form: String,
    pub intended_meaning: String,
    pub scene_observation: String,
    pub reasoning_trace: String,
}

/// Input to `understand_novlang`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpretRequest {
    pub listener: String,
    pub speaker: String,
    pub surface_form: String,
    /// Scene + listener side channel + optional retry feedback.
    pub context: String,
    pub history: Vec<Utterance>,
}

/// Input to `verify_understanding`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub speaker: String,
    pub listener: String,
    pub intended_meaning: String,
    pub surface_form: String,
    pub reconstructed_meaning: String,
}

/// A simulated participant able to complete the three prompt kinds.
#[async_trait]
pub trait Persona: Send + Sync {
    /// Persona identifier (unique within a roster).
    fn name(&self) -> &str;

    async fn generate_chat(
        &self,
        request: &GenerateRequest,
    ) -> Result<GeneratedUtterance, ServiceError>;

    async fn understand_novlang(
        &self,
        request: &InterpretRequest,
    ) -> Result<InterpretationResult, ServiceError>;

    async fn verify_understanding(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerificationResult, ServiceError>;
}

/// Ordered set of personas taking part in an experiment.
#[derive(Clone)]
pub struct Roster {
    personas: Vec<Arc<dyn Persona>>,
}

impl Roster {
    /// Build a roster, rejecting empty rosters and duplicate names.
    pub fn new(personas: Vec<Arc<dyn Persona>>) -> ExperimentResult<Self> {
        if personas.is_empty() {
            return Err(ExperimentError::config("roster is empty"));
        }
        let mut seen = HashSet::new();
        for persona in &personas {
            if !seen.insert(persona.name().to_string()) {
                return Err(ExperimentError::config(format!(
                    "duplicate persona name '{}'",
                    persona.name()
                )));
            }
        }
        Ok(Self { personas })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Persona>> {
        self.personas.iter().find(|p| p.name() == name)
    }

    /// Look up a persona, failing with a configuration error.
    pub fn require(&self, name: &str, referenced_by: &str) -> ExperimentResult<Arc<dyn Persona>> {
        self.get(name)
            .cloned()
            .ok_or_else(|| ExperimentError::unknown_persona(name, referenced_by))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Persona at a roster position.
    pub fn at(&self, index: usize) -> &Arc<dyn Persona> {
        &self.personas[index % self.personas.len()]
    }

    pub fn names(&self) -> Vec<String> {
        self.personas.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Persona>> {
        self.personas.iter()
    }
}

impl std::fmt::Debug for Roster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Roster")
            .field("personas", &self.names())
            .finish()
    }
}
