//! Experiment error types
//!
//! Only configuration and persistence problems surface as errors. Service
//! failures inside a turn are degraded to sentinel values and never reach
//! this type.

use thiserror::Error;

use crate::persistence::PersistenceError;

/// Result type alias for experiment operations
pub type ExperimentResult<T> = Result<T, ExperimentError>;

/// Errors that can stop an experiment run
#[derive(Error, Debug)]
pub enum ExperimentError {
    /// Invalid configuration (bad roster, pairing, or parameter)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Durable store rejected a save or load
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Invalid phase transition in a state machine
    #[error("Invalid state transition: {0}")]
    Transition(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExperimentError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Configuration error for a persona name missing from the roster
    pub fn unknown_persona(name: &str, referenced_by: &str) -> Self {
        Self::config(format!(
            "persona '{}' referenced by {} is not in the roster",
            name, referenced_by
        ))
    }

    /// Whether this is a configuration error (fail-fast class)
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Whether this is a persistence error
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}
