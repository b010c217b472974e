//! Single-turn comprehension protocol.
//!
//! A turn is one generation followed by up to `max_retries + 1`
//! interpret/verify iterations. Only the listener's context changes between
//! iterations; the surface form is fixed once generated.

pub mod controller;
pub mod state;

pub use controller::{
    AttemptRecord, GenerationOutcome, TurnConfig, TurnController, TurnOutcome, TurnRequest,
    UNINTERPRETED,
};
pub use state::{TransitionError, TurnPhase, TurnSession, TurnTransition};
