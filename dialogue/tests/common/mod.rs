//! Deterministic personas for integration tests (no LLM calls).

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dialogue::{
    ClockedSceneProvider, ExperimentConfig, FidelityScore, GenerateRequest, GeneratedUtterance,
    InterpretRequest, InterpretationResult, MatchCategory, Persona, PromptKind, Roster,
    ServiceError, VerificationResult, VerifyRequest,
};

/// Score the verifier returns once its script runs out.
pub const DEFAULT_SCORE: i64 = 9;

/// Persona with scripted verifier scores that records what it was asked.
pub struct ScriptedPersona {
    name: String,
    scores: Mutex<VecDeque<i64>>,
    generated: AtomicU32,
    pub fail_generate: bool,
    pub fail_interpret: bool,
    pub fail_verify: bool,
    pub generate_contexts: Mutex<Vec<String>>,
    pub interpret_contexts: Mutex<Vec<String>>,
    pub history_lengths: Mutex<Vec<usize>>,
}

impl ScriptedPersona {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            scores: Mutex::new(VecDeque::new()),
            generated: AtomicU32::new(0),
            fail_generate: false,
            fail_interpret: false,
            fail_verify: false,
            generate_contexts: Mutex::new(Vec::new()),
            interpret_contexts: Mutex::new(Vec::new()),
            history_lengths: Mutex::new(Vec::new()),
        }
    }

    pub fn with_scores(self, scores: &[i64]) -> Self {
        *self.scores.lock().unwrap() = scores.iter().copied().collect();
        self
    }

    pub fn always_scoring(self, score: i64) -> Self {
        self.with_scores(&vec![score; 64])
    }

    pub fn generated_count(&self) -> u32 {
        self.generated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Persona for ScriptedPersona {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_chat(
        &self,
        request: &GenerateRequest,
    ) -> Result<GeneratedUtterance, ServiceError> {
        self.generate_contexts
            .lock()
            .unwrap()
            .push(request.context.clone());
        self.history_lengths
            .lock()
            .unwrap()
            .push(request.history.len());
        if self.fail_generate {
            return Err(ServiceError::request_failed(
                PromptKind::GenerateChat,
                "scripted failure",
            ));
        }
        let n = self.generated.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GeneratedUtterance {
            surface_form: format!("◇{}·{}", self.name, n),
            intended_meaning: format!("{}的第{}句话", self.name, n),
            scene_observation: "people nearby".to_string(),
            reasoning_trace: "scripted".to_string(),
        })
    }

    async fn understand_novlang(
        &self,
        request: &InterpretRequest,
    ) -> Result<InterpretationResult, ServiceError> {
        self.interpret_contexts
            .lock()
            .unwrap()
            .push(request.context.clone());
        if self.fail_interpret {
            return Err(ServiceError::parse(
                PromptKind::UnderstandNovlang,
                "scripted failure",
            ));
        }
        Ok(InterpretationResult {
            reconstructed_meaning: format!("{}听到了{}", self.name, request.surface_form),
            symbol_analysis: "◇ = greeting".to_string(),
            context_clues: String::new(),
        })
    }

    async fn verify_understanding(
        &self,
        _request: &VerifyRequest,
    ) -> Result<VerificationResult, ServiceError> {
        if self.fail_verify {
            return Err(ServiceError::Timeout {
                kind: PromptKind::VerifyUnderstanding,
                seconds: 1,
            });
        }
        let score = self
            .scores
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(DEFAULT_SCORE);
        Ok(VerificationResult {
            match_category: if score >= 7 {
                MatchCategory::Exact
            } else {
                MatchCategory::Mismatch
            },
            fidelity_score: FidelityScore::new(score),
            rationale: format!("scripted {}", score),
            corrective_suggestion: format!("try again after {}", score),
        })
    }
}

pub const NAMES: [&str; 4] = ["Isabella", "Maria", "Carmen", "Tamara"];

/// Roster of scripted personas plus typed handles for inspection.
pub fn scripted_roster(personas: Vec<ScriptedPersona>) -> (Roster, Vec<Arc<ScriptedPersona>>) {
    let handles: Vec<Arc<ScriptedPersona>> = personas.into_iter().map(Arc::new).collect();
    let roster = Roster::new(
        handles
            .iter()
            .map(|p| p.clone() as Arc<dyn Persona>)
            .collect(),
    )
    .unwrap();
    (roster, handles)
}

pub fn default_roster() -> (Roster, Vec<Arc<ScriptedPersona>>) {
    scripted_roster(NAMES.iter().map(|n| ScriptedPersona::new(n)).collect())
}

/// Small, fast configuration for tests.
pub fn test_config(rounds: u32, turns: u32) -> ExperimentConfig {
    let mut config = ExperimentConfig {
        name: "it".to_string(),
        rounds,
        turns_per_round: turns,
        ..ExperimentConfig::default()
    };
    config.turn.call_timeout_secs = 0;
    config
}

pub fn scene(config: &ExperimentConfig) -> Box<ClockedSceneProvider> {
    Box::new(ClockedSceneProvider::new(
        config.personas.clone(),
        &config.scene,
    ))
}
