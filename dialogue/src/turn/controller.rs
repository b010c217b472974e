//! Turn controller: generate once, then interpret/verify with bounded retry.

use std::future::Future;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::ContextInjector;
use crate::error::ExperimentResult;
use crate::persona::{
    Audience, GenerateRequest, GeneratedUtterance, InterpretRequest, Persona, PromptKind,
    ServiceError, VerifyRequest,
};
use crate::records::{
    FidelityScore, InterpretationResult, MatchCategory, UnderstandingRecord, Utterance,
    VerificationResult,
};
use crate::resilience::{ServiceCall, ServiceOutcome};
use crate::script::{repair_meaning, MeaningRepair, NaturalScript};

use super::state::{TurnPhase, TurnSession};

/// Reconstructed meaning stored when the interpreter call fails.
pub const UNINTERPRETED: &str = "(could not interpret)";

/// Verification loop parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Extra interpretation attempts after the first.
    pub max_retries: u32,
    /// Minimum fidelity score for acceptance (0–10).
    pub threshold_score: u8,
    /// Per-call timeout in seconds; 0 disables the timeout.
    pub call_timeout_secs: u64,
    /// Script the intended-meaning channel is written in.
    pub natural_script: NaturalScript,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            threshold_score: 7,
            call_timeout_secs: 120,
            natural_script: NaturalScript::Han,
        }
    }
}

impl TurnConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}

/// Everything one pair turn needs.
pub struct TurnRequest<'a> {
    /// 1-based round number.
    pub round: u32,
    /// 1-based turn index within the round.
    pub turn: u32,
    pub speaker: &'a dyn Persona,
    pub listener: &'a dyn Persona,
    pub scene_context: &'a str,
    /// Earlier utterances of the same round.
    pub history: &'a [Utterance],
    pub timestamp: NaiveDateTime,
    pub injector: &'a ContextInjector,
    pub language_rules: Option<&'a str>,
}

/// One interpret/verify iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 0 for the first attempt.
    pub retry: u32,
    pub reconstructed_meaning: String,
    pub match_category: MatchCategory,
    pub fidelity_score: FidelityScore,
    /// Corrective suggestion fed into this attempt, if any.
    pub feedback: Option<String>,
    pub interpretation_degraded: bool,
    pub verification_degraded: bool,
}

/// Repaired generator output plus the call record.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub generated: GeneratedUtterance,
    pub repair: MeaningRepair,
    pub call: ServiceCall,
}

impl GenerationOutcome {
    pub fn degraded(&self) -> bool {
        !self.call.succeeded()
    }
}

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Utterance with listener understanding and score filled in.
    pub utterance: Utterance,
    pub record: UnderstandingRecord,
    /// Retry index of the accepted attempt, or `max_retries + 1` when exhausted.
    pub retry_count: u32,
    pub accepted: bool,
    pub attempts: Vec<AttemptRecord>,
    pub repair: MeaningRepair,
    /// Every completion call in issue order.
    pub calls: Vec<ServiceCall>,
    pub session: TurnSession,
}

/// Runs single turns of the comprehension protocol.
#[derive(Debug, Clone, Default)]
pub struct TurnController {
    config: TurnConfig,
}

impl TurnController {
    pub fn new(config: TurnConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TurnConfig {
        &self.config
    }

    async fn with_timeout<T, F>(&self, kind: PromptKind, call: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        match self.config.call_timeout() {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Timeout {
                    kind,
                    seconds: limit.as_secs(),
                }),
            },
            None => call.await,
        }
    }

    /// Call the generator once and apply the script repair.
    ///
    /// Shared by pair turns and group sessions.
    pub async fn generate(
        &self,
        speaker: &dyn Persona,
        request: &GenerateRequest,
    ) -> GenerationOutcome {
        debug!(
            speaker = speaker.name(),
            audience = %request.audience,
            context_chars = request.context.chars().count(),
            history = request.history.len(),
            "Generating utterance"
        );

        let outcome = ServiceOutcome::from_result(
            self.with_timeout(PromptKind::GenerateChat, speaker.generate_chat(request))
                .await,
            GeneratedUtterance::default,
        );
        let call = ServiceCall::observe(PromptKind::GenerateChat, &outcome);
        if let Some(reason) = outcome.reason() {
            warn!(
                speaker = speaker.name(),
                reason,
                "Generation failed, using empty utterance"
            );
        }

        let mut generated = outcome.into_value();
        let fixed = repair_meaning(
            std::mem::take(&mut generated.intended_meaning),
            std::mem::take(&mut generated.surface_form),
            self.config.natural_script,
        );
        match fixed.repair {
            MeaningRepair::Intact => {}
            MeaningRepair::Swapped => warn!(
                speaker = speaker.name(),
                script = %self.config.natural_script,
                "Intended meaning and surface form were swapped"
            ),
            MeaningRepair::Placeholder => warn!(
                speaker = speaker.name(),
                script = %self.config.natural_script,
                "No usable intended meaning, stored placeholder"
            ),
        }
        generated.intended_meaning = fixed.intended_meaning;
        generated.surface_form = fixed.surface_form;

        GenerationOutcome {
            generated,
            repair: fixed.repair,
            call,
        }
    }

    fn feedback_note(suggestion: &str) -> String {
        let hint = if suggestion.trim().is_empty() {
            "(no suggestion given)"
        } else {
            suggestion
        };
        format!(
            "[feedback] Your previous interpretation did not match what the speaker meant. \
             Speaker's hint: {}",
            hint
        )
    }

    /// Run one turn: generate, then interpret and verify until accepted or
    /// the retry ceiling is reached.
    ///
    /// Service failures never fail the turn. An `Err` only signals a broken
    /// phase sequence.
    pub async fn run_turn(&self, request: TurnRequest<'_>) -> ExperimentResult<TurnOutcome> {
        let speaker = request.speaker.name().to_string();
        let listener = request.listener.name().to_string();
        let mut session = TurnSession::new(request.round, request.turn);
        let mut calls = Vec::new();

        let generate_request = GenerateRequest {
            speaker: speaker.clone(),
            audience: Audience::Persona(listener.clone()),
            context: request.injector.with_base(request.scene_context, &speaker),
            history: request.history.to_vec(),
            language_rules: request.language_rules.map(str::to_string),
        };
        let generation = self.generate(request.speaker, &generate_request).await;
        let generation_degraded = generation.degraded();
        calls.push(generation.call.clone());
        let generated = generation.generated;

        session.transition(TurnPhase::Interpreting, "utterance generated")?;

        let listener_base = request
            .injector
            .with_base(request.scene_context, &listener);
        let threshold = self.config.threshold_score;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut retry_count = 0u32;
        let mut accepted = false;
        let mut last_suggestion: Option<String> = None;
        let mut interpretation = InterpretationResult::default();
        let mut verification = VerificationResult::failed();
        let mut final_degraded = false;

        while retry_count <= self.config.max_retries && !accepted {
            let feedback = if retry_count > 0 {
                last_suggestion.clone()
            } else {
                None
            };
            let context = match &feedback {
                Some(suggestion) => {
                    format!("{}\n{}", listener_base, Self::feedback_note(suggestion))
                }
                None => listener_base.clone(),
            };

            let interpret_request = InterpretRequest {
                listener: listener.clone(),
                speaker: speaker.clone(),
                surface_form: generated.surface_form.clone(),
                context,
                history: request.history.to_vec(),
            };
            let interpreted = ServiceOutcome::from_result(
                self.with_timeout(
                    PromptKind::UnderstandNovlang,
                    request.listener.understand_novlang(&interpret_request),
                )
                .await,
                || InterpretationResult {
                    reconstructed_meaning: UNINTERPRETED.to_string(),
                    ..Default::default()
                },
            );
            calls.push(ServiceCall::observe(
                PromptKind::UnderstandNovlang,
                &interpreted,
            ));
            if let Some(reason) = interpreted.reason() {
                warn!(
                    round = request.round,
                    turn = request.turn,
                    listener = %listener,
                    reason,
                    "Interpretation failed, using sentinel"
                );
            }
            let interpretation_degraded = interpreted.is_degraded();
            interpretation = interpreted.into_value();

            session.transition(TurnPhase::Verifying, "interpretation received")?;

            let verify_request = VerifyRequest {
                speaker: speaker.clone(),
                listener: listener.clone(),
                intended_meaning: generated.intended_meaning.clone(),
                surface_form: generated.surface_form.clone(),
                reconstructed_meaning: interpretation.reconstructed_meaning.clone(),
            };
            let verified = ServiceOutcome::from_result(
                self.with_timeout(
                    PromptKind::VerifyUnderstanding,
                    request.speaker.verify_understanding(&verify_request),
                )
                .await,
                VerificationResult::failed,
            );
            calls.push(ServiceCall::observe(
                PromptKind::VerifyUnderstanding,
                &verified,
            ));
            if let Some(reason) = verified.reason() {
                warn!(
                    round = request.round,
                    turn = request.turn,
                    speaker = %speaker,
                    reason,
                    "Verification failed, using neutral score"
                );
            }
            let verification_degraded = verified.is_degraded();
            verification = verified.into_value();
            final_degraded = interpretation_degraded || verification_degraded;

            attempts.push(AttemptRecord {
                retry: retry_count,
                reconstructed_meaning: interpretation.reconstructed_meaning.clone(),
                match_category: verification.match_category,
                fidelity_score: verification.fidelity_score,
                feedback,
                interpretation_degraded,
                verification_degraded,
            });

            let score = verification.fidelity_score;
            if score.meets(threshold) {
                accepted = true;
                session.transition(
                    TurnPhase::Accepted,
                    &format!("score {} >= {}", score, threshold),
                )?;
                break;
            }

            retry_count += 1;
            if retry_count > self.config.max_retries {
                session.transition(
                    TurnPhase::Exhausted,
                    &format!("score {} after {} attempts", score, retry_count),
                )?;
                warn!(
                    round = request.round,
                    turn = request.turn,
                    speaker = %speaker,
                    listener = %listener,
                    score = score.value(),
                    attempts = retry_count,
                    "Retry ceiling reached without acceptance"
                );
            } else {
                debug!(
                    round = request.round,
                    turn = request.turn,
                    score = score.value(),
                    retry = retry_count,
                    "Score below threshold, retrying interpretation"
                );
                last_suggestion = Some(verification.corrective_suggestion.clone());
                session.transition(
                    TurnPhase::Interpreting,
                    &format!("score {} < {}", score, threshold),
                )?;
            }
        }

        info!(
            round = request.round,
            turn = request.turn,
            speaker = %speaker,
            listener = %listener,
            score = verification.fidelity_score.value(),
            accepted,
            attempts = attempts.len(),
            "Turn complete"
        );

        let utterance = Utterance {
            turn_index: request.turn,
            speaker: speaker.clone(),
            listener: listener.clone(),
            timestamp: request.timestamp,
            surface_form: generated.surface_form.clone(),
            intended_meaning: generated.intended_meaning.clone(),
            scene_observation: generated.scene_observation,
            reasoning_trace: generated.reasoning_trace,
            listener_understanding: Some(interpretation.reconstructed_meaning.clone()),
            fidelity_score: Some(verification.fidelity_score),
        };

        let record = UnderstandingRecord {
            round: request.round,
            turn: request.turn,
            speaker,
            listener,
            intended_meaning: generated.intended_meaning,
            surface_form: generated.surface_form,
            reconstructed_meaning: interpretation.reconstructed_meaning,
            symbol_analysis: interpretation.symbol_analysis,
            match_category: verification.match_category,
            fidelity_score: verification.fidelity_score,
            rationale: verification.rationale,
            attempts: attempts.len() as u32,
            accepted,
            degraded: generation_degraded || final_degraded,
        };

        Ok(TurnOutcome {
            utterance,
            record,
            retry_count,
            accepted,
            attempts,
            repair: generation.repair,
            calls,
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Persona with scripted verifier scores and optional failures.
    struct Scripted {
        name: &'static str,
        surface: &'static str,
        meaning: &'static str,
        scores: Mutex<VecDeque<i64>>,
        fail_generate: bool,
        fail_interpret: bool,
        fail_verify: bool,
        seen_contexts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(name: &'static str, scores: &[i64]) -> Self {
            Self {
                name,
                surface: "○ ✧ →",
                meaning: "我们去喝咖啡吧",
                scores: Mutex::new(scores.iter().copied().collect()),
                fail_generate: false,
                fail_interpret: false,
                fail_verify: false,
                seen_contexts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Persona for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate_chat(
            &self,
            _request: &GenerateRequest,
        ) -> Result<GeneratedUtterance, ServiceError> {
            if self.fail_generate {
                return Err(ServiceError::request_failed(
                    PromptKind::GenerateChat,
                    "connection refused",
                ));
            }
            Ok(GeneratedUtterance {
                surface_form: self.surface.to_string(),
                intended_meaning: self.meaning.to_string(),
                scene_observation: "cafe is busy".to_string(),
                reasoning_trace: "keep it short".to_string(),
            })
        }

        async fn understand_novlang(
            &self,
            request: &InterpretRequest,
        ) -> Result<InterpretationResult, ServiceError> {
            self.seen_contexts
                .lock()
                .unwrap()
                .push(request.context.clone());
            if self.fail_interpret {
                return Err(ServiceError::parse(PromptKind::UnderstandNovlang, "no json"));
            }
            Ok(InterpretationResult {
                reconstructed_meaning: "去喝咖啡".to_string(),
                symbol_analysis: "○ = cup".to_string(),
                context_clues: "cafe".to_string(),
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
            let score = self.scores.lock().unwrap().pop_front().unwrap_or(3);
            Ok(VerificationResult {
                match_category: MatchCategory::Partial,
                fidelity_score: FidelityScore::new(score),
                rationale: format!("scored {}", score),
                corrective_suggestion: format!("hint after {}", score),
            })
        }
    }

    fn at() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 2, 13)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    fn request<'a>(
        speaker: &'a Scripted,
        listener: &'a Scripted,
        injector: &'a ContextInjector,
    ) -> TurnRequest<'a> {
        TurnRequest {
            round: 1,
            turn: 1,
            speaker,
            listener,
            scene_context: "Hobbs Cafe, 10:00",
            history: &[],
            timestamp: at(),
            injector,
            language_rules: None,
        }
    }

    #[tokio::test]
    async fn test_accept_on_first_attempt() {
        let speaker = Scripted::new("Isabella", &[9]);
        let listener = Scripted::new("Maria", &[]);
        let injector = ContextInjector::new();
        let outcome = TurnController::default()
            .run_turn(request(&speaker, &listener, &injector))
            .await
            .unwrap();
        assert!(outcome.accepted);
        assert_eq!(outcome.retry_count, 0);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.calls.len(), 3);
        assert_eq!(outcome.session.phase, TurnPhase::Accepted);
        assert_eq!(outcome.utterance.fidelity_score, Some(FidelityScore::new(9)));
        assert_eq!(outcome.utterance.listener_understanding.as_deref(), Some("去喝咖啡"));
    }

    #[tokio::test]
    async fn test_accept_after_retries_with_feedback() {
        let speaker = Scripted::new("Isabella", &[4, 6, 8]);
        let listener = Scripted::new("Maria", &[]);
        let injector = ContextInjector::new();
        let outcome = TurnController::default()
            .run_turn(request(&speaker, &listener, &injector))
            .await
            .unwrap();
        assert!(outcome.accepted);
        assert_eq!(outcome.retry_count, 2);
        assert_eq!(outcome.record.fidelity_score.value(), 8);
        assert_eq!(outcome.record.attempts, 3);

        let contexts = listener.seen_contexts.lock().unwrap();
        assert!(!contexts[0].contains("[feedback]"));
        assert!(contexts[1].contains("hint after 4"));
        assert!(contexts[2].contains("hint after 6"));
        assert_eq!(outcome.attempts[2].feedback.as_deref(), Some("hint after 6"));
    }

    #[tokio::test]
    async fn test_exhaustion_records_final_attempt() {
        let speaker = Scripted::new("Isabella", &[3, 3, 3, 3]);
        let listener = Scripted::new("Maria", &[]);
        let injector = ContextInjector::new();
        let outcome = TurnController::default()
            .run_turn(request(&speaker, &listener, &injector))
            .await
            .unwrap();
        assert!(!outcome.accepted);
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(outcome.retry_count, 3);
        assert_eq!(outcome.session.phase, TurnPhase::Exhausted);
        assert_eq!(outcome.record.rationale, "scored 3");
        assert!(!outcome.record.accepted);
    }

    #[tokio::test]
    async fn test_surface_form_fixed_across_retries() {
        let speaker = Scripted::new("Isabella", &[1, 2, 9]);
        let listener = Scripted::new("Maria", &[]);
        let injector = ContextInjector::new();
        let outcome = TurnController::default()
            .run_turn(request(&speaker, &listener, &injector))
            .await
            .unwrap();
        let generate_calls = outcome
            .calls
            .iter()
            .filter(|c| c.kind == PromptKind::GenerateChat)
            .count();
        assert_eq!(generate_calls, 1);
        assert_eq!(outcome.utterance.surface_form, "○ ✧ →");
    }

    #[tokio::test]
    async fn test_all_services_failing_degrades() {
        let mut speaker = Scripted::new("Isabella", &[]);
        speaker.fail_generate = true;
        speaker.fail_verify = true;
        let mut listener = Scripted::new("Maria", &[]);
        listener.fail_interpret = true;
        let injector = ContextInjector::new();
        let config = TurnConfig {
            max_retries: 1,
            ..Default::default()
        };
        let outcome = TurnController::new(config)
            .run_turn(request(&speaker, &listener, &injector))
            .await
            .unwrap();
        assert_eq!(outcome.repair, MeaningRepair::Placeholder);
        assert_eq!(outcome.record.reconstructed_meaning, UNINTERPRETED);
        assert_eq!(outcome.record.fidelity_score, FidelityScore::NEUTRAL);
        assert_eq!(outcome.record.match_category, MatchCategory::Unknown);
        assert!(outcome.record.degraded);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.calls.iter().all(|c| !c.succeeded()));
    }

    #[tokio::test]
    async fn test_listener_side_channel_in_context() {
        let speaker = Scripted::new("Isabella", &[9]);
        let listener = Scripted::new("Maria", &[]);
        let mut injector = ContextInjector::new();
        injector.inject_knowledge(&["Maria"], "the festival moved to Friday");
        TurnController::default()
            .run_turn(request(&speaker, &listener, &injector))
            .await
            .unwrap();
        let contexts = listener.seen_contexts.lock().unwrap();
        assert!(contexts[0].starts_with("Hobbs Cafe"));
        assert!(contexts[0].contains("festival moved"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        struct Slow;

        #[async_trait]
        impl Persona for Slow {
            fn name(&self) -> &str {
                "Slow"
            }
            async fn generate_chat(
                &self,
                _request: &GenerateRequest,
            ) -> Result<GeneratedUtterance, ServiceError> {
                tokio::time::sleep(Duration::from_secs(600)).await;
                Ok(GeneratedUtterance::default())
            }
            async fn understand_novlang(
                &self,
                _request: &InterpretRequest,
            ) -> Result<InterpretationResult, ServiceError> {
                Ok(InterpretationResult::default())
            }
            async fn verify_understanding(
                &self,
                _request: &VerifyRequest,
            ) -> Result<VerificationResult, ServiceError> {
                Ok(VerificationResult::failed())
            }
        }

        let controller = TurnController::new(TurnConfig {
            call_timeout_secs: 5,
            ..Default::default()
        });
        let request = GenerateRequest {
            speaker: "Slow".into(),
            audience: Audience::Persona("Maria".into()),
            context: String::new(),
            history: vec![],
            language_rules: None,
        };
        let outcome = controller.generate(&Slow, &request).await;
        assert!(outcome.degraded());
        assert!(outcome.call.failure.unwrap().contains("timed out"));
    }
}
