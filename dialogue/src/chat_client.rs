//! OpenAI-compatible chat-completions persona.
//!
//! Works against any server exposing `POST {base_url}/chat/completions`
//! (Ollama, llama.cpp, vLLM, hosted APIs). Replies are expected to contain
//! one JSON object; reasoning blocks, code fences and surrounding prose are
//! tolerated.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::PersonaConfig;
use crate::error::{ExperimentError, ExperimentResult};
use crate::persona::{
    GenerateRequest, GeneratedUtterance, InterpretRequest, Persona, PromptKind, ServiceError,
    VerifyRequest,
};
use crate::prompts::{self, Prompt};
use crate::records::{FidelityScore, InterpretationResult, MatchCategory, VerificationResult};
use crate::script::NaturalScript;

static THINK_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<think>.*?</think>").expect("THINK_BLOCK_RE regex should compile")
});

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("CODE_FENCE_RE regex should compile")
});

static INTEGER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+").expect("INTEGER_RE regex should compile"));

/// Completion endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Base URL including the API version segment, e.g. `http://host:11434/v1`.
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: std::env::var("EMERGENCE_LLM_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434/v1".into()),
            model: std::env::var("EMERGENCE_LLM_MODEL")
                .unwrap_or_else(|_| "qwen3:8b-q4_K_M".into()),
            api_key: std::env::var("EMERGENCE_LLM_API_KEY").ok(),
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

impl LlmSettings {
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Persona backed by a chat-completions endpoint.
pub struct ChatCompletionPersona {
    profile: PersonaConfig,
    settings: LlmSettings,
    script: NaturalScript,
    client: reqwest::Client,
}

impl ChatCompletionPersona {
    pub fn new(
        profile: PersonaConfig,
        settings: LlmSettings,
        script: NaturalScript,
        timeout: Duration,
    ) -> ExperimentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExperimentError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            profile,
            settings,
            script,
            client,
        })
    }

    async fn complete(&self, kind: PromptKind, prompt: Prompt) -> Result<String, ServiceError> {
        let start = Instant::now();
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
            "temperature": self.settings.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = self.settings.max_tokens {
            body["max_tokens"] = Value::from(max_tokens);
        }

        let mut request = self.client.post(self.settings.completions_url()).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ServiceError::Timeout {
                    kind,
                    seconds: start.elapsed().as_secs(),
                }
            } else {
                ServiceError::request_failed(kind, e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(ServiceError::request_failed(
                kind,
                format!("HTTP {}: {}", status, snippet),
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::parse(kind, e.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::parse(kind, "response has no choices"))?;

        debug!(
            persona = %self.profile.name,
            kind = %kind,
            chars = content.chars().count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Completion received"
        );
        Ok(content)
    }

    async fn complete_json(
        &self,
        kind: PromptKind,
        prompt: Prompt,
    ) -> Result<Map<String, Value>, ServiceError> {
        let content = self.complete(kind, prompt).await?;
        extract_json_object(&content)
            .ok_or_else(|| ServiceError::parse(kind, "no JSON object in reply"))
    }
}

#[async_trait]
impl Persona for ChatCompletionPersona {
    fn name(&self) -> &str {
        &self.profile.name
    }

    async fn generate_chat(
        &self,
        request: &GenerateRequest,
    ) -> Result<GeneratedUtterance, ServiceError> {
        let prompt = prompts::generate_chat(&self.profile, self.script, request);
        let object = self.complete_json(PromptKind::GenerateChat, prompt).await?;
        Ok(parse_generated(&object))
    }

    async fn understand_novlang(
        &self,
        request: &InterpretRequest,
    ) -> Result<InterpretationResult, ServiceError> {
        let prompt = prompts::understand_novlang(&self.profile, self.script, request);
        let object = self
            .complete_json(PromptKind::UnderstandNovlang, prompt)
            .await?;
        Ok(parse_interpretation(&object))
    }

    async fn verify_understanding(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerificationResult, ServiceError> {
        let prompt = prompts::verify_understanding(&self.profile, request);
        let object = self
            .complete_json(PromptKind::VerifyUnderstanding, prompt)
            .await?;
        parse_verification(&object)
    }
}

fn as_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Find the JSON object in a model reply.
///
/// Tries the whole reply, then a fenced block, then the span from the first
/// `{` to the last `}`.
pub fn extract_json_object(reply: &str) -> Option<Map<String, Value>> {
    let cleaned = THINK_BLOCK_RE.replace_all(reply, "");
    let cleaned = cleaned.trim();

    if let Some(map) = as_object(cleaned) {
        return Some(map);
    }

    if let Some(map) = CODE_FENCE_RE
        .captures(cleaned)
        .and_then(|c| c.get(1))
        .and_then(|m| as_object(m.as_str()))
    {
        return Some(map);
    }

    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    as_object(&cleaned[start..=end])
}

/// First present field among `aliases`, as text. Missing fields are empty.
fn text_field(object: &Map<String, Value>, aliases: &[&str]) -> String {
    aliases
        .iter()
        .find_map(|key| object.get(*key))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .unwrap_or_default()
}

/// Integer score from a number or from the first integer in a string.
pub fn parse_score(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => INTEGER_RE.find(s).and_then(|m| m.as_str().parse().ok()),
        _ => None,
    }
}

fn parse_generated(object: &Map<String, Value>) -> GeneratedUtterance {
    GeneratedUtterance {
        surface_form: text_field(object, &["surface_form", "novlang"]),
        intended_meaning: text_field(object, &["intended_meaning", "chinese", "meaning"]),
        scene_observation: text_field(object, &["scene_observation"]),
        reasoning_trace: text_field(object, &["thinking", "reasoning_trace", "thought"]),
    }
}

fn parse_interpretation(object: &Map<String, Value>) -> InterpretationResult {
    InterpretationResult {
        reconstructed_meaning: text_field(
            object,
            &["reconstructed_meaning", "my_understanding", "understanding"],
        ),
        symbol_analysis: text_field(object, &["symbol_analysis"]),
        context_clues: text_field(object, &["context_clues"]),
    }
}

fn parse_verification(object: &Map<String, Value>) -> Result<VerificationResult, ServiceError> {
    let score = ["fidelity_score", "overall_score", "score"]
        .iter()
        .find_map(|key| object.get(*key))
        .and_then(parse_score)
        .ok_or_else(|| ServiceError::parse(PromptKind::VerifyUnderstanding, "missing score"))?;

    Ok(VerificationResult {
        match_category: MatchCategory::from_label(&text_field(
            object,
            &["match_category", "semantic_match"],
        )),
        fidelity_score: FidelityScore::new(score),
        rationale: text_field(object, &["rationale", "analysis"]),
        corrective_suggestion: text_field(object, &["corrective_suggestion", "suggestion"]),
    })
}
