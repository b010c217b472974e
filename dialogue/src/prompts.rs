//! Prompt builders for the three completion kinds.
//!
//! Each builder returns a `(system, user)` pair. Replies are requested as a
//! single JSON object; see [`crate::chat_client`] for the parsing side.

use crate::config::PersonaConfig;
use crate::persona::{GenerateRequest, InterpretRequest, VerifyRequest};
use crate::records::Utterance;
use crate::script::NaturalScript;

/// A built prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Name of the language the intended-meaning channel is written in.
pub fn meaning_language(script: NaturalScript) -> &'static str {
    match script {
        NaturalScript::Han => "Chinese",
        NaturalScript::Latin => "English",
        NaturalScript::Cyrillic => "Russian",
        NaturalScript::Kana => "Japanese",
        NaturalScript::Hangul => "Korean",
    }
}

fn persona_intro(persona: &PersonaConfig) -> String {
    if persona.profile.is_empty() {
        format!("You are {}.", persona.name)
    } else {
        format!("You are {}. {}", persona.name, persona.profile)
    }
}

/// Prior utterances as numbered lines, or a marker for an empty history.
pub fn format_history(history: &[Utterance]) -> String {
    if history.is_empty() {
        return "[the conversation has not started yet]".to_string();
    }
    history
        .iter()
        .enumerate()
        .map(|(i, u)| {
            format!(
                "[{}] {} says: {}\n    meaning: {}",
                i + 1,
                u.speaker,
                u.surface_form,
                u.intended_meaning
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn generate_chat(
    persona: &PersonaConfig,
    script: NaturalScript,
    request: &GenerateRequest,
) -> Prompt {
    let language = meaning_language(script);
    let mut system = format!(
        "{}\nYou communicate only through a compact symbolic language that you and the \
         others are inventing together. Say what you actually want to say in {language}, \
         then express it using symbols, numbers and punctuation only. Never write {language} \
         words in the symbolic form.",
        persona_intro(persona)
    );
    if let Some(rules) = request.language_rules.as_deref().filter(|r| !r.trim().is_empty()) {
        system.push_str("\n\n## Shared language rules\n");
        system.push_str(rules);
    }

    let user = format!(
        "## Scene\n{context}\n\n## Conversation so far\n{history}\n\n\
         You are speaking to {audience}. Reply with one JSON object:\n\
         {{\n  \"scene_observation\": \"what you notice around you\",\n  \
         \"thinking\": \"why you say this\",\n  \
         \"intended_meaning\": \"what you mean, in {language}\",\n  \
         \"surface_form\": \"the symbolic utterance\"\n}}",
        context = request.context,
        history = format_history(&request.history),
        audience = request.audience,
        language = language,
    );

    Prompt { system, user }
}

pub fn understand_novlang(
    persona: &PersonaConfig,
    script: NaturalScript,
    request: &InterpretRequest,
) -> Prompt {
    let language = meaning_language(script);
    let system = format!(
        "{}\nOthers talk to you in a symbolic language that is still being invented. \
         Work out what they mean from the symbols, the scene and the conversation so far.",
        persona_intro(persona)
    );
    let user = format!(
        "## Scene\n{context}\n\n## Conversation so far\n{history}\n\n\
         {speaker} just said to you: {surface}\n\n\
         Reply with one JSON object:\n\
         {{\n  \"symbol_analysis\": \"what each symbol seems to stand for\",\n  \
         \"context_clues\": \"what in the scene or history helped\",\n  \
         \"reconstructed_meaning\": \"what {speaker} meant, in {language}\"\n}}",
        context = request.context,
        history = format_history(&request.history),
        speaker = request.speaker,
        surface = request.surface_form,
        language = language,
    );
    Prompt { system, user }
}

pub fn verify_understanding(persona: &PersonaConfig, request: &VerifyRequest) -> Prompt {
    let system = format!(
        "{}\nYou said something in the symbolic language and now judge how well the \
         listener understood you. Be strict: only a faithful reconstruction deserves 7 or more.",
        persona_intro(persona)
    );
    let user = format!(
        "What you meant: {intended}\nWhat you said: {surface}\n\
         What {listener} understood: {understood}\n\n\
         Reply with one JSON object:\n\
         {{\n  \"match_category\": \"exact | partial | mismatch\",\n  \
         \"fidelity_score\": 0-10,\n  \
         \"rationale\": \"why you gave this score\",\n  \
         \"corrective_suggestion\": \"a hint that would help {listener} understand\"\n}}",
        intended = request.intended_meaning,
        surface = request.surface_form,
        listener = request.listener,
        understood = request.reconstructed_meaning,
    );
    Prompt { system, user }
}
