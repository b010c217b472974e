//! Side-channel context per persona.
//!
//! Holds hidden text (a standing instruction plus accumulated injected
//! knowledge) that is appended to a persona's context before every
//! generation and interpretation call. State is monotonically additive:
//! there is no removal, and repeated injections of the same text are kept.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

const INSTRUCTION_HEADER: &str = "[secret instruction]";
const KNOWLEDGE_HEADER: &str = "[injected knowledge]";

/// Hidden text owned by one persona.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideChannelState {
    pub standing_instruction: Option<String>,
    /// Injections in arrival order.
    pub injected_knowledge: Vec<String>,
}

impl SideChannelState {
    pub fn is_empty(&self) -> bool {
        self.standing_instruction.is_none() && self.injected_knowledge.is_empty()
    }

    /// Instruction first, then knowledge in injection order.
    pub fn render(&self) -> String {
        let mut parts = Vec::new();
        if let Some(instruction) = &self.standing_instruction {
            parts.push(format!("{}: {}", INSTRUCTION_HEADER, instruction));
        }
        for knowledge in &self.injected_knowledge {
            parts.push(format!("{}: {}", KNOWLEDGE_HEADER, knowledge));
        }
        parts.join("\n")
    }
}

/// Owner of every persona's side channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextInjector {
    states: BTreeMap<String, SideChannelState>,
}

impl ContextInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) a persona's standing instruction.
    pub fn set_instruction(&mut self, persona: &str, text: impl Into<String>) {
        self.states
            .entry(persona.to_string())
            .or_default()
            .standing_instruction = Some(text.into());
        info!(persona, "Standing instruction set");
    }

    /// Append knowledge to each listed persona.
    pub fn inject_knowledge<S: AsRef<str>>(&mut self, personas: &[S], text: &str) {
        for persona in personas {
            self.states
                .entry(persona.as_ref().to_string())
                .or_default()
                .injected_knowledge
                .push(text.to_string());
        }
        info!(
            targets = personas.len(),
            chars = text.chars().count(),
            "Knowledge injected"
        );
    }

    /// Rendered side-channel text, or an empty string.
    pub fn get_context(&self, persona: &str) -> String {
        self.states
            .get(persona)
            .map(SideChannelState::render)
            .unwrap_or_default()
    }

    /// `base` followed by the persona's side channel on a new line.
    pub fn with_base(&self, base: &str, persona: &str) -> String {
        let side = self.get_context(persona);
        if side.is_empty() {
            base.to_string()
        } else {
            format!("{}\n{}", base, side)
        }
    }

    pub fn state(&self, persona: &str) -> Option<&SideChannelState> {
        self.states.get(persona)
    }

    /// Personas with any side-channel text.
    pub fn personas(&self) -> impl Iterator<Item = &str> {
        self.states
            .iter()
            .filter(|(_, s)| !s.is_empty())
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_context() {
        let injector = ContextInjector::new();
        assert_eq!(injector.get_context("Maria"), "");
        assert_eq!(injector.with_base("scene", "Maria"), "scene");
    }

    #[test]
    fn test_instruction_then_knowledge() {
        let mut injector = ContextInjector::new();
        injector.inject_knowledge(&["Carmen"], "the bakery closed");
        injector.set_instruction("Carmen", "use the word Skibidi");
        let ctx = injector.get_context("Carmen");
        let instr = ctx.find("Skibidi").unwrap();
        let know = ctx.find("bakery").unwrap();
        assert!(instr < know);
    }

    #[test]
    fn test_instruction_replaced() {
        let mut injector = ContextInjector::new();
        injector.set_instruction("Isabella", "first");
        injector.set_instruction("Isabella", "second");
        let ctx = injector.get_context("Isabella");
        assert!(!ctx.contains("first"));
        assert!(ctx.contains("second"));
    }

    #[test]
    fn test_injection_order_preserved() {
        let mut injector = ContextInjector::new();
        injector.inject_knowledge(&["Maria"], "x");
        injector.inject_knowledge(&["Maria"], "y");
        let ctx = injector.get_context("Maria");
        let x = ctx.find(": x").unwrap();
        let y = ctx.find(": y").unwrap();
        assert!(x < y);
    }

    #[test]
    fn test_duplicate_injection_not_deduplicated() {
        let mut injector = ContextInjector::new();
        injector.inject_knowledge(&["Maria"], "same fact");
        injector.inject_knowledge(&["Maria"], "same fact");
        let ctx = injector.get_context("Maria");
        assert_eq!(ctx.matches("same fact").count(), 2);
        assert_eq!(injector.state("Maria").unwrap().injected_knowledge.len(), 2);
    }

    #[test]
    fn test_injection_targets_only_listed() {
        let mut injector = ContextInjector::new();
        injector.inject_knowledge(&["Isabella", "Maria"], "festival tonight");
        assert!(injector.get_context("Isabella").contains("festival"));
        assert!(injector.get_context("Maria").contains("festival"));
        assert_eq!(injector.get_context("Carmen"), "");
        assert_eq!(injector.personas().count(), 2);
    }

    #[test]
    fn test_with_base_appends() {
        let mut injector = ContextInjector::new();
        injector.set_instruction("Maria", "speak in riddles");
        let ctx = injector.with_base("Location: cafe", "Maria");
        assert!(ctx.starts_with("Location: cafe\n"));
        assert!(ctx.ends_with("speak in riddles"));
    }
}
