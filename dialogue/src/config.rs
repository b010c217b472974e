//! Experiment configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration describing the standard four-persona experiment.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::chat_client::LlmSettings;
use crate::error::{ExperimentError, ExperimentResult};
use crate::schedule::PairingSchedule;
use crate::turn::TurnConfig;

/// One persona's identity and starting situation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub name: String,
    /// Short self-description included in prompts.
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub location: String,
    /// What the persona is doing, phrased to follow "<name> is".
    #[serde(default)]
    pub activity: String,
}

impl PersonaConfig {
    pub fn new(name: &str, location: &str, activity: &str) -> Self {
        Self {
            name: name.to_string(),
            profile: String::new(),
            location: location.to_string(),
            activity: activity.to_string(),
        }
    }

    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = profile.to_string();
        self
    }

    /// The default four-persona roster.
    pub fn default_roster() -> Vec<Self> {
        vec![
            Self::new("Isabella", "Hobbs Cafe", "preparing the morning coffee")
                .with_profile("Owner of Hobbs Cafe, warm and sociable"),
            Self::new("Maria", "Oak Hill College", "studying in the library")
                .with_profile("Physics student who loves streaming games"),
            Self::new("Carmen", "Harvey Oak Supply Store", "stocking shelves")
                .with_profile("Runs the supply store, practical and direct"),
            Self::new("Tamara", "Moreno family house", "drafting a children's book")
                .with_profile("Children's book author with a vivid imagination"),
        ]
    }
}

/// Simulated clock and shared location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub start_time: NaiveDateTime,
    /// Minutes the clock advances after each round.
    pub round_stride_minutes: u32,
    /// Where group sessions take place.
    pub gathering_place: String,
}

impl Default for SceneConfig {
    fn default() -> Self {
        let start_time = NaiveDate::from_ymd_opt(2024, 2, 13)
            .and_then(|d| d.and_hms_opt(10, 0, 0))
            .unwrap_or_default();
        Self {
            start_time,
            round_stride_minutes: 10,
            gathering_place: "Johnson Park".to_string(),
        }
    }
}

/// One-time knowledge injection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeInjection {
    /// 1-based round number before which the injection fires.
    pub trigger_round: u32,
    pub personas: Vec<String>,
    pub text: String,
}

/// Full experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub name: String,
    /// Experiment folders are created under this directory.
    pub output_root: PathBuf,
    /// Rounds to run in this invocation.
    pub rounds: u32,
    pub turns_per_round: u32,
    /// Run a group session every N rounds; 0 disables.
    pub group_chat_interval: u32,
    /// Flush the log every N rounds; the final round always flushes.
    pub save_interval: u32,
    pub turn: TurnConfig,
    pub scene: SceneConfig,
    pub llm: LlmSettings,
    pub personas: Vec<PersonaConfig>,
    /// Explicit pairing table; defaults to the standard 4-persona schedule.
    pub pairs: Option<Vec<[String; 2]>>,
    /// Standing instructions keyed by persona name.
    pub instructions: BTreeMap<String, String>,
    pub injection: Option<KnowledgeInjection>,
    /// File of surface-language rules shared with every speaker.
    pub language_rules_path: Option<PathBuf>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: "lang-emerge".to_string(),
            output_root: PathBuf::from("results/party_chat"),
            rounds: 100,
            turns_per_round: 5,
            group_chat_interval: 3,
            save_interval: 5,
            turn: TurnConfig::default(),
            scene: SceneConfig::default(),
            llm: LlmSettings::default(),
            personas: PersonaConfig::default_roster(),
            pairs: None,
            instructions: BTreeMap::new(),
            injection: None,
            language_rules_path: None,
        }
    }
}

impl ExperimentConfig {
    /// Folder holding this experiment's records and checkpoints.
    pub fn experiment_dir(&self) -> PathBuf {
        self.output_root.join(&self.name)
    }

    pub fn persona_names(&self) -> Vec<String> {
        self.personas.iter().map(|p| p.name.clone()).collect()
    }

    /// Pairing table for this roster.
    pub fn pairing_schedule(&self) -> ExperimentResult<PairingSchedule> {
        match &self.pairs {
            Some(pairs) => PairingSchedule::from_pairs(
                pairs
                    .iter()
                    .map(|[first, second]| (first.clone(), second.clone()))
                    .collect(),
            ),
            None => PairingSchedule::standard(&self.persona_names()),
        }
    }

    /// Check parameters and persona references.
    pub fn validate(&self) -> ExperimentResult<()> {
        if self.name.trim().is_empty() {
            return Err(ExperimentError::config("experiment name is empty"));
        }
        if self.rounds == 0 {
            return Err(ExperimentError::config("rounds must be at least 1"));
        }
        if self.turns_per_round == 0 {
            return Err(ExperimentError::config("turns_per_round must be at least 1"));
        }
        if self.turn.threshold_score > crate::records::FidelityScore::MAX {
            return Err(ExperimentError::config(format!(
                "threshold_score {} exceeds the maximum score {}",
                self.turn.threshold_score,
                crate::records::FidelityScore::MAX
            )));
        }
        if self.personas.is_empty() {
            return Err(ExperimentError::config("no personas configured"));
        }

        let mut names = HashSet::new();
        for persona in &self.personas {
            if !names.insert(persona.name.as_str()) {
                return Err(ExperimentError::config(format!(
                    "duplicate persona name '{}'",
                    persona.name
                )));
            }
        }

        let schedule = self.pairing_schedule()?;
        for (index, pair) in schedule.pairs().iter().enumerate() {
            for name in [&pair.first, &pair.second] {
                if !names.contains(name.as_str()) {
                    return Err(ExperimentError::unknown_persona(
                        name,
                        &format!("pair {}", index + 1),
                    ));
                }
            }
        }

        for persona in self.instructions.keys() {
            if !names.contains(persona.as_str()) {
                return Err(ExperimentError::unknown_persona(persona, "instructions"));
            }
        }

        if let Some(injection) = &self.injection {
            if injection.trigger_round == 0 {
                return Err(ExperimentError::config(
                    "injection trigger_round is 1-based and must be at least 1",
                ));
            }
            for persona in &injection.personas {
                if !names.contains(persona.as_str()) {
                    return Err(ExperimentError::unknown_persona(persona, "injection"));
                }
            }
        }

        Ok(())
    }
}
