//! Operator-side wiring for language-emergence experiments: configuration
//! loading, scenario presets and roster construction.

pub mod config;
pub mod scenario;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dialogue::{
    ChatCompletionPersona, ClockedSceneProvider, Experiment, ExperimentConfig, JsonDirStore,
    Persona, Roster,
};

/// HTTP timeout used when the per-call timeout is disabled.
const FALLBACK_HTTP_TIMEOUT: Duration = Duration::from_secs(600);

/// One HTTP-backed persona per configured persona.
pub fn build_roster(config: &ExperimentConfig) -> Result<Roster> {
    let timeout = config.turn.call_timeout().unwrap_or(FALLBACK_HTTP_TIMEOUT);
    let personas = config
        .personas
        .iter()
        .map(|profile| {
            ChatCompletionPersona::new(
                profile.clone(),
                config.llm.clone(),
                config.turn.natural_script,
                timeout,
            )
            .map(|p| Arc::new(p) as Arc<dyn Persona>)
        })
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to build persona clients")?;
    Roster::new(personas).context("Invalid persona roster")
}

/// Open an experiment writing JSON records under its output folder.
pub fn open_experiment(config: &ExperimentConfig, resume: bool) -> Result<Experiment> {
    let roster = build_roster(config)?;
    let scene = ClockedSceneProvider::new(config.personas.clone(), &config.scene);
    let store = JsonDirStore::new(config.experiment_dir());
    Experiment::open(config, roster, Box::new(scene), Box::new(store), resume).context(format!(
        "Failed to open experiment '{}' in {}",
        config.name,
        config.experiment_dir().display()
    ))
}
