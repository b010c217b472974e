use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use dialogue::ExperimentConfig;
use std::path::{Path, PathBuf};

/// Load an experiment configuration from a TOML file.
///
/// Missing fields take their defaults; without a path the defaults are used
/// as-is. Endpoint settings not given in the file come from the
/// `EMERGENCE_LLM_*` environment variables.
pub fn load(path: Option<&Path>) -> Result<ExperimentConfig> {
    let Some(path) = path else {
        return Ok(ExperimentConfig::default());
    };
    let content =
        std::fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    parse(&content).context(format!("Failed to parse experiment config {}", path.display()))
}

/// Parse a TOML configuration document.
pub fn parse(content: &str) -> Result<ExperimentConfig> {
    let config: ExperimentConfig = toml::from_str(content)?;
    Ok(config)
}

/// Format of `--start-time`, e.g. `20240213-10:00`.
pub const START_TIME_FORMAT: &str = "%Y%m%d-%H:%M";

/// Parse a simulated start time, in `START_TIME_FORMAT` or ISO 8601.
pub fn parse_start_time(value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, START_TIME_FORMAT)
        .or_else(|_| value.parse::<NaiveDateTime>())
        .map_err(|e| format!("invalid start time '{}' (expected YYYYMMDD-HH:MM): {}", value, e))
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub name: Option<String>,
    pub rounds: Option<u32>,
    pub turns: Option<u32>,
    pub rules_file: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
    pub start_time: Option<NaiveDateTime>,
}

impl Overrides {
    pub fn apply(&self, config: &mut ExperimentConfig) {
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(rounds) = self.rounds {
            config.rounds = rounds;
        }
        if let Some(turns) = self.turns {
            config.turns_per_round = turns;
        }
        if let Some(path) = &self.rules_file {
            config.language_rules_path = Some(path.clone());
        }
        if let Some(root) = &self.output_root {
            config.output_root = root.clone();
        }
        if let Some(start) = self.start_time {
            config.scene.start_time = start;
        }
    }
}
