//! Language-emergence experiment runner
//!
//! Runs four simulated personas through alternating pair rounds and
//! periodic group sessions, logging every utterance and comprehension score.
//!
//! # Usage
//!
//! ```bash
//! # Default 100-round experiment against a local endpoint
//! emergence-runner --name lang-emerge
//!
//! # Continue after the latest checkpoint for 20 more rounds
//! emergence-runner --name lang-emerge --resume --rounds 20
//!
//! # Scripted preset with a custom endpoint
//! EMERGENCE_LLM_URL=http://10.0.0.31:8000/v1 emergence-runner --scenario encrypted-chat
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use emergence_runner::config::{self, Overrides};
use emergence_runner::open_experiment;
use emergence_runner::scenario::Scenario;
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML experiment configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Experiment name (also the output folder name)
    #[arg(long)]
    name: Option<String>,

    /// Rounds to run in this invocation
    #[arg(long)]
    rounds: Option<u32>,

    /// Turns per pair round and group session
    #[arg(long)]
    turns: Option<u32>,

    /// Continue after the latest checkpoint
    #[arg(long, default_value_t = false)]
    resume: bool,

    /// Shared surface-language rules added to every generation prompt
    #[arg(long)]
    rules_file: Option<PathBuf>,

    /// Folder experiment folders are created under
    #[arg(long)]
    output_root: Option<PathBuf>,

    /// Simulated start time, e.g. 20240213-10:00
    #[arg(long, value_parser = config::parse_start_time)]
    start_time: Option<chrono::NaiveDateTime>,

    /// Scripted preset layered on the configuration
    #[arg(long, value_enum)]
    scenario: Option<Scenario>,

    /// Log more (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn default_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level(args.verbose).into()),
        )
        .init();

    let mut config = config::load(args.config.as_deref())?;
    if let Some(scenario) = args.scenario {
        scenario.apply(&mut config)?;
        info!(?scenario, "Scenario applied");
    }
    Overrides {
        name: args.name,
        rounds: args.rounds,
        turns: args.turns,
        rules_file: args.rules_file,
        output_root: args.output_root,
        start_time: args.start_time,
    }
    .apply(&mut config);

    info!(
        name = %config.name,
        endpoint = %config.llm.base_url,
        model = %config.llm.model,
        rounds = config.rounds,
        turns = config.turns_per_round,
        start_time = %config.scene.start_time,
        resume = args.resume,
        "Language emergence experiment starting"
    );

    let mut experiment = open_experiment(&config, args.resume)?;
    let summary = experiment.run().await?;

    info!(
        rounds = summary.rounds_completed,
        final_round = summary.final_round,
        group_sessions = summary.group_sessions,
        stats = %summary.stats,
        "Run complete"
    );
    for health in &summary.health {
        info!(
            kind = %health.kind,
            calls = health.total_calls,
            failures = health.total_failures,
            level = ?health.level,
            "  service"
        );
    }
    info!(dir = %config.experiment_dir().display(), "Records written");

    Ok(())
}
