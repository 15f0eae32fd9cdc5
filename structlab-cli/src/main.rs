//! StructLab CLI: replay and config validation commands.
//!
//! Commands:
//! - `replay` runs a configured replay and prints the per-symbol summary
//! - `check` parses and validates a replay config without touching bar data

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use structlab_core::pipeline::DecisionPipeline;
use structlab_runner::{run_replay, ReplayConfig, ReplayResult};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(
    name = "structlab",
    about = "StructLab CLI: structure-based decision replay engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a replay from a TOML config file.
    Replay {
        /// Path to the replay TOML config.
        #[arg(long)]
        config: PathBuf,

        /// Write the full result as JSON to this file.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Print the full result as JSON to stdout instead of the summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Parse and validate a replay config without touching bar data.
    Check {
        /// Path to the replay TOML config.
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "structlab_core=warn,structlab_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            config,
            output,
            json,
        } => run_replay_cmd(&config, output.as_deref(), json),
        Commands::Check { config } => run_check_cmd(&config),
    }
}

/// Read and parse a replay config, returning it with the directory that
/// relative paths inside the document resolve against.
fn load_config(path: &Path) -> Result<(ReplayConfig, PathBuf)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read config '{}'", path.display()))?;
    let config = ReplayConfig::from_toml(&text)
        .with_context(|| format!("invalid replay config '{}'", path.display()))?;
    let base_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((config, base_dir))
}

fn run_replay_cmd(config_path: &Path, output: Option<&Path>, json: bool) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    info!(
        path = %config_path.display(),
        instruments = config.instruments.len(),
        "loaded replay config"
    );

    let result = run_replay(&config, &base_dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    if let Some(path) = output {
        fs::write(path, serde_json::to_string_pretty(&result)?)
            .with_context(|| format!("cannot write result to '{}'", path.display()))?;
        println!("Result written to: {}", path.display());
    }

    Ok(())
}

fn run_check_cmd(config_path: &Path) -> Result<()> {
    let (config, base_dir) = load_config(config_path)?;
    let core = config.resolve_core(&base_dir)?;
    let pipeline = DecisionPipeline::new(&core);

    println!("Config OK: {}", config_path.display());
    println!();
    println!("Instruments:  {}", config.instruments.len());
    println!("Timeframe:    {}", config.replay.timeframe);
    println!("Warmup bars:  {}", pipeline.warmup_bars());
    println!("Config hash:  {}", core.config_hash().0);
    println!("Run ID:       {}", config.run_id(&core));

    Ok(())
}

fn print_summary(result: &ReplayResult) {
    println!();
    println!("=== Replay Result ===");
    println!("Run ID:       {}", result.run_id);
    println!("Config hash:  {}", result.config_hash);
    println!("Fingerprint:  {}", result.fingerprint);
    println!();
    println!(
        "{:<10} {:>6} {:>7} {:>10} {:>6} {:>6} {:>7} {:>6}",
        "Symbol", "Bars", "Warmup", "Decisions", "Gate", "Exit", "Sizing", "Guard"
    );
    println!("{}", "-".repeat(65));
    for symbol in &result.symbols {
        let stage = |name: &str| symbol.rejections_by_stage.get(name).copied().unwrap_or(0);
        println!(
            "{:<10} {:>6} {:>7} {:>10} {:>6} {:>6} {:>7} {:>6}",
            symbol.symbol,
            symbol.bar_count,
            symbol.warmup_bars,
            symbol.decision_count,
            stage("GATE"),
            stage("EXIT"),
            stage("SIZING"),
            stage("GUARD"),
        );
    }
    println!();
}
