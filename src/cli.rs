use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::bridge::LogHooks;
use crate::clock::SystemClock;
use crate::config::{StripcastConfig, UUID_ENV};
use crate::controller::{ControllerClient, HttpTransport};
use crate::dispatch::{PlaybackMode, PlaybackReport, Player};
use crate::export::ScenarioExport;
use crate::recorder::record_script;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device identifier (overrides config and STRIPCAST_UUID)
    #[arg(long)]
    uuid: Option<String>,

    /// Controller API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// LEDs per strip
    #[arg(long)]
    capacity: Option<u32>,

    /// Record without waiting out waitForSeconds in real time
    #[arg(long)]
    no_preview_waits: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script and play it on the controller
    Run {
        /// Rhai script file
        script: PathBuf,

        /// Send each LED as it is set instead of the compressed scenario
        #[arg(long)]
        explain: bool,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Record a script and print its compressed scenario (no network)
    Record {
        script: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Record a script and write the scenario export document
    Export {
        script: PathBuf,

        /// Output JSON file
        #[arg(long)]
        out: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Clear every lighting request on the controller
    Reset {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { script, explain, config } => {
            let config = load_config(&config)?;
            let mode = if explain { PlaybackMode::Step } else { PlaybackMode::FullRun };
            play(&script, &config, mode)?;
        }
        Commands::Record { script, config } => {
            let config = load_config(&config)?;
            let source = read_script(&script)?;
            let export = record_export(&source, &config)?;
            println!("{}", export.to_json()?);
        }
        Commands::Export { script, out, config } => {
            let config = load_config(&config)?;
            let source = read_script(&script)?;
            let export = record_export(&source, &config)?;
            export.save(&out).map_err(anyhow::Error::msg)?;
            println!("Wrote {} blocks in {} iterations to {:?}", export.block_count(), export.iterations.len(), out);
        }
        Commands::Reset { config } => {
            let config = load_config(&config)?;
            let mut player = player(&config)?;
            player.reset_controller()?;
            println!("Controller reset.");
        }
    }
    Ok(())
}

/// Config file (or defaults), then the environment, then flags.
fn load_config(args: &ConfigArgs) -> Result<StripcastConfig> {
    let mut config = match &args.config {
        Some(path) => StripcastConfig::from_file(path)?,
        None => StripcastConfig::default(),
    };

    if let Ok(uuid) = std::env::var(UUID_ENV) {
        if !uuid.trim().is_empty() {
            config.uuid = Some(uuid);
        }
    }
    if let Some(uuid) = &args.uuid {
        config.uuid = Some(uuid.clone());
    }
    if let Some(base_url) = &args.base_url {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(capacity) = args.capacity {
        config.strip_capacity = capacity;
    }
    if args.no_preview_waits {
        config.preview_waits = false;
    }

    config.validate()?;
    Ok(config)
}

fn read_script(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read script {:?}", path))
}

fn player(config: &StripcastConfig) -> Result<Player> {
    let transport = Arc::new(HttpTransport::new(config.base_url.clone()));
    let controller = ControllerClient::new(transport, config.require_uuid()?);
    Ok(Player::new(
        config,
        controller,
        Arc::new(SystemClock),
        Box::new(LogHooks::default()),
    ))
}

fn record_export(source: &str, config: &StripcastConfig) -> Result<ScenarioExport> {
    let recording = record_script(source, config, Arc::new(SystemClock))?;
    Ok(ScenarioExport::new(source, &recording.scenario, config.strip_capacity))
}

fn play(script: &Path, config: &StripcastConfig, mode: PlaybackMode) -> Result<()> {
    let source = read_script(script)?;
    let mut player = player(config)?;

    println!("Playing {:?} ({:?})...", script, mode);
    let report = match player.play(&source, mode) {
        Ok(report) => report,
        Err(err) => {
            for failed in err.failed_batches() {
                println!("  not delivered: {} ({} commands): {}", failed.iteration, failed.commands.len(), failed.error);
            }
            return Err(err.into());
        }
    };
    print_report(&report);

    if report.is_complete() {
        return Ok(());
    }

    println!("Retrying {} failed batches...", report.failed.len());
    let still_failing = player.retry(&report.failed);
    if let Some(first) = still_failing.first() {
        bail!(
            "{} batches could not be delivered (first: {} {})",
            still_failing.len(),
            first.iteration,
            first.error
        );
    }
    println!("Done.");
    Ok(())
}

fn print_report(report: &PlaybackReport) {
    println!(
        "{} iterations, {} batches, {} commands sent",
        report.iterations_sent, report.batches_sent, report.commands_sent
    );
    for failed in &report.failed {
        println!(
            "  failed: {} {} ({} commands): {}",
            failed.iteration,
            failed
                .strip
                .as_ref()
                .map(|s| s.as_str())
                .unwrap_or("-"),
            failed.commands.len(),
            failed.error
        );
    }
}
