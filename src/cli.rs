use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flowsentry::config::Config;
use flowsentry::model::SoftmaxModel;
use flowsentry::pipeline::source::{CsvReplaySource, JsonLinesSource};
use flowsentry::pipeline::{Mode, PipelineEngine};
use flowsentry::report::batch::BatchReporter;
use flowsentry::report::live::LiveReporter;
use flowsentry::report::SessionTotals;

#[derive(Parser)]
#[command(name = "flowsentry")]
#[command(author, version, about = "Streaming network-flow classification pipeline")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify a live flow stream (JSON lines) until Ctrl-C
    Live {
        /// Flow stream file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Report directory (overrides the configured one)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replay a recorded flow set (CICFlowMeter CSV) and score it
    Batch {
        /// Recorded flow set to replay
        flows: PathBuf,

        /// Report directory (overrides the configured one)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate default configuration file
    GenConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Log filtering: `--debug` wins, then `RUST_LOG`, then info.
pub fn init_tracing(debug: bool) {
    let filter = match debug {
        true => EnvFilter::new("debug"),
        false => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    match cli.command {
        Commands::Live { input, output } => cmd_live(config, input, output).await,
        Commands::Batch { flows, output } => cmd_batch(config, flows, output),
        Commands::GenConfig { output } => cmd_gen_config(config, output),
    }
}

fn load_model(config: &Config) -> Result<SoftmaxModel> {
    SoftmaxModel::load(&config.model.path)
        .with_context(|| format!("Failed to load model {}", config.model.path.display()))
}

async fn cmd_live(config: Config, input: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let model = load_model(&config)?;
    let output_dir = output.unwrap_or_else(|| config.general.output_dir.clone());
    let sink = LiveReporter::new(&output_dir, &config.report)?;

    let engine = PipelineEngine::new(config);
    let stop = engine.stop_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nShutting down...");
            stop.store(true, Ordering::Relaxed);
        }
    });

    println!(
        "Watching live flow stream, reports under {}",
        output_dir.display().to_string().bold()
    );

    // The pipeline is synchronous; keep it off the signal-handling runtime.
    let totals = tokio::task::spawn_blocking(move || match input {
        Some(path) => {
            let reader = std::io::BufReader::new(
                std::fs::File::open(&path)
                    .with_context(|| format!("Failed to open flow stream {}", path.display()))?,
            );
            engine.run(
                Mode::Live,
                Box::new(JsonLinesSource::spawn(reader)),
                Box::new(sink),
                Box::new(model),
            )
        }
        None => engine.run(
            Mode::Live,
            Box::new(JsonLinesSource::stdin()),
            Box::new(sink),
            Box::new(model),
        ),
    })
    .await??;

    print_totals(&totals);
    Ok(())
}

fn cmd_batch(config: Config, flows: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let model = load_model(&config)?;
    let output_dir = output.unwrap_or_else(|| config.general.output_dir.clone());
    let sink = BatchReporter::new(&output_dir)?;
    let results = sink.results_path();
    let summary = sink.summary_path();

    let engine = PipelineEngine::new(config);
    let totals = engine.run(
        Mode::Batch,
        Box::new(CsvReplaySource::open(&flows)?),
        Box::new(sink),
        Box::new(model),
    )?;

    print_totals(&totals);
    println!("Results: {}", results.display());
    println!("Summary: {}", summary.display());
    Ok(())
}

fn cmd_gen_config(config: Config, output: Option<PathBuf>) -> Result<()> {
    let rendered = toml::to_string_pretty(&config)?;
    match output {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Configuration written to {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

fn print_totals(totals: &SessionTotals) {
    println!(
        "Processed {} flows: {} threat, {} suspicious, {} clean",
        totals.total.to_string().bold(),
        totals.red.to_string().red(),
        totals.yellow.to_string().yellow(),
        totals.green.to_string().green()
    );
    if let Some(display) = totals.accuracy_display() {
        println!("Accuracy over labeled flows: {}", display.bold());
    }
}
