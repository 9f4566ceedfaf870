//! CLI entry point for rust-acq
//!
//! # Usage
//!
//! Run an acquisition on the simulated microscope:
//! ```bash
//! rust_acq run config/acquisition.toml
//! ```
//!
//! Print the event stream without touching hardware:
//! ```bash
//! rust_acq plan config/acquisition.toml --sequenced --limit 20
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_acq::config::AppConfig;
use rust_acq::runner;
use rust_acq::tracing_setup::{self, OutputFormat, TracingConfig};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "rust_acq")]
#[command(about = "Microscope acquisition engine with a simulated microscope", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pretty, global = true)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured acquisition; Ctrl-C aborts it
    Run {
        /// Path to the TOML configuration
        config: PathBuf,
    },

    /// Print the events the acquisition would execute, one JSON object per line
    Plan {
        /// Path to the TOML configuration
        config: PathBuf,

        /// Merge events into hardware sequences as the engine would
        #[arg(long)]
        sequenced: bool,

        /// Stop after this many events (time-lapses may be endless)
        #[arg(long, default_value = "1000")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match &cli.command {
        Commands::Run { config } | Commands::Plan { config, .. } => config.clone(),
    };
    let config = AppConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    tracing_setup::init(TracingConfig::from_app_config(&config)?.with_format(cli.log_format))?;

    match cli.command {
        Commands::Run { .. } => run(config).await,
        Commands::Plan {
            sequenced, limit, ..
        } => plan(&config, sequenced, limit),
    }
}

async fn run(config: AppConfig) -> Result<()> {
    let (stop_tx, stop) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop_tx.send(true);
        }
    });

    let report = runner::run(&config, stop).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn plan(config: &AppConfig, sequenced: bool, limit: usize) -> Result<()> {
    let events = runner::plan(config, sequenced, limit)?;
    for event in &events {
        println!("{}", serde_json::to_string(event)?);
    }
    let images: usize = events.iter().map(|e| e.num_elements()).sum();
    eprintln!("{} hardware calls, {} images", events.len(), images);
    Ok(())
}
