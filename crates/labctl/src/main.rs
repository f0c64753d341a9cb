//! Lab Telemetry Analyzer CLI
//!
//! Offline tools for the analyzer: replay archived telemetry through the
//! detectors and inspect the daily alert logs.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{alerts, replay};
use std::path::PathBuf;

/// Lab Telemetry Analyzer CLI
#[derive(Parser)]
#[command(name = "labctl")]
#[command(author, version, about = "CLI for the Lab Telemetry Analyzer", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "table", env = "LABCTL_FORMAT")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run archived telemetry (NDJSON) through the analytics engine
    Replay {
        /// Telemetry files, processed in the given order
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List or summarize a daily alert log
    Alerts {
        /// Alert log file (NDJSON)
        file: PathBuf,

        /// Only alerts of this type (e.g. drift, statistical_anomaly)
        #[arg(long = "type", short = 't')]
        alert_type: Option<String>,

        /// Only alerts for this device
        #[arg(long, short)]
        device: Option<String>,

        /// Print counts per type and per device instead of the alerts
        #[arg(long)]
        summary: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { files } => replay::run(&files, cli.format)?,
        Commands::Alerts {
            file,
            alert_type,
            device,
            summary,
        } => {
            let filter = alerts::AlertFilter { alert_type, device };
            alerts::run(&file, &filter, summary, cli.format)?;
        }
    }

    Ok(())
}
