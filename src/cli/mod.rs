//! CLI command implementations

pub mod checkpoint;
pub mod error;
pub mod run;

pub use checkpoint::{ResetCommand, StatusCommand};
pub use error::CliError;
pub use run::RunCommand;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::str::FromStr;

/// Index backfill CLI
#[derive(Parser, Debug)]
#[command(name = "index-backfill")]
#[command(
    about = "Resumable backfill of timestamp fields from Postgres into a Typesense index",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Serve Prometheus metrics on this address, e.g. 0.0.0.0:9090
    #[arg(long, global = true, env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run (or resume) a backfill job
    Run(RunCommand),

    /// Show the stored checkpoint of a job
    Status(StatusCommand),

    /// Delete the stored checkpoint so the next run starts over
    Reset(ResetCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
