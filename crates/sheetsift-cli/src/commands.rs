use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sheetsift")]
#[command(about = "Batch spreadsheet-archive extraction and conflict triage", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the full pipeline over the given archives (or configured paths)
    Process {
        /// Zip archives to process; falls back to configured archive_paths
        archives: Vec<PathBuf>,

        /// Write a per-archive CSV report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Resolve conflicts at or above this confidence as AUTO_FIXED
        #[arg(long)]
        auto_fix: Option<f64>,
    },
    /// Open archives and list matching documents without extracting
    Assess {
        archives: Vec<PathBuf>,
    },
    /// Print configuration values
    PrintConfig,
}
