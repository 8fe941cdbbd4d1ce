use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::cache::ValidationContext;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only show failures
    Quiet,
    /// Show the summary
    #[default]
    Normal,
    /// Show every non-valid file with its diagnostics
    Verbose,
}

impl VerbosityLevel {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            VerbosityLevel::Quiet
        } else if verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Default `tracing` filter directive for this verbosity
    pub fn log_directive(&self) -> &'static str {
        match self {
            VerbosityLevel::Quiet => "error",
            VerbosityLevel::Normal => "warn",
            VerbosityLevel::Verbose => "debug",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

/// Validate AS4 messages against the ebMS 3.0 schemas and the receipt profile rules
#[derive(Parser, Debug, Clone)]
#[command(name = "as4-validate")]
#[command(about = "Validate AS4 messages and non-repudiation receipts")]
#[command(version)]
pub struct Cli {
    /// Path to scan for messages (directory or file)
    #[arg(help = "Directory or file to validate")]
    pub path: PathBuf,

    /// Directory holding the schema resources (w3/, ebxml/, ...)
    #[arg(long = "schema-dir")]
    pub schema_dir: Option<PathBuf>,

    /// Schema group for whole-document validation
    #[arg(long = "context", value_enum)]
    pub context: Option<ValidationContext>,

    /// Run the receipt check (header schema plus conformance rules) instead
    #[arg(long = "receipt")]
    pub receipt: bool,

    /// Outcome mode: disabled, advisory or enforcing
    #[arg(long = "mode")]
    pub mode: Option<String>,

    /// File extensions to process (comma-separated)
    #[arg(
        short = 'e',
        long = "extensions",
        help = "File extensions to process (e.g., 'xml,soap')"
    )]
    pub extensions: Option<String>,

    /// Number of concurrent validation tasks
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Per-file timeout in seconds
    #[arg(long = "timeout")]
    pub timeout: Option<u64>,

    #[arg(long = "format", value_enum)]
    pub format: Option<OutputFormat>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,

    /// Enable quiet mode (failures only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose"
    )]
    pub quiet: bool,

    /// Configuration file (TOML or JSON)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn get_extensions(&self) -> Option<Vec<String>> {
        self.extensions.as_ref().map(|extensions| {
            extensions
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.path.exists() {
            return Err(format!("Path does not exist: {}", self.path.display()));
        }
        if let Some(threads) = self.threads
            && threads == 0
        {
            return Err("Number of threads must be greater than 0".to_string());
        }
        if self.receipt && self.context.is_some() {
            return Err("--receipt always validates against the nrr-receipt schemas; drop --context".to_string());
        }
        Ok(())
    }
}
