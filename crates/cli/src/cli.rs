//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// logport - output stage of a log forwarding pipeline
#[derive(Parser, Debug)]
#[command(
    name = "logport",
    author,
    version,
    about = "Fan log records out to files and PostgreSQL",
    long_about = "Output stage of a log forwarding pipeline.\n\n\
                  Reads record sets as JSON lines, fans every batch out to the \n\
                  configured sinks (files, PostgreSQL) and reports delivery statistics."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "LOGPORT_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "LOGPORT_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the output stage
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "logport.toml",
        env = "LOGPORT_CONFIG"
    )]
    pub config: PathBuf,

    /// JSON-lines input, one record set (or array of record sets) per line; `-` reads stdin
    #[arg(short, long, default_value = "-", env = "LOGPORT_INPUT")]
    pub input: String,

    /// Stop after this many seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "LOGPORT_TIMEOUT")]
    pub timeout: u64,

    /// Replace PostgreSQL with an in-memory database
    #[arg(long)]
    pub dry_run: bool,

    /// Override pipeline.input_capacity from configuration
    #[arg(long, env = "LOGPORT_BUFFER_SIZE")]
    pub buffer_size: Option<usize>,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "LOGPORT_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "logport.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "logport.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show sink attributes
    #[arg(long)]
    pub sinks: bool,

    /// Print the effective configuration with defaults filled in (TOML, or JSON with --json)
    #[arg(long)]
    pub resolved: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
