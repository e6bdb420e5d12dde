use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use uuid::Uuid;

use aegis_common::ScanKind;

#[derive(Parser)]
#[command(name = "aegis")]
#[command(version)]
#[command(about = "Security scan orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML). Defaults to ./aegis.toml when present
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a scan on every enabled backend
    Scan {
        /// URL, hostname, cloud account id / ARN, or project directory
        #[arg(short = 't', long, required = true)]
        target: String,

        /// Only run backends of this kind: web, cloud, dependency
        #[arg(short, long)]
        kind: Option<ScanKind>,

        /// Poll until the scan reaches a terminal state and print its results
        #[arg(short, long)]
        wait: bool,

        /// Poll interval in milliseconds when waiting
        #[arg(long, default_value = "1000")]
        poll_interval: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output_format: OutputFormat,
    },

    /// Aggregated status of a scan
    Status {
        scan_id: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output_format: OutputFormat,
    },

    /// Aggregated findings of a scan
    Results {
        scan_id: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output_format: OutputFormat,
    },

    /// Every recorded scan, most recent first
    History {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output_format: OutputFormat,
    },

    /// Manage recurring scans
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Re-arm persisted schedules and run them until interrupted
    Daemon,
}

#[derive(Subcommand)]
pub enum ScheduleAction {
    /// Add a recurring scan. Example: --cron "@daily" or --cron "30 2 * * 1-5"
    Add {
        #[arg(short = 't', long, required = true)]
        target: String,

        /// Only run backends of this kind on each firing
        #[arg(short, long)]
        kind: Option<ScanKind>,

        #[arg(long, required = true)]
        cron: String,
    },

    List {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output_format: OutputFormat,
    },

    Remove { id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
