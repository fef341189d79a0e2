//! CLI definitions for jobhive.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// jobhive admin CLI.
#[derive(Parser)]
#[command(name = "jobhive")]
#[command(about = "Inspect and manage jobhive background jobs")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "JOBHIVE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Table, global = true)]
    pub format: Format,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum Format {
    Table,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Validate the configuration and exit
    CheckConfig,

    /// Show global counters
    Stats,

    /// List queues with their head jobs
    Queues,

    /// List announced servers
    Servers,

    /// List jobs in flight
    Processing,

    /// List scheduled jobs
    Scheduled,

    /// List failed jobs, newest first
    Failed,

    /// List recently succeeded jobs
    Succeeded,

    /// Show daily or hourly outcome counts
    Timeline {
        /// Per hour instead of per day
        #[arg(long)]
        hourly: bool,
    },

    /// Show every field of a job
    Job {
        /// Job id
        id: String,
    },

    /// Requeue a failed job
    Retry {
        /// Job id
        id: String,
    },

    /// Drop a failed job
    Discard {
        /// Job id
        id: String,
    },

    /// Enqueue a scheduled job now
    Promote {
        /// Job id
        id: String,
    },
}
