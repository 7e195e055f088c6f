//! CLI argument definitions for the `sf` tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Inspect and maintain a simulation job directory.
#[derive(Parser, Debug)]
#[command(name = "sf")]
#[command(author, version, about = "Inspect and maintain simulation experiments", long_about = None)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (", env!("SF_GIT_COMMIT"), " ", env!("SF_BUILD_TIMESTAMP"), ")"
))]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Job directory root. Can also be set via SF_JOB_DIRECTORY.
    #[arg(short = 'd', long = "job-directory", global = true, env = "SF_JOB_DIRECTORY")]
    pub job_directory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the status of a suite, experiment, or simulation by id
    Status {
        /// Entity id
        id: String,
    },

    /// Print the on-disk path of an entity by id
    Path {
        /// Entity id
        id: String,
    },

    /// List experiments in the job directory with their job ids
    Jobs,

    /// Stop the execution container for this job directory
    StopContainer {
        /// Container id
        id: String,
    },

    /// Show the most recently created experiment
    GetLatest,

    /// Roll up per-experiment simulation status counts
    StatusReport,

    /// Remove generated run artifacts, keeping metadata and scripts
    ClearFiles,
}
