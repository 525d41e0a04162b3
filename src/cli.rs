//! CLI definitions for Sandbridge.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Sandbridge CLI.
#[derive(Parser)]
#[command(name = "sandbridge")]
#[command(about = "Drive sandboxed preview clients over message channels")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (defaults to ~/.sandbridge/config.toml)
    #[arg(short, long, global = true, env = "SANDBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Register the configured sandboxes, run them once and wait for results (default)
    Run {
        /// Seconds to wait for every sandbox to finish
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },

    /// Validate the configuration file
    Check,
}
