//! CLI parse: clap types for deferred-prover. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Deferred prover - lazy, prioritized proof scheduling
#[derive(Parser)]
#[command(name = "deferred-prover")]
#[command(about = "Simulate deferred proof computations, scheduling and prefetching")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run synthetic proof jobs through the scheduler and print its statistics
    Simulate {
        /// Number of jobs to enqueue
        #[arg(long, default_value = "8")]
        jobs: usize,
        /// Make every Nth job fail (0 = never)
        #[arg(long, default_value = "0")]
        fail_every: usize,
        /// Simulated proving time per job in milliseconds
        #[arg(long, default_value = "50")]
        work_ms: u64,
        /// Cycle jobs through low, normal, high and critical priority
        #[arg(long)]
        priority_mix: bool,
        /// Override scheduler.max_concurrent
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
    /// Replay an access pattern through the prefetcher
    Prefetch {
        /// Comma-separated resource ids, e.g. "a,a,b,a"
        #[arg(long)]
        accesses: String,
        /// Override prefetch.likelihood_threshold
        #[arg(long)]
        threshold: Option<f64>,
        /// Simulated proving time per prefetch in milliseconds
        #[arg(long, default_value = "10")]
        work_ms: u64,
    },
    /// Print the effective merged configuration as TOML
    Config {
        /// Validate instead of printing
        #[arg(long)]
        validate: bool,
    },
}
