//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - simulate: drain a simulated backlog against a rate-limited endpoint
//! - config: print the effective configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use pacer::config::SimulationConfig;

/// Pacer - adaptive scheduling of requests against rate-limited services
#[derive(Parser, Debug)]
#[command(name = "pacer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drain a backlog of jobs against a simulated rate-limited endpoint
    Simulate(SimulateArgs),

    /// Print the effective configuration as YAML
    Config,
}

/// Overrides for the `simulation` section of the config
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SimulateArgs {
    /// Number of jobs in the backlog
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Endpoint budget per 60 second window
    #[arg(long)]
    pub capacity: Option<u64>,

    /// Jobs handed out per round
    #[arg(short, long)]
    pub batch: Option<usize>,

    /// Largest cost of a single job
    #[arg(long)]
    pub max_cost: Option<u64>,

    /// Fraction of calls failing with a transient error (0.0 - 1.0)
    #[arg(long)]
    pub failure_rate: Option<f64>,

    /// Seed for job costs and injected failures
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop after this many pool ticks, counting ticks where no scheduler was ready
    #[arg(long)]
    pub max_ticks: Option<usize>,

    /// Print rounds as JSON instead of text
    #[arg(long)]
    pub json: bool,
}

impl SimulateArgs {
    /// Apply the given flags on top of the configured values.
    pub fn apply(&self, base: &SimulationConfig) -> SimulationConfig {
        SimulationConfig {
            jobs: self.jobs.unwrap_or(base.jobs),
            capacity: self.capacity.unwrap_or(base.capacity),
            batch_size: self.batch.unwrap_or(base.batch_size),
            max_cost: self.max_cost.unwrap_or(base.max_cost),
            failure_rate: self.failure_rate.unwrap_or(base.failure_rate),
            seed: self.seed.unwrap_or(base.seed),
            max_ticks: self.max_ticks.unwrap_or(base.max_ticks),
        }
    }
}
