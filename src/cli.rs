//! Command-line interface definitions for modlink.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Kernel module link driver.
#[derive(Parser)]
#[command(name = "modlink", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the modules.toml manifest (default: search upwards from
    /// the current directory).
    #[arg(long, short = 'm', global = true)]
    pub manifest: Option<PathBuf>,

    /// Force relink, bypassing all cache checks.
    #[arg(long, short = 'f', global = true)]
    pub force: bool,

    /// Suppress per-module output; show only errors and the final summary.
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Enable verbose output with stale reasons and timings.
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Maximum number of parallel workers (0 or omitted = auto-detect from CPU count).
    #[arg(long, short = 'j', global = true)]
    pub jobs: Option<usize>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Link and strip the configured modules.
    Build(BuildArgs),
    /// Print the registered actions and dependency edges without running them.
    Plan(PlanArgs),
    /// Remove module artifacts and the link cache.
    Clean,
}

/// Arguments for the `build` subcommand.
#[derive(Parser)]
pub struct BuildArgs {
    /// Only build a specific module (by name from modules.toml).
    #[arg(long, short = 'p')]
    pub module: Option<String>,
}

/// Arguments for the `plan` subcommand.
#[derive(Parser)]
pub struct PlanArgs {
    /// Emit the plan as JSON instead of text.
    #[arg(long)]
    pub json: bool,

    /// Only plan a specific module (by name from modules.toml).
    #[arg(long, short = 'p')]
    pub module: Option<String>,
}
