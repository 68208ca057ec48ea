//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Handlekeep - lifecycle-tracked proxy handles
///
/// Computes expensive results on explicit request, tracks their freshness,
/// and marks them stale when change events arrive.
#[derive(Parser, Debug)]
#[command(name = "handlekeep")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "HANDLEKEEP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local .handlekeep.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compute a directory topology handle and show it
    Scan(ScanArgs),

    /// Replay change events against a topology handle
    Simulate(SimulateArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the scan command
#[derive(Parser, Debug)]
pub struct ScanArgs {
    /// Directory to scan (defaults to current directory)
    pub path: Option<PathBuf>,

    /// Include dotfiles and dot-directories
    #[arg(long)]
    pub hidden: bool,

    /// Maximum directory depth
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Label recorded as the handle's computed_by
    #[arg(short, long)]
    pub label: Option<String>,

    /// Computation deadline in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the simulate command
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// JSON-lines file of change events ({"topic": ..., "payload": ...})
    pub events: PathBuf,

    /// Directory whose topology is tracked (defaults to current directory)
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Recompute the handle if the replay left it stale
    #[arg(long)]
    pub refresh: bool,

    /// Label recorded as the handle's computed_by
    #[arg(short, long)]
    pub label: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for scan and simulate
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one line per item)
    Plain,
}
