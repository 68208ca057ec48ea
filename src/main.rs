//! Handlekeep - lifecycle-tracked proxy handles
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use handlekeep::cli::{Cli, Commands};
use handlekeep::config::ConfigManager;
use handlekeep::error::{HandleError, HandleResult};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> HandleResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // Find local config unless --no-local is set
    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| HandleError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_logging(cli.verbose, config.general.verbose, &config.general.log_format);
    if let Some(ref path) = local_config_path {
        debug!("Merged local config: {}", path.display());
    }
    handlekeep::ui::init_theme();

    match cli.command {
        Commands::Scan(args) => handlekeep::cli::commands::scan(args, &config).await,
        Commands::Simulate(args) => handlekeep::cli::commands::simulate(args, &config).await,
        Commands::Config(args) => {
            handlekeep::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `general.verbose` counts as one level
fn init_logging(verbose: u8, config_verbose: bool, format: &str) {
    let level = verbose.max(u8::from(config_verbose));
    let filter = match level {
        0 => EnvFilter::new("handlekeep=warn"),
        1 => EnvFilter::new("handlekeep=info"),
        _ => EnvFilter::new("handlekeep=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
