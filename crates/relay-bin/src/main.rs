//! Relay drain service: delivers staged messages to the primary message service.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use relay_config_and_utils::{init_logging, parse_level, Config, Paths};

/// Relay drain command-line interface.
#[derive(Parser)]
#[command(name = "relay-drain")]
#[command(about = "Drains staged messages to the primary message service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (config, database, logs). Defaults to ~/.relay-drain
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Config file. Defaults to <base-dir>/config.json
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and drain on a timer (default)
    Serve,
    /// Run a single drain cycle and print the report
    RunOnce,
    /// Print the pending count and drain settings
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths, cli.config.as_deref())?;

    let level = parse_level(cli.log_level.as_deref().unwrap_or(&config.log_level));
    init_logging(level.as_str(), &paths);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => app::run_service(config, paths).await?,
        Commands::RunOnce => app::run_single_cycle(config, paths).await?,
        Commands::Status => app::print_status(config, paths).await?,
    }

    Ok(())
}
