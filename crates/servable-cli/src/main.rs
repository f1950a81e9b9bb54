//! Servable Manager CLI
//!
//! Operator tooling for the servable lifecycle manager.
//!
//! # Commands
//!
//! - `check-config`: Load and validate a `ServingConfig` TOML file
//! - `simulate`: Roll synthetic servables through a real scheduler and
//!   print the diagnostic report
//!
//! Exit codes: 0 on success, 1 when the run ends degraded, 2 on invalid
//! input.

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod plan;

/// Servable Manager CLI
#[derive(Parser)]
#[command(name = "servable-cli")]
#[command(version)]
#[command(about = "Validate serving configs and simulate version rollouts")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a config file
    CheckConfig(commands::check_config::CheckConfigArgs),
    /// Run the servables declared in a config file through the scheduler
    ///
    /// Versions of each name are rolled out in ascending order, settling
    /// after every step. The final diagnostic report is printed as JSON.
    Simulate(commands::simulate::SimulateArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match cli.command {
        Commands::CheckConfig(args) => commands::check_config::handle_check_config(args),
        Commands::Simulate(args) => commands::simulate::handle_simulate(args).await,
    };

    std::process::exit(exit_code);
}
