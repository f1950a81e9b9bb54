//! `check-config`: load and validate a serving config.

use std::path::PathBuf;

use clap::Args;
use tracing::{error, info};

use servable_core::ServingConfig;

use super::{EXIT_INVALID_INPUT, EXIT_OK};

/// Arguments for the check-config command.
#[derive(Args, Debug)]
pub struct CheckConfigArgs {
    /// Path to the TOML config file
    #[arg(long, short)]
    pub config: PathBuf,

    /// Print the effective config (defaults filled in) as TOML
    #[arg(long)]
    pub print: bool,
}

/// Execute the check-config command.
///
/// Exit code:
/// - 0: config is valid
/// - 2: config could not be read, parsed or validated
pub fn handle_check_config(args: CheckConfigArgs) -> i32 {
    let config = match ServingConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "Config rejected");
            eprintln!("{}: {}", args.config.display(), e);
            return EXIT_INVALID_INPUT;
        }
    };

    info!(
        path = %args.config.display(),
        policy = config.transition_policy.as_str(),
        capacity = %config.total_capacity(),
        "Config valid"
    );
    println!("{}: OK", args.config.display());
    println!("  capacity: {}", config.total_capacity());
    println!("  transition policy: {}", config.transition_policy.as_str());
    println!(
        "  concurrency: {} loads / {} unloads",
        config.max_concurrent_loads, config.max_concurrent_unloads
    );

    if args.print {
        match toml::to_string_pretty(&config) {
            Ok(rendered) => println!("\n{}", rendered),
            Err(e) => {
                error!(error = %e, "Could not render config");
                return EXIT_INVALID_INPUT;
            }
        }
    }
    EXIT_OK
}
