//! `simulate`: roll synthetic servables through a real scheduler.
//!
//! # Usage
//!
//! ```bash
//! servable-cli -v simulate --config rollout.toml
//! servable-cli simulate --config rollout.toml --human --write-dump
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tracing::{error, info, warn};

use servable_core::ServingConfig;
use servable_manager::{
    ServingDiagnosticReport, ServingDiagnostics, ServingHealthCheck, ServingHealthChecker,
    TransitionScheduler,
};

use super::{EXIT_DEGRADED, EXIT_INVALID_INPUT, EXIT_OK};
use crate::plan::RolloutPlan;

/// Arguments for the simulate command.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Path to the TOML file holding the config and `[[servables]]`
    #[arg(long, short)]
    pub config: PathBuf,

    /// Upper bound on settling after each rollout step, in seconds
    #[arg(long, default_value = "30")]
    pub step_timeout_secs: u64,

    /// Also print a human-readable report on stderr
    #[arg(long)]
    pub human: bool,

    /// Also write the JSON report under the config's diagnostic_dump_path
    #[arg(long)]
    pub write_dump: bool,
}

/// Final state of a simulation.
pub struct SimulationOutcome {
    pub report: ServingDiagnosticReport,
    pub health: ServingHealthCheck,
    pub status_line: String,
    pub dump_path: Option<PathBuf>,
}

/// Execute the simulate command.
///
/// Exit code:
/// - 0: every name ended on a loaded version
/// - 1: at least one load failed
/// - 2: the file could not be read or validated, or a step timed out
pub async fn handle_simulate(args: SimulateArgs) -> i32 {
    let (config, plan) = match RolloutPlan::load(&args.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "Simulation input rejected");
            eprintln!("{}: {:#}", args.config.display(), e);
            return EXIT_INVALID_INPUT;
        }
    };

    let step_timeout = Duration::from_secs(args.step_timeout_secs);
    let outcome = match run_simulation(config, &plan, step_timeout, &args).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "Simulation aborted");
            eprintln!("simulation aborted: {:#}", e);
            return EXIT_INVALID_INPUT;
        }
    };

    match serde_json::to_string_pretty(&outcome.report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!(error = %e, "Could not serialize report");
            return EXIT_INVALID_INPUT;
        }
    }
    eprintln!("{}", outcome.status_line);
    if let Some(path) = &outcome.dump_path {
        eprintln!("report written to {}", path.display());
    }

    if outcome.health.status.is_degraded() {
        for message in &outcome.health.error_messages {
            warn!("{}", message);
        }
        EXIT_DEGRADED
    } else {
        EXIT_OK
    }
}

/// Roll every name through its versions in ascending order.
///
/// Each step replaces the name's aspired set with the next version and
/// settles before moving on.
pub async fn run_simulation(
    config: ServingConfig,
    plan: &RolloutPlan,
    step_timeout: Duration,
    args: &SimulateArgs,
) -> anyhow::Result<SimulationOutcome> {
    let scheduler = TransitionScheduler::new(config)?;
    scheduler.start()?;
    let mut events = scheduler.subscribe();

    for (name, specs) in plan.rollouts() {
        for spec in specs {
            info!(servable = %spec.id(), estimate = spec.estimate, "Rolling out");
            scheduler.set_aspired_versions(name, vec![(spec.id(), spec.loader())])?;
            tokio::time::timeout(step_timeout, scheduler.settle())
                .await
                .with_context(|| format!("{} did not settle within {:?}", spec.id(), step_timeout))??;

            while let Ok(event) = events.try_recv() {
                info!(servable = %event.id(), event = ?event, "Transition");
            }
        }
    }

    let health = ServingHealthChecker::from_scheduler(&scheduler).check();
    let report = ServingDiagnostics::generate_report(&scheduler);
    let status_line = ServingDiagnostics::status_line(&scheduler);
    if args.human {
        ServingDiagnostics::dump_to_stderr(&scheduler);
    }
    let dump_path = if args.write_dump {
        Some(ServingDiagnostics::dump_to_file(&scheduler)?)
    } else {
        None
    };

    scheduler.stop().await;
    Ok(SimulationOutcome {
        report,
        health,
        status_line,
        dump_path,
    })
}
