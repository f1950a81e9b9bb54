//! Human-readable report output.

use servable_core::LoaderState;

use super::helpers::{calculate_percentage, format_quantity};
use super::types::ServingDiagnosticReport;

/// Dump a report to stderr.
///
/// Best effort; never fails.
pub(crate) fn dump_report_to_stderr(report: &ServingDiagnosticReport) {
    eprintln!("\n=== SERVABLE MANAGER DIAGNOSTIC DUMP ===");
    eprintln!("Timestamp: {}", report.timestamp);
    eprintln!();

    eprintln!("SYSTEM:");
    eprintln!("  Hostname: {}", report.system.hostname);
    eprintln!("  OS: {}", report.system.os);
    eprintln!("  Uptime: {:.1}s", report.system.uptime_seconds);
    eprintln!();

    eprintln!("CONFIG:");
    eprintln!("  Policy: {}", report.config.transition_policy);
    eprintln!(
        "  Concurrency: {} loads / {} unloads",
        report.config.max_concurrent_loads, report.config.max_concurrent_unloads
    );
    eprintln!("  Starvation threshold: {}", report.config.starvation_threshold);
    eprintln!();

    dump_resources(report);
    dump_servables(report);
    dump_errors(report);

    eprintln!("=== END DIAGNOSTIC DUMP ===\n");
}

fn dump_resources(report: &ServingDiagnosticReport) {
    eprintln!("RESOURCES:");
    for occupancy in &report.occupancy.resources {
        let kind = occupancy.resource.kind.as_str();
        let used = occupancy.bound_used.saturating_add(occupancy.unbound_used);
        eprintln!(
            "  {}: {} / {} ({:.1}%)",
            occupancy.resource,
            format_quantity(kind, used),
            format_quantity(kind, occupancy.capacity),
            calculate_percentage(used, occupancy.capacity)
        );
    }
    eprintln!("  Reservations: {}", report.occupancy.reservations.len());
    eprintln!();
}

fn dump_servables(report: &ServingDiagnosticReport) {
    eprintln!(
        "SERVABLES ({} total, table generation {}):",
        report.servables.len(),
        report.table_generation
    );
    for servable in &report.servables {
        let icon = match servable.state {
            LoaderState::Loaded => "[OK]",
            LoaderState::LoadFailed => "[FAIL]",
            LoaderState::Loading => "[...]",
            LoaderState::Unloading => "[UNL]",
            LoaderState::New | LoaderState::Disposed => "[---]",
        };
        eprintln!(
            "  {} {} - {} ({})",
            icon, servable.id, servable.state, servable.manager_state
        );
        if servable.deferrals > 0 {
            eprintln!("      deferred {} time(s)", servable.deferrals);
        }
        if let Some(err) = &servable.load_error {
            eprintln!("      ERROR: {}", err);
        }
        if let Some(err) = &servable.unload_error {
            eprintln!(
                "      UNLOAD ERROR ({} attempt(s)): {}",
                servable.unload_failures, err
            );
        }
    }
    eprintln!();
}

fn dump_errors(report: &ServingDiagnosticReport) {
    if !report.errors.is_empty() {
        eprintln!("ERRORS ({}):", report.errors.len());
        for error in &report.errors {
            eprintln!("  {}", error);
        }
        eprintln!();
    }
}
