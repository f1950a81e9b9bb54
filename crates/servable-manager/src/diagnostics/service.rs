//! Diagnostic Service
//!
//! Builds reports from a live [`TransitionScheduler`] and writes them out.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use servable_core::{ServingError, ServingResult};

use super::helpers::format_quantity;
use super::output::dump_report_to_stderr;
use super::types::{ConfigSummary, ServingDiagnosticReport, SystemInfo};
use crate::scheduler::TransitionScheduler;

/// Stateless diagnostic service.
///
/// Everything is read from the scheduler at call time. The registry lock is
/// held only while records are copied out.
pub struct ServingDiagnostics;

impl ServingDiagnostics {
    /// Generate a complete report.
    #[must_use]
    pub fn generate_report(scheduler: &TransitionScheduler) -> ServingDiagnosticReport {
        let mut report = ServingDiagnosticReport::empty();

        report.system = SystemInfo::gather(scheduler.uptime().as_secs_f64());
        report.config = ConfigSummary::from(scheduler.config());
        report.occupancy = scheduler.occupancy();
        report.counts = scheduler.counts();
        report.servables = scheduler.records();

        let table = scheduler.snapshot();
        report.table_generation = table.generation();
        report.table = table.rows();

        report.errors = scheduler.recent_errors();
        report
    }

    /// Pretty-printed JSON form of [`generate_report`](Self::generate_report).
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::DiagnosticDumpFailed`] if serialization fails.
    pub fn to_json(scheduler: &TransitionScheduler) -> ServingResult<String> {
        let report = Self::generate_report(scheduler);
        serde_json::to_string_pretty(&report).map_err(|e| ServingError::DiagnosticDumpFailed {
            reason: format!("JSON serialization failed: {}", e),
        })
    }

    /// Write the JSON report to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::DiagnosticDumpFailed`] on any I/O failure.
    pub fn write_to_file(scheduler: &TransitionScheduler, path: &Path) -> ServingResult<()> {
        let json = Self::to_json(scheduler)?;

        let mut file = File::create(path).map_err(|e| ServingError::DiagnosticDumpFailed {
            reason: format!("Failed to create file {}: {}", path.display(), e),
        })?;

        file.write_all(json.as_bytes())
            .map_err(|e| ServingError::DiagnosticDumpFailed {
                reason: format!("Failed to write to file {}: {}", path.display(), e),
            })?;

        info!("Diagnostic report written to {}", path.display());
        Ok(())
    }

    /// Write a timestamped report under the configured dump directory.
    ///
    /// Returns the path written. The directory is created if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ServingError::DiagnosticDumpFailed`] on any I/O failure.
    pub fn dump_to_file(scheduler: &TransitionScheduler) -> ServingResult<PathBuf> {
        let dir = &scheduler.config().diagnostic_dump_path;
        fs::create_dir_all(dir).map_err(|e| ServingError::DiagnosticDumpFailed {
            reason: format!("Failed to create directory {}: {}", dir.display(), e),
        })?;

        let file_name = format!(
            "servable-manager-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        );
        let path = dir.join(file_name);
        Self::write_to_file(scheduler, &path)?;
        Ok(path)
    }

    /// Dump a human-readable report to stderr.
    pub fn dump_to_stderr(scheduler: &TransitionScheduler) {
        let report = Self::generate_report(scheduler);
        dump_report_to_stderr(&report);
    }

    /// One-line summary for quick monitoring.
    ///
    /// Format: `SERVING: 3/4 aspired loaded | 1.50GB/16.00GB main/0/ram_in_bytes | LOADING: 1`
    #[must_use]
    pub fn status_line(scheduler: &TransitionScheduler) -> String {
        let counts = scheduler.counts();
        let occupancy = scheduler.occupancy();
        let aspired = scheduler
            .records()
            .iter()
            .filter(|r| r.aspired)
            .count();

        let resources: Vec<String> = occupancy
            .resources
            .iter()
            .map(|r| {
                let kind = r.resource.kind.as_str();
                format!(
                    "{}/{} {}",
                    format_quantity(kind, r.bound_used.saturating_add(r.unbound_used)),
                    format_quantity(kind, r.capacity),
                    r.resource
                )
            })
            .collect();

        let status = if counts.failed > 0 {
            format!("ERRORS: {}", counts.failed)
        } else if counts.pending + counts.loading > 0 {
            format!("LOADING: {}", counts.pending + counts.loading)
        } else if counts.unloading > 0 {
            format!("UNLOADING: {}", counts.unloading)
        } else {
            "OK".to_string()
        };

        format!(
            "SERVING: {}/{} aspired loaded | {} | {}",
            counts.aspired_loaded,
            aspired,
            resources.join(", "),
            status
        )
    }
}
