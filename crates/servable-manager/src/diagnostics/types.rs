//! Diagnostic Report Structures
//!
//! All types are serializable for JSON output.

use serde::{Deserialize, Serialize};

use servable_core::{CapacityEntry, LoaderState, ServingConfig, TrackerOccupancy};

use super::helpers::current_timestamp;
use crate::registry::{RecordSnapshot, RegistryCounts};
use crate::state::ErrorRecord;
use crate::table::TableRow;

/// Complete diagnostic report for one scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingDiagnosticReport {
    /// RFC 3339 timestamp when the report was generated.
    pub timestamp: String,
    pub system: SystemInfo,
    pub config: ConfigSummary,
    /// Capacity, usage and reservations.
    pub occupancy: TrackerOccupancy,
    pub counts: RegistryCounts,
    /// Every record, in id order.
    pub servables: Vec<RecordSnapshot>,
    /// Generation of the published table captured below.
    pub table_generation: u64,
    pub table: Vec<TableRow>,
    /// Most recent failures, oldest first.
    pub errors: Vec<ErrorRecord>,
}

impl ServingDiagnosticReport {
    /// Create an empty report stamped with the current time.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            timestamp: current_timestamp(),
            system: SystemInfo::default(),
            config: ConfigSummary::default(),
            occupancy: TrackerOccupancy::default(),
            counts: RegistryCounts::default(),
            servables: Vec::new(),
            table_generation: 0,
            table: Vec::new(),
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Records currently loaded, aspired or not.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.servables
            .iter()
            .filter(|s| s.state == LoaderState::Loaded)
            .count()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.servables
            .iter()
            .filter(|s| s.state == LoaderState::LoadFailed)
            .count()
    }
}

/// System information for diagnostic context.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemInfo {
    pub hostname: String,
    /// Operating system and architecture.
    pub os: String,
    /// Seconds since the scheduler was created.
    pub uptime_seconds: f64,
}

impl SystemInfo {
    /// Gather system information from the current environment.
    #[must_use]
    pub fn gather(uptime_seconds: f64) -> Self {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| {
                std::fs::read_to_string("/etc/hostname")
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown".to_string())
            });

        Self {
            hostname,
            os: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            uptime_seconds,
        }
    }
}

/// The configuration values that shape scheduling decisions.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfigSummary {
    pub max_concurrent_loads: usize,
    pub max_concurrent_unloads: usize,
    pub reconcile_interval_ms: u64,
    pub unload_retry_interval_ms: u64,
    pub starvation_threshold: u32,
    pub transition_policy: String,
    pub capacity: Vec<CapacityEntry>,
}

impl From<&ServingConfig> for ConfigSummary {
    fn from(config: &ServingConfig) -> Self {
        Self {
            max_concurrent_loads: config.max_concurrent_loads,
            max_concurrent_unloads: config.max_concurrent_unloads,
            reconcile_interval_ms: config.reconcile_interval_ms,
            unload_retry_interval_ms: config.unload_retry_interval_ms,
            starvation_threshold: config.starvation_threshold,
            transition_policy: config.transition_policy.as_str().to_string(),
            capacity: config.capacity.clone(),
        }
    }
}
