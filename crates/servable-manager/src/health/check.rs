//! Health Check Result

use std::time::{Duration, Instant};

use super::status::ServingHealthStatus;

/// Detailed health check result.
#[derive(Debug, Clone)]
pub struct ServingHealthCheck {
    /// Overall health status.
    pub status: ServingHealthStatus,

    /// Managed records, aspired or not.
    pub servables_total: usize,

    /// Aspired records.
    pub aspired: usize,

    /// Aspired and loaded.
    pub aspired_loaded: usize,

    /// Aspired, waiting for admission.
    pub pending: usize,

    /// Loads running.
    pub loading: usize,

    /// Unloads running or awaiting a retry.
    pub unloading: usize,

    /// Loads that failed.
    pub failed: usize,

    /// Stale versions still loaded.
    pub stale: usize,

    /// Utilization (0.0 - 1.0) of the most loaded resource.
    pub peak_utilization: f64,

    /// Time since the scheduler was created.
    pub uptime: Option<Duration>,

    /// Timestamp of this health check.
    pub last_check: Instant,

    /// Format: `["m:3: error message", ...]`
    pub error_messages: Vec<String>,
}

impl ServingHealthCheck {
    /// Result for a scheduler with nothing aspired.
    #[must_use]
    pub fn not_initialized() -> Self {
        Self {
            status: ServingHealthStatus::NotInitialized,
            servables_total: 0,
            aspired: 0,
            aspired_loaded: 0,
            pending: 0,
            loading: 0,
            unloading: 0,
            failed: 0,
            stale: 0,
            peak_utilization: 0.0,
            uptime: None,
            last_check: Instant::now(),
            error_messages: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// Share of aspired servables that are loaded (0.0 - 100.0).
    #[must_use]
    pub fn loaded_percentage(&self) -> f64 {
        if self.aspired == 0 {
            return 0.0;
        }
        (self.aspired_loaded as f64 / self.aspired as f64) * 100.0
    }
}

impl Default for ServingHealthCheck {
    fn default() -> Self {
        Self::not_initialized()
    }
}
