//! Health Checker Service

use std::sync::Arc;
use std::time::{Duration, Instant};

use servable_core::{LoaderState, ServingError};

use super::check::ServingHealthCheck;
use super::status::ServingHealthStatus;
use crate::scheduler::{SchedulerInner, TransitionScheduler};

/// Health check service for a [`TransitionScheduler`].
///
/// Cheap to clone and safe to call from monitoring threads; each check
/// takes the registry lock briefly.
#[derive(Clone)]
pub struct ServingHealthChecker {
    inner: Arc<SchedulerInner>,
}

impl ServingHealthChecker {
    #[must_use]
    pub fn from_scheduler(scheduler: &TransitionScheduler) -> Self {
        Self {
            inner: Arc::clone(scheduler.inner()),
        }
    }

    /// Perform a detailed health check.
    #[must_use]
    pub fn check(&self) -> ServingHealthCheck {
        let last_check = Instant::now();
        let uptime = Some(self.uptime());

        let (counts, records) = {
            let registry = self.inner.registry.lock();
            (registry.counts(), registry.snapshot())
        };
        if counts.total == 0 {
            return ServingHealthCheck {
                uptime,
                last_check,
                ..ServingHealthCheck::not_initialized()
            };
        }

        let threshold = self.inner.config.starvation_threshold;
        let mut error_messages = Vec::new();
        let mut unload_retries = 0usize;
        for record in &records {
            match record.state {
                LoaderState::LoadFailed => {
                    error_messages.push(format!(
                        "{}: {}",
                        record.id,
                        record.load_error.as_deref().unwrap_or("load failed")
                    ));
                }
                LoaderState::Unloading if record.unload_failures > 0 => {
                    unload_retries += 1;
                    error_messages.push(format!(
                        "{}: unload failed {} time(s): {}",
                        record.id,
                        record.unload_failures,
                        record.unload_error.as_deref().unwrap_or("unknown error")
                    ));
                }
                LoaderState::New if threshold > 0 && record.deferrals >= threshold => {
                    let starved = ServingError::ResourceExhausted {
                        servable: record.id.clone(),
                        reason: format!("admission deferred {} times", record.deferrals),
                    };
                    error_messages.push(starved.to_string());
                }
                _ => {}
            }
        }

        let aspired = records.iter().filter(|r| r.aspired).count();
        let status = if counts.failed > 0 || unload_retries > 0 {
            ServingHealthStatus::Degraded
        } else if counts.pending > 0
            || counts.loading > 0
            || counts.unloading > 0
            || counts.stale > 0
        {
            ServingHealthStatus::Loading
        } else if aspired == 0 {
            ServingHealthStatus::NotInitialized
        } else {
            ServingHealthStatus::Healthy
        };

        ServingHealthCheck {
            status,
            servables_total: counts.total,
            aspired,
            aspired_loaded: counts.aspired_loaded,
            pending: counts.pending,
            loading: counts.loading,
            unloading: counts.unloading,
            failed: counts.failed,
            stale: counts.stale,
            peak_utilization: self.inner.tracker.occupancy().peak_utilization(),
            uptime,
            last_check,
            error_messages,
        }
    }

    /// Quick status check.
    #[must_use]
    pub fn status(&self) -> ServingHealthStatus {
        self.check().status
    }

    #[inline]
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status().is_healthy()
    }

    /// Time since the scheduler was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.inner.started_at.elapsed()
    }
}

impl std::fmt::Debug for ServingHealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingHealthChecker")
            .field("uptime", &self.uptime())
            .finish()
    }
}
