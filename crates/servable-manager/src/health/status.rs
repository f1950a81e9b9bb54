//! Health Status Types

use serde::{Deserialize, Serialize};

/// Overall health of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingHealthStatus {
    /// Every aspired servable is loaded.
    Healthy,

    /// Transitions are pending or running. No failures.
    Loading,

    /// At least one load failed or one unload is awaiting a retry.
    ///
    /// Other servables keep serving. Check `error_messages` in
    /// [`ServingHealthCheck`](super::ServingHealthCheck) for details.
    Degraded,

    /// Nothing has been aspired yet.
    NotInitialized,
}

impl ServingHealthStatus {
    #[inline]
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    #[inline]
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    #[inline]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded)
    }

    #[inline]
    #[must_use]
    pub fn is_not_initialized(&self) -> bool {
        matches!(self, Self::NotInitialized)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Loading => "loading",
            Self::Degraded => "degraded",
            Self::NotInitialized => "not_initialized",
        }
    }
}

impl std::fmt::Display for ServingHealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
