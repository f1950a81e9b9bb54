//! Scheduler-level states and lifecycle events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use servable_core::{LoaderState, ServableId};

/// Aspiration superimposed on the Loader state of one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    /// Wanted, not (yet) loaded.
    AspiredUnloaded,
    /// Wanted and loaded.
    AspiredLoaded,
    /// Stale: holds resources, pending unload.
    NotAspiredLoaded,
    /// Stale and holding nothing. Ready for disposal.
    NotAspiredUnloaded,
}

impl ManagerState {
    /// Combine aspiration with the Loader state.
    #[must_use]
    pub fn derive(aspired: bool, state: LoaderState) -> Self {
        match (aspired, state) {
            (true, LoaderState::Loaded) => Self::AspiredLoaded,
            (true, _) => Self::AspiredUnloaded,
            (false, s) if s.holds_resources() => Self::NotAspiredLoaded,
            (false, _) => Self::NotAspiredUnloaded,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AspiredUnloaded => "aspired_unloaded",
            Self::AspiredLoaded => "aspired_loaded",
            Self::NotAspiredLoaded => "not_aspired_loaded",
            Self::NotAspiredUnloaded => "not_aspired_unloaded",
        }
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle outcome broadcast to subscribers.
///
/// Load failures are reported here so whatever owns the aspiration can stop
/// aspiring a broken version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServableStateEvent {
    /// Load succeeded and the servable is published.
    Loaded { id: ServableId },
    /// Load (or the pre-load estimate) failed. Terminal for that Loader.
    LoadFailed { id: ServableId, error: String },
    /// Unload succeeded and the reservation was released.
    Unloaded { id: ServableId },
    /// Unload failed. Retried after the configured interval.
    UnloadFailed {
        id: ServableId,
        error: String,
        attempt: u32,
    },
    /// Admission denied for lack of headroom. Retried later.
    Deferred { id: ServableId, deferrals: u32 },
}

impl ServableStateEvent {
    /// The id this event concerns.
    #[must_use]
    pub fn id(&self) -> &ServableId {
        match self {
            Self::Loaded { id }
            | Self::LoadFailed { id, .. }
            | Self::Unloaded { id }
            | Self::UnloadFailed { id, .. }
            | Self::Deferred { id, .. } => id,
        }
    }
}

/// A failure recorded for operational tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub servable: Option<ServableId>,
    /// `estimate`, `load` or `unload`.
    pub operation: String,
    pub message: String,
}

impl ErrorRecord {
    #[must_use]
    pub fn new(servable: Option<ServableId>, operation: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            servable,
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.servable {
            Some(id) => write!(f, "[{}] {} {}: {}", self.timestamp.to_rfc3339(), self.operation, id, self.message),
            None => write!(f, "[{}] {}: {}", self.timestamp.to_rfc3339(), self.operation, self.message),
        }
    }
}
