//! Error types for servable lifecycle management.
//!
//! # Error Taxonomy
//!
//! | Variant | Category | Retryable | Typical source |
//! |---------|----------|-----------|----------------|
//! | `Unimplemented` | `LOADER` | no | Loader without a `load()` override |
//! | `LoadFailed` | `LOADER` | no | `Loader::load_with_metadata` |
//! | `UnloadFailed` | `LOADER` | yes | `Loader::unload` |
//! | `ResourceExhausted` | `RESOURCE` | yes | starved entries in health reports |
//! | `NotFound` | `LOOKUP` | no | `get_servable` for an unknown id |
//!
//! Running out of headroom is an expected outcome that drives deferral. The
//! scheduler handles it locally; `ResourceExhausted` only describes entries
//! that stayed deferred past the starvation threshold.
//! Load failures are terminal for the Loader instance that produced them.

use thiserror::Error;

use crate::types::ServableId;

/// Error type for servable lifecycle operations.
#[derive(Debug, Error)]
pub enum ServingError {
    /// The Loader does not support the requested operation.
    #[error("Unimplemented: {operation}")]
    Unimplemented {
        /// Operation that is not supported (e.g. "Load").
        operation: String,
    },

    /// Load failed. Permanent for the Loader instance that reported it.
    #[error("Load failed for {servable}: {reason}")]
    LoadFailed {
        /// Servable whose load failed.
        servable: ServableId,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Unload failed. The scheduler retries and keeps the reservation.
    #[error("Unload failed for {servable}: {reason}")]
    UnloadFailed {
        /// Servable whose unload failed.
        servable: ServableId,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Admission denied: the allocation does not fit the remaining budget.
    #[error("Resource exhausted for {servable}: {reason}")]
    ResourceExhausted {
        /// Servable that was denied admission.
        servable: ServableId,
        /// Which resource ran out.
        reason: String,
    },

    /// Lookup for a servable that is neither loaded nor aspired.
    #[error("Servable not found: {name} ({selector})")]
    NotFound {
        /// Servable name that was requested.
        name: String,
        /// Rendered version selector.
        selector: String,
    },

    /// Operation called in a state that does not permit it.
    #[error("Failed precondition: {reason}")]
    FailedPrecondition {
        /// What was violated.
        reason: String,
    },

    /// The Loader could not produce a resource estimate.
    #[error("Resource estimate failed for {servable}: {reason}")]
    EstimateFailed {
        /// Servable whose estimator failed.
        servable: ServableId,
        /// Estimator error.
        reason: String,
    },

    /// Lifecycle state machine violation.
    #[error("Invalid transition for {servable}: {from} -> {to}")]
    InvalidTransition {
        /// Servable being transitioned.
        servable: ServableId,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// A record for this id already exists.
    #[error("Servable already registered: {servable}")]
    AlreadyRegistered {
        /// Duplicate id.
        servable: ServableId,
    },

    /// No lifecycle record exists for this id.
    #[error("Servable not registered: {servable}")]
    NotRegistered {
        /// Missing id.
        servable: ServableId,
    },

    /// Malformed allocation or capacity description.
    #[error("Invalid resource: {reason}")]
    InvalidResource {
        /// What is wrong with the allocation.
        reason: String,
    },

    /// Configuration value failed validation.
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig {
        /// Offending field.
        field: String,
        /// Why it is invalid.
        reason: String,
    },

    /// Writing a diagnostic report failed.
    #[error("Diagnostic dump failed: {reason}")]
    DiagnosticDumpFailed {
        /// Underlying I/O or serialization error.
        reason: String,
    },

    /// The scheduler has been stopped and accepts no more work.
    #[error("Scheduler stopped")]
    SchedulerStopped,
}

impl ServingError {
    /// Shorthand for a load failure with any displayable reason.
    pub fn load_failed<E: std::fmt::Display>(servable: &ServableId, reason: E) -> Self {
        Self::LoadFailed {
            servable: servable.clone(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for an unload failure with any displayable reason.
    pub fn unload_failed<E: std::fmt::Display>(servable: &ServableId, reason: E) -> Self {
        Self::UnloadFailed {
            servable: servable.clone(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for an `Unimplemented` error.
    pub fn unimplemented(operation: impl Into<String>) -> Self {
        Self::Unimplemented {
            operation: operation.into(),
        }
    }

    /// Whether the scheduler retries the failed operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UnloadFailed { .. } | Self::ResourceExhausted { .. }
        )
    }

    /// Error category for grouping in diagnostics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Unimplemented { .. }
            | Self::LoadFailed { .. }
            | Self::UnloadFailed { .. }
            | Self::EstimateFailed { .. }
            | Self::FailedPrecondition { .. } => "LOADER",
            Self::ResourceExhausted { .. } | Self::InvalidResource { .. } => "RESOURCE",
            Self::NotFound { .. } => "LOOKUP",
            Self::InvalidTransition { .. }
            | Self::AlreadyRegistered { .. }
            | Self::NotRegistered { .. } => "REGISTRY",
            Self::InvalidConfig { .. } => "CONFIG",
            Self::DiagnosticDumpFailed { .. } => "DIAGNOSTIC",
            Self::SchedulerStopped => "SCHEDULER",
        }
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unimplemented { .. } => "ERR-SERVING-UNIMPLEMENTED",
            Self::LoadFailed { .. } => "ERR-SERVING-LOAD",
            Self::UnloadFailed { .. } => "ERR-SERVING-UNLOAD",
            Self::ResourceExhausted { .. } => "ERR-SERVING-RESOURCE-EXHAUSTED",
            Self::NotFound { .. } => "ERR-SERVING-NOT-FOUND",
            Self::FailedPrecondition { .. } => "ERR-SERVING-PRECONDITION",
            Self::EstimateFailed { .. } => "ERR-SERVING-ESTIMATE",
            Self::InvalidTransition { .. } => "ERR-SERVING-TRANSITION",
            Self::AlreadyRegistered { .. } => "ERR-SERVING-REGISTRY-DUPLICATE",
            Self::NotRegistered { .. } => "ERR-SERVING-REGISTRY-MISSING",
            Self::InvalidResource { .. } => "ERR-SERVING-RESOURCE-INVALID",
            Self::InvalidConfig { .. } => "ERR-SERVING-CONFIG-INVALID",
            Self::DiagnosticDumpFailed { .. } => "ERR-SERVING-DIAGNOSTIC-DUMP",
            Self::SchedulerStopped => "ERR-SERVING-STOPPED",
        }
    }
}

/// Result type alias for servable lifecycle operations.
pub type ServingResult<T> = Result<T, ServingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_variants() {
        let id = ServableId::new("m", 1);
        assert!(ServingError::unload_failed(&id, "busy").is_retryable());
        assert!(ServingError::ResourceExhausted {
            servable: id.clone(),
            reason: "ram".into(),
        }
        .is_retryable());
        assert!(!ServingError::load_failed(&id, "corrupt").is_retryable());
        assert!(!ServingError::unimplemented("Load").is_retryable());
    }

    #[test]
    fn test_category_and_code() {
        let id = ServableId::new("m", 3);
        let err = ServingError::load_failed(&id, "bad checksum");
        assert_eq!(err.category(), "LOADER");
        assert_eq!(err.error_code(), "ERR-SERVING-LOAD");
        assert!(err.to_string().contains("m:3"));
        assert!(err.to_string().contains("bad checksum"));

        let err = ServingError::NotFound {
            name: "m".into(),
            selector: "latest".into(),
        };
        assert_eq!(err.category(), "LOOKUP");
        assert_eq!(err.to_string(), "Servable not found: m (latest)");
    }
}
