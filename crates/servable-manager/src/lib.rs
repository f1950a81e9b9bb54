//! Servable Manager
//!
//! Loads, swaps and unloads versioned servables under a shared resource
//! budget, and publishes what is currently serveable.
//!
//! # Architecture
//!
//! - [`registry`]: one lifecycle record per `ServableId`, plus aspiration
//! - [`source`]: streams of aspire and withdraw events
//! - [`scheduler`]: the [`TransitionScheduler`] that reconciles aspired
//!   versions against the budget and runs Loaders off the caller's thread
//! - [`table`]: the atomically published [`ServableStateTable`] and
//!   lease-counted [`ServableHandle`]s
//! - [`health`] and [`diagnostics`]: operational reporting
//!
//! # Example
//!
//! ```
//! use servable_core::resources::{device_types, resource_kinds, ResourceAllocation};
//! use servable_core::{Loader, ServableId, ServingConfig, SimpleLoader};
//! use servable_manager::{TransitionScheduler, VersionSelector};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), servable_core::ServingError> {
//! let scheduler = TransitionScheduler::new(ServingConfig::default())?;
//! let loader: Box<dyn Loader> = Box::new(SimpleLoader::new(
//!     || Ok("v1 weights".to_string()),
//!     || Ok(ResourceAllocation::new()
//!         .with_unbound(device_types::MAIN, resource_kinds::RAM_BYTES, 1024)),
//! ));
//! scheduler.set_aspired_versions("ranker", vec![(ServableId::new("ranker", 1), loader)])?;
//! scheduler.settle().await?;
//!
//! let handle = scheduler.get_servable("ranker", VersionSelector::Latest)?;
//! assert_eq!(handle.get::<String>().map(String::as_str), Some("v1 weights"));
//! # Ok(())
//! # }
//! ```

pub mod diagnostics;
pub mod health;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod table;

// Re-exports for convenience
pub use diagnostics::{ServingDiagnosticReport, ServingDiagnostics};
pub use health::{ServingHealthCheck, ServingHealthChecker, ServingHealthStatus};
pub use registry::{RecordSnapshot, RegistryCounts, ServableRegistry};
pub use scheduler::{ReconcileSummary, TransitionScheduler};
pub use source::{ChannelVersionSource, VersionEvent, VersionSource};
pub use state::{ErrorRecord, ManagerState, ServableStateEvent};
pub use table::{ServableHandle, ServableStateTable, ServableTable, TableRow, VersionSelector};
