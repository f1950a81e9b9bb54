//! Servable Core Library
//!
//! Identity, resource accounting and the per-version lifecycle contract for
//! the servable lifecycle manager.
//!
//! # Architecture
//!
//! This crate defines:
//! - `ServableId` and `LoadMetadata`
//! - `ResourceAllocation` and the `ResourceTracker` budget
//! - The `Loader` trait and stock loaders (`SimpleLoader`,
//!   `ResourceUnsafeLoader`, `SimpleLoaderSourceAdapter`)
//! - Error types and result aliases
//! - `ServingConfig`
//!
//! Scheduling lives in `servable-manager`.
//!
//! # Example
//!
//! ```
//! use servable_core::{Loader, ServableId, SimpleLoader};
//! use servable_core::resources::{device_types, resource_kinds, ResourceAllocation};
//!
//! let loader = SimpleLoader::new(
//!     || Ok("lookup table".to_string()),
//!     || Ok(ResourceAllocation::new()
//!         .with_unbound(device_types::MAIN, resource_kinds::RAM_BYTES, 64)),
//! );
//! assert!(loader.servable().is_none());
//! assert!(!loader.estimate_resources()?.is_empty());
//! # let _ = ServableId::new("lookup", 1);
//! # Ok::<(), servable_core::ServingError>(())
//! ```

pub mod config;
pub mod error;
pub mod loader;
pub mod resources;
pub mod types;

// Re-exports for convenience
pub use config::{CapacityEntry, ServingConfig, TransitionPolicy};
pub use error::{ServingError, ServingResult};
pub use loader::{
    AnyServable, Loader, LoaderState, ResourceUnsafeLoader, SimpleLoader,
    SimpleLoaderSourceAdapter,
};
pub use resources::{Resource, ResourceAllocation, ResourceTracker, TrackerOccupancy};
pub use types::{LoadMetadata, ServableId};
