//! Resource accounting for servable admission control.
//!
//! # Overview
//!
//! A [`ResourceAllocation`] describes how much of each resource a servable
//! uses, keyed by `(device, instance, kind)`. Before a load, estimates may
//! leave the instance open ("some GPU's memory"). Once loaded, every entry
//! names a concrete instance.
//!
//! The [`ResourceTracker`] holds the fixed total capacity and the live sum of
//! all reservations, and answers "would this allocation keep us within
//! budget". Unbound usage is checked against every instance it could land
//! on, so admission is safe under worst-case placement.
//!
//! # Example
//!
//! ```
//! use servable_core::resources::{device_types, resource_kinds, ResourceAllocation, ResourceTracker};
//! use servable_core::ServableId;
//!
//! let total = ResourceAllocation::new()
//!     .with_bound(device_types::MAIN, 0, resource_kinds::RAM_BYTES, 100);
//! let tracker = ResourceTracker::new(total)?;
//!
//! let estimate = ResourceAllocation::new()
//!     .with_unbound(device_types::MAIN, resource_kinds::RAM_BYTES, 60);
//! assert!(tracker.try_reserve(&ServableId::new("m", 1), &estimate)?);
//! assert!(!tracker.try_reserve(&ServableId::new("m", 2), &estimate)?);
//! # Ok::<(), servable_core::ServingError>(())
//! ```

mod allocation;
mod tracker;


pub use allocation::{AllocationEntry, Resource, ResourceAllocation};
pub use tracker::{ReservationEntry, ResourceOccupancy, ResourceTracker, TrackerOccupancy};

/// Standard device type names.
pub mod device_types {
    /// Host CPU and main memory.
    pub const MAIN: &str = "main";
    /// Accelerator device.
    pub const GPU: &str = "gpu";
}

/// Standard resource kind names.
pub mod resource_kinds {
    /// Memory in bytes.
    pub const RAM_BYTES: &str = "ram_in_bytes";
    /// Number of model slots (for devices that limit resident models).
    pub const MODEL_SLOTS: &str = "model_slots";
}
