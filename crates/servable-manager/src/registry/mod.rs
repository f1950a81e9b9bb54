//! Servable Registry
//!
//! Per-id lifecycle records for every servable the scheduler manages.
//!
//! # Overview
//!
//! The [`ServableRegistry`] owns one [`ServableRecord`] per [`ServableId`].
//! A record holds the id's Loader, its Loader state, whether the id is
//! aspired and whether a Load or Unload is in flight. Records are created
//! when an id first becomes aspired and removed once the id is neither
//! aspired nor holding resources.
//!
//! # Single Flight
//!
//! Starting a Load or Unload takes the Loader out of its record. Until the
//! operation completes and hands the Loader back, no second operation can
//! be started for that id. This is the per-id exclusivity the Loader
//! contract relies on.
//!
//! # State Transitions
//!
//! ```text
//!     +-------+  start_loading()   +---------+  mark_loaded()   +--------+
//!     |  New  |------------------->| Loading |----------------->| Loaded |
//!     +---+---+                    +----+----+                  +---+----+
//!         |                             |                           |
//!  mark_estimate_failed()        mark_load_failed()         start_unloading()
//!         |                             |                           |
//!         v                             v                           v
//!     +------------+                                        +-----------+
//!     | LoadFailed |<---------------------------------------|           |
//!     +------------+                                        | Unloading |<--+
//!                                                           |           |   |
//!     +----------+         mark_disposed()                  +-----+-----+   |
//!     | Disposed |<---------------------------------------------+ |         |
//!     +----------+                                                +---------+
//!                                                          mark_unload_failed()
//! ```
//!
//! `LoadFailed` and `Disposed` are terminal for the Loader. A fresh Loader
//! for the same id restarts the record in `New`.
//!
//! # Thread Safety
//!
//! The registry is a plain data structure. The scheduler guards it with a
//! mutex and never holds that mutex across a Load or Unload.

mod aspiration;
mod core;
mod operations;
mod queries;

#[cfg(test)]
mod tests_aspiration;

pub use self::core::{ServableRecord, ServableRegistry};
pub use self::queries::{RecordSnapshot, RegistryCounts};
