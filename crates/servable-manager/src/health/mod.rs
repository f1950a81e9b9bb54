//! Health Check API for the Transition Scheduler
//!
//! Reports whether every aspired servable is loaded and surfaces failures.
//!
//! # Health States
//!
//! | Status | Condition |
//! |--------|-----------|
//! | `Healthy` | Every aspired servable is loaded and nothing is pending |
//! | `Loading` | Loads or unloads are pending or running, nothing failed |
//! | `Degraded` | A load failed or an unload is waiting for a retry |
//! | `NotInitialized` | No servable has been aspired yet |
//!
//! # Example
//!
//! ```rust,ignore
//! let checker = ServingHealthChecker::from_scheduler(&scheduler);
//! let health = checker.check();
//! println!("{}: {}/{} aspired loaded", health.status, health.aspired_loaded, health.aspired);
//! ```

mod check;
mod checker;
mod status;

#[cfg(test)]
mod tests;

pub use check::ServingHealthCheck;
pub use checker::ServingHealthChecker;
pub use status::ServingHealthStatus;
