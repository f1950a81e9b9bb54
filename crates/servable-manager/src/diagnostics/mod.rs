//! Diagnostic Dump Module
//!
//! Point-in-time reports on the scheduler for operators and monitoring.
//!
//! # Overview
//!
//! [`ServingDiagnostics`] gathers:
//! - System information (hostname, OS, scheduler uptime)
//! - The effective configuration
//! - Resource capacity, usage and per-servable reservations
//! - Per-record lifecycle state and the published table
//! - Recent load, estimate and unload failures
//!
//! Reports serialize to JSON for automated monitoring and can be printed in
//! a human-readable layout on stderr.
//!
//! # Example
//!
//! ```rust,ignore
//! use servable_manager::diagnostics::ServingDiagnostics;
//!
//! let report = ServingDiagnostics::generate_report(&scheduler);
//! println!("{}", ServingDiagnostics::to_json(&scheduler)?);
//! println!("{}", ServingDiagnostics::status_line(&scheduler));
//! ```

mod helpers;
mod output;
mod service;
mod types;


pub use self::helpers::{format_bytes, format_quantity};
pub use self::service::ServingDiagnostics;
pub use self::types::{ConfigSummary, ServingDiagnosticReport, SystemInfo};
