//! CLI command handlers
//!
//! Handlers return the process exit code.

pub mod check_config;
pub mod simulate;

/// Run completed and nothing is degraded.
pub const EXIT_OK: i32 = 0;
/// Run completed but at least one servable failed.
pub const EXIT_DEGRADED: i32 = 1;
/// Input could not be read or validated.
pub const EXIT_INVALID_INPUT: i32 = 2;
