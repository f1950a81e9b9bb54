//! Helper Functions for Diagnostics

use chrono::{SecondsFormat, Utc};

/// Format bytes as a human-readable string.
///
/// # Examples
///
/// ```
/// use servable_manager::diagnostics::format_bytes;
///
/// assert_eq!(format_bytes(1024), "1.00KB");
/// assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00GB");
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Format a quantity of resource `kind`. Byte kinds get binary units.
#[must_use]
pub fn format_quantity(kind: &str, quantity: u64) -> String {
    if kind.ends_with("bytes") {
        format_bytes(quantity)
    } else {
        quantity.to_string()
    }
}

/// Current UTC time as RFC 3339 with milliseconds.
pub(crate) fn current_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[inline]
pub(crate) fn calculate_percentage(used: u64, capacity: u64) -> f64 {
    if capacity > 0 {
        (used as f64 / capacity as f64) * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod helper_tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0B");
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1024 * 1024), "1.00MB");
        assert_eq!(format_bytes(32 * 1024 * 1024 * 1024), "32.00GB");
    }

    #[test]
    fn test_format_quantity_by_kind() {
        assert_eq!(format_quantity("ram_in_bytes", 2048), "2.00KB");
        assert_eq!(format_quantity("processing_units", 3), "3");
    }

    #[test]
    fn test_timestamp_format() {
        let ts = current_timestamp();
        // YYYY-MM-DDTHH:MM:SS.mmmZ
        assert!(ts.contains('T'));
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), 24);
    }

    #[test]
    fn test_percentage_zero_capacity() {
        assert_eq!(calculate_percentage(5, 0), 0.0);
        assert!((calculate_percentage(1, 4) - 25.0).abs() < f64::EPSILON);
    }
}
