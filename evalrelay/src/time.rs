//! Time-related utility functions.
//!
//! Lifecycle log rows and generated script names carry local wall-clock
//! timestamps. The helpers here keep the formats in one place.

use chrono::{Local, NaiveDateTime};

/// Timestamp format used in lifecycle log rows, e.g. `2024-05-01 13:45:02`.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date format embedded in generated batch script names, e.g. `20240501`.
pub const SCRIPT_DATE_FORMAT: &str = "%Y%m%d";

/// Returns the current local time formatted for a lifecycle log row.
pub fn log_timestamp() -> String {
    Local::now().format(LOG_TIMESTAMP_FORMAT).to_string()
}

/// Returns the current local date formatted for a script name.
pub fn script_date() -> String {
    Local::now().format(SCRIPT_DATE_FORMAT).to_string()
}

/// Parses a lifecycle log timestamp.
///
/// # Example
///
/// ```
/// use evalrelay::time::{log_timestamp, parse_log_timestamp};
///
/// assert!(parse_log_timestamp(&log_timestamp()).is_some());
/// assert!(parse_log_timestamp("yesterday").is_none());
/// ```
pub fn parse_log_timestamp(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim(), LOG_TIMESTAMP_FORMAT).ok()
}
