//! Time utilities for pocket-tunnel
//!
//! Timestamps cross the UI boundary as RFC 3339 strings with second
//! precision in UTC.

use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};

/// Current time as an RFC 3339 string.
///
/// # Examples
/// ```
/// let now = pt_core::time::now_rfc3339();
/// assert!(now.ends_with('Z'));
/// ```
pub fn now_rfc3339() -> String {
    format_rfc3339(Utc::now())
}

/// Format a UTC timestamp as RFC 3339
pub fn format_rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Format a filesystem timestamp as RFC 3339
pub fn system_time_rfc3339(at: SystemTime) -> String {
    format_rfc3339(DateTime::<Utc>::from(at))
}
