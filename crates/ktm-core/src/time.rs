//! Time utilities for ktm
//!
//! Timestamps are persisted as Unix seconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in seconds.
///
/// Returns 0 if the system clock is set before the Unix epoch.
///
/// # Examples
/// ```
/// use ktm_core::time::current_time_secs;
///
/// let now = current_time_secs();
/// assert!(now > 0);
/// ```
pub fn current_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Seconds elapsed since a given timestamp.
///
/// Returns 0 if the given time is in the future.
pub fn elapsed_secs(since: u64) -> u64 {
    current_time_secs().saturating_sub(since)
}
