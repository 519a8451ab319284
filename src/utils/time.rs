//! Time helpers

use chrono::{DateTime, Duration, Utc};

/// Render an uptime in seconds as `1d 2h 3m 4s`, omitting leading zero units.
pub fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    let mut parts = Vec::with_capacity(4);
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if days > 0 || hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if days > 0 || hours > 0 || minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    parts.push(format!("{}s", seconds));
    parts.join(" ")
}

/// Convert a fractional number of hours into a `chrono::Duration`.
///
/// Returns `None` for zero, negative or non-finite input. Windows too large to
/// represent saturate at `Duration::MAX`.
pub fn hours_to_duration(hours: f64) -> Option<Duration> {
    if !hours.is_finite() || hours <= 0.0 {
        return None;
    }
    let millis = (hours * 3_600_000.0).min(i64::MAX as f64) as i64;
    Some(Duration::try_milliseconds(millis).unwrap_or(Duration::MAX))
}

/// Seconds elapsed from `earlier` to `now`, clamped at zero.
pub fn seconds_since(earlier: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - earlier).num_seconds().max(0) as u64
}
