use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Render a duration with two decimals and a scaled unit (`1.94ms`, `2.34s`).
pub fn fmt_duration(d: Duration) -> String {
    format!("{d:.2?}")
}

/// Warn when more than `threshold` has passed since `start`.
pub fn log_if_slow(start: Instant, threshold: Duration, label: &str) {
    let elapsed = start.elapsed();
    if elapsed > threshold {
        tracing::warn!(
            duration = fmt_duration(elapsed),
            threshold = fmt_duration(threshold),
            "Slow upstream call: {label}"
        );
    }
}

/// Whole seconds since `ts`, or `None` if `ts` is in the future.
pub fn age_secs(ts: DateTime<Utc>, now: DateTime<Utc>) -> Option<u64> {
    (now - ts).to_std().ok().map(|d| d.as_secs())
}
