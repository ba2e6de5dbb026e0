//! Formatting helpers and per-driver summary logging.

use std::time::Duration;

use crate::driver::DriverState;

/// Formats an integer with thousands separators.
///
/// # Examples
///
/// ```
/// use fgstage_lib::logging::format_count;
///
/// assert_eq!(format_count(0), "0");
/// assert_eq!(format_count(999), "999");
/// assert_eq!(format_count(1_234_567), "1,234,567");
/// ```
#[must_use]
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Formats a fraction (0.0-1.0) as a percentage.
///
/// # Examples
///
/// ```
/// use fgstage_lib::logging::format_percent;
///
/// assert_eq!(format_percent(0.9543, 2), "95.43%");
/// assert_eq!(format_percent(1.0, 0), "100%");
/// ```
#[must_use]
pub fn format_percent(value: f64, decimals: usize) -> String {
    format!("{:.decimals$}%", value * 100.0)
}

/// Formats a duration for humans, with millisecond precision below one second.
///
/// # Examples
///
/// ```
/// use fgstage_lib::logging::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
/// assert_eq!(format_duration(Duration::from_secs(45)), "45s");
/// assert_eq!(format_duration(Duration::from_secs(135)), "2m 15s");
/// assert_eq!(format_duration(Duration::from_secs(5400)), "1h 30m");
/// ```
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return format!("{}ms", duration.as_millis());
    }
    match secs {
        s if s < 60 => format!("{s}s"),
        s if s < 3600 => match (s / 60, s % 60) {
            (m, 0) => format!("{m}m"),
            (m, r) => format!("{m}m {r}s"),
        },
        s => match (s / 3600, (s % 3600) / 60) {
            (h, 0) => format!("{h}h"),
            (h, m) => format!("{h}h {m}m"),
        },
    }
}

/// Formats a throughput, switching to items per minute below one per second.
///
/// # Examples
///
/// ```
/// use fgstage_lib::logging::format_rate;
/// use std::time::Duration;
///
/// assert_eq!(format_rate(1000, Duration::from_secs(1)), "1,000 items/s");
/// assert_eq!(format_rate(30, Duration::from_secs(60)), "30.0 items/min");
/// ```
#[must_use]
pub fn format_rate(count: u64, duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 0.001 {
        return format!("{} items/s", format_count(count));
    }
    let rate = count as f64 / secs;
    if rate >= 1.0 {
        format!("{} items/s", format_count(rate as u64))
    } else {
        format!("{:.1} items/min", count as f64 / (secs / 60.0))
    }
}

/// Logs how a driver ended: final state, throughput and failure counts.
///
/// Failures are logged at `warn` when any fatal error was recorded.
pub fn log_driver_summary(
    name: &str,
    state: DriverState,
    processed: u64,
    failures: usize,
    fatal: usize,
    elapsed: Duration,
) {
    log::info!(
        "Stage '{name}' finished in state {state}: {} items in {} ({})",
        format_count(processed),
        format_duration(elapsed),
        format_rate(processed, elapsed)
    );
    if failures > 0 {
        let attempted = processed + failures as u64;
        log::info!(
            "  Stage '{name}' processing failures: {} ({} of attempts)",
            format_count(failures as u64),
            format_percent(failures as f64 / attempted as f64, 2)
        );
    }
    if fatal > 0 {
        log::warn!("  Stage '{name}' recorded {fatal} fatal error(s)");
    }
}
