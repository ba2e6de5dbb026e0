//! Interval progress logging for item sinks.
//!
//! A [`ProgressTracker`] counts items from any number of threads and logs a
//! line, with the throughput so far, each time the count crosses a multiple of
//! its interval.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::logging::{format_count, format_rate};

/// Thread-safe interval progress logger.
///
/// ```
/// use fgstage_lib::progress::ProgressTracker;
///
/// let tracker = ProgressTracker::new("Delivered").with_interval(100);
/// for _ in 0..250 {
///     tracker.record(1); // logs at 100 and 200
/// }
/// tracker.log_final(); // logs "Delivered 250 (complete)"
/// assert_eq!(tracker.count(), 250);
/// ```
pub struct ProgressTracker {
    message: String,
    interval: u64,
    count: AtomicU64,
    started: Instant,
}

impl ProgressTracker {
    /// Create a tracker logging every 10,000 items.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), interval: 10_000, count: AtomicU64::new(0), started: Instant::now() }
    }

    /// Log every `interval` items (at least 1).
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Add `n` items, logging once per interval boundary crossed.
    ///
    /// Returns true if the new total sits exactly on a boundary.
    pub fn record(&self, n: u64) -> bool {
        let before = self.count.fetch_add(n, Ordering::Relaxed);
        let after = before + n;
        for milestone in (before / self.interval + 1)..=(after / self.interval) {
            let at = milestone * self.interval;
            info!("{} {} ({})", self.message, format_count(at), format_rate(at, self.started.elapsed()));
        }
        after > 0 && after % self.interval == 0
    }

    /// Log the final total unless the last boundary already reported it.
    pub fn log_final(&self) {
        let count = self.count();
        if count > 0 && count % self.interval != 0 {
            info!("{} {} (complete)", self.message, format_count(count));
        }
    }

    /// Items recorded so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
