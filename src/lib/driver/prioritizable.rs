//! Drivers whose degree of parallelism can change while they run.

use crate::errors::Result;

/// A driver the [`DriverController`](crate::control::DriverController) can grow or shrink.
///
/// "Priority" here means worker count, not OS scheduling priority. Prioritizable
/// drivers also time every `process()` call and raise a
/// [`TimingEvent`](crate::context::TimingEvent) per item.
pub trait Prioritizable: Send + Sync {
    /// Stage name, matching the `stage` of the timing events the driver raises.
    fn stage(&self) -> &str;

    /// Current degree of parallelism.
    fn priority(&self) -> usize;

    /// Add `amount` workers.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread could not be spawned.
    fn increase_priority(&self, amount: usize) -> Result<()>;

    /// Remove up to `amount` workers. Never cancels in-flight work.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver is in a state where workers cannot change.
    fn decrease_priority(&self, amount: usize) -> Result<()>;
}
