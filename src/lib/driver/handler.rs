//! The unit-of-work contract a driver runs, and the policy applied to its failures.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::{DriverError, HandlerError};

/// A stage's business logic.
///
/// A driver calls `preprocess` once before any item, `process` once per item,
/// `postprocess` once after the last item, and `release` exactly once at the
/// very end, even when an earlier step failed.
///
/// `process` is invoked concurrently when the driver runs more than one worker,
/// so implementations keep any mutable state behind their own synchronisation.
///
/// Drivers require `T: Clone`: each item is cloned once before `process` so a
/// failed item can be kept in the driver's failure log.
pub trait Handler<T>: Send + Sync {
    /// Name of the stage; keys timing events, failure records and logs.
    fn name(&self) -> &str;

    /// Prepare for processing.
    fn preprocess(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Process a single item, typically feeding results to a downstream [`Feeder`].
    fn process(&self, item: T) -> Result<(), HandlerError>;

    /// Flush any state after the last item.
    fn postprocess(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Best-effort cleanup.
    fn release(&self) {}
}

/// Entry point used to hand a work item to a driver (or to any downstream sink).
pub trait Feeder<T>: Send + Sync {
    /// Hand over an item.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::IllegalState`] if the receiver is in `ERROR` or is
    /// shutting down, or [`DriverError::Processing`] if the item was processed
    /// inline and failed fatally.
    fn feed(&self, item: T) -> Result<(), DriverError>;
}

impl<T, F: Feeder<T> + ?Sized> Feeder<T> for Arc<F> {
    fn feed(&self, item: T) -> Result<(), DriverError> {
        (**self).feed(item)
    }
}

/// Per-driver policy for failures raised by [`Handler::process`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultTolerance {
    /// Every failure halts the worker.
    #[default]
    #[value(name = "none")]
    None,
    /// Declared processing failures are recorded and skipped.
    #[value(name = "checked")]
    Checked,
    /// All failures are recorded and skipped.
    #[value(name = "all")]
    All,
}

impl FaultTolerance {
    /// Returns true if the failure should be swallowed rather than re-raised.
    #[must_use]
    pub fn tolerates(self, error: &HandlerError) -> bool {
        match self {
            FaultTolerance::None => false,
            FaultTolerance::Checked => error.is_declared(),
            FaultTolerance::All => true,
        }
    }
}
