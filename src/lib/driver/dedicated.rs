//! Driver with exactly one worker thread draining a FIFO channel.
//!
//! With a bounded channel, `feed()` blocks while the channel is full; that
//! blocking is the backpressure an upstream stage sees. Items are processed in
//! feed order.

use std::sync::Arc;
use std::time::Duration;

use super::Driver;
use super::core::DriverCore;
use super::handler::{FaultTolerance, Feeder, Handler};
use super::thread_pool::FixedWorkers;
use crate::errors::Result;

/// Single-worker queue driver.
pub struct DedicatedThreadDriver<T> {
    worker: FixedWorkers<T>,
}

impl<T: Clone + Send + 'static> DedicatedThreadDriver<T> {
    /// Create the driver. `queue_capacity == 0` means unbounded.
    #[must_use]
    pub fn new(
        handler: Arc<dyn Handler<T>>,
        fault_tolerance: FaultTolerance,
        queue_capacity: usize,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            worker: FixedWorkers::new(handler, fault_tolerance, queue_capacity, poll_timeout, 1),
        }
    }

    /// Items waiting in the channel.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.worker.queue_len()
    }
}

impl<T: Clone + Send + 'static> Driver<T> for DedicatedThreadDriver<T> {
    fn core(&self) -> &DriverCore<T> {
        self.worker.core()
    }

    fn start(&self) -> Result<()> {
        self.worker.start()
    }

    fn feeder(&self) -> Arc<dyn Feeder<T>> {
        self.worker.feeder()
    }

    fn finish(&self) -> Result<()> {
        self.worker.finish()
    }
}
