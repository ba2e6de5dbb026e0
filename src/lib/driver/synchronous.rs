//! Driver that processes every item on the feeding thread.
//!
//! Items fed before `start()` are buffered and replayed, in order, before
//! `start()` returns.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::core::{DriverCore, FeedGate};
use super::handler::{FaultTolerance, Feeder, Handler};
use super::Driver;
use crate::errors::Result;

struct SynchronousShared<T> {
    core: Arc<DriverCore<T>>,
    pending: Mutex<VecDeque<T>>,
}

impl<T: Clone + Send + 'static> Feeder<T> for SynchronousShared<T> {
    fn feed(&self, item: T) -> Result<()> {
        if self.core.feed_gate()? == FeedGate::Early {
            let mut pending = self.pending.lock();
            // start() may have replayed the buffer while we waited for the lock
            if self.core.feed_gate()? == FeedGate::Early {
                pending.push_back(item);
                return Ok(());
            }
        }
        self.core.process_inline(item)
    }
}

/// Inline driver: no worker threads, no queue.
pub struct SynchronousDriver<T> {
    shared: Arc<SynchronousShared<T>>,
}

impl<T: Clone + Send + 'static> SynchronousDriver<T> {
    /// Create a driver for `handler`.
    #[must_use]
    pub fn new(handler: Arc<dyn Handler<T>>, fault_tolerance: FaultTolerance) -> Self {
        let core = Arc::new(DriverCore::new(handler, fault_tolerance));
        Self { shared: Arc::new(SynchronousShared { core, pending: Mutex::new(VecDeque::new()) }) }
    }

    /// Number of items buffered while not running.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }
}

impl<T: Clone + Send + 'static> Driver<T> for SynchronousDriver<T> {
    fn core(&self) -> &DriverCore<T> {
        &self.shared.core
    }

    fn start(&self) -> Result<()> {
        // Hold the buffer across the RUNNING transition so early feeders queue behind the replay.
        let mut pending = self.shared.pending.lock();
        self.shared.core.start(|| Ok(()))?;
        while let Some(item) = pending.pop_front() {
            self.shared.core.process_inline(item)?;
        }
        Ok(())
    }

    fn feeder(&self) -> Arc<dyn Feeder<T>> {
        self.shared.clone()
    }

    fn finish(&self) -> Result<()> {
        self.shared.core.begin_finish()?;
        self.shared.core.complete_finish();
        Ok(())
    }
}
