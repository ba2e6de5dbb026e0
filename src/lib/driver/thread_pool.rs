//! Fixed pool of worker threads sharing one channel.
//!
//! Each worker dequeues in arrival order, but with more than one worker the
//! completion order across workers is unspecified.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::Driver;
use super::core::DriverCore;
use super::handler::{FaultTolerance, Feeder, Handler};
use super::queue::{WorkQueue, WorkerSignal, spawn_worker};
use crate::errors::Result;

struct QueueFeeder<T> {
    core: Arc<DriverCore<T>>,
    queue: WorkQueue<T>,
    poll_timeout: Duration,
}

impl<T: Clone + Send + 'static> Feeder<T> for QueueFeeder<T> {
    fn feed(&self, item: T) -> Result<()> {
        self.core.feed_gate()?;
        self.queue.push(item, &self.core, self.poll_timeout)
    }
}

/// A channel plus a fixed number of polling workers.
pub(crate) struct FixedWorkers<T> {
    feeder: Arc<QueueFeeder<T>>,
    num_workers: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Clone + Send + 'static> FixedWorkers<T> {
    pub(crate) fn new(
        handler: Arc<dyn Handler<T>>,
        fault_tolerance: FaultTolerance,
        queue_capacity: usize,
        poll_timeout: Duration,
        num_workers: usize,
    ) -> Self {
        let core = Arc::new(DriverCore::new(handler, fault_tolerance));
        Self {
            feeder: Arc::new(QueueFeeder { core, queue: WorkQueue::new(queue_capacity), poll_timeout }),
            num_workers: num_workers.max(1),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn core(&self) -> &DriverCore<T> {
        &self.feeder.core
    }

    pub(crate) fn feeder(&self) -> Arc<dyn Feeder<T>> {
        self.feeder.clone()
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.feeder.queue.len()
    }

    pub(crate) fn start(&self) -> Result<()> {
        self.feeder.core.start(|| {
            let mut handles = self.handles.lock();
            for id in 0..self.num_workers {
                handles.push(spawn_worker(
                    Arc::clone(&self.feeder.core),
                    self.feeder.queue.receiver(),
                    self.feeder.poll_timeout,
                    WorkerSignal::new(),
                    format!("{}-worker-{id}", self.feeder.core.name()),
                )?);
            }
            Ok(())
        })
    }

    /// Request shutdown, wait for every worker to exit, then finalize the handler.
    pub(crate) fn finish(&self) -> Result<()> {
        self.feeder.core.begin_finish()?;
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(panic_info) = handle.join() {
                self.feeder.core.fail_with_panic("pool", panic_info);
            }
        }
        self.feeder.core.complete_finish();
        Ok(())
    }
}

/// Driver running a fixed number of worker threads over one shared channel.
pub struct ThreadPoolDriver<T> {
    workers: FixedWorkers<T>,
}

impl<T: Clone + Send + 'static> ThreadPoolDriver<T> {
    /// Create a pool of `num_threads` workers (at least one).
    ///
    /// `queue_capacity == 0` means unbounded; otherwise `feed()` blocks while the
    /// channel is full.
    #[must_use]
    pub fn new(
        handler: Arc<dyn Handler<T>>,
        fault_tolerance: FaultTolerance,
        queue_capacity: usize,
        poll_timeout: Duration,
        num_threads: usize,
    ) -> Self {
        Self {
            workers: FixedWorkers::new(
                handler,
                fault_tolerance,
                queue_capacity,
                poll_timeout,
                num_threads,
            ),
        }
    }

    /// Number of worker threads.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.workers.num_workers()
    }

    /// Items waiting in the channel.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.workers.queue_len()
    }
}

impl<T: Clone + Send + 'static> Driver<T> for ThreadPoolDriver<T> {
    fn core(&self) -> &DriverCore<T> {
        self.workers.core()
    }

    fn start(&self) -> Result<()> {
        self.workers.start()
    }

    fn feeder(&self) -> Arc<dyn Feeder<T>> {
        self.workers.feeder()
    }

    fn finish(&self) -> Result<()> {
        self.workers.finish()
    }
}
