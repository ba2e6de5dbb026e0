//! Driver submitting each item to an elastic thread pool.
//!
//! Items are handed to an idle worker through a rendezvous channel. With no
//! idle worker, a new thread is spawned while the pool is below `max_threads`;
//! once saturated, the submission is rejected and the item runs on the feeding
//! thread instead, so no item is ever lost to rejection. Threads above
//! `core_threads` exit after `keep_alive` without work.
//!
//! With `max_threads == 0` every item runs inline and the driver behaves like
//! the synchronous one.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::Driver;
use super::core::{DriverCore, FeedGate};
use super::handler::{FaultTolerance, Feeder, Handler};
use super::prioritizable::Prioritizable;
use super::state::DriverState;
use crate::context::StageContext;
use crate::errors::{DriverError, Result};

#[derive(Debug)]
struct PoolLimits {
    core_threads: usize,
    max_threads: usize,
    threads: usize,
    next_id: usize,
    handles: Vec<JoinHandle<()>>,
}

struct ExecutorShared<T> {
    core: Arc<DriverCore<T>>,
    /// `None` once shutdown began.
    tx: Mutex<Option<Sender<T>>>,
    rx: Receiver<T>,
    limits: Mutex<PoolLimits>,
    keep_alive: Duration,
    pending: Mutex<VecDeque<T>>,
}

impl<T: Clone + Send + 'static> ExecutorShared<T> {
    /// Hand `item` to the pool. Returns the item back if the pool rejected it.
    fn submit(self: &Arc<Self>, item: T) -> Option<T> {
        // The sender lock is held across spawning so shutdown never misses a new thread.
        let tx = self.tx.lock();
        let Some(sender) = tx.as_ref() else { return Some(item) };
        match sender.try_send(item) {
            Ok(()) => None,
            Err(TrySendError::Full(item) | TrySendError::Disconnected(item)) => {
                let mut limits = self.limits.lock();
                if limits.threads < limits.max_threads {
                    self.spawn(&mut limits, item)
                } else {
                    Some(item)
                }
            }
        }
    }

    /// Start a worker whose first task is `first`. Returns the item if the thread
    /// could not be created.
    fn spawn(self: &Arc<Self>, limits: &mut PoolLimits, first: T) -> Option<T> {
        limits.handles.retain(|h| !h.is_finished());
        let id = limits.next_id;
        limits.next_id += 1;

        let slot = Arc::new(Mutex::new(Some(first)));
        let task = Arc::clone(&slot);
        let shared = Arc::clone(self);
        let name = format!("{}-executor-{id}", self.core.name());
        let spawned = std::thread::Builder::new().name(name.clone()).spawn(move || {
            let first = task.lock().take();
            let result =
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| shared.work(first)));
            let retired = result.unwrap_or_else(|panic_info| {
                shared.core.fail_with_panic(&name, panic_info);
                false
            });
            if !retired {
                shared.limits.lock().threads -= 1;
            }
        });

        match spawned {
            Ok(handle) => {
                limits.threads += 1;
                limits.handles.push(handle);
                None
            }
            Err(e) => {
                debug!("Could not spawn executor thread for '{}': {e}", self.core.name());
                slot.lock().take()
            }
        }
    }

    /// Worker loop. Returns true if the thread already removed itself from the count.
    fn work(&self, first: Option<T>) -> bool {
        let mut next = first;
        loop {
            if let Some(item) = next.take() {
                if let Err(cause) = self.core.process(item) {
                    self.core.fail(cause);
                    return false;
                }
            }
            if self.core.state() == DriverState::Error {
                return false;
            }
            if self.retire_if(|l| l.threads > l.max_threads) {
                return true;
            }
            match self.rx.recv_timeout(self.keep_alive) {
                Ok(item) => next = Some(item),
                Err(RecvTimeoutError::Timeout) => {
                    if self.retire_if(|l| l.threads > l.core_threads) {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }

    fn retire_if(&self, pred: impl Fn(&PoolLimits) -> bool) -> bool {
        let mut limits = self.limits.lock();
        if pred(&limits) {
            limits.threads -= 1;
            true
        } else {
            false
        }
    }

    fn dispatch(self: &Arc<Self>, item: T) -> Result<()> {
        match self.submit(item) {
            None => Ok(()),
            Some(item) => self.core.process_inline(item),
        }
    }
}

struct ExecutorFeeder<T>(Arc<ExecutorShared<T>>);

impl<T: Clone + Send + 'static> Feeder<T> for ExecutorFeeder<T> {
    fn feed(&self, item: T) -> Result<()> {
        let shared = &self.0;
        if shared.core.feed_gate()? == FeedGate::Early {
            let mut pending = shared.pending.lock();
            if shared.core.feed_gate()? == FeedGate::Early {
                pending.push_back(item);
                return Ok(());
            }
        }
        shared.dispatch(item)
    }
}

/// Elastic-pool driver with runtime-adjustable core/max thread counts.
pub struct ExecutorDriver<T> {
    shared: Arc<ExecutorShared<T>>,
}

impl<T: Clone + Send + 'static> ExecutorDriver<T> {
    /// Create the driver.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidParameter`] if `core_threads > max_threads`.
    pub fn new(
        handler: Arc<dyn Handler<T>>,
        fault_tolerance: FaultTolerance,
        core_threads: usize,
        max_threads: usize,
        keep_alive: Duration,
        context: Option<Arc<StageContext>>,
    ) -> Result<Self> {
        if core_threads > max_threads {
            return Err(DriverError::InvalidParameter {
                parameter: "core-threads".to_string(),
                reason: format!("{core_threads} exceeds max-threads {max_threads}"),
            });
        }
        let mut core = DriverCore::new(handler, fault_tolerance);
        if let Some(context) = context {
            core = core.with_timing(context);
        }
        let (tx, rx) = bounded(0);
        Ok(Self {
            shared: Arc::new(ExecutorShared {
                core: Arc::new(core),
                tx: Mutex::new(Some(tx)),
                rx,
                limits: Mutex::new(PoolLimits {
                    core_threads,
                    max_threads,
                    threads: 0,
                    next_id: 0,
                    handles: Vec::new(),
                }),
                keep_alive,
                pending: Mutex::new(VecDeque::new()),
            }),
        })
    }

    /// Threads currently alive in the pool.
    #[must_use]
    pub fn active_threads(&self) -> usize {
        self.shared.limits.lock().threads
    }

    /// Current `(core, max)` thread bounds.
    #[must_use]
    pub fn thread_bounds(&self) -> (usize, usize) {
        let limits = self.shared.limits.lock();
        (limits.core_threads, limits.max_threads)
    }
}

impl<T: Clone + Send + 'static> Driver<T> for ExecutorDriver<T> {
    fn core(&self) -> &DriverCore<T> {
        &self.shared.core
    }

    fn start(&self) -> Result<()> {
        let mut pending = self.shared.pending.lock();
        self.shared.core.start(|| Ok(()))?;
        while let Some(item) = pending.pop_front() {
            self.shared.dispatch(item)?;
        }
        Ok(())
    }

    fn feeder(&self) -> Arc<dyn Feeder<T>> {
        Arc::new(ExecutorFeeder(Arc::clone(&self.shared)))
    }

    fn finish(&self) -> Result<()> {
        self.shared.core.begin_finish()?;
        // Dropping the sender lets idle workers see a disconnect once in-flight items complete.
        self.shared.tx.lock().take();
        let handles = std::mem::take(&mut self.shared.limits.lock().handles);
        for handle in handles {
            if let Err(panic_info) = handle.join() {
                self.shared.core.fail_with_panic("executor", panic_info);
            }
        }
        self.shared.core.complete_finish();
        Ok(())
    }
}

impl<T: Clone + Send + 'static> Prioritizable for ExecutorDriver<T> {
    fn stage(&self) -> &str {
        self.shared.core.name()
    }

    fn priority(&self) -> usize {
        self.shared.limits.lock().max_threads
    }

    fn increase_priority(&self, amount: usize) -> Result<()> {
        self.shared.core.feed_gate().map_err(|_| self.shared.core.illegal("increase_priority"))?;
        let mut limits = self.shared.limits.lock();
        limits.max_threads += amount;
        limits.core_threads = (limits.core_threads + amount).min(limits.max_threads);
        debug!(
            "Stage '{}' executor bounds now core={} max={}",
            self.stage(),
            limits.core_threads,
            limits.max_threads
        );
        Ok(())
    }

    fn decrease_priority(&self, amount: usize) -> Result<()> {
        self.shared.core.feed_gate().map_err(|_| self.shared.core.illegal("decrease_priority"))?;
        let mut limits = self.shared.limits.lock();
        limits.max_threads = limits.max_threads.saturating_sub(amount);
        limits.core_threads = limits.core_threads.saturating_sub(amount).min(limits.max_threads);
        debug!(
            "Stage '{}' executor bounds now core={} max={}",
            self.stage(),
            limits.core_threads,
            limits.max_threads
        );
        Ok(())
    }
}
