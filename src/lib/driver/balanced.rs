//! Queue-backed driver whose worker count is adjusted while it runs.
//!
//! While a runnable worker exists, `feed()` enqueues. Once the pool has
//! shrunk to a single worker that is winding down (or to none), `feed()`
//! processes on the calling thread instead, so the stage keeps moving with no
//! pool at all. `decrease_priority` never stops the last live worker: it is
//! only told to stop once the queue is empty.
//!
//! A stopped worker stays in the registry until its thread has left the loop,
//! so `finish()` always joins every thread that may still call the handler.
//! Items fed before `start()` are buffered and handed over by `start()`.

use log::debug;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::Driver;
use super::core::{DriverCore, FeedGate};
use super::handler::{FaultTolerance, Feeder, Handler};
use super::prioritizable::Prioritizable;
use super::queue::{WorkQueue, WorkerMode, WorkerSignal, spawn_worker};
use super::state::DriverState;
use crate::context::StageContext;
use crate::errors::Result;

struct WorkerEntry {
    signal: Arc<WorkerSignal>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerEntry {
    fn is_runnable(&self) -> bool {
        self.signal.mode() == WorkerMode::Runnable
    }

    /// Counted toward the priority: not yet told to stop outright.
    fn is_live(&self) -> bool {
        self.signal.mode() != WorkerMode::Stop
    }
}

struct Registry {
    workers: BTreeMap<usize, WorkerEntry>,
    next_id: usize,
    /// Workers to spawn at `start()`; adjusted by priority changes made before then.
    initial: usize,
}

impl Registry {
    fn live(&self) -> usize {
        self.workers.values().filter(|w| w.is_live()).count()
    }

    /// Remove entries whose thread is gone, returning their handles.
    fn take_exited(&mut self) -> Vec<JoinHandle<()>> {
        let exited: Vec<usize> =
            self.workers.iter().filter(|(_, w)| w.signal.has_exited()).map(|(&id, _)| id).collect();
        exited.iter().filter_map(|id| self.workers.remove(id)).filter_map(|w| w.handle).collect()
    }
}

struct BalancedShared<T> {
    core: Arc<DriverCore<T>>,
    queue: WorkQueue<T>,
    poll_timeout: Duration,
    registry: Mutex<Registry>,
    pending: Mutex<VecDeque<T>>,
}

impl<T: Clone + Send + 'static> BalancedShared<T> {
    fn spawn(&self, registry: &mut Registry) -> Result<()> {
        let id = registry.next_id;
        registry.next_id += 1;
        let signal = WorkerSignal::new();
        let handle = spawn_worker(
            Arc::clone(&self.core),
            self.queue.receiver(),
            self.poll_timeout,
            Arc::clone(&signal),
            format!("{}-balanced-{id}", self.core.name()),
        )?;
        registry.workers.insert(id, WorkerEntry { signal, handle: Some(handle) });
        Ok(())
    }

    /// True when no worker will pick up a queued item soon.
    fn should_run_inline(&self) -> bool {
        !self.registry.lock().workers.values().any(WorkerEntry::is_runnable)
    }

    fn drain_inline(&self) -> Result<()> {
        while let Some(item) = self.queue.try_pop() {
            self.core.process_inline(item)?;
        }
        Ok(())
    }

    fn join(&self, handle: JoinHandle<()>) {
        if let Err(panic_info) = handle.join() {
            self.core.fail_with_panic("balanced", panic_info);
        }
    }
}

impl<T: Clone + Send + 'static> Feeder<T> for BalancedShared<T> {
    fn feed(&self, item: T) -> Result<()> {
        if self.core.feed_gate()? == FeedGate::Early {
            let mut pending = self.pending.lock();
            // start() may have handed the buffer over while we waited for the lock
            if self.core.feed_gate()? == FeedGate::Early {
                pending.push_back(item);
                return Ok(());
            }
        }
        if self.should_run_inline() {
            return self.core.process_inline(item);
        }
        self.queue.push(item, &self.core, self.poll_timeout)?;
        // The last runnable worker may have been told to stop after the check above.
        if self.should_run_inline() { self.drain_inline() } else { Ok(()) }
    }
}

/// Driver with an adjustable set of queue workers and an inline fallback.
pub struct BalancedPoolDriver<T> {
    shared: Arc<BalancedShared<T>>,
}

impl<T: Clone + Send + 'static> BalancedPoolDriver<T> {
    /// Create the driver with `initial_workers` workers spawned at `start()`.
    ///
    /// `queue_capacity == 0` means unbounded.
    #[must_use]
    pub fn new(
        handler: Arc<dyn Handler<T>>,
        fault_tolerance: FaultTolerance,
        queue_capacity: usize,
        poll_timeout: Duration,
        initial_workers: usize,
        context: Option<Arc<StageContext>>,
    ) -> Self {
        let mut core = DriverCore::new(handler, fault_tolerance);
        if let Some(context) = context {
            core = core.with_timing(context);
        }
        Self {
            shared: Arc::new(BalancedShared {
                core: Arc::new(core),
                queue: WorkQueue::new(queue_capacity),
                poll_timeout,
                registry: Mutex::new(Registry {
                    workers: BTreeMap::new(),
                    next_id: 0,
                    initial: initial_workers,
                }),
                pending: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Items waiting in the queue.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    /// Items fed before `start()` and not yet handed over.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Registered workers still in [`WorkerMode::Runnable`].
    #[must_use]
    pub fn runnable_workers(&self) -> usize {
        self.shared.registry.lock().workers.values().filter(|w| w.is_runnable()).count()
    }
}

impl<T: Clone + Send + 'static> Driver<T> for BalancedPoolDriver<T> {
    fn core(&self) -> &DriverCore<T> {
        &self.shared.core
    }

    fn start(&self) -> Result<()> {
        // Early feeders wait on the buffer lock; priority changes wait for the initial workers.
        let mut pending = self.shared.pending.lock();
        let mut registry = self.shared.registry.lock();
        self.shared.core.start(|| {
            for _ in 0..registry.initial {
                self.shared.spawn(&mut registry)?;
            }
            Ok(())
        })?;
        let no_workers = registry.workers.is_empty();
        drop(registry);
        while let Some(item) = pending.pop_front() {
            if no_workers {
                self.shared.core.process_inline(item)?;
            } else {
                self.shared.queue.push(item, &self.shared.core, self.shared.poll_timeout)?;
            }
        }
        Ok(())
    }

    fn feeder(&self) -> Arc<dyn Feeder<T>> {
        self.shared.clone()
    }

    fn finish(&self) -> Result<()> {
        self.shared.core.begin_finish()?;
        let workers = std::mem::take(&mut self.shared.registry.lock().workers);
        for handle in workers.into_values().filter_map(|w| w.handle) {
            self.shared.join(handle);
        }
        // Left behind when the last worker stopped before the queue was empty.
        if self.shared.core.state() != DriverState::Error {
            while let Some(item) = self.shared.queue.try_pop() {
                if let Err(cause) = self.shared.core.process(item) {
                    self.shared.core.fail(cause);
                    break;
                }
            }
        }
        self.shared.core.complete_finish();
        Ok(())
    }
}

impl<T: Clone + Send + 'static> Prioritizable for BalancedPoolDriver<T> {
    fn stage(&self) -> &str {
        self.shared.core.name()
    }

    fn priority(&self) -> usize {
        let registry = self.shared.registry.lock();
        match self.shared.core.feed_gate() {
            Ok(FeedGate::Early) => registry.initial,
            _ => registry.live(),
        }
    }

    fn increase_priority(&self, amount: usize) -> Result<()> {
        let mut registry = self.shared.registry.lock();
        if self.shared.core.feed_gate().map_err(|_| self.shared.core.illegal("increase_priority"))?
            == FeedGate::Early
        {
            registry.initial += amount;
            return Ok(());
        }
        if amount == 0 {
            return Ok(());
        }
        for handle in registry.take_exited() {
            self.shared.join(handle);
        }
        for _ in 0..amount {
            self.shared.spawn(&mut registry)?;
        }
        debug!("Stage '{}' now has {} workers", self.stage(), registry.live());
        Ok(())
    }

    fn decrease_priority(&self, amount: usize) -> Result<()> {
        {
            let mut registry = self.shared.registry.lock();
            if self.shared.core.feed_gate().map_err(|_| self.shared.core.illegal("decrease_priority"))?
                == FeedGate::Early
            {
                registry.initial = registry.initial.saturating_sub(amount);
                return Ok(());
            }
        }

        for _ in 0..amount {
            let mut registry = self.shared.registry.lock();
            if registry.live() <= 1 {
                for last in registry.workers.values().filter(|w| w.is_live()) {
                    last.signal.set(WorkerMode::StopWhenEmpty);
                }
                break;
            }
            let victim = registry.workers.iter().rev().find(|(_, w)| w.is_runnable());
            let Some((&id, entry)) = victim else { break };
            entry.signal.set(WorkerMode::Stop);
            let signal = Arc::clone(&entry.signal);
            drop(registry);

            // The handle stays registered until the thread is out of the loop; if
            // finish() took it meanwhile, finish() joins it and the remove is a no-op.
            signal.wait_exited();
            let removed = self.shared.registry.lock().workers.remove(&id);
            if let Some(handle) = removed.and_then(|w| w.handle) {
                self.shared.join(handle);
            }
        }
        debug!("Stage '{}' now has {} workers", self.stage(), self.shared.registry.lock().live());
        Ok(())
    }
}
