//! Adaptive worker-count control driven by per-item latency.
//!
//! Prioritizable drivers raise a [`TimingEvent`] for every item they process.
//! A [`DriverController`] listens for those events on a [`StageContext`],
//! collects them into batches and, once a batch reaches its minimum size,
//! hands it to a [`ControlStrategy`]. The strategy returns
//! [`PriorityChange`]s which the controller applies to the drivers it manages.
//!
//! # Strategies
//!
//! - [`EqualizingStrategy`]: pull every stage's mean latency towards the batch mean.
//! - [`WallClockThresholdStrategy`]: grow any stage whose mean reaches a fixed latency.
//! - [`ExperimentalStrategy`]: per-stage hill-climbing with random exploration.

mod equalizing;
mod experimental;
mod wall_clock;

pub use equalizing::EqualizingStrategy;
pub use experimental::ExperimentalStrategy;
pub use wall_clock::WallClockThresholdStrategy;

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::context::{StageContext, StageEvent, StageEventListener, TimingEvent};
use crate::driver::Prioritizable;
use crate::errors::{DriverError, Result};

/// Direction of a worker-count change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// One more worker.
    Increase,
    /// One fewer worker.
    Decrease,
}

impl Action {
    /// The opposite action.
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            Self::Increase => Self::Decrease,
            Self::Decrease => Self::Increase,
        }
    }
}

/// A strategy's request to change one stage's worker count by one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorityChange {
    pub stage: String,
    pub action: Action,
}

impl PriorityChange {
    #[must_use]
    pub fn new(stage: impl Into<String>, action: Action) -> Self {
        Self { stage: stage.into(), action }
    }
}

/// Decides, per batch of timing events, which stages should grow or shrink.
pub trait ControlStrategy: Send {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    /// Inspect one batch and return the changes to apply.
    fn evaluate(&mut self, batch: &[TimingEvent]) -> Vec<PriorityChange>;
}

/// Mean latencies of one batch, overall and per stage.
#[derive(Debug, Clone, Default)]
pub struct BatchStats {
    per_stage: BTreeMap<String, (Duration, u32)>,
    total: Duration,
    count: u32,
}

impl BatchStats {
    /// Summarize `batch`.
    #[must_use]
    pub fn from_events(batch: &[TimingEvent]) -> Self {
        let mut stats = Self::default();
        for event in batch {
            let (sum, n) = stats.per_stage.entry(event.stage.clone()).or_default();
            *sum += event.latency;
            *n += 1;
            stats.total += event.latency;
            stats.count += 1;
        }
        stats
    }

    /// Mean of every event in the batch.
    #[must_use]
    pub fn overall_mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.total / self.count)
    }

    /// Mean latency of one stage.
    #[must_use]
    pub fn stage_mean(&self, stage: &str) -> Option<Duration> {
        self.per_stage.get(stage).map(|(sum, n)| *sum / *n)
    }

    /// `(stage, mean)` for every stage in the batch, in stage-name order.
    pub fn stage_means(&self) -> impl Iterator<Item = (&str, Duration)> {
        self.per_stage.iter().map(|(stage, (sum, n))| (stage.as_str(), *sum / *n))
    }
}

struct ControllerShared {
    context: Arc<StageContext>,
    min_batch_size: usize,
    wait_timeout: Duration,
    buffer: Mutex<Vec<TimingEvent>>,
    ready: Condvar,
    drivers: RwLock<HashMap<String, Arc<dyn Prioritizable>>>,
    strategy: Mutex<Box<dyn ControlStrategy>>,
    stopped: AtomicBool,
    batches: AtomicU64,
}

impl StageEventListener for ControllerShared {
    fn notify(&self, event: &StageEvent) {
        if let StageEvent::Timing(timing) = event {
            let mut buffer = self.buffer.lock();
            buffer.push(timing.clone());
            if buffer.len() >= self.min_batch_size {
                self.ready.notify_one();
            }
        }
    }
}

impl ControllerShared {
    /// Block until a full batch is buffered; `None` once the controller should exit.
    fn next_batch(&self) -> Option<Vec<TimingEvent>> {
        let mut buffer = self.buffer.lock();
        loop {
            if self.stopped.load(Ordering::Acquire) || self.context.is_complete() {
                return None;
            }
            if buffer.len() >= self.min_batch_size {
                return Some(std::mem::take(&mut *buffer));
            }
            self.ready.wait_for(&mut buffer, self.wait_timeout);
        }
    }

    fn dispatch(&self, batch: &[TimingEvent]) -> Vec<PriorityChange> {
        let changes = {
            let mut strategy = self.strategy.lock();
            debug!("Dispatching {} timing events to the {} strategy", batch.len(), strategy.name());
            strategy.evaluate(batch)
        };

        // Resizing may join worker threads; do it without holding the map.
        let targets: Vec<(&PriorityChange, Arc<dyn Prioritizable>)> = {
            let drivers = self.drivers.read();
            changes
                .iter()
                .filter_map(|change| drivers.get(&change.stage).map(|d| (change, Arc::clone(d))))
                .collect()
        };
        for (change, driver) in targets {
            let result = match change.action {
                Action::Increase => driver.increase_priority(1),
                Action::Decrease => driver.decrease_priority(1),
            };
            match result {
                Ok(()) => info!(
                    "{:?}d priority of stage '{}' to {}",
                    change.action,
                    change.stage,
                    driver.priority()
                ),
                Err(e) => warn!("Could not adjust stage '{}': {e}", change.stage),
            }
        }
        self.batches.fetch_add(1, Ordering::Release);
        changes
    }
}

/// Batches timing events from a context and applies a strategy's decisions.
///
/// Creating the controller registers it as a listener on the context.
/// [`start`](Self::start) spawns the dispatch thread, which runs until the
/// context signals completion or [`stop`](Self::stop) is called. A partial
/// batch still buffered at that point is discarded.
pub struct DriverController {
    shared: Arc<ControllerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DriverController {
    /// Create a controller listening on `context`.
    #[must_use]
    pub fn new(
        context: Arc<StageContext>,
        strategy: Box<dyn ControlStrategy>,
        min_batch_size: usize,
        wait_timeout: Duration,
    ) -> Self {
        let shared = Arc::new(ControllerShared {
            context: Arc::clone(&context),
            min_batch_size: min_batch_size.max(1),
            wait_timeout,
            buffer: Mutex::new(Vec::new()),
            ready: Condvar::new(),
            drivers: RwLock::new(HashMap::new()),
            strategy: Mutex::new(strategy),
            stopped: AtomicBool::new(false),
            batches: AtomicU64::new(0),
        });
        context.register_listener(shared.clone());
        Self { shared, handle: Mutex::new(None) }
    }

    /// Put `driver` under control, keyed by its stage name.
    pub fn manage(&self, driver: Arc<dyn Prioritizable>) {
        debug!("Controller now manages stage '{}'", driver.stage());
        self.shared.drivers.write().insert(driver.stage().to_string(), driver);
    }

    /// Stage names under control, sorted.
    #[must_use]
    pub fn managed_stages(&self) -> Vec<String> {
        let mut stages: Vec<String> = self.shared.drivers.read().keys().cloned().collect();
        stages.sort_unstable();
        stages
    }

    /// Events buffered towards the next batch.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    /// Batches handed to the strategy so far.
    #[must_use]
    pub fn batches_dispatched(&self) -> u64 {
        self.shared.batches.load(Ordering::Acquire)
    }

    /// Run the strategy on `batch` now and apply its changes, bypassing the buffer.
    pub fn dispatch(&self, batch: &[TimingEvent]) -> Vec<PriorityChange> {
        self.shared.dispatch(batch)
    }

    /// Spawn the dispatch thread. Calling it again while running is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Spawn`] if the thread could not be created.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("driver-controller".to_string())
            .spawn(move || {
                while let Some(batch) = shared.next_batch() {
                    shared.dispatch(&batch);
                }
                debug!(
                    "Driver controller exiting after {} batches",
                    shared.batches.load(Ordering::Relaxed)
                );
            })
            .map_err(|source| DriverError::Spawn { stage: "controller".to_string(), source })?;
        *handle = Some(spawned);
        Ok(())
    }

    /// Stop the dispatch thread and wait for it to exit.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.ready.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Driver controller thread panicked");
            }
        }
    }
}

impl Drop for DriverController {
    fn drop(&mut self) {
        self.stop();
    }
}
