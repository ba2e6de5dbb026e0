//! State, failure bookkeeping and lifecycle steps shared by every driver variant.

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use super::handler::{FaultTolerance, Handler};
use super::state::{DriverState, StateCell};
use crate::context::{StageContext, StageEvent, TimingEvent};
use crate::errors::{DriverError, HandlerError, Result};
use crate::logging::log_driver_summary;

/// A failure raised by `process()` for one item.
#[derive(Debug, Clone)]
pub struct ProcessingFailure<T> {
    /// Stage whose handler failed.
    pub stage: String,
    /// The item being processed.
    pub item: T,
    /// What the handler raised.
    pub cause: Arc<HandlerError>,
    /// Driver state when the failure was observed.
    pub state: DriverState,
}

/// A failure that moved a driver to `ERROR`.
#[derive(Debug, Clone)]
pub struct FatalError {
    /// Stage whose driver failed.
    pub stage: String,
    /// The underlying failure.
    pub cause: Arc<HandlerError>,
}

/// Append-only list safe to push from any worker.
#[derive(Debug)]
pub struct ErrorLog<E> {
    entries: Mutex<Vec<E>>,
}

impl<E: Clone> ErrorLog<E> {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    /// Append an entry.
    pub fn push(&self, entry: E) {
        self.entries.lock().push(entry);
    }

    /// Copy of the current entries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<E> {
        self.entries.lock().clone()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<E: Clone> Default for ErrorLog<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// How an early `feed()` (before `RUNNING`) or a running one must be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FeedGate {
    /// Not running yet; the variant buffers or queues.
    Early,
    /// Running.
    Running,
}

/// Extract a human-readable message from a panic payload.
#[must_use]
pub fn extract_panic_message(panic_info: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// The part of a driver common to every concurrency strategy.
///
/// Owns the handler, the lifecycle state, both failure logs and the
/// fault-tolerance policy. Variants hold it behind an `Arc` so that workers and
/// feeders can reach it.
pub struct DriverCore<T> {
    name: String,
    handler: Arc<dyn Handler<T>>,
    state: StateCell,
    fault_tolerance: FaultTolerance,
    failures: ErrorLog<ProcessingFailure<T>>,
    fatal: ErrorLog<FatalError>,
    processed: AtomicU64,
    released: AtomicBool,
    started: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    /// Set for prioritizable variants: every `process()` is timed and reported here.
    timing: Option<Arc<StageContext>>,
}

impl<T: Clone + Send + 'static> DriverCore<T> {
    pub(crate) fn new(handler: Arc<dyn Handler<T>>, fault_tolerance: FaultTolerance) -> Self {
        Self {
            name: handler.name().to_string(),
            handler,
            state: StateCell::new(),
            fault_tolerance,
            failures: ErrorLog::new(),
            fatal: ErrorLog::new(),
            processed: AtomicU64::new(0),
            released: AtomicBool::new(false),
            started: AtomicBool::new(false),
            started_at: Mutex::new(None),
            timing: None,
        }
    }

    /// Report the latency of every `process()` call to `context`.
    pub(crate) fn with_timing(mut self, context: Arc<StageContext>) -> Self {
        self.timing = Some(context);
        self
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        self.state.get()
    }

    /// Fault-tolerance policy.
    pub fn fault_tolerance(&self) -> FaultTolerance {
        self.fault_tolerance
    }

    /// Failures recorded while processing items.
    pub fn processing_failures(&self) -> Vec<ProcessingFailure<T>> {
        self.failures.snapshot()
    }

    /// Failures that moved the driver to `ERROR`.
    pub fn fatal_errors(&self) -> Vec<FatalError> {
        self.fatal.snapshot()
    }

    /// Items whose `process()` returned successfully.
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub(crate) fn illegal(&self, operation: &'static str) -> DriverError {
        DriverError::IllegalState { stage: self.name.clone(), operation, state: self.state() }
    }

    /// Run `STOPPED -> STARTED -> preprocess -> launch -> RUNNING`.
    ///
    /// `launch` starts the variant's workers. If `preprocess` or `launch` fails,
    /// the driver records a fatal error, enters `ERROR` and releases the handler.
    pub(crate) fn start(&self, launch: impl FnOnce() -> Result<()>) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(self.illegal("start"));
        }
        if !self.state.test_and_set(DriverState::Stopped, DriverState::Started) {
            return Err(self.illegal("start"));
        }
        *self.started_at.lock() = Some(Instant::now());

        if let Err(cause) = self.guarded(|| self.handler.preprocess()) {
            let cause = Arc::new(cause);
            self.fail(Arc::clone(&cause));
            self.release_once();
            return Err(DriverError::Startup { stage: self.name.clone(), source: cause });
        }

        if let Err(e) = launch() {
            self.fail(Arc::new(HandlerError::Runtime(anyhow::anyhow!("{e}"))));
            self.release_once();
            return Err(e);
        }

        if !self.state.test_and_set(DriverState::Started, DriverState::Running) {
            return Err(self.illegal("start"));
        }
        info!("Started stage '{}'", self.name);
        Ok(())
    }

    /// Decide how a `feed()` call is handled in the current state.
    pub(crate) fn feed_gate(&self) -> Result<FeedGate> {
        match self.state() {
            DriverState::Running => Ok(FeedGate::Running),
            DriverState::Started => Ok(FeedGate::Early),
            DriverState::Stopped if !self.started.load(Ordering::Acquire) => Ok(FeedGate::Early),
            _ => Err(self.illegal("feed")),
        }
    }

    /// Request shutdown.
    ///
    /// Waits out a concurrent `start()`. Returns `Ok(true)` when the driver moved
    /// to `STOP_REQUESTED`, `Ok(false)` when it is already in `ERROR`.
    pub(crate) fn begin_finish(&self) -> Result<bool> {
        match self.state.wait_while(|s| s == DriverState::Started) {
            DriverState::Running => {
                if self.state.test_and_set(DriverState::Running, DriverState::StopRequested) {
                    debug!("Stop requested for stage '{}'", self.name);
                    Ok(true)
                } else {
                    // Lost a race with a failing worker.
                    self.begin_finish()
                }
            }
            DriverState::Error => Ok(false),
            _ => Err(self.illegal("finish")),
        }
    }

    /// Run `postprocess` (unless in `ERROR`), then `release`, then settle the final state.
    ///
    /// Must only be called after every worker has exited.
    pub(crate) fn complete_finish(&self) {
        if self.state() != DriverState::Error {
            if let Err(cause) = self.guarded(|| self.handler.postprocess()) {
                self.fail(Arc::new(cause));
            }
        }
        self.release_once();

        if self.state.test_and_set(DriverState::StopRequested, DriverState::Finished) {
            self.state.test_and_set(DriverState::Finished, DriverState::Stopped);
        }

        let elapsed = self.started_at.lock().map(|t| t.elapsed()).unwrap_or_default();
        log_driver_summary(
            &self.name,
            self.state(),
            self.processed_count(),
            self.failures.len(),
            self.fatal.len(),
            elapsed,
        );
    }

    /// Process one item and apply the fault-tolerance decision.
    ///
    /// A failure is always recorded. `Err` means the policy re-raised it and the
    /// caller must treat it as fatal.
    ///
    /// The item is cloned once before the handler takes ownership, so the failure
    /// record can keep a copy. Large payloads should be cheap to clone, e.g.
    /// wrapped in an `Arc`.
    pub(crate) fn process(&self, item: T) -> std::result::Result<(), Arc<HandlerError>> {
        let retained = item.clone();
        let start = Instant::now();
        let result = self.guarded(|| self.handler.process(item));
        if let Some(context) = &self.timing {
            context.raise(&StageEvent::Timing(TimingEvent::new(&self.name, start.elapsed())));
        }

        match result {
            Ok(()) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(cause) => {
                let cause = Arc::new(cause);
                self.failures.push(ProcessingFailure {
                    stage: self.name.clone(),
                    item: retained,
                    cause: Arc::clone(&cause),
                    state: self.state(),
                });
                if self.fault_tolerance.tolerates(&cause) {
                    warn!("Stage '{}' skipped an item: {}", self.name, cause);
                    Ok(())
                } else {
                    Err(cause)
                }
            }
        }
    }

    /// Process one item on the calling thread, escalating a re-raised failure.
    pub(crate) fn process_inline(&self, item: T) -> Result<()> {
        self.process(item).map_err(|cause| {
            self.fail(Arc::clone(&cause));
            DriverError::Processing { stage: self.name.clone(), source: cause }
        })
    }

    /// Record a fatal error and move to `ERROR`.
    pub(crate) fn fail(&self, cause: Arc<HandlerError>) {
        error!("Stage '{}' failed: {}", self.name, cause);
        self.fatal.push(FatalError { stage: self.name.clone(), cause });
        self.state.force_error();
    }

    /// Record a panic that escaped a worker loop.
    pub(crate) fn fail_with_panic(&self, worker: &str, panic_info: Box<dyn std::any::Any + Send>) {
        let msg = extract_panic_message(panic_info);
        self.fail(Arc::new(HandlerError::Runtime(anyhow::anyhow!(
            "Worker thread {worker} panicked: {msg}"
        ))));
    }

    fn release_once(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            let handler = &self.handler;
            if let Err(panic_info) = catch_unwind(AssertUnwindSafe(|| handler.release())) {
                warn!(
                    "Stage '{}' panicked while releasing: {}",
                    self.name,
                    extract_panic_message(panic_info)
                );
            }
        }
    }

    /// Call into the handler, turning a panic into a `Runtime` failure.
    fn guarded(
        &self,
        f: impl FnOnce() -> std::result::Result<(), HandlerError>,
    ) -> std::result::Result<(), HandlerError> {
        catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic_info| {
            Err(HandlerError::Runtime(anyhow::anyhow!(
                "handler panicked: {}",
                extract_panic_message(panic_info)
            )))
        })
    }
}
