//! Work channel and polling worker loop shared by the queue-driven drivers.
//!
//! A worker polls the channel with a bounded timeout. On an item it processes
//! it; on a timeout it re-checks whether it should exit. The poll timeout
//! therefore bounds how long `finish()` waits for an idle worker to notice the
//! stop request.

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded, unbounded};
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use super::core::DriverCore;
use super::state::DriverState;
use crate::errors::Result;

/// Thread-safe FIFO between feeders and workers; bounded when `capacity > 0`.
pub(crate) struct WorkQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> WorkQueue<T> {
    /// Create a queue; `capacity == 0` means unbounded.
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = if capacity == 0 { unbounded() } else { bounded(capacity) };
        Self { tx, rx }
    }

    pub(crate) fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T: Clone + Send + 'static> WorkQueue<T> {
    /// Enqueue an item, blocking while the queue is full.
    ///
    /// The wait is sliced by `poll`; between slices the driver state is
    /// re-checked so a feeder never blocks forever on a stage that failed.
    pub(crate) fn push(&self, item: T, core: &DriverCore<T>, poll: Duration) -> Result<()> {
        let mut item = item;
        loop {
            if core.state() == DriverState::Error {
                return Err(core.illegal("feed"));
            }
            match self.tx.send_timeout(item, poll) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(back)) => item = back,
                Err(SendTimeoutError::Disconnected(_)) => return Err(core.illegal("feed")),
            }
        }
    }
}

/// Run mode of one worker, changed from outside while the worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum WorkerMode {
    /// Keep polling.
    Runnable = 0,
    /// Exit the next time the channel is empty.
    StopWhenEmpty = 1,
    /// Exit before taking another item.
    Stop = 2,
}

/// Shared handle to a worker's [`WorkerMode`], plus the worker's exit notification.
#[derive(Debug)]
pub(crate) struct WorkerSignal {
    mode: AtomicU8,
    exited: Mutex<bool>,
    exited_cv: Condvar,
}

impl WorkerSignal {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            mode: AtomicU8::new(WorkerMode::Runnable as u8),
            exited: Mutex::new(false),
            exited_cv: Condvar::new(),
        })
    }

    pub(crate) fn mode(&self) -> WorkerMode {
        match self.mode.load(Ordering::Acquire) {
            0 => WorkerMode::Runnable,
            1 => WorkerMode::StopWhenEmpty,
            _ => WorkerMode::Stop,
        }
    }

    pub(crate) fn set(&self, mode: WorkerMode) {
        self.mode.store(mode as u8, Ordering::Release);
    }

    /// Called by the worker thread as its last action.
    pub(crate) fn mark_exited(&self) {
        *self.exited.lock() = true;
        self.exited_cv.notify_all();
    }

    pub(crate) fn has_exited(&self) -> bool {
        *self.exited.lock()
    }

    /// Block until the worker has left its loop.
    pub(crate) fn wait_exited(&self) {
        let mut exited = self.exited.lock();
        while !*exited {
            self.exited_cv.wait(&mut exited);
        }
    }
}

/// Why a worker loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    /// Shutdown was requested and the channel was empty.
    Drained,
    /// The worker's signal told it to leave.
    Signalled,
    /// The driver is in `ERROR` (this worker or another one failed).
    Failed,
}

/// Poll `rx` and process items until told to exit.
pub(crate) fn run_worker<T: Clone + Send + 'static>(
    core: &DriverCore<T>,
    rx: &Receiver<T>,
    poll: Duration,
    signal: &WorkerSignal,
) -> WorkerExit {
    loop {
        if signal.mode() == WorkerMode::Stop {
            return WorkerExit::Signalled;
        }
        match rx.recv_timeout(poll) {
            Ok(item) => {
                if let Err(cause) = core.process(item) {
                    core.fail(cause);
                    return WorkerExit::Failed;
                }
                if core.state() == DriverState::Error {
                    return WorkerExit::Failed;
                }
            }
            Err(RecvTimeoutError::Timeout) => match core.state() {
                DriverState::Error => return WorkerExit::Failed,
                s if s.is_winding_down() => return WorkerExit::Drained,
                // Re-check emptiness after reading the mode: an item pushed before the
                // mode changed must still be taken by this worker.
                _ if signal.mode() == WorkerMode::StopWhenEmpty && rx.is_empty() => {
                    return WorkerExit::Signalled;
                }
                _ => {}
            },
            Err(RecvTimeoutError::Disconnected) => return WorkerExit::Drained,
        }
    }
}

/// Spawn a named worker thread running [`run_worker`]; a panic escaping the
/// loop is recorded as a fatal error on the driver.
pub(crate) fn spawn_worker<T: Clone + Send + 'static>(
    core: Arc<DriverCore<T>>,
    rx: Receiver<T>,
    poll: Duration,
    signal: Arc<WorkerSignal>,
    worker_name: String,
) -> Result<std::thread::JoinHandle<()>> {
    let stage = core.name().to_string();
    std::thread::Builder::new()
        .name(worker_name.clone())
        .spawn(move || {
            debug!("Worker {worker_name} started");
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                run_worker(&core, &rx, poll, &signal)
            }));
            match result {
                Ok(exit) => debug!("Worker {worker_name} exited: {exit:?}"),
                Err(panic_info) => core.fail_with_panic(&worker_name, panic_info),
            }
            signal.mark_exited();
        })
        .map_err(|source| crate::errors::DriverError::Spawn { stage, source })
}
