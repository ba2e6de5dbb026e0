//! Stage drivers: one handler, one concurrency strategy.
//!
//! A driver owns a [`Handler`] and decides which thread runs each item fed to
//! it. Every variant shares the same lifecycle:
//!
//! ```text
//! STOPPED ─start()─▶ STARTED ─▶ RUNNING ─finish()─▶ STOP_REQUESTED ─▶ FINISHED ─▶ STOPPED
//!                       │           │                    │
//!                       └───────────┴────── failure ─────┴──▶ ERROR
//! ```
//!
//! # Variants
//!
//! | Variant                   | Worker threads      | `feed()` on a busy stage          |
//! |---------------------------|---------------------|-----------------------------------|
//! | [`SynchronousDriver`]     | none                | runs inline                       |
//! | [`DedicatedThreadDriver`] | exactly one         | blocks while the channel is full  |
//! | [`ThreadPoolDriver`]      | fixed N             | blocks while the channel is full  |
//! | [`ExecutorDriver`]        | elastic core..max   | runs inline once saturated        |
//! | [`BalancedPoolDriver`]    | adjustable          | queues, or inline with no pool    |
//!
//! The last two implement [`Prioritizable`]: a
//! [`DriverController`](crate::control::DriverController) can change their
//! worker counts while they run.
//!
//! A driver is single use. Once finished it cannot be started again.
//!
//! Items must be `Clone`. Every driver clones an item once before handing it
//! to the handler, so the copy can be stored in a [`ProcessingFailure`] if
//! processing fails. Wrap expensive payloads in an `Arc`.

mod balanced;
mod core;
mod dedicated;
mod executor;
mod handler;
mod prioritizable;
mod queue;
mod state;
mod synchronous;
mod thread_pool;

use std::sync::Arc;

pub use self::balanced::BalancedPoolDriver;
pub use self::core::{DriverCore, ErrorLog, FatalError, ProcessingFailure, extract_panic_message};
pub use self::dedicated::DedicatedThreadDriver;
pub use self::executor::ExecutorDriver;
pub use self::handler::{FaultTolerance, Feeder, Handler};
pub use self::prioritizable::Prioritizable;
pub use self::state::DriverState;
pub use self::synchronous::SynchronousDriver;
pub use self::thread_pool::ThreadPoolDriver;

use crate::errors::Result;

/// Lifecycle and feeding interface common to every driver variant.
pub trait Driver<T: Clone + Send + 'static>: Send + Sync {
    /// Shared state and bookkeeping. Not part of the stable API.
    #[doc(hidden)]
    fn core(&self) -> &DriverCore<T>;

    /// Run the handler's `preprocess`, start any workers and move to `RUNNING`.
    ///
    /// # Errors
    ///
    /// [`DriverError::IllegalState`](crate::errors::DriverError::IllegalState) unless the
    /// driver is freshly created; [`DriverError::Startup`](crate::errors::DriverError::Startup)
    /// if `preprocess` fails.
    fn start(&self) -> Result<()>;

    /// The entry point upstream stages push items into.
    fn feeder(&self) -> Arc<dyn Feeder<T>>;

    /// Stop accepting items, wait for in-flight work, then run `postprocess` and `release`.
    ///
    /// Finishing a driver in `ERROR` succeeds and leaves it in `ERROR`.
    fn finish(&self) -> Result<()>;

    /// Stage name.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// Current lifecycle state.
    fn state(&self) -> DriverState {
        self.core().state()
    }

    /// Every failure recorded for an item, tolerated or not.
    fn processing_failures(&self) -> Vec<ProcessingFailure<T>> {
        self.core().processing_failures()
    }

    /// Failures that moved the driver to `ERROR`.
    fn fatal_errors(&self) -> Vec<FatalError> {
        self.core().fatal_errors()
    }

    /// Items processed successfully.
    fn processed_count(&self) -> u64 {
        self.core().processed_count()
    }
}

/// Any driver variant, chosen at runtime.
pub enum StageDriver<T> {
    Synchronous(Arc<SynchronousDriver<T>>),
    Dedicated(Arc<DedicatedThreadDriver<T>>),
    ThreadPool(Arc<ThreadPoolDriver<T>>),
    Executor(Arc<ExecutorDriver<T>>),
    Balanced(Arc<BalancedPoolDriver<T>>),
}

impl<T: Clone + Send + 'static> StageDriver<T> {
    fn inner(&self) -> &dyn Driver<T> {
        match self {
            Self::Synchronous(d) => d.as_ref(),
            Self::Dedicated(d) => d.as_ref(),
            Self::ThreadPool(d) => d.as_ref(),
            Self::Executor(d) => d.as_ref(),
            Self::Balanced(d) => d.as_ref(),
        }
    }

    /// The driver's priority interface, for variants that have one.
    #[must_use]
    pub fn prioritizable(&self) -> Option<Arc<dyn Prioritizable>> {
        match self {
            Self::Executor(d) => Some(Arc::clone(d) as Arc<dyn Prioritizable>),
            Self::Balanced(d) => Some(Arc::clone(d) as Arc<dyn Prioritizable>),
            _ => None,
        }
    }

    /// Short name of the variant, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Synchronous(_) => "synchronous",
            Self::Dedicated(_) => "dedicated",
            Self::ThreadPool(_) => "thread-pool",
            Self::Executor(_) => "executor",
            Self::Balanced(_) => "balanced",
        }
    }
}

impl<T> Clone for StageDriver<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Synchronous(d) => Self::Synchronous(Arc::clone(d)),
            Self::Dedicated(d) => Self::Dedicated(Arc::clone(d)),
            Self::ThreadPool(d) => Self::ThreadPool(Arc::clone(d)),
            Self::Executor(d) => Self::Executor(Arc::clone(d)),
            Self::Balanced(d) => Self::Balanced(Arc::clone(d)),
        }
    }
}

impl<T: Clone + Send + 'static> Driver<T> for StageDriver<T> {
    fn core(&self) -> &DriverCore<T> {
        self.inner().core()
    }

    fn start(&self) -> Result<()> {
        self.inner().start()
    }

    fn feeder(&self) -> Arc<dyn Feeder<T>> {
        self.inner().feeder()
    }

    fn finish(&self) -> Result<()> {
        self.inner().finish()
    }
}
