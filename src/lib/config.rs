//! Numeric knobs for drivers and controllers, and the factories that consume them.
//!
//! Both config structs deserialize with serde (durations as integer
//! milliseconds, missing fields take their defaults) so an external loader can
//! build them from a file. They can also be assembled in code:
//!
//! ```
//! use fgstage_lib::config::{DriverConfig, DriverKind};
//! use std::time::Duration;
//!
//! let config = DriverConfig::new(DriverKind::ThreadPool)
//!     .with_num_threads(4)
//!     .with_queue_capacity(64)
//!     .with_poll_timeout(Duration::from_millis(100));
//! assert!(config.validate().is_ok());
//! ```

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::context::StageContext;
use crate::control::{
    ControlStrategy, DriverController, EqualizingStrategy, ExperimentalStrategy,
    WallClockThresholdStrategy,
};
use crate::driver::{
    BalancedPoolDriver, DedicatedThreadDriver, ExecutorDriver, FaultTolerance, Handler,
    StageDriver, SynchronousDriver, ThreadPoolDriver,
};
use crate::errors::{DriverError, Result};

/// Serde adapter storing a [`Duration`] as whole milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Which concurrency strategy a driver uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    /// Process on the feeding thread.
    #[value(name = "synchronous")]
    Synchronous,
    /// One worker thread behind a FIFO channel.
    #[default]
    #[value(name = "dedicated")]
    Dedicated,
    /// A fixed number of workers sharing one channel.
    #[value(name = "thread-pool")]
    ThreadPool,
    /// Elastic pool with inline fallback when saturated.
    #[value(name = "executor")]
    Executor,
    /// Resizable worker set with inline fallback when empty.
    #[value(name = "balanced")]
    Balanced,
}

impl DriverKind {
    /// Returns true if drivers of this kind can be managed by a controller.
    #[must_use]
    pub fn is_prioritizable(self) -> bool {
        matches!(self, Self::Executor | Self::Balanced)
    }
}

/// Settings for one driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub kind: DriverKind,
    /// Channel capacity; 0 means unbounded.
    pub queue_capacity: usize,
    /// Bound on how long an idle worker waits before re-checking for shutdown.
    #[serde(rename = "poll_timeout_ms", with = "millis")]
    pub poll_timeout: Duration,
    pub fault_tolerance: FaultTolerance,
    /// Workers in a thread-pool driver.
    pub num_threads: usize,
    pub core_threads: usize,
    pub max_threads: usize,
    /// How long an executor thread above `core_threads` may sit idle.
    #[serde(rename = "keep_alive_ms", with = "millis")]
    pub keep_alive: Duration,
    /// Workers a balanced driver spawns at start; may be 0.
    pub initial_workers: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            kind: DriverKind::default(),
            queue_capacity: 0,
            poll_timeout: Duration::from_millis(500),
            fault_tolerance: FaultTolerance::None,
            num_threads: 1,
            core_threads: 1,
            max_threads: 4,
            keep_alive: Duration::from_secs(1),
            initial_workers: 1,
        }
    }
}

impl DriverConfig {
    /// Defaults for `kind`.
    #[must_use]
    pub fn new(kind: DriverKind) -> Self {
        Self { kind, ..Self::default() }
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_fault_tolerance(mut self, fault_tolerance: FaultTolerance) -> Self {
        self.fault_tolerance = fault_tolerance;
        self
    }

    #[must_use]
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set the executor's core and maximum thread counts.
    #[must_use]
    pub fn with_thread_bounds(mut self, core_threads: usize, max_threads: usize) -> Self {
        self.core_threads = core_threads;
        self.max_threads = max_threads;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_initial_workers(mut self, initial_workers: usize) -> Self {
        self.initial_workers = initial_workers;
        self
    }

    /// Check that the settings relevant to `kind` are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::InvalidParameter`] naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        let invalid = |parameter: &str, reason: String| {
            Err(DriverError::InvalidParameter { parameter: parameter.to_string(), reason })
        };
        if self.poll_timeout.is_zero() && self.kind != DriverKind::Synchronous {
            return invalid("poll-timeout", "must be greater than zero".to_string());
        }
        match self.kind {
            DriverKind::ThreadPool if self.num_threads == 0 => {
                invalid("num-threads", "a thread pool needs at least one thread".to_string())
            }
            DriverKind::Executor if self.core_threads > self.max_threads => invalid(
                "core-threads",
                format!("{} exceeds max-threads {}", self.core_threads, self.max_threads),
            ),
            _ => Ok(()),
        }
    }
}

/// Build a driver for `handler` as described by `config`.
///
/// `context` receives timing events from prioritizable kinds; other kinds ignore it.
///
/// # Errors
///
/// Returns [`DriverError::InvalidParameter`] if `config` fails validation.
pub fn create_driver<T: Clone + Send + 'static>(
    handler: Arc<dyn Handler<T>>,
    config: &DriverConfig,
    context: Option<Arc<StageContext>>,
) -> Result<StageDriver<T>> {
    config.validate()?;
    let ft = config.fault_tolerance;
    let driver = match config.kind {
        DriverKind::Synchronous => StageDriver::Synchronous(Arc::new(SynchronousDriver::new(handler, ft))),
        DriverKind::Dedicated => StageDriver::Dedicated(Arc::new(DedicatedThreadDriver::new(
            handler,
            ft,
            config.queue_capacity,
            config.poll_timeout,
        ))),
        DriverKind::ThreadPool => StageDriver::ThreadPool(Arc::new(ThreadPoolDriver::new(
            handler,
            ft,
            config.queue_capacity,
            config.poll_timeout,
            config.num_threads,
        ))),
        DriverKind::Executor => StageDriver::Executor(Arc::new(ExecutorDriver::new(
            handler,
            ft,
            config.core_threads,
            config.max_threads,
            config.keep_alive,
            context,
        )?)),
        DriverKind::Balanced => StageDriver::Balanced(Arc::new(BalancedPoolDriver::new(
            handler,
            ft,
            config.queue_capacity,
            config.poll_timeout,
            config.initial_workers,
            context,
        ))),
    };
    Ok(driver)
}

/// Which control strategy a controller runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Pull stage latencies towards the batch mean.
    #[default]
    #[value(name = "equalizing")]
    Equalizing,
    /// Grow stages whose mean latency reaches a threshold.
    #[value(name = "wall-clock-threshold")]
    WallClockThreshold,
    /// Per-stage hill-climbing with random exploration.
    #[value(name = "experimental")]
    Experimental,
}

/// Strategy selection with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StrategyConfig {
    Equalizing {
        #[serde(rename = "delta_ms", with = "millis")]
        delta: Duration,
    },
    WallClockThreshold {
        #[serde(rename = "threshold_ms", with = "millis")]
        threshold: Duration,
    },
    Experimental {
        min_difference_percent: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::Equalizing { delta: Duration::from_millis(50) }
    }
}

impl StrategyConfig {
    #[must_use]
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Equalizing { .. } => StrategyKind::Equalizing,
            Self::WallClockThreshold { .. } => StrategyKind::WallClockThreshold,
            Self::Experimental { .. } => StrategyKind::Experimental,
        }
    }
}

/// Build the strategy described by `config`.
#[must_use]
pub fn create_strategy(config: &StrategyConfig) -> Box<dyn ControlStrategy> {
    match *config {
        StrategyConfig::Equalizing { delta } => Box::new(EqualizingStrategy::new(delta)),
        StrategyConfig::WallClockThreshold { threshold } => {
            Box::new(WallClockThresholdStrategy::new(threshold))
        }
        StrategyConfig::Experimental { min_difference_percent, seed } => {
            Box::new(ExperimentalStrategy::new(min_difference_percent, seed))
        }
    }
}

/// Settings for a [`DriverController`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Events collected before a batch is dispatched.
    pub min_batch_size: usize,
    /// How often the dispatch thread re-checks for completion while waiting.
    #[serde(rename = "wait_timeout_ms", with = "millis")]
    pub wait_timeout: Duration,
    pub strategy: StrategyConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            min_batch_size: 100,
            wait_timeout: Duration::from_millis(500),
            strategy: StrategyConfig::default(),
        }
    }
}

impl ControllerConfig {
    #[must_use]
    pub fn with_min_batch_size(mut self, min_batch_size: usize) -> Self {
        self.min_batch_size = min_batch_size;
        self
    }

    #[must_use]
    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    /// Create a controller listening on `context`. It is not started.
    #[must_use]
    pub fn build(&self, context: Arc<StageContext>) -> DriverController {
        DriverController::new(
            context,
            create_strategy(&self.strategy),
            self.min_batch_size,
            self.wait_timeout,
        )
    }
}
