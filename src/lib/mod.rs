#![deny(unsafe_code)]
// Clippy lint configuration for CI
// These lints are allowed because:
// - cast_*: latency statistics and summary rates cast between integer and float types
// - missing_*_doc: Documentation improvements tracked separately
// - needless_pass_by_value: Handler and driver constructors take ownership of Arcs
// - items_after_statements: Some test code uses late item declarations
// - module_name_repetitions: driver types are named after their module on purpose
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::needless_pass_by_value,
    clippy::items_after_statements,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args
)]

//! # fgstage - stage execution engine
//!
//! Runs pipeline stages under pluggable concurrency strategies, with per-item
//! fault tolerance and an adaptive controller that grows or shrinks worker
//! counts from observed latency.
//!
//! ## Overview
//!
//! - **[`driver`]** - the driver lifecycle, the [`Handler`](driver::Handler) contract, and
//!   the five concurrency strategies behind [`StageDriver`](driver::StageDriver)
//! - **[`control`]** - [`DriverController`](control::DriverController) and the control strategies
//! - **[`context`]** - event listeners and the pipeline completion signal
//! - **[`config`]** - driver/controller settings and the factories that consume them
//! - **[`errors`]** - [`DriverError`](errors::DriverError) and [`HandlerError`](errors::HandlerError)
//! - **[`logging`]** / **[`progress`]** - formatting helpers, summaries and interval progress
//!
//! ## Quick Start
//!
//! ```
//! use fgstage_lib::config::{DriverConfig, DriverKind, create_driver};
//! use fgstage_lib::driver::{Driver, DriverState, Handler};
//! use fgstage_lib::errors::HandlerError;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! #[derive(Default)]
//! struct Sum(AtomicU64);
//!
//! impl Handler<u64> for Sum {
//!     fn name(&self) -> &str {
//!         "sum"
//!     }
//!
//!     fn process(&self, item: u64) -> Result<(), HandlerError> {
//!         self.0.fetch_add(item, Ordering::Relaxed);
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> anyhow::Result<()> {
//! let sum = Arc::new(Sum::default());
//! let config = DriverConfig::new(DriverKind::ThreadPool).with_num_threads(2);
//! let driver = create_driver(sum.clone() as Arc<dyn Handler<u64>>, &config, None)?;
//!
//! driver.start()?;
//! let feeder = driver.feeder();
//! for i in 1..=100 {
//!     feeder.feed(i)?;
//! }
//! driver.finish()?;
//!
//! assert_eq!(sum.0.load(Ordering::Relaxed), 5050);
//! assert_eq!(driver.state(), DriverState::Stopped);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod control;
pub mod driver;
pub mod errors;
pub mod logging;
pub mod progress;

pub use driver::{Driver, Feeder, Handler, StageDriver};
pub use errors::{DriverError, HandlerError};
