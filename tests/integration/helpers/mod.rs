//! Helper utilities for integration tests.

pub mod handlers;

pub use handlers::*;

use fgstage_lib::config::{DriverConfig, DriverKind, create_driver};
use fgstage_lib::driver::{FaultTolerance, Handler, StageDriver};
use std::sync::Arc;
use std::time::Duration;

/// Every driver kind, for parameterised tests.
pub const ALL_KINDS: [DriverKind; 5] = [
    DriverKind::Synchronous,
    DriverKind::Dedicated,
    DriverKind::ThreadPool,
    DriverKind::Executor,
    DriverKind::Balanced,
];

/// A driver of `kind` with short timeouts suitable for tests.
pub fn test_driver<T: Clone + Send + 'static>(
    kind: DriverKind,
    handler: Arc<dyn Handler<T>>,
    fault_tolerance: FaultTolerance,
) -> StageDriver<T> {
    let config = DriverConfig::new(kind)
        .with_poll_timeout(Duration::from_millis(10))
        .with_keep_alive(Duration::from_millis(50))
        .with_fault_tolerance(fault_tolerance)
        .with_num_threads(2)
        .with_thread_bounds(1, 2)
        .with_initial_workers(2);
    create_driver(handler, &config, None).expect("valid test config")
}
