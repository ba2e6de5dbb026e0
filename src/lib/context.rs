//! Shared stage context: event listeners and the pipeline completion signal.
//!
//! Drivers raise [`TimingEvent`]s through the context after each timed
//! `process()` call; handlers may raise their own domain events through the
//! same mechanism. The [`DriverController`](crate::control::DriverController)
//! registers itself as a listener and watches [`StageContext::is_complete`]
//! to know when to stop.

use parking_lot::{Condvar, Mutex, RwLock};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// One latency measurement for one processed item.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingEvent {
    /// Name of the stage whose handler processed the item.
    pub stage: String,
    /// Wall-clock time spent inside `process()`.
    pub latency: Duration,
}

impl TimingEvent {
    /// Create a new timing event.
    #[must_use]
    pub fn new(stage: impl Into<String>, latency: Duration) -> Self {
        Self { stage: stage.into(), latency }
    }
}

/// An event raised through a [`StageContext`].
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// Latency of one `process()` call.
    Timing(TimingEvent),
    /// An arbitrary event published by a handler.
    Custom(Arc<dyn Any + Send + Sync>),
}

impl StageEvent {
    /// Wrap an arbitrary value as a custom event.
    pub fn custom<E: Any + Send + Sync>(event: E) -> Self {
        Self::Custom(Arc::new(event))
    }
}

/// Receiver of events raised through a [`StageContext`].
///
/// Listeners are called synchronously on the raising thread, so they must be
/// cheap and must never block on the driver that raised the event.
pub trait StageEventListener: Send + Sync {
    /// Called once per raised event.
    fn notify(&self, event: &StageEvent);
}

/// Listener registry plus the pipeline-wide completion flag.
#[derive(Default)]
pub struct StageContext {
    listeners: RwLock<Vec<Arc<dyn StageEventListener>>>,
    complete: Mutex<bool>,
    complete_cv: Condvar,
}

impl StageContext {
    /// Create an empty context with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Events raised before registration are not replayed.
    pub fn register_listener(&self, listener: Arc<dyn StageEventListener>) {
        self.listeners.write().push(listener);
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver an event to every registered listener.
    ///
    /// With no listeners registered the event is dropped.
    pub fn raise(&self, event: &StageEvent) {
        for listener in self.listeners.read().iter() {
            listener.notify(event);
        }
    }

    /// Mark the pipeline as complete and wake anyone waiting on it.
    pub fn signal_complete(&self) {
        let mut complete = self.complete.lock();
        *complete = true;
        self.complete_cv.notify_all();
    }

    /// Returns true once [`signal_complete`](Self::signal_complete) was called.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        *self.complete.lock()
    }

    /// Block until the pipeline completes or `timeout` elapses.
    ///
    /// Returns true if the pipeline is complete.
    pub fn wait_complete(&self, timeout: Duration) -> bool {
        let mut complete = self.complete.lock();
        if !*complete {
            let _ = self.complete_cv.wait_for(&mut complete, timeout);
        }
        *complete
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("listeners", &self.listener_count())
            .field("complete", &self.is_complete())
            .finish()
    }
}
