//! Driver lifecycle state and its linearizable cell.

use parking_lot::{Condvar, Mutex};
use std::fmt;

/// Lifecycle state of a driver.
///
/// ```text
/// STOPPED -> STARTED -> RUNNING -> STOP_REQUESTED -> FINISHED -> STOPPED
///     \_________\__________\_____________\_______________\____-> ERROR
/// ```
///
/// `Error` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverState {
    /// Not started, or fully shut down.
    Stopped,
    /// `start()` is running the handler's `preprocess()`.
    Started,
    /// Accepting and processing work.
    Running,
    /// `finish()` was called; workers are draining.
    StopRequested,
    /// Workers exited and the handler was released.
    Finished,
    /// A fatal failure occurred.
    Error,
}

impl DriverState {
    /// Returns true if the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: DriverState) -> bool {
        use DriverState::{Error, Finished, Running, Started, StopRequested, Stopped};
        match (self, next) {
            (Error, _) => false,
            (_, Error) => true,
            (Stopped, Started)
            | (Started, Running)
            | (Running, StopRequested)
            | (StopRequested, Finished)
            | (Finished, Stopped) => true,
            _ => false,
        }
    }

    /// Returns true once a worker should stop waiting for new items.
    #[must_use]
    pub fn is_winding_down(self) -> bool {
        matches!(self, DriverState::StopRequested | DriverState::Finished | DriverState::Error)
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverState::Stopped => "STOPPED",
            DriverState::Started => "STARTED",
            DriverState::Running => "RUNNING",
            DriverState::StopRequested => "STOP_REQUESTED",
            DriverState::Finished => "FINISHED",
            DriverState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// A [`DriverState`] guarded by a lock, with change notification.
///
/// Every transition goes through [`test_and_set`](Self::test_and_set) or
/// [`force_error`](Self::force_error), so illegal edges are never taken.
pub(crate) struct StateCell {
    state: Mutex<DriverState>,
    changed: Condvar,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self { state: Mutex::new(DriverState::Stopped), changed: Condvar::new() }
    }

    pub(crate) fn get(&self) -> DriverState {
        *self.state.lock()
    }

    /// Move to `next` only if the current state is `expected` and the edge is legal.
    pub(crate) fn test_and_set(&self, expected: DriverState, next: DriverState) -> bool {
        let mut state = self.state.lock();
        if *state != expected || !expected.can_transition_to(next) {
            return false;
        }
        *state = next;
        self.changed.notify_all();
        true
    }

    /// Move to `Error`. Returns the state that was replaced.
    pub(crate) fn force_error(&self) -> DriverState {
        let mut state = self.state.lock();
        let previous = *state;
        *state = DriverState::Error;
        self.changed.notify_all();
        previous
    }

    /// Block while `pred` holds for the current state, returning the first state for which it
    /// does not.
    pub(crate) fn wait_while(&self, pred: impl Fn(DriverState) -> bool) -> DriverState {
        let mut state = self.state.lock();
        while pred(*state) {
            self.changed.wait(&mut state);
        }
        *state
    }
}
