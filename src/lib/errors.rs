//! Custom error types for stage drivers and their handlers.

use thiserror::Error;

use crate::driver::DriverState;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

/// Failure raised by a [`Handler`](crate::driver::Handler).
///
/// The two variants mirror the two classes of failure the fault-tolerance
/// policy distinguishes: a `Processing` failure is one the handler declares
/// as part of its contract, a `Runtime` failure is anything else (including a
/// panic caught while the handler was running).
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A declared processing failure.
    #[error("processing failed: {0:#}")]
    Processing(anyhow::Error),

    /// An undeclared failure.
    #[error("unexpected failure: {0:#}")]
    Runtime(anyhow::Error),
}

impl HandlerError {
    /// Build a declared processing failure from a message.
    pub fn processing(msg: impl std::fmt::Display) -> Self {
        Self::Processing(anyhow::anyhow!("{msg}"))
    }

    /// Build an undeclared failure from a message.
    pub fn runtime(msg: impl std::fmt::Display) -> Self {
        Self::Runtime(anyhow::anyhow!("{msg}"))
    }

    /// Returns true for declared processing failures.
    #[must_use]
    pub fn is_declared(&self) -> bool {
        matches!(self, Self::Processing(_))
    }
}

/// Error type for driver operations
#[derive(Error, Debug)]
pub enum DriverError {
    /// An operation was attempted from a state that does not allow it.
    #[error("Illegal state for {operation} on stage '{stage}': driver is {state}")]
    IllegalState {
        /// The stage the driver runs
        stage: String,
        /// The attempted operation
        operation: &'static str,
        /// The state observed when the operation was rejected
        state: DriverState,
    },

    /// `preprocess()` failed; the driver is in `ERROR`.
    #[error("Stage '{stage}' failed to start: {source}")]
    Startup {
        /// The stage the driver runs
        stage: String,
        /// The handler failure
        #[source]
        source: std::sync::Arc<HandlerError>,
    },

    /// A processing failure surfaced to a caller processing inline.
    #[error("Stage '{stage}' failed processing an item: {source}")]
    Processing {
        /// The stage the driver runs
        stage: String,
        /// The handler failure
        #[source]
        source: std::sync::Arc<HandlerError>,
    },

    /// The operating system refused to start a worker thread.
    #[error("Failed to spawn worker for stage '{stage}': {source}")]
    Spawn {
        /// The stage the driver runs
        stage: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },
}
