//! CLI command implementations for fgstage.
//!
//! - [`simulate`] - run a synthetic multi-stage pipeline under a chosen driver and controller

pub mod command;
pub mod simulate;
