//! Command trait definition for CLI commands.
//!
//! The trait uses `enum_dispatch` for dispatch across command variants.

use anyhow::Result;
use enum_dispatch::enum_dispatch;

/// Trait implemented by all fgstage CLI commands.
///
/// `command_line` is the full invocation, logged for reproducibility.
#[enum_dispatch]
pub trait Command {
    #[allow(clippy::missing_errors_doc)]
    fn execute(&self, command_line: &str) -> Result<()>;
}
