//! Command execution module
//!
//! Every external action of a provisioning run is one child process started
//! through this module. Commands run one at a time; each call is awaited to
//! completion before the next one starts.

pub mod command;
pub mod elevation;
pub mod sanitize;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use command::{CommandOutput, CommandRunner, TokioCommandRunner};
pub use elevation::{ElevatedRunner, PlatformContext, RunOptions};
pub use sanitize::{escape_for_shell, filter_users, powershell_quote, shell_quote};
