//! CLI module for the cairn installer.
//!
//! This module provides the command-line surface: argument parsing,
//! the init, apply and validate flows, and operator-facing output.

mod commands;
mod output;
mod init;
mod apply;

pub use commands::{ApplyArgs, Cli, Commands, InitArgs, RunArgs};
pub use output::Reporter;
pub use init::init_plan;
pub use apply::ApplyCommand;

#[cfg(test)]
pub(crate) use output::SharedBuffer;
