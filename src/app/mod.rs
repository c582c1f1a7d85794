//! Application module
//!
//! The `msgflow` binary: CLI, configuration, startup and the `simulate`
//! command.

pub mod cli;
pub mod simulation;
pub mod startup;
