//! Command-line interface
//!
//! Argument parsing and the TOML configuration file the flags override.

pub mod args;
pub mod config;

pub use args::{Args, Command, SimulateArgs};
pub use config::{AppConfig, ConfigError, LogConfig, SimulationConfig};

#[cfg(test)]
mod tests;
