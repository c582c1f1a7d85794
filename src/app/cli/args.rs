//! Command-line arguments
//!
//! Every option is optional so that unset flags fall back to the
//! configuration file, and unset file values fall back to defaults.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "msgflow")]
#[command(about = "Backpressure-aware message consumer runtime")]
#[command(version, long_version = crate::core::version::long_version())]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config-file", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Force colored output
    #[arg(short = 'g', long = "color", conflicts_with = "no_color", global = true)]
    pub color: bool,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Log level or flexi_logger spec
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log file path (use 'none' to disable file logging)
    #[arg(short = 'f', long = "log-file", value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(short = 'o', long = "log-format", value_name = "FORMAT", value_parser = ["text", "ext", "json"], global = true)]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a burst of messages through an in-process broker and report backpressure
    Simulate(SimulateArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(ClapArgs, Debug, Clone, Default, PartialEq)]
pub struct SimulateArgs {
    /// Topic to publish to and consume from
    #[arg(short = 't', long = "topic", value_name = "TOPIC")]
    pub topic: Option<String>,

    /// Channel to consume on
    #[arg(long = "channel", value_name = "CHANNEL")]
    pub channel: Option<String>,

    /// Number of messages to publish
    #[arg(short = 'n', long = "messages", value_name = "COUNT")]
    pub messages: Option<usize>,

    /// Worker tasks for the subscription (non-positive means 1)
    #[arg(short = 'w', long = "concurrency", value_name = "N", allow_hyphen_values = true)]
    pub concurrency: Option<i64>,

    /// Queue slots per worker (non-positive means the default)
    #[arg(short = 'b', long = "buffer-multiplier", value_name = "N", allow_hyphen_values = true)]
    pub buffer_multiplier: Option<i64>,

    /// Time each message spends in the handler
    #[arg(long = "handler-delay-ms", value_name = "MS")]
    pub handler_delay_ms: Option<u64>,

    /// Extra delay for messages handled while throttled
    #[arg(long = "throttle-delay-ms", value_name = "MS")]
    pub throttle_delay_ms: Option<u64>,

    /// Fail the first attempt of every Nth message (0 disables)
    #[arg(long = "fail-every", value_name = "N")]
    pub fail_every: Option<u64>,
}

impl Args {
    /// Explicit color choice from the flags, `None` when neither was given
    pub fn color_override(&self) -> Option<bool> {
        match (self.color, self.no_color) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    /// Log file from the flags; `Some(None)` when file logging was disabled with 'none'
    pub fn log_file_override(&self) -> Option<Option<PathBuf>> {
        self.log_file.as_ref().map(|path| {
            if path.as_os_str().eq_ignore_ascii_case("none") {
                None
            } else {
                Some(path.clone())
            }
        })
    }
}
