//! TOML configuration file
//!
//! ```toml
//! [log]
//! level = "info"
//! format = "ext"
//!
//! [consumer]
//! lookup_addresses = ["127.0.0.1:4161"]
//! concurrency = 4
//! buffer_multiplier = 30
//! poll_interval_ms = 1000
//!
//! [producer]
//! topics = ["orders"]
//!
//! [simulation]
//! topic = "orders"
//! messages = 200
//! ```
//!
//! An explicitly given file must exist. The default file
//! (`<config dir>/msgflow/msgflow.toml`) is used only if present.

use crate::app::cli::args::{Args, SimulateArgs};
use crate::consumer::ConsumerConfig;
use crate::producer::ProducerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Local lookup address used by the in-process broker
pub const MEMORY_LOOKUP_ADDRESS: &str = "memory://local";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file does not exist: {path}")]
    NotFound { path: PathBuf },

    #[error("Error reading configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error parsing configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Could not render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

impl crate::core::error_handling::ContextualError for ConfigError {
    fn is_user_actionable(&self) -> bool {
        !matches!(self, ConfigError::Render(_))
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            ConfigError::Invalid { message } => Some(message),
            ConfigError::NotFound { .. } => Some("The specified configuration file does not exist"),
            ConfigError::Read { .. } => Some("The configuration file could not be read"),
            ConfigError::Parse { .. } => Some("The configuration file is not valid TOML"),
            ConfigError::Render(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<PathBuf>,
    pub color: Option<bool>,
}

/// Parameters of the `simulate` command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub topic: String,
    pub channel: String,
    pub messages: usize,
    pub concurrency: i64,
    pub buffer_multiplier: i64,
    pub handler_delay_ms: u64,
    pub throttle_delay_ms: u64,
    pub fail_every: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            topic: "msgflow.simulation".to_string(),
            channel: "workers".to_string(),
            messages: 100,
            concurrency: 2,
            buffer_multiplier: 10,
            handler_delay_ms: 20,
            throttle_delay_ms: 10,
            fail_every: 0,
        }
    }
}

impl SimulationConfig {
    pub fn apply_args(&mut self, args: &SimulateArgs) {
        if let Some(topic) = &args.topic {
            self.topic = topic.clone();
        }
        if let Some(channel) = &args.channel {
            self.channel = channel.clone();
        }
        if let Some(messages) = args.messages {
            self.messages = messages;
        }
        if let Some(concurrency) = args.concurrency {
            self.concurrency = concurrency;
        }
        if let Some(buffer_multiplier) = args.buffer_multiplier {
            self.buffer_multiplier = buffer_multiplier;
        }
        if let Some(delay) = args.handler_delay_ms {
            self.handler_delay_ms = delay;
        }
        if let Some(delay) = args.throttle_delay_ms {
            self.throttle_delay_ms = delay;
        }
        if let Some(fail_every) = args.fail_every {
            self.fail_every = fail_every;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub consumer: ConsumerConfig,
    pub producer: ProducerConfig,
    pub simulation: SimulationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let simulation = SimulationConfig::default();
        Self {
            log: LogConfig::default(),
            consumer: ConsumerConfig::new([MEMORY_LOOKUP_ADDRESS]),
            producer: ProducerConfig {
                topics: vec![simulation.topic.clone()],
            },
            simulation,
        }
    }
}

impl AppConfig {
    /// `<config dir>/msgflow/msgflow.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("msgflow").join("msgflow.toml"))
    }

    /// Load `path`, or the default file if present, or built-in defaults
    pub async fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) if !path.exists() => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => {
                    log::debug!("No configuration file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
        let config = Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consumer
            .validate()
            .map_err(|e| ConfigError::Invalid {
                message: e.to_string(),
            })?;
        if let Some(format) = &self.log.format {
            if !matches!(format.as_str(), "text" | "ext" | "json") {
                return Err(ConfigError::Invalid {
                    message: format!("Unknown log format '{}' (expected text, ext or json)", format),
                });
            }
        }
        Ok(())
    }

    /// Apply command-line overrides on top of file values
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(level) = &args.log_level {
            self.log.level = Some(level.clone());
        }
        if let Some(format) = &args.log_format {
            self.log.format = Some(format.clone());
        }
        if let Some(file) = args.log_file_override() {
            self.log.file = file;
        }
        if let Some(color) = args.color_override() {
            self.log.color = Some(color);
        }
    }
}
