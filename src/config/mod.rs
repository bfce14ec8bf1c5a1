//! Configuration management for gatelink.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::events::EventLogConfig;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Arbitration engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Uplink event log configuration.
    #[serde(default)]
    pub events: EventLogConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.engine.block_window == Duration::ZERO {
            return Err(Error::InvalidConfig("block_window must be non-zero".into()));
        }

        if self.engine.dhcp_retry == Duration::ZERO {
            return Err(Error::InvalidConfig("dhcp_retry must be non-zero".into()));
        }

        if self.engine.gre_prefix.is_empty() {
            return Err(Error::InvalidConfig("gre_prefix must not be empty".into()));
        }

        if self.engine.router_refresh_threshold == 0
            || self.engine.internet_refresh_threshold == 0
            || self.engine.vtag_failure_threshold == 0
        {
            return Err(Error::InvalidConfig(
                "failure thresholds must be at least 1".into(),
            ));
        }

        if self.events.max_events == 0 {
            return Err(Error::InvalidConfig("events.max_events must be at least 1".into()));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(Error::InvalidConfig(format!(
                "Unknown log format: {}",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("net", "gatelink", "gatelink").map_or_else(
            || PathBuf::from("gatelink.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Default location of the persisted uplink event log.
    pub fn default_events_path() -> PathBuf {
        directories::ProjectDirs::from("net", "gatelink", "gatelink").map_or_else(
            || PathBuf::from("uplink_events.json"),
            |dirs| dirs.data_dir().join("uplink_events.json"),
        )
    }

    /// Create example configuration.
    pub fn example() -> Self {
        Self {
            events: EventLogConfig {
                path: Some(Self::default_events_path()),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_ansi(config.color)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}
