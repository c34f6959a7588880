use crate::bus::{NameFlags, DEFAULT_NAME};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use zbus::names::WellKnownName;

/// Longest release delay accepted, in milliseconds.
const MAX_RELEASE_AFTER_MS: u64 = 60 * 60 * 1000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to find config directory")]
    NoConfigDir,

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// What to do when the name request fails.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionPolicy {
    /// Log the failure and keep going. The loop may then never finish,
    /// because no NameLost will ever be delivered.
    #[default]
    Tolerate,
    /// Exit immediately with a non-zero status.
    Fatal,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusConfig {
    /// Well-known name to claim
    #[serde(default = "default_name")]
    pub name: String,

    /// Let another process take the name over
    #[serde(default = "default_true")]
    pub allow_replacement: bool,

    /// Bus address; the session bus when unset
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimingConfig {
    /// Delay between entering the loop and releasing the name
    #[serde(default = "default_release_after_ms")]
    pub release_after_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AcquisitionConfig {
    #[serde(default)]
    pub policy: AcquisitionPolicy,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_true() -> bool {
    true
}

fn default_release_after_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            allow_replacement: true,
            address: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            release_after_ms: default_release_after_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl BusConfig {
    pub fn flags(&self) -> NameFlags {
        NameFlags {
            allow_replacement: self.allow_replacement,
        }
    }
}

impl TimingConfig {
    pub fn release_after(&self) -> Duration {
        Duration::from_millis(self.release_after_ms)
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub name: Option<String>,
    pub release_after_ms: Option<u64>,
    pub strict: bool,
    pub address: Option<String>,
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        ProjectDirs::from("org", "dbustest", "namesignal")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load config from `path`, or from the default location if a file exists
    /// there. Falls back to defaults; never writes anything.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::config_path() {
                Ok(path) if path.exists() => Self::from_file(&path),
                _ => {
                    debug!("No config file, using defaults");
                    Ok(Config::default())
                }
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate TOML config text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the loaded values.
    pub fn apply(&mut self, overrides: Overrides) -> Result<(), ConfigError> {
        if let Some(name) = overrides.name {
            self.bus.name = name;
        }
        if let Some(ms) = overrides.release_after_ms {
            self.timing.release_after_ms = ms;
        }
        if overrides.strict {
            self.acquisition.policy = AcquisitionPolicy::Fatal;
        }
        if overrides.address.is_some() {
            self.bus.address = overrides.address;
        }
        self.validate()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(e) = WellKnownName::try_from(self.bus.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "'{}' is not a valid well-known bus name: {}",
                self.bus.name, e
            )));
        }

        if self.timing.release_after_ms > MAX_RELEASE_AFTER_MS {
            return Err(ConfigError::ValidationError(
                "release_after_ms cannot exceed one hour".into(),
            ));
        }

        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }

        if let Some(ref address) = self.bus.address {
            if address.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "bus address must not be empty".into(),
                ));
            }
        }

        Ok(())
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
