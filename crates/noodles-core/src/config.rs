//! Configuration loading for the scene server.
//!
//! The configuration lives in `noodles-config.yaml`. Every field has a
//! default, so an empty file (or no file at all) yields a usable server.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Scene server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long a new connection may take to send its `Intro`.
    #[serde(default = "default_intro_timeout_ms")]
    pub intro_timeout_ms: u64,

    /// Deadline after which a finished delegate is reported as timed out.
    #[serde(default)]
    pub invoke_timeout_ms: Option<u64>,

    /// Live messages buffered per session, on top of its join snapshot,
    /// before it is evicted as lagging.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Commands buffered in front of the hub.
    #[serde(default = "default_hub_queue_capacity")]
    pub hub_queue_capacity: usize,

    /// Upper bound on slots per component kind.
    #[serde(default)]
    pub max_slots_per_kind: Option<u32>,
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    50000
}

const fn default_intro_timeout_ms() -> u64 {
    5000
}

const fn default_outbound_queue_capacity() -> usize {
    1024
}

const fn default_hub_queue_capacity() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            intro_timeout_ms: default_intro_timeout_ms(),
            invoke_timeout_ms: None,
            outbound_queue_capacity: default_outbound_queue_capacity(),
            hub_queue_capacity: default_hub_queue_capacity(),
            max_slots_per_kind: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `NOODLES_HOST` overrides `host`
    /// - `NOODLES_PORT` overrides `port`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is unusable.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse_yaml(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides
    /// are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is unusable.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config = Self::parse_yaml(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes to unit, not to an empty map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply `NOODLES_HOST` and `NOODLES_PORT`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `NOODLES_PORT` is not a port.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("NOODLES_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("NOODLES_PORT") {
            self.port = parse_port(&val)?;
        }
        Ok(())
    }

    /// Reject values the server cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid(String::from("port must be non-zero")));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid(String::from(
                "outbound_queue_capacity must be non-zero",
            )));
        }
        if self.hub_queue_capacity == 0 {
            return Err(ConfigError::Invalid(String::from(
                "hub_queue_capacity must be non-zero",
            )));
        }
        if self.max_slots_per_kind == Some(0) {
            return Err(ConfigError::Invalid(String::from(
                "max_slots_per_kind must be non-zero",
            )));
        }
        Ok(())
    }

    /// `host:port` for the listener.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The intro deadline as a [`Duration`].
    pub const fn intro_timeout(&self) -> Duration {
        Duration::from_millis(self.intro_timeout_ms)
    }

    /// The delegate deadline, if one is configured.
    pub fn invoke_timeout(&self) -> Option<Duration> {
        self.invoke_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_port(val: &str) -> Result<u16, ConfigError> {
    val.parse()
        .map_err(|err| ConfigError::Invalid(format!("NOODLES_PORT `{val}` is not a port: {err}")))
}
