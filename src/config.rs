//! Configuration module for netlens.
//!
//! Loads configuration from TOML files with environment variable substitution.
//!
//! # Example
//!
//! ```toml
//! [buffers]
//! websocket_capacity = 500
//! sse_capacity = 200
//!
//! [anomalies]
//! capacity = 1000
//!
//! [correlation]
//! require_token = true
//!
//! [filter]
//! text = "${NETLENS_FILTER}"
//! types = ["http", "sse"]
//!
//! [projection]
//! preview_chars = 100
//!
//! [runtime]
//! channel_capacity = 1024
//! stats_interval = 100
//! ```

use crate::anomaly::DEFAULT_ANOMALY_CAPACITY;
use crate::entry::Protocol;
use crate::filter::FilterSpec;
use crate::projection::DEFAULT_PREVIEW_CHARS;
use crate::DEFAULT_MESSAGE_CAPACITY;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Environment variable naming the config file
pub const CONFIG_PATH_VAR: &str = "NETLENS_CONFIG";

/// Config file used when `NETLENS_CONFIG` is unset
pub const DEFAULT_CONFIG_PATH: &str = "config/netlens.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid substitution pattern: {0}")]
    PatternError(#[from] regex::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub buffers: BufferConfig,

    #[serde(default)]
    pub anomalies: AnomalyConfig,

    #[serde(default)]
    pub correlation: CorrelationConfig,

    /// Filter applied when listing entries
    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub projection: ProjectionConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Message history sizes
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BufferConfig {
    #[serde(default = "default_message_capacity")]
    pub websocket_capacity: usize,

    #[serde(default = "default_message_capacity")]
    pub sse_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            websocket_capacity: default_message_capacity(),
            sse_capacity: default_message_capacity(),
        }
    }
}

fn default_message_capacity() -> usize {
    DEFAULT_MESSAGE_CAPACITY
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AnomalyConfig {
    #[serde(default = "default_anomaly_capacity")]
    pub capacity: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            capacity: default_anomaly_capacity(),
        }
    }
}

fn default_anomaly_capacity() -> usize {
    DEFAULT_ANOMALY_CAPACITY
}

/// Response-body correlation
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct CorrelationConfig {
    /// Only accept bodies that echo the token of their request
    #[serde(default)]
    pub require_token: bool,
}

/// Filter configuration. Protocol names are kept as written so that
/// validation can report the offending one.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FilterConfig {
    #[serde(default)]
    pub text: String,

    #[serde(default = "default_filter_types")]
    pub types: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            text: String::new(),
            types: default_filter_types(),
        }
    }
}

fn default_filter_types() -> Vec<String> {
    Protocol::ALL.iter().map(|p| p.as_str().to_string()).collect()
}

impl FilterConfig {
    /// Build the filter this section describes.
    pub fn spec(&self) -> Result<FilterSpec, ConfigError> {
        let types = self
            .types
            .iter()
            .map(|name| {
                parse_protocol(name).ok_or_else(|| {
                    ConfigError::ValidationError(format!("Unknown protocol '{}' in filter", name))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FilterSpec::new(self.text.clone(), types))
    }
}

/// Accepts protocol names (`http`) and list labels (`XHR`).
fn parse_protocol(name: &str) -> Option<Protocol> {
    Protocol::parse(name).or_else(|| {
        Protocol::ALL
            .into_iter()
            .find(|protocol| protocol.label().eq_ignore_ascii_case(name))
    })
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProjectionConfig {
    /// Characters shown in a message preview before `...`
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_preview_chars() -> usize {
    DEFAULT_PREVIEW_CHARS
}

/// Runtime configuration
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Bound of the inbound event channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Log statistics every N events
    #[serde(default = "default_stats_interval")]
    pub stats_interval: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            stats_interval: default_stats_interval(),
        }
    }
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_stats_interval() -> u64 {
    100
}

impl EngineConfig {
    /// Load configuration from the default path or NETLENS_CONFIG env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let config = Self::parse(&content)?;

        info!(
            websocket_capacity = config.buffers.websocket_capacity,
            sse_capacity = config.buffers.sse_capacity,
            anomaly_capacity = config.anomalies.capacity,
            filter_types = config.filter.types.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;

        debug!("Parsing TOML configuration");
        let config: EngineConfig = toml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("buffers.websocket_capacity", self.buffers.websocket_capacity),
            ("buffers.sse_capacity", self.buffers.sse_capacity),
            ("anomalies.capacity", self.anomalies.capacity),
            ("runtime.channel_capacity", self.runtime.channel_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.runtime.stats_interval == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.stats_interval must be greater than zero".to_string(),
            ));
        }

        let filter = self.filter.spec()?;
        if filter.types.is_empty() {
            warn!("Filter selects no protocols; every entry will be hidden");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")?;

    Ok(re
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                    caps[0].to_string()
                }
            }
        })
        .to_string())
}
