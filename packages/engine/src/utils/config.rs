// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Configuration is layered: built-in defaults, then an optional
//! `netintercept.toml` in the working directory, then `NETINTERCEPT__*`
//! environment variables (e.g. `NETINTERCEPT__LOGGING__LEVEL=debug`).

use crate::utils::errors::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default config file name (without extension)
pub const CONFIG_FILE: &str = "netintercept";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "NETINTERCEPT";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub logging: LoggingConfig,
    pub interception: InterceptionConfig,
    pub transport: TransportConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is not set
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Interceptor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptionConfig {
    /// Listener count per event that triggers a leak warning (0 = unlimited)
    pub max_listeners: usize,

    /// Base URL used to resolve relative request URLs
    pub location: Option<String>,

    /// Include the fetch interceptor in presets
    pub fetch: bool,

    /// Include the XMLHttpRequest interceptor in presets
    pub xhr: bool,
}

impl Default for InterceptionConfig {
    fn default() -> Self {
        Self {
            max_listeners: 0,
            location: None,
            fetch: true,
            xhr: true,
        }
    }
}

/// Passthrough transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Per-request timeout in milliseconds (0 = no timeout)
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

impl EngineConfig {
    /// Load configuration from `netintercept.toml` (optional) and the environment
    pub fn load() -> Result<Self> {
        Self::build(File::with_name(CONFIG_FILE).required(false))
    }

    /// Load configuration from an explicit file, still honouring env overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize::<EngineConfig>()?;

        debug!("Loaded engine config: {:?}", config);
        Ok(config)
    }
}
