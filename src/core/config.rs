//! Configuration management for the reqprof server
//!
//! Configuration is resolved in three layers: built-in defaults, an optional
//! TOML file, then environment variable overrides. CLI flags are applied on
//! top by the binary.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Profiling configuration
    pub profiling: ProfilingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub http_addr: SocketAddr,
}

/// Profiling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilingConfig {
    /// Enable per-request profiling and the lag monitor
    pub enabled: bool,

    /// Directory that receives profile artifacts, created at startup
    pub profiles_dir: PathBuf,

    /// CPU sampling frequency in Hz
    pub cpu_frequency: i32,

    /// Interval between event-loop lag probes
    #[serde(with = "duration_millis")]
    pub lag_interval: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            profiling: ProfilingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:3000".parse().expect("valid default address"),
        }
    }
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            profiles_dir: PathBuf::from("./profiles"),
            cpu_frequency: 100,
            lag_interval: Duration::from_millis(1000),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, the default config file if present,
    /// and environment variables
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Load configuration with an explicit config file. Resolution order is
    /// always file, then environment, then (in the binary) CLI flags; an
    /// explicit file replaces the default one but never mutes the
    /// environment layer.
    pub fn load_with(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            // The default config file is optional
            None => Self::from_file("reqprof.toml").unwrap_or_default(),
        };

        // Override with environment variables
        config.apply_env_overrides()?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;

        // The profiling switch the original interface documents: the exact
        // string "true" enables, anything else disables.
        if let Ok(value) = env::var("ENABLE_PROFILING") {
            self.profiling.enabled = profiling_enabled_from(&value);
        }

        if let Ok(addr) = env::var("REQPROF_HTTP_ADDR") {
            self.server.http_addr = addr.parse()
                .map_err(|e| Error::config(format!("Invalid HTTP address: {}", e)))?;
        }

        if let Ok(dir) = env::var("REQPROF_PROFILES_DIR") {
            self.profiling.profiles_dir = PathBuf::from(dir);
        }

        if let Ok(level) = env::var("REQPROF_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.profiling.cpu_frequency <= 0 {
            return Err(Error::config("CPU sampling frequency must be positive"));
        }

        if self.profiling.lag_interval.is_zero() {
            return Err(Error::config("Lag probe interval must be non-zero"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        Ok(())
    }
}

/// Interpret an `ENABLE_PROFILING` value: only the exact string `"true"`
/// enables profiling.
pub fn profiling_enabled_from(value: &str) -> bool {
    value == "true"
}

// Serialize Duration config fields as integer milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
