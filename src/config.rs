//! Configuration file handling for resilient-cam.
//!
//! Loads timeouts and executor settings from
//! `<config dir>/resilient-cam/config.toml` or a custom path.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration shared by every logical camera.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Deadlines for the three suspension points of the camera layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Physical open, in milliseconds.
    pub open_ms: u64,
    /// Wait for a capture session to report "configured".
    pub configure_ms: u64,
    /// Permission request round trip.
    pub permission_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            open_ms: 5_000,
            configure_ms: 2_000,
            permission_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Prefix for the worker thread names, suffixed with the camera name.
    pub thread_name_prefix: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "resilient-cam".to_string(),
        }
    }
}

impl CameraConfig {
    /// Load configuration from a file path.
    /// Returns the default config if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(PathBuf::from).unwrap_or_else(default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
                path: path.clone(),
                source: e,
            })?;
            let config: CameraConfig =
                toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                    path: path.clone(),
                    source: e,
                })?;
            log::debug!("Loaded camera config from {}", path.display());
            Ok(config)
        } else {
            Ok(CameraConfig::default())
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.open_ms)
    }

    pub fn configure_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.configure_ms)
    }

    pub fn permission_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.permission_ms)
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.open_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_configure_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.configure_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_permission_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.permission_ms = timeout.as_millis() as u64;
        self
    }

    /// Thread name for one of a camera's executors.
    pub(crate) fn thread_name(&self, role: &str, camera: &str) -> String {
        format!("{}-{}-{}", self.executor.thread_name_prefix, role, camera)
    }

    /// Render as TOML, for `config show`.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError { path, source } => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    source
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
        }
    }
}

/// Get the default config file path.
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("resilient-cam").join("config.toml"))
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config/resilient-cam/config.toml")
        })
}
