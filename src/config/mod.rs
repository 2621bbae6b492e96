//! Configuration module
//!
//! Handles loading and saving ticknet session configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::session::{ErrorPolicy, SessionConfig};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level file configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Session settings
    #[serde(default)]
    pub session: SessionSettings,
}

/// Session tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Largest declared frame size accepted or produced
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Per-frame decode error handling: "fail-fast" or "skip-frame"
    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Deadline for workers to exit on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,

    /// Queue length at which a backlog warning is logged
    #[serde(default = "default_queue_warn_depth")]
    pub queue_warn_depth: usize,
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_shutdown_timeout() -> u64 {
    1000
}

fn default_queue_warn_depth() -> usize {
    1024
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            error_policy: ErrorPolicy::default(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            queue_warn_depth: default_queue_warn_depth(),
        }
    }
}

impl SessionSettings {
    /// Convert to the runtime session configuration.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            max_frame_size: self.max_frame_size,
            error_policy: self.error_policy,
            shutdown_timeout_ms: self.shutdown_timeout_ms,
            queue_warn_depth: self.queue_warn_depth,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            PathBuf::from("./ticknet.toml"),
            PathBuf::from("./config.toml"),
        ];

        for path in &config_paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }
}
