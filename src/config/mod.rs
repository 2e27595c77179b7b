//! Configuration module
//!
//! Handles application settings and platform directories

mod settings;

pub use settings::{AppConfig, ClassifyConfig, DeviceConfig, LoggingConfig};

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("Config file {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("Config file {path}: {source}")]
    Parse {
        /// File involved
        path: PathBuf,
        /// Parse error
        #[source]
        source: toml::de::Error,
    },

    /// Config could not be serialized
    #[error("Cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "unitrunner", "UnitRunner")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Default config file path
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
