//! Application settings

use super::ConfigError;
use crate::core::build::ToolchainConfig;
use crate::core::classify::{MarkerClassifier, BUILD_FAILURE_MARKER, TEST_PASS_MARKER};
use crate::core::monitor::MonitorConfig;
use crate::core::staging::StagingConfig;
use crate::core::status::{StatusConfig, StatusStore};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Target board identification
    pub device: DeviceConfig,
    /// Compiler/uploader settings
    pub toolchain: ToolchainConfig,
    /// Serial test monitor settings
    pub monitor: MonitorConfig,
    /// Outcome markers
    pub classify: ClassifyConfig,
    /// Dependency staging
    pub staging: StagingConfig,
    /// Status file
    pub status: StatusConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from the default location, or defaults if there is none
    pub fn load() -> Result<Self, ConfigError> {
        match super::default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load config from an explicit file, which must exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = super::default_config_path().ok_or(ConfigError::NoConfigDir)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        self.save_to(&path)
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values the run cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.device.identifier.is_empty() {
            return invalid("device.identifier must not be empty");
        }
        if self.toolchain.program.is_empty() {
            return invalid("toolchain.program must not be empty");
        }
        if self.toolchain.board.is_empty() {
            return invalid("toolchain.board must not be empty");
        }
        if self.monitor.baud_rate == 0 {
            return invalid("monitor.baud_rate must be positive");
        }
        if self.monitor.poll_interval_ms == 0 {
            return invalid("monitor.poll_interval_ms must be positive");
        }
        if self.monitor.timeout_secs == 0 {
            return invalid("monitor.timeout_secs must be positive");
        }
        if self.monitor.summary_marker.is_empty() {
            return invalid("monitor.summary_marker must not be empty");
        }
        if self.classify.build_failure_marker.is_empty() || self.classify.test_pass_marker.is_empty() {
            return invalid("classify markers must not be empty");
        }
        let store = StatusStore::new(self.status.clone());
        if store.format_date(NaiveDate::default()).is_err() {
            return Err(ConfigError::Invalid(format!(
                "status.date_format {:?} is not a valid date format",
                self.status.date_format
            )));
        }

        Ok(())
    }
}

/// Target board identification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Substring of the port description that identifies the board
    pub identifier: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            identifier: "Arduino Micro".to_string(),
        }
    }
}

/// Outcome markers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Toolchain log text that means the build failed
    pub build_failure_marker: String,
    /// Summary text that means every test passed
    pub test_pass_marker: String,
}

impl ClassifyConfig {
    /// Classifier using these markers
    pub fn classifier(&self) -> MarkerClassifier {
        MarkerClassifier::new(&self.build_failure_marker, &self.test_pass_marker)
    }
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            build_failure_marker: BUILD_FAILURE_MARKER.to_string(),
            test_pass_marker: TEST_PASS_MARKER.to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write a daily rolling log file
    pub file: bool,
    /// Log directory (defaults to the platform data dir)
    pub directory: Option<PathBuf>,
}

impl LoggingConfig {
    /// Directory log files go to, if any can be determined
    pub fn resolved_directory(&self) -> Option<PathBuf> {
        self.directory.clone().or_else(super::log_dir)
    }
}
