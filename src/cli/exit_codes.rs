//! CLI Exit Codes
//!
//! Exit codes for CI automation. A run whose build or tests failed still
//! exits with `SUCCESS`; the outcome is in the status file. Non-zero codes
//! mean the run itself could not be carried out.

use crate::config::ConfigError;
use crate::core::build::BuildError;
use crate::core::command::CommandError;
use crate::core::orchestrator::RunError;
use crate::core::staging::StagingError;
use crate::core::status::StatusError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Toolchain could not be started or waited on
    pub const TOOLCHAIN_FAILED: u8 = 3;

    /// Dependency staging or cleanup failed
    pub const STAGING_FAILED: u8 = 4;

    /// Status file could not be written
    pub const STATUS_WRITE_FAILED: u8 = 5;

    /// File not found
    pub const FILE_NOT_FOUND: u8 = 6;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Serial ports could not be enumerated
    pub const PORT_ENUMERATION_FAILED: u8 = 9;

    /// User cancelled
    pub const CANCELLED: u8 = 11;

}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success
    Success,

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success
    }

    /// Error with `code`
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Error(_, msg) => Some(msg),
        }
    }

    /// Convert to ExitCode
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

fn io_code(err: &std::io::Error, fallback: u8) -> u8 {
    use std::io::ErrorKind;

    match err.kind() {
        ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
        ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
        _ => fallback,
    }
}

impl From<&RunError> for CliResult {
    fn from(err: &RunError) -> Self {
        if err.is_cancelled() {
            return Self::Error(ExitCodes::CANCELLED, err.to_string());
        }

        let code = match err {
            RunError::Staging(
                StagingError::ManifestRead { source, .. }
                | StagingError::Copy { source, .. }
                | StagingError::Remove { source, .. },
            ) => io_code(source, ExitCodes::STAGING_FAILED),
            RunError::Staging(StagingError::ManifestFormat { .. }) => ExitCodes::STAGING_FAILED,
            RunError::Build(BuildError::Command(CommandError::Spawn { source, .. })) => {
                io_code(source, ExitCodes::TOOLCHAIN_FAILED)
            }
            RunError::Build(BuildError::Command(_)) => ExitCodes::TOOLCHAIN_FAILED,
            RunError::Build(BuildError::SketchDir { source, .. }) => io_code(source, ExitCodes::ERROR),
            RunError::Build(BuildError::Device(_)) | RunError::Monitor(_) => {
                ExitCodes::PORT_ENUMERATION_FAILED
            }
            RunError::Status(StatusError::DateFormat(_)) => ExitCodes::CONFIG_ERROR,
            RunError::Status(_) => ExitCodes::STATUS_WRITE_FAILED,
            RunError::Cancelled => ExitCodes::CANCELLED,
        };

        Self::Error(code, err.to_string())
    }
}

impl From<&ConfigError> for CliResult {
    fn from(err: &ConfigError) -> Self {
        let code = match err {
            ConfigError::Io { source, .. } => io_code(source, ExitCodes::CONFIG_ERROR),
            _ => ExitCodes::CONFIG_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Toolchain failed to run",
        4 => "Dependency staging failed",
        5 => "Status file write failed",
        6 => "File not found",
        7 => "Permission denied",
        8 => "Configuration error",
        9 => "Port enumeration failed",
        11 => "Operation cancelled",
        _ => "Unknown error",
    }
}
