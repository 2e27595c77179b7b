//! Firmware build and upload through the external toolchain
//!
//! The toolchain compiles the sketch and flashes it over the board's serial
//! port in one invocation. Success is judged from the captured log only; the
//! exit status is logged but not interpreted.

use super::cancel::CancelToken;
use super::classify::OutcomeClassifier;
use super::codec::TextEncoding;
use super::command::{CommandError, ExternalCommand};
use super::device::{DeviceError, DeviceLocator};
use super::orchestrator::BuildPhase;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Toolchain configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Path or name of the compiler/uploader executable
    pub program: String,
    /// Fully qualified board identifier
    pub board: String,
    /// Directory searched for the sketch
    pub sketch_dir: PathBuf,
    /// Sketch file extension (without dot)
    pub sketch_extension: String,
    /// Encoding of the toolchain's console output
    pub encoding: TextEncoding,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            program: "arduino".to_string(),
            board: "arduino:avr:micro".to_string(),
            sketch_dir: PathBuf::from("."),
            sketch_extension: "ino".to_string(),
            encoding: TextEncoding::Utf8,
        }
    }
}

/// Outcome of one build/upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    /// Build and upload succeeded
    pub succeeded: bool,
    /// Captured toolchain output (or the reason nothing ran)
    pub raw_log: String,
}

impl BuildResult {
    /// Failed attempt with an explanatory log
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            raw_log: reason.into(),
        }
    }
}

/// Build errors that abort the run
#[derive(Error, Debug)]
pub enum BuildError {
    /// Port enumeration failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Toolchain could not be run
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Sketch directory could not be read
    #[error("Cannot read sketch directory {path}: {source}")]
    SketchDir {
        /// Directory that was searched
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Was the build cancelled?
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Command(CommandError::Cancelled))
    }
}

/// Drives the external toolchain
pub struct BuildDriver {
    config: ToolchainConfig,
    device_identifier: String,
    locator: DeviceLocator,
    command: Box<dyn ExternalCommand + Send + Sync>,
    classifier: Box<dyn OutcomeClassifier + Send + Sync>,
}

impl BuildDriver {
    /// Create a build driver
    pub fn new(
        config: ToolchainConfig,
        device_identifier: impl Into<String>,
        locator: DeviceLocator,
        command: Box<dyn ExternalCommand + Send + Sync>,
        classifier: Box<dyn OutcomeClassifier + Send + Sync>,
    ) -> Self {
        Self {
            config,
            device_identifier: device_identifier.into(),
            locator,
            command,
            classifier,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &ToolchainConfig {
        &self.config
    }

    /// First sketch file in the sketch directory, by file name
    pub fn find_sketch(&self) -> Result<Option<PathBuf>, BuildError> {
        let dir = &self.config.sketch_dir;
        let read_err = |source| BuildError::SketchDir {
            path: dir.clone(),
            source,
        };

        let mut sketches = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            let matches = path
                .extension()
                .is_some_and(|ext| ext == self.config.sketch_extension.as_str());
            if matches && path.is_file() {
                sketches.push(path);
            }
        }

        sketches.sort();
        Ok(sketches.into_iter().next())
    }

    /// Toolchain arguments for uploading `sketch` through `port`
    pub fn toolchain_args(&self, port: &str, sketch: &Path) -> Vec<String> {
        vec![
            "--port".to_string(),
            port.to_string(),
            "--board".to_string(),
            self.config.board.clone(),
            "--upload".to_string(),
            sketch.display().to_string(),
        ]
    }

    /// Build and upload `sketch` to the attached board
    pub fn build_sketch(&self, sketch: &Path, cancel: &CancelToken) -> Result<BuildResult, BuildError> {
        let Some(device) = self.locator.find_device(&self.device_identifier)? else {
            warn!("{} is not connected", self.device_identifier);
            return Ok(BuildResult::failed(format!(
                "No serial port matching {:?} was found; the board is not connected.",
                self.device_identifier
            )));
        };

        let sketch = absolute(sketch);
        info!(
            "Uploading {} to {} on {}",
            sketch.display(),
            self.config.board,
            device.port
        );

        let args = self.toolchain_args(&device.port, &sketch);
        let output = self.command.run(&self.config.program, &args, cancel)?;
        let raw_log = self.config.encoding.decode(&output.log);

        let succeeded = self.classifier.build_succeeded(&raw_log);
        debug!("Toolchain exit code {:?}, build succeeded: {}", output.exit_code, succeeded);

        Ok(BuildResult { succeeded, raw_log })
    }
}

impl BuildPhase for BuildDriver {
    fn build(&self, cancel: &CancelToken) -> Result<BuildResult, BuildError> {
        let Some(sketch) = self.find_sketch()? else {
            warn!(
                "No *.{} sketch in {}",
                self.config.sketch_extension,
                self.config.sketch_dir.display()
            );
            return Ok(BuildResult::failed(format!(
                "There is no *.{} sketch in {}.",
                self.config.sketch_extension,
                self.config.sketch_dir.display()
            )));
        };

        self.build_sketch(&sketch, cancel)
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classify::MarkerClassifier;
    use crate::core::command::{CommandOutput, MockExternalCommand};
    use crate::core::device::{Device, MockPortEnumerator};

    fn locator(devices: Vec<Device>) -> DeviceLocator {
        let mut ports = MockPortEnumerator::new();
        ports.expect_available().returning(move || Ok(devices.clone()));
        DeviceLocator::new(Box::new(ports))
    }

    fn toolchain_printing(log: &'static str) -> MockExternalCommand {
        let mut command = MockExternalCommand::new();
        command.expect_run().times(1).returning(move |_, _, _| {
            Ok(CommandOutput {
                log: log.as_bytes().to_vec(),
                exit_code: Some(0),
            })
        });
        command
    }

    fn driver(dir: &Path, devices: Vec<Device>, command: MockExternalCommand) -> BuildDriver {
        let config = ToolchainConfig {
            sketch_dir: dir.to_path_buf(),
            ..ToolchainConfig::default()
        };
        BuildDriver::new(
            config,
            "Arduino Micro",
            locator(devices),
            Box::new(command),
            Box::new(MarkerClassifier::default()),
        )
    }

    fn micro() -> Vec<Device> {
        vec![Device::new("COM5", "Arduino Micro (COM5)")]
    }

    #[test]
    fn test_successful_upload() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware.ino"), "void setup() {}").unwrap();

        let driver = driver(dir.path(), micro(), toolchain_printing("avrdude done.\n"));
        let result = driver.build(&CancelToken::new()).unwrap();

        assert!(result.succeeded);
        assert_eq!(result.raw_log, "avrdude done.\n");
    }

    #[test]
    fn test_failure_marker_fails_build() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware.ino"), "").unwrap();

        let command = toolchain_printing("Pin.h: No such file or directory\ncompilation terminated.\n");
        let result = driver(dir.path(), micro(), command)
            .build(&CancelToken::new())
            .unwrap();

        assert!(!result.succeeded);
    }

    #[test]
    fn test_shift_jis_log_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware.ino"), "").unwrap();

        let mut command = MockExternalCommand::new();
        command.expect_run().times(1).returning(|_, _, _| {
            Ok(CommandOutput {
                log: b"\x83R\x83\x93\x83p\x83C\x83\x8b\ncompilation terminated.\n".to_vec(),
                exit_code: Some(1),
            })
        });

        let config = ToolchainConfig {
            sketch_dir: dir.path().to_path_buf(),
            encoding: TextEncoding::ShiftJis,
            ..ToolchainConfig::default()
        };
        let driver = BuildDriver::new(
            config,
            "Arduino Micro",
            locator(micro()),
            Box::new(command),
            Box::new(MarkerClassifier::default()),
        );

        let result = driver.build(&CancelToken::new()).unwrap();
        assert!(!result.succeeded);
        assert!(result.raw_log.starts_with("\u{30b3}\u{30f3}\u{30d1}\u{30a4}\u{30eb}"));
        assert!(!result.raw_log.contains('\u{fffd}'));
    }

    #[test]
    fn test_no_device_skips_toolchain() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware.ino"), "").unwrap();

        let mut command = MockExternalCommand::new();
        command.expect_run().never();

        let result = driver(dir.path(), Vec::new(), command)
            .build(&CancelToken::new())
            .unwrap();

        assert!(!result.succeeded);
        assert!(result.raw_log.contains("not connected"));
    }

    #[test]
    fn test_missing_sketch_is_a_failed_build() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();

        let mut command = MockExternalCommand::new();
        command.expect_run().never();

        let result = driver(dir.path(), micro(), command)
            .build(&CancelToken::new())
            .unwrap();

        assert!(!result.succeeded);
        assert!(result.raw_log.contains("no *.ino sketch"));
    }

    #[test]
    fn test_toolchain_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let sketch = dir.path().join("firmware.ino");
        std::fs::write(&sketch, "").unwrap();

        let expected_sketch = sketch.display().to_string();
        let mut command = MockExternalCommand::new();
        command
            .expect_run()
            .withf(move |program, args, _| {
                program == "arduino"
                    && args
                        == [
                            "--port".to_string(),
                            "COM5".to_string(),
                            "--board".to_string(),
                            "arduino:avr:micro".to_string(),
                            "--upload".to_string(),
                            expected_sketch.clone(),
                        ]
            })
            .times(1)
            .returning(|_, _, _| Ok(CommandOutput::default()));

        let result = driver(dir.path(), micro(), command)
            .build(&CancelToken::new())
            .unwrap();
        assert!(result.succeeded);
    }

    #[test]
    fn test_sketch_chosen_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.ino"), "").unwrap();
        std::fs::write(dir.path().join("a.ino"), "").unwrap();
        std::fs::write(dir.path().join("a.cpp"), "").unwrap();

        let driver = driver(dir.path(), micro(), MockExternalCommand::new());
        let sketch = driver.find_sketch().unwrap().unwrap();
        assert_eq!(sketch.file_name().unwrap(), "a.ino");
    }

    #[test]
    fn test_cancelled_toolchain() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("firmware.ino"), "").unwrap();

        let mut command = MockExternalCommand::new();
        command
            .expect_run()
            .returning(|_, _, _| Err(CommandError::Cancelled));

        let err = driver(dir.path(), micro(), command)
            .build(&CancelToken::new())
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
