//! # UnitRunner Core Library
//!
//! Automates the firmware build-upload-test cycle for a board attached over
//! USB serial:
//! - Locates the board among the serial ports by description
//! - Stages shared dependencies next to the sketch
//! - Compiles and flashes through the external toolchain
//! - Watches the board's serial output for its self-reported test summary
//! - Persists a pass/fail status record for dashboards
//!
//! ## Example
//!
//! ```rust,no_run
//! use unitrunner_core::{
//!     AppConfig, BuildDriver, DeviceLocator, RunOrchestrator, StatusStore, SystemCommand,
//!     SystemSerial, TestMonitor,
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let builder = BuildDriver::new(
//!         config.toolchain.clone(),
//!         &config.device.identifier,
//!         DeviceLocator::system(),
//!         Box::new(SystemCommand),
//!         Box::new(config.classify.classifier()),
//!     );
//!     let tester = TestMonitor::new(
//!         config.monitor.clone(),
//!         &config.device.identifier,
//!         DeviceLocator::system(),
//!         Box::new(SystemSerial),
//!         Box::new(config.classify.classifier()),
//!     );
//!
//!     let orchestrator = RunOrchestrator::new(
//!         config.staging.stager(),
//!         Box::new(builder),
//!         Box::new(tester),
//!         StatusStore::new(config.status.clone()),
//!     );
//!
//!     let outcome = orchestrator.run(false)?;
//!     println!("build: {}, test: {}", outcome.record.build.status, outcome.record.test.status);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::build::{BuildDriver, BuildError, BuildResult, ToolchainConfig};
pub use crate::core::cancel::CancelToken;
pub use crate::core::classify::{MarkerClassifier, OutcomeClassifier};
pub use crate::core::codec::TextEncoding;
pub use crate::core::command::{CommandError, CommandOutput, ExternalCommand, SystemCommand};
pub use crate::core::device::{Device, DeviceError, DeviceLocator, PortEnumerator, SystemPorts};
pub use crate::core::monitor::{
    MonitorConfig, MonitorError, SerialLink, SerialOpener, SummaryCapture, SystemSerial,
    TestMonitor, TestResult,
};
pub use crate::core::orchestrator::{
    BuildPhase, Clock, RunError, RunOrchestrator, RunOutcome, SystemClock, TestPhase,
};
pub use crate::core::staging::{DependencyStager, ManifestStager, NoStaging, StagingConfig};
pub use crate::core::status::{PhaseStatus, StatusConfig, StatusRecord, StatusStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
