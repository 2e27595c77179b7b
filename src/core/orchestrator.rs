//! Run sequencing
//!
//! A run is: stage dependencies, build and upload, clean dependencies, then
//! (when the build succeeded and tests were requested) watch the board for
//! its test summary. The outcome is written to the status file.
//!
//! Cleanup always runs once the staging step has been attempted, so the
//! sketch directory never keeps copied dependencies. Nothing is retried.

use super::build::{BuildError, BuildResult};
use super::cancel::CancelToken;
use super::monitor::{MonitorError, TestResult};
use super::staging::{DependencyStager, StagingError};
use super::status::{StatusError, StatusRecord, StatusStore};
use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Build/upload phase of a run
#[cfg_attr(test, mockall::automock)]
pub trait BuildPhase {
    /// Build and upload the firmware
    fn build(&self, cancel: &CancelToken) -> Result<BuildResult, BuildError>;
}

/// Test phase of a run
#[cfg_attr(test, mockall::automock)]
pub trait TestPhase {
    /// Wait for and classify the firmware's test summary
    fn run_test(&self, cancel: &CancelToken) -> Result<TestResult, MonitorError>;
}

/// Source of the date stamped into the status record
#[cfg_attr(test, mockall::automock)]
pub trait Clock {
    /// Today's date
    fn today(&self) -> NaiveDate;
}

/// Local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// Errors that abort a run. No status file is written for them.
#[derive(Error, Debug)]
pub enum RunError {
    /// Dependency staging or cleanup failed
    #[error("Dependency staging failed: {0}")]
    Staging(#[from] StagingError),

    /// The toolchain could not be driven
    #[error("Build failed to run: {0}")]
    Build(#[from] BuildError),

    /// The test monitor could not run
    #[error("Test monitor failed: {0}")]
    Monitor(#[from] MonitorError),

    /// The status file could not be written
    #[error("Cannot save status: {0}")]
    Status(#[from] StatusError),

    /// Cancelled between phases
    #[error("Run cancelled")]
    Cancelled,
}

impl RunError {
    /// Was the run cancelled (in any phase)?
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Build(e) => e.is_cancelled(),
            Self::Monitor(MonitorError::Cancelled) => true,
            _ => false,
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Record written to the status file
    pub record: StatusRecord,
    /// Build phase result
    pub build: BuildResult,
    /// Test phase result, `None` when the phase was skipped
    pub test: Option<TestResult>,
}

/// Sequences a complete build-and-verify run
pub struct RunOrchestrator {
    stager: Box<dyn DependencyStager>,
    builder: Box<dyn BuildPhase>,
    tester: Box<dyn TestPhase>,
    store: StatusStore,
    clock: Box<dyn Clock>,
    cancel: CancelToken,
}

impl RunOrchestrator {
    /// Create an orchestrator
    pub fn new(
        stager: Box<dyn DependencyStager>,
        builder: Box<dyn BuildPhase>,
        tester: Box<dyn TestPhase>,
        store: StatusStore,
    ) -> Self {
        Self {
            stager,
            builder,
            tester,
            store,
            clock: Box::new(SystemClock),
            cancel: CancelToken::new(),
        }
    }

    /// Use a different clock
    #[must_use]
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Honor `cancel` in every phase
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cancellation token of this orchestrator
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Execute one run and persist its status record
    pub fn run(&self, build_only: bool) -> Result<RunOutcome, RunError> {
        let build = self.stage_build_clean()?;

        if build.succeeded {
            info!("Build succeeded");
        } else {
            warn!("Build failed");
        }
        debug!("Toolchain log:\n{}", build.raw_log);

        let test = if build.succeeded && !build_only {
            if self.cancel.is_cancelled() {
                return Err(RunError::Cancelled);
            }
            info!("Monitoring firmware tests");
            let result = self.tester.run_test(&self.cancel)?;
            if result.passed {
                info!("Tests passed");
            } else {
                warn!("Tests failed");
            }
            Some(result)
        } else {
            if build_only {
                info!("Build-only mode, skipping tests");
            }
            None
        };

        let test_passed = test.as_ref().is_some_and(|t| t.passed);
        let date = self.store.format_date(self.clock.today())?;
        let record = StatusRecord::new(build.succeeded, test_passed, &date);

        self.store.save(&record)?;
        info!("Status saved to {}", self.store.path().display());

        Ok(RunOutcome {
            record,
            build,
            test,
        })
    }

    fn stage_build_clean(&self) -> Result<BuildResult, RunError> {
        info!("Staging dependencies");
        let build = self.stager.stage().map(|()| {
            info!("Building and uploading firmware");
            self.builder.build(&self.cancel)
        });

        info!("Cleaning staged dependencies");
        let cleaned = self.stager.clean();

        match build {
            Ok(Ok(result)) => {
                cleaned?;
                Ok(result)
            }
            Ok(Err(e)) => {
                if let Err(clean_err) = &cleaned {
                    warn!("Cleanup after failed build also failed: {}", clean_err);
                }
                Err(e.into())
            }
            Err(e) => {
                if let Err(clean_err) = &cleaned {
                    warn!("Cleanup after failed staging also failed: {}", clean_err);
                }
                Err(e.into())
            }
        }
    }
}
