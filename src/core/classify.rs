//! Pass/fail classification of captured text
//!
//! Classification is plain substring matching on fixed markers. A marker that
//! happens to appear in unrelated output still decides the outcome.

/// Toolchain log marker that signals a failed build
pub const BUILD_FAILURE_MARKER: &str = "compilation terminated.";

/// Serial marker that starts the firmware's test summary line
pub const SUMMARY_MARKER: &str = "Test summary:";

/// Summary text that signals every test passed
pub const TEST_PASS_MARKER: &str = "0 failed";

/// Decides build and test outcomes from captured text
pub trait OutcomeClassifier {
    /// Did the build succeed, judging by the toolchain log?
    fn build_succeeded(&self, log: &str) -> bool;

    /// Did the tests pass, judging by the captured summary buffer?
    fn test_passed(&self, summary: &str) -> bool;
}

/// Marker based classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerClassifier {
    /// Presence anywhere in the build log means failure
    pub build_failure_marker: String,
    /// Presence anywhere in the summary buffer means success
    pub test_pass_marker: String,
}

impl MarkerClassifier {
    /// Create a classifier with custom markers
    pub fn new(build_failure_marker: impl Into<String>, test_pass_marker: impl Into<String>) -> Self {
        Self {
            build_failure_marker: build_failure_marker.into(),
            test_pass_marker: test_pass_marker.into(),
        }
    }
}

impl Default for MarkerClassifier {
    fn default() -> Self {
        Self::new(BUILD_FAILURE_MARKER, TEST_PASS_MARKER)
    }
}

impl OutcomeClassifier for MarkerClassifier {
    fn build_succeeded(&self, log: &str) -> bool {
        !log.contains(&self.build_failure_marker)
    }

    fn test_passed(&self, summary: &str) -> bool {
        summary.contains(&self.test_pass_marker)
    }
}
