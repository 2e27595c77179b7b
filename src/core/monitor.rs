//! Post-flash test monitoring over the board's serial port
//!
//! The firmware runs its unit tests on boot and ends with a single summary
//! line such as `Test summary: 3 run, 0 failed`. The monitor polls the port,
//! accumulates everything it receives and stops once that line is complete.
//!
//! Capture states:
//!
//! ```text
//! Searching --(summary marker seen)--> Draining --(buffer ends with '\n')--> Done
//! ```

use super::cancel::CancelToken;
use super::classify::{OutcomeClassifier, SUMMARY_MARKER};
use super::codec::TextEncoding;
use super::device::{DeviceError, DeviceLocator};
use super::orchestrator::TestPhase;
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::io::{self, Read};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Test monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Serial baud rate
    pub baud_rate: u32,
    /// Timeout of a single underlying read call (ms)
    pub read_timeout_ms: u64,
    /// Delay between polls of the input queue (ms)
    pub poll_interval_ms: u64,
    /// Give up if no complete summary arrives within this time (s)
    pub timeout_secs: u64,
    /// Marker that starts the summary line
    pub summary_marker: String,
    /// Encoding of the firmware's console output
    pub encoding: TextEncoding,
}

impl MonitorConfig {
    /// Per-read timeout
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Overall monitoring timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            baud_rate: 2_000_000,
            read_timeout_ms: 1000,
            poll_interval_ms: 10,
            timeout_secs: 120,
            summary_marker: SUMMARY_MARKER.to_string(),
            encoding: TextEncoding::Utf8,
        }
    }
}

/// Outcome of one monitoring session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    /// All firmware tests passed
    pub passed: bool,
    /// Everything captured from the device (possibly partial)
    pub raw_log: String,
}

impl TestResult {
    /// Failed session with the given log
    pub fn failed(raw_log: impl Into<String>) -> Self {
        Self {
            passed: false,
            raw_log: raw_log.into(),
        }
    }
}

/// Monitor errors that abort the run
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Port enumeration failed
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Cancelled while waiting for the summary
    #[error("Test monitoring cancelled")]
    Cancelled,
}

/// Summary capture state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Waiting for the summary marker
    Searching,
    /// Marker seen, waiting for the end of the line
    Draining,
    /// Summary line complete
    Done,
}

/// Accumulates serial bytes until the summary line is complete
#[derive(Debug, Clone)]
pub struct SummaryCapture {
    marker: Vec<u8>,
    buffer: Vec<u8>,
    state: CaptureState,
    scan_from: usize,
}

impl SummaryCapture {
    /// Create a capture looking for `marker`
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.as_bytes().to_vec(),
            buffer: Vec::new(),
            state: CaptureState::Searching,
            scan_from: 0,
        }
    }

    /// Append received bytes and advance the state.
    ///
    /// Bytes fed after `Done` are ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> CaptureState {
        if self.state == CaptureState::Done {
            return self.state;
        }

        self.buffer.extend_from_slice(chunk);

        if self.state == CaptureState::Searching {
            if self.marker_found() {
                self.state = CaptureState::Draining;
            } else {
                // The marker may straddle two chunks
                self.scan_from = self
                    .buffer
                    .len()
                    .saturating_sub(self.marker.len().saturating_sub(1));
            }
        }

        if self.state == CaptureState::Draining && self.buffer.last() == Some(&b'\n') {
            self.state = CaptureState::Done;
        }

        self.state
    }

    fn marker_found(&self) -> bool {
        if self.marker.is_empty() {
            return true;
        }
        self.buffer[self.scan_from..]
            .windows(self.marker.len())
            .any(|w| w == self.marker.as_slice())
    }

    /// Current state
    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Raw bytes received so far
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }
}

/// Byte source the monitor polls
pub trait SerialLink {
    /// Bytes waiting in the input queue
    fn bytes_to_read(&mut self) -> io::Result<u32>;

    /// Read up to `buf.len()` bytes
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens serial connections
#[cfg_attr(test, mockall::automock)]
pub trait SerialOpener {
    /// Open `port` at `baud_rate` with a per-read `timeout`
    fn open(&self, port: &str, baud_rate: u32, timeout: Duration) -> io::Result<Box<dyn SerialLink>>;
}

/// Open serial port from the `serialport` crate
pub struct PortLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink for PortLink {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io::Error::from)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

/// Opens real serial ports
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSerial;

impl SerialOpener for SystemSerial {
    fn open(&self, port: &str, baud_rate: u32, timeout: Duration) -> io::Result<Box<dyn SerialLink>> {
        let port = serialport::new(port, baud_rate)
            .timeout(timeout)
            .open()
            .map_err(io::Error::from)?;
        Ok(Box::new(PortLink { port }))
    }
}

/// Watches the flashed board for its test summary
pub struct TestMonitor {
    config: MonitorConfig,
    device_identifier: String,
    locator: DeviceLocator,
    opener: Box<dyn SerialOpener + Send + Sync>,
    classifier: Box<dyn OutcomeClassifier + Send + Sync>,
}

impl TestMonitor {
    /// Create a test monitor
    pub fn new(
        config: MonitorConfig,
        device_identifier: impl Into<String>,
        locator: DeviceLocator,
        opener: Box<dyn SerialOpener + Send + Sync>,
        classifier: Box<dyn OutcomeClassifier + Send + Sync>,
    ) -> Self {
        Self {
            config,
            device_identifier: device_identifier.into(),
            locator,
            opener,
            classifier,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Locate the board, capture its test summary and classify it
    pub fn monitor(&self, identifier: &str, cancel: &CancelToken) -> Result<TestResult, MonitorError> {
        let Some(device) = self.locator.find_device(identifier)? else {
            warn!("{} is not connected", identifier);
            return Ok(TestResult::failed(format!(
                "No serial port matching {:?} was found; the board is not connected.",
                identifier
            )));
        };

        info!(
            "Waiting for test summary on {} @ {} baud",
            device.port, self.config.baud_rate
        );

        let mut link = match self.opener.open(
            &device.port,
            self.config.baud_rate,
            self.config.read_timeout(),
        ) {
            Ok(link) => link,
            Err(e) => {
                warn!("Cannot open {}: {}", device.port, e);
                return Ok(TestResult::failed(format!("Cannot open {}: {}", device.port, e)));
            }
        };

        let mut capture = SummaryCapture::new(&self.config.summary_marker);
        let deadline = Instant::now() + self.config.timeout();
        let mut buf = vec![0u8; 4096];

        loop {
            if cancel.is_cancelled() {
                warn!("Test monitoring cancelled");
                return Err(MonitorError::Cancelled);
            }

            if let Err(e) = poll_once(link.as_mut(), &mut buf, &mut capture) {
                warn!("Serial read on {} failed: {}", device.port, e);
                let mut raw_log = self.config.encoding.decode(capture.bytes());
                raw_log.push_str(&format!("\n[serial error: {}]", e));
                return Ok(TestResult::failed(raw_log));
            }

            if capture.state() == CaptureState::Done {
                break;
            }

            if Instant::now() >= deadline {
                warn!(
                    "No complete test summary within {}s ({:?})",
                    self.config.timeout_secs,
                    capture.state()
                );
                return Ok(TestResult::failed(self.config.encoding.decode(capture.bytes())));
            }

            std::thread::sleep(self.config.poll_interval());
        }

        let raw_log = self.config.encoding.decode(capture.bytes());
        let passed = self.classifier.test_passed(&raw_log);
        debug!("Summary captured ({} bytes), passed: {}", raw_log.len(), passed);

        Ok(TestResult { passed, raw_log })
    }
}

impl TestPhase for TestMonitor {
    fn run_test(&self, cancel: &CancelToken) -> Result<TestResult, MonitorError> {
        self.monitor(&self.device_identifier, cancel)
    }
}

fn poll_once(link: &mut dyn SerialLink, buf: &mut [u8], capture: &mut SummaryCapture) -> io::Result<()> {
    let waiting = link.bytes_to_read()? as usize;
    if waiting == 0 {
        return Ok(());
    }

    let want = waiting.min(buf.len());
    match link.read(&mut buf[..want]) {
        Ok(n) => {
            trace!("rx {}", hex::encode(&buf[..n]));
            capture.feed(&buf[..n]);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(()),
        Err(e) => Err(e),
    }
}
