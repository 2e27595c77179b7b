//! End-to-end runs against fake ports, a fake toolchain and a fake board

use chrono::NaiveDate;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use unitrunner_core::{
    BuildDriver, CancelToken, Clock, CommandError, CommandOutput, Device, DeviceError,
    DeviceLocator, ExternalCommand, ManifestStager, MarkerClassifier, MonitorConfig, NoStaging,
    PortEnumerator, RunError, RunOrchestrator, SerialLink, SerialOpener, StatusConfig,
    StatusStore, TestMonitor, ToolchainConfig,
};

struct FakePorts(Vec<Device>);

impl PortEnumerator for FakePorts {
    fn available(&self) -> Result<Vec<Device>, DeviceError> {
        Ok(self.0.clone())
    }
}

#[derive(Clone)]
struct FakeToolchain {
    log: &'static str,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeToolchain {
    fn new(log: &'static str) -> Self {
        Self {
            log,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl ExternalCommand for FakeToolchain {
    fn run(
        &self,
        _program: &str,
        args: &[String],
        _cancel: &CancelToken,
    ) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(args.to_vec());
        Ok(CommandOutput {
            log: self.log.as_bytes().to_vec(),
            exit_code: Some(0),
        })
    }
}

/// Board that prints its output in small chunks
struct FakeBoard {
    output: &'static str,
    chunk: usize,
}

struct ChunkedLink(VecDeque<Vec<u8>>);

impl SerialLink for ChunkedLink {
    fn bytes_to_read(&mut self) -> io::Result<u32> {
        Ok(self.0.front().map_or(0, |c| c.len() as u32))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = self.0.pop_front().unwrap_or_default();
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

impl SerialOpener for FakeBoard {
    fn open(&self, _port: &str, _baud_rate: u32, _timeout: Duration) -> io::Result<Box<dyn SerialLink>> {
        let chunks = self
            .output
            .as_bytes()
            .chunks(self.chunk)
            .map(<[u8]>::to_vec)
            .collect();
        Ok(Box::new(ChunkedLink(chunks)))
    }
}

struct FixedClock;

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }
}

fn micro() -> Vec<Device> {
    vec![
        Device::new("/dev/ttyS0", "n/a"),
        Device::new("/dev/ttyACM0", "Arduino Micro"),
    ]
}

fn sketch_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("selftest.ino"), "void setup() {}\nvoid loop() {}\n").unwrap();
    dir
}

fn orchestrator(
    dir: &Path,
    devices: Vec<Device>,
    toolchain: &FakeToolchain,
    board_output: &'static str,
) -> RunOrchestrator {
    let toolchain_config = ToolchainConfig {
        sketch_dir: dir.to_path_buf(),
        ..ToolchainConfig::default()
    };
    let builder = BuildDriver::new(
        toolchain_config,
        "Arduino Micro",
        DeviceLocator::new(Box::new(FakePorts(devices.clone()))),
        Box::new(toolchain.clone()),
        Box::new(MarkerClassifier::default()),
    );

    let monitor_config = MonitorConfig {
        timeout_secs: 2,
        poll_interval_ms: 1,
        ..MonitorConfig::default()
    };
    let tester = TestMonitor::new(
        monitor_config,
        "Arduino Micro",
        DeviceLocator::new(Box::new(FakePorts(devices))),
        Box::new(FakeBoard {
            output: board_output,
            chunk: 7,
        }),
        Box::new(MarkerClassifier::default()),
    );

    let store = StatusStore::new(StatusConfig {
        path: dir.join("status.json"),
        ..StatusConfig::default()
    });

    RunOrchestrator::new(Box::new(NoStaging), Box::new(builder), Box::new(tester), store)
        .with_clock(Box::new(FixedClock))
}

fn status_file(dir: &Path) -> String {
    std::fs::read_to_string(dir.join("status.json")).unwrap()
}

#[test]
fn test_no_device_records_failed_build() {
    let dir = sketch_dir();
    let toolchain = FakeToolchain::new("avrdude done.\n");

    let outcome = orchestrator(dir.path(), vec![Device::new("/dev/ttyS0", "n/a")], &toolchain, "")
        .run(false)
        .unwrap();

    assert!(!outcome.build.succeeded);
    assert!(outcome.test.is_none());
    assert!(toolchain.calls().is_empty());
    assert_eq!(
        status_file(dir.path()),
        "{\n    \"build\": {\n        \"last\": null,\n        \"status\": false\n    },\n    \"test\": {\n        \"last\": null,\n        \"status\": false\n    }\n}"
    );
}

#[test]
fn test_build_only_skips_monitor() {
    let dir = sketch_dir();
    let toolchain = FakeToolchain::new("avrdude done.\n");

    let outcome = orchestrator(dir.path(), micro(), &toolchain, "Test summary: 1 run, 0 failed\n")
        .run(true)
        .unwrap();

    assert!(outcome.build.succeeded);
    assert!(outcome.test.is_none());
    assert_eq!(outcome.record.build.last.as_deref(), Some("2026/10/18"));
    assert!(outcome.record.test.last.is_none());

    let calls = toolchain.calls();
    assert_eq!(calls.len(), 1);
    let args = &calls[0];
    assert_eq!(&args[..5], ["--port", "/dev/ttyACM0", "--board", "arduino:avr:micro", "--upload"]);
    assert!(Path::new(&args[5]).is_absolute());
    assert!(args[5].ends_with("selftest.ino"));

    let stored = StatusStore::new(StatusConfig {
        path: dir.path().join("status.json"),
        ..StatusConfig::default()
    })
    .load()
    .unwrap()
    .unwrap();
    assert_eq!(stored, outcome.record);
}

#[test]
fn test_passing_summary() {
    let dir = sketch_dir();
    let toolchain = FakeToolchain::new("avrdude done.\n");
    let board = "boot\nled: ok\nTest summary: 3 run, 0 failed\n";

    let outcome = orchestrator(dir.path(), micro(), &toolchain, board).run(false).unwrap();

    let test = outcome.test.unwrap();
    assert!(test.passed);
    assert_eq!(test.raw_log, board);
    assert!(outcome.record.test.status);
    assert_eq!(outcome.record.test.last.as_deref(), Some("2026/10/18"));
}

#[test]
fn test_failing_summary() {
    let dir = sketch_dir();
    let toolchain = FakeToolchain::new("avrdude done.\n");

    let outcome = orchestrator(dir.path(), micro(), &toolchain, "Test summary: 3 run, 1 failed\n")
        .run(false)
        .unwrap();

    assert!(outcome.build.succeeded);
    assert!(!outcome.test.unwrap().passed);
    assert!(outcome.record.build.status);
    assert!(!outcome.record.test.status);
    assert!(outcome.record.test.last.is_none());
}

#[test]
fn test_compile_error_skips_monitor() {
    let dir = sketch_dir();
    let toolchain =
        FakeToolchain::new("selftest.ino:1: fatal error: missing.h\ncompilation terminated.\n");

    let outcome = orchestrator(dir.path(), micro(), &toolchain, "Test summary: 1 run, 0 failed\n")
        .run(false)
        .unwrap();

    assert!(!outcome.build.succeeded);
    assert!(outcome.build.raw_log.contains("missing.h"));
    assert!(outcome.test.is_none());
}

#[test]
fn test_silent_board_times_out() {
    let dir = sketch_dir();
    let toolchain = FakeToolchain::new("avrdude done.\n");

    let outcome = orchestrator(dir.path(), micro(), &toolchain, "boot\nTest summ")
        .run(false)
        .unwrap();

    let test = outcome.test.unwrap();
    assert!(!test.passed);
    assert_eq!(test.raw_log, "boot\nTest summ");
}

#[test]
fn test_cancelled_run_writes_nothing() {
    let dir = sketch_dir();
    let toolchain = FakeToolchain::new("avrdude done.\n");
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = orchestrator(dir.path(), micro(), &toolchain, "")
        .with_cancel(cancel)
        .run(false)
        .unwrap_err();

    assert!(matches!(err, RunError::Cancelled));
    assert!(!dir.path().join("status.json").exists());
}

#[test]
fn test_staged_dependencies_are_removed() {
    let dir = sketch_dir();
    let shared = tempfile::tempdir().unwrap();
    std::fs::write(shared.path().join("led.h"), "#pragma once\n").unwrap();
    std::fs::write(shared.path().join("led.cpp"), "#include \"led.h\"\n").unwrap();

    let manifest = dir.path().join("dependencies.json");
    let root = format!("{}/", shared.path().display());
    std::fs::write(
        &manifest,
        serde_json::json!({ "root": root, "import": ["led"] }).to_string(),
    )
    .unwrap();

    let staged = dir.path().join("led.h");
    let seen_during_build = Arc::new(Mutex::new(false));

    struct CheckingToolchain {
        staged: std::path::PathBuf,
        seen: Arc<Mutex<bool>>,
    }

    impl ExternalCommand for CheckingToolchain {
        fn run(&self, _: &str, _: &[String], _: &CancelToken) -> Result<CommandOutput, CommandError> {
            *self.seen.lock().unwrap() = self.staged.is_file();
            Ok(CommandOutput {
                log: b"avrdude done.\n".to_vec(),
                exit_code: Some(0),
            })
        }
    }

    let builder = BuildDriver::new(
        ToolchainConfig {
            sketch_dir: dir.path().to_path_buf(),
            ..ToolchainConfig::default()
        },
        "Arduino Micro",
        DeviceLocator::new(Box::new(FakePorts(micro()))),
        Box::new(CheckingToolchain {
            staged: staged.clone(),
            seen: Arc::clone(&seen_during_build),
        }),
        Box::new(MarkerClassifier::default()),
    );
    let tester = TestMonitor::new(
        MonitorConfig::default(),
        "Arduino Micro",
        DeviceLocator::new(Box::new(FakePorts(micro()))),
        Box::new(FakeBoard {
            output: "",
            chunk: 1,
        }),
        Box::new(MarkerClassifier::default()),
    );
    let store = StatusStore::new(StatusConfig {
        path: dir.path().join("status.json"),
        ..StatusConfig::default()
    });

    let outcome = RunOrchestrator::new(
        Box::new(ManifestStager::new(&manifest, dir.path())),
        Box::new(builder),
        Box::new(tester),
        store,
    )
    .with_clock(Box::new(FixedClock))
    .run(true)
    .unwrap();

    assert!(outcome.build.succeeded);
    assert!(*seen_during_build.lock().unwrap());
    assert!(!staged.exists());
    assert!(!dir.path().join("led.cpp").exists());
    assert!(shared.path().join("led.h").exists());
}
