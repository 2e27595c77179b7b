//! UnitRunner CLI
//!
//! Builds and flashes the sketch in the working directory, waits for the
//! board's test summary and writes `status.json`.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use unitrunner_core::cli::exit_code_description;
use unitrunner_core::config::LoggingConfig;
use unitrunner_core::{
    AppConfig, BuildDriver, CancelToken, CliResult, DeviceLocator, ExitCodes, RunOrchestrator,
    StatusStore, SystemCommand, SystemSerial, TestMonitor,
};

/// UnitRunner CLI
#[derive(Parser, Debug)]
#[command(
    name = "unitrunner",
    author = "UnitRunner Team",
    version,
    about = "Build, flash and self-test firmware on an attached board",
    long_about = None
)]
struct Cli {
    /// Run the application as build only mode
    #[arg(short = 'b', long = "buildonly")]
    build_only: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "UNITRUNNER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (warnings and errors only)
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version end up here too
            let code = if e.use_stderr() {
                ExitCodes::INVALID_ARGS
            } else {
                ExitCodes::SUCCESS
            };
            return ExitCode::from(code);
        }
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(result) => return report(&result),
    };

    let _log_guard = init_logging(&cli, &config.logging);
    info!("Starting UnitRunner v{}", env!("CARGO_PKG_VERSION"));

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        warn!("Ctrl+C handler not installed: {}", e);
    }

    let orchestrator = orchestrator(&config).with_cancel(cancel);

    let result = match orchestrator.run(cli.build_only) {
        Ok(outcome) => {
            if !cli.quiet {
                if let Some(test) = &outcome.test {
                    println!("{}", test.raw_log);
                }
                match StatusStore::to_json(&outcome.record) {
                    Ok(json) => println!("{}", json),
                    Err(e) => warn!("Cannot render status: {}", e),
                }
            }
            CliResult::success()
        }
        Err(e) => {
            error!("{}", e);
            CliResult::from(&e)
        }
    };

    report(&result)
}

fn load_config(cli: &Cli) -> Result<AppConfig, CliResult> {
    let loaded = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    loaded.map_err(|e| CliResult::from(&e))
}

fn orchestrator(config: &AppConfig) -> RunOrchestrator {
    let builder = BuildDriver::new(
        config.toolchain.clone(),
        &config.device.identifier,
        DeviceLocator::system(),
        Box::new(SystemCommand),
        Box::new(config.classify.classifier()),
    );
    let tester = TestMonitor::new(
        config.monitor.clone(),
        &config.device.identifier,
        DeviceLocator::system(),
        Box::new(SystemSerial),
        Box::new(config.classify.classifier()),
    );

    RunOrchestrator::new(
        config.staging.stager(),
        Box::new(builder),
        Box::new(tester),
        StatusStore::new(config.status.clone()),
    )
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) -> Option<WorkerGuard> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut file_error = None;
    let (file_layer, guard) = match logging.file.then(|| logging.resolved_directory()).flatten() {
        Some(dir) => match open_log_file(&dir) {
            Ok((writer, guard)) => {
                let layer = fmt::layer().with_ansi(false).with_writer(writer);
                (Some(layer), Some(guard))
            }
            Err(e) => {
                file_error = Some(e);
                (None, None)
            }
        },
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        warn!("File logging disabled: {:#}", e);
    }

    guard
}

fn open_log_file(dir: &Path) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::daily(dir, "unitrunner.log");
    Ok(tracing_appender::non_blocking(appender))
}

fn report(result: &CliResult) -> ExitCode {
    if let CliResult::Error(code, msg) = result {
        eprintln!("error: {} ({})", msg, exit_code_description(*code));
    }
    result.to_exit_code()
}
