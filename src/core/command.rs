//! External command execution
//!
//! The toolchain runs as a child process. Its stdout and stderr are merged
//! into one log in arrival order.

use super::cancel::CancelToken;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use thiserror::Error;
use tracing::{debug, warn};

/// How often the cancel flag is checked while the child runs
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Combined stdout + stderr bytes
    pub log: Vec<u8>,
    /// Exit code, `None` if terminated by a signal
    pub exit_code: Option<i32>,
}

/// Command execution errors
#[derive(Error, Debug)]
pub enum CommandError {
    /// Program could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Waiting on the child failed
    #[error("Failed to wait on child process: {0}")]
    Wait(#[source] std::io::Error),

    /// Cancelled; the child was killed
    #[error("Command cancelled")]
    Cancelled,
}

/// Runs a program to completion and captures its output
#[cfg_attr(test, mockall::automock)]
pub trait ExternalCommand {
    /// Run `program` with `args`, blocking until it exits or `cancel` fires
    fn run(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancelToken,
    ) -> Result<CommandOutput, CommandError>;
}

/// Runs real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommand;

impl ExternalCommand for SystemCommand {
    fn run(
        &self,
        program: &str,
        args: &[String],
        cancel: &CancelToken,
    ) -> Result<CommandOutput, CommandError> {
        debug!("Spawning {} {:?}", program, args);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let (tx, rx) = crossbeam_channel::unbounded::<Vec<u8>>();

        let streams: Vec<Box<dyn Read + Send>> = [
            child.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
            child.stderr.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
        ]
        .into_iter()
        .flatten()
        .collect();

        let readers: Vec<_> = streams
            .into_iter()
            .map(|mut stream| {
                let tx = tx.clone();
                thread::spawn(move || {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if tx.send(buf[..n].to_vec()).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                })
            })
            .collect();
        drop(tx);

        let mut log = Vec::new();
        loop {
            if cancel.is_cancelled() {
                warn!("Cancelling {}", program);
                let _ = child.kill();
                let _ = child.wait();
                // Readers are detached; a grandchild may still hold the pipes
                return Err(CommandError::Cancelled);
            }

            match rx.recv_timeout(CANCEL_POLL) {
                Ok(chunk) => log.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {}
                // Both pipes closed
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = child.wait().map_err(CommandError::Wait)?;
        for reader in readers {
            let _ = reader.join();
        }

        debug!("{} exited with {:?} ({} bytes of output)", program, status.code(), log.len());

        Ok(CommandOutput {
            log,
            exit_code: status.code(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_captures_stdout_and_stderr() {
        let args = vec!["-c".to_string(), "echo out; echo err 1>&2".to_string()];
        let output = SystemCommand.run("sh", &args, &CancelToken::new()).unwrap();

        let text = String::from_utf8_lossy(&output.log);
        assert!(text.contains("out"));
        assert!(text.contains("err"));
        assert_eq!(output.exit_code, Some(0));
    }

    #[test]
    fn test_exit_code_reported() {
        let args = vec!["-c".to_string(), "exit 3".to_string()];
        let output = SystemCommand.run("sh", &args, &CancelToken::new()).unwrap();
        assert_eq!(output.exit_code, Some(3));
    }

    #[test]
    fn test_missing_program() {
        let result = SystemCommand.run("definitely-not-a-real-toolchain", &[], &CancelToken::new());
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }

    #[test]
    fn test_cancel_kills_child() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let args = vec!["-c".to_string(), "sleep 30".to_string()];

        let started = std::time::Instant::now();
        let result = SystemCommand.run("sh", &args, &cancel);
        assert!(matches!(result, Err(CommandError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
