//! Persistent run status
//!
//! The status file holds exactly one record, the outcome of the latest run:
//!
//! ```json
//! {
//!     "build": {
//!         "last": "2026/10/18",
//!         "status": true
//!     },
//!     "test": {
//!         "last": null,
//!         "status": false
//!     }
//! }
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Outcome of one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStatus {
    // Fields are declared in sorted key order
    /// Date of the run when it succeeded, otherwise `None`
    pub last: Option<String>,
    /// Phase succeeded
    pub status: bool,
}

impl PhaseStatus {
    /// Status stamped with `date` only when `status` is true
    pub fn new(status: bool, date: &str) -> Self {
        Self {
            last: status.then(|| date.to_string()),
            status,
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Build/upload phase
    pub build: PhaseStatus,
    /// Test phase
    pub test: PhaseStatus,
}

impl StatusRecord {
    /// Assemble a record from both outcomes
    pub fn new(build_ok: bool, test_ok: bool, date: &str) -> Self {
        Self {
            build: PhaseStatus::new(build_ok, date),
            test: PhaseStatus::new(test_ok, date),
        }
    }
}

/// Status file configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Status file location
    pub path: PathBuf,
    /// `chrono` format of the `last` dates
    pub date_format: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("status.json"),
            date_format: "%Y/%m/%d".to_string(),
        }
    }
}

/// Status store errors
#[derive(Error, Debug)]
pub enum StatusError {
    /// I/O error
    #[error("Status file {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Status JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The date format asks for fields a calendar date does not have
    #[error("Date format {0:?} cannot render a date")]
    DateFormat(String),
}

/// Reads and writes the status file
#[derive(Debug, Clone)]
pub struct StatusStore {
    config: StatusConfig,
}

impl StatusStore {
    /// Create a store
    pub fn new(config: StatusConfig) -> Self {
        Self { config }
    }

    /// Status file path
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Render a date the way the status file stores it.
    ///
    /// Time fields such as `%H` have no value on a date and fail here.
    pub fn format_date(&self, date: NaiveDate) -> Result<String, StatusError> {
        let mut out = String::new();
        write!(out, "{}", date.format(&self.config.date_format))
            .map_err(|_| StatusError::DateFormat(self.config.date_format.clone()))?;
        Ok(out)
    }

    /// Serialize a record: sorted keys, 4-space indentation
    pub fn to_json(record: &StatusRecord) -> Result<String, StatusError> {
        let mut out = Vec::new();
        write_json(&mut out, record)?;
        String::from_utf8(out).map_err(|e| StatusError::Json(serde::ser::Error::custom(e)))
    }

    /// Replace the status file with `record`.
    ///
    /// The record is written to a sibling temp file and renamed over the
    /// target, so readers see either the old or the new record.
    pub fn save(&self, record: &StatusRecord) -> Result<(), StatusError> {
        let path = &self.config.path;
        let tmp = tmp_path(path);
        let io_err = |p: &Path| {
            let p = p.to_path_buf();
            move |source: std::io::Error| StatusError::Io { path: p, source }
        };

        {
            let file = std::fs::File::create(&tmp).map_err(io_err(&tmp))?;
            let mut writer = BufWriter::new(file);
            let written = write_json(&mut writer, record)
                .map_err(StatusError::from)
                .and_then(|()| writer.flush().map_err(io_err(&tmp)))
                .and_then(|()| writer.get_ref().sync_all().map_err(io_err(&tmp)));
            if let Err(e) = written {
                drop(writer);
                let _ = std::fs::remove_file(&tmp);
                return Err(e);
            }
        }

        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(path)(e));
        }

        debug!("Status written to {}", path.display());
        Ok(())
    }

    /// Read the current record, `None` if no status file exists yet
    pub fn load(&self) -> Result<Option<StatusRecord>, StatusError> {
        let path = &self.config.path;
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StatusError::Io {
                path: path.clone(),
                source,
            }),
        }
    }
}

fn write_json<W: io::Write>(writer: W, record: &StatusRecord) -> Result<(), serde_json::Error> {
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(writer, formatter);
    record.serialize(&mut ser)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
