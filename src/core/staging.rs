//! Dependency staging
//!
//! Shared library sources live outside the sketch directory. Before a build
//! they are copied next to the sketch, and removed again afterwards. The list
//! comes from a JSON manifest:
//!
//! ```json
//! { "root": "../lib/", "import": ["Pin", "Parser"] }
//! ```
//!
//! `root` is a plain prefix: `<root><Name>.h` and `<root><Name>.cpp` are
//! copied when they exist.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Source file extensions that are staged
const STAGED_EXTENSIONS: [&str; 2] = ["h", "cpp"];

/// Staging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    /// Stage dependencies at all
    pub enabled: bool,
    /// Manifest listing the dependencies
    pub manifest: PathBuf,
    /// Directory the dependencies are copied into
    pub target_dir: PathBuf,
}

impl StagingConfig {
    /// Stager for this configuration
    pub fn stager(&self) -> Box<dyn DependencyStager> {
        if self.enabled {
            Box::new(ManifestStager::new(&self.manifest, &self.target_dir))
        } else {
            Box::new(NoStaging)
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            manifest: PathBuf::from("dependencies.json"),
            target_dir: PathBuf::from("."),
        }
    }
}

/// Staging errors
#[derive(Error, Debug)]
pub enum StagingError {
    /// Manifest could not be read
    #[error("Cannot read dependency manifest {path}: {source}")]
    ManifestRead {
        /// Manifest path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Manifest is not valid JSON of the expected shape
    #[error("Invalid dependency manifest {path}: {source}")]
    ManifestFormat {
        /// Manifest path
        path: PathBuf,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },

    /// Copying a dependency failed
    #[error("Cannot copy {from} to {to}: {source}")]
    Copy {
        /// Source file
        from: PathBuf,
        /// Destination file
        to: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Removing a staged dependency failed
    #[error("Cannot remove {path}: {source}")]
    Remove {
        /// Staged file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Prepares and tears down the build directory
#[cfg_attr(test, mockall::automock)]
pub trait DependencyStager {
    /// Copy dependencies into the build directory
    fn stage(&self) -> Result<(), StagingError>;

    /// Remove staged dependencies from the build directory
    fn clean(&self) -> Result<(), StagingError>;
}

/// Stager that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStaging;

impl DependencyStager for NoStaging {
    fn stage(&self) -> Result<(), StagingError> {
        Ok(())
    }

    fn clean(&self) -> Result<(), StagingError> {
        Ok(())
    }
}

/// Dependency manifest contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyManifest {
    /// Prefix prepended to every dependency name
    pub root: String,
    /// Dependency names without extension
    pub import: Vec<String>,
}

/// Stager driven by a dependency manifest
#[derive(Debug, Clone)]
pub struct ManifestStager {
    manifest: PathBuf,
    target_dir: PathBuf,
}

impl ManifestStager {
    /// Create a stager
    pub fn new(manifest: impl Into<PathBuf>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest: manifest.into(),
            target_dir: target_dir.into(),
        }
    }

    /// Read and parse the manifest
    pub fn load_manifest(&self) -> Result<DependencyManifest, StagingError> {
        let content =
            std::fs::read_to_string(&self.manifest).map_err(|source| StagingError::ManifestRead {
                path: self.manifest.clone(),
                source,
            })?;

        serde_json::from_str(&content).map_err(|source| StagingError::ManifestFormat {
            path: self.manifest.clone(),
            source,
        })
    }

    fn staged_path(&self, name: &str, ext: &str) -> Option<PathBuf> {
        let base = Path::new(name).file_name()?;
        let mut file = base.to_os_string();
        file.push(".");
        file.push(ext);
        Some(self.target_dir.join(file))
    }
}

impl DependencyStager for ManifestStager {
    fn stage(&self) -> Result<(), StagingError> {
        let manifest = self.load_manifest()?;
        let mut copied = 0;

        for name in &manifest.import {
            for ext in STAGED_EXTENSIONS {
                let from = source_path(&manifest, name, ext);
                if !from.is_file() {
                    continue;
                }
                let Some(to) = self.staged_path(name, ext) else {
                    continue;
                };
                if same_file(&from, &to) {
                    debug!("{} is already in place", from.display());
                    continue;
                }

                debug!("Staging {} -> {}", from.display(), to.display());
                std::fs::copy(&from, &to).map_err(|source| StagingError::Copy {
                    from: from.clone(),
                    to: to.clone(),
                    source,
                })?;
                copied += 1;
            }
        }

        info!("Staged {} dependency file(s)", copied);
        Ok(())
    }

    fn clean(&self) -> Result<(), StagingError> {
        let manifest = self.load_manifest()?;

        for name in &manifest.import {
            for ext in STAGED_EXTENSIONS {
                let Some(path) = self.staged_path(name, ext) else {
                    continue;
                };
                // Never remove the library's own copy
                if same_file(&source_path(&manifest, name, ext), &path) {
                    continue;
                }
                if path.is_file() {
                    debug!("Removing {}", path.display());
                    std::fs::remove_file(&path)
                        .map_err(|source| StagingError::Remove { path: path.clone(), source })?;
                }
            }
        }

        Ok(())
    }
}

fn source_path(manifest: &DependencyManifest, name: &str, ext: &str) -> PathBuf {
    PathBuf::from(format!("{}{}.{}", manifest.root, name, ext))
}

/// Both paths exist and resolve to the same file
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
