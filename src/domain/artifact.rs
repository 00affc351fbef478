//! Artifact definitions
//!
//! An artifact is an archive assembled from command outputs, host paths and
//! inline files, uploaded to a templated storage address and pruned down to
//! a retention count.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::env::{EnvSpec, Environment, TemplateError};
use super::location::{LocationError, StorageLocation};

/// Default bound on a single packaging command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("Unsupported compression type '{0}', expected one of gz, none")]
    UnknownCompression(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Location(#[from] LocationError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "tar",
            Compression::Gzip => "tar.gz",
        }
    }
}

impl FromStr for Compression {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gz" | "gzip" => Ok(Compression::Gzip),
            "none" | "" => Ok(Compression::None),
            other => Err(ArtifactError::UnknownCompression(other.to_string())),
        }
    }
}

/// A host file or directory and where it lands inside the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPath {
    pub host_path: PathBuf,
    pub artifact_path: String,
}

impl ArtifactPath {
    pub fn new(host_path: impl Into<PathBuf>, artifact_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            artifact_path: artifact_path.into(),
        }
    }
}

/// Inline content written into the archive, templated with the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub content: String,
    pub path: String,
}

/// Lines appended to a staged file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub path: String,
    pub append: Vec<String>,
}

/// A staged build step
///
/// `copy` populates a scratch directory, `modify` edits the staged files,
/// `command` runs inside it and `add_into_tar` picks what goes into the
/// archive (paths relative to the scratch directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactCommand {
    pub copy: Vec<ArtifactPath>,
    pub modify: Vec<Modification>,
    pub command: Vec<String>,
    pub timeout: Duration,
    pub temp_dir: Option<String>,
    pub add_into_tar: Vec<ArtifactPath>,
}

impl Default for ArtifactCommand {
    fn default() -> Self {
        Self {
            copy: Vec::new(),
            modify: Vec::new(),
            command: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            temp_dir: None,
            add_into_tar: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: String,
    pub compression: Compression,
    pub history_length: usize,
    pub cleanup_prefix: Option<String>,
    pub upload_to: String,
    pub not_created_here: bool,
    pub build_env: Vec<EnvSpec>,
    pub commands: Vec<ArtifactCommand>,
    pub paths: Vec<ArtifactPath>,
    pub files: Vec<ArtifactFile>,
}

impl Artifact {
    pub fn new(key: impl Into<String>, upload_to: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            compression: Compression::default(),
            history_length: 0,
            cleanup_prefix: None,
            upload_to: upload_to.into(),
            not_created_here: false,
            build_env: Vec::new(),
            commands: Vec::new(),
            paths: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Where this artifact is uploaded
    pub fn destination(&self, environment: &Environment) -> Result<StorageLocation, ArtifactError> {
        Ok(StorageLocation::parse(&environment.render(&self.upload_to)?)?)
    }

    /// The prefix old versions are listed under
    ///
    /// Defaults to the directory of the upload destination.
    pub fn prune_prefix(&self, environment: &Environment) -> Result<StorageLocation, ArtifactError> {
        match &self.cleanup_prefix {
            Some(prefix) => Ok(StorageLocation::parse(&environment.render(prefix)?)?),
            None => Ok(self.destination(environment)?.parent()),
        }
    }
}

/// A stored object as reported by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub location: StorageLocation,
    pub last_modified: DateTime<Utc>,
}

/// Objects to delete so that only the newest `keep` remain
pub fn stale_versions(mut objects: Vec<StoredObject>, keep: usize) -> Vec<StoredObject> {
    objects.sort_by(|a, b| {
        a.last_modified
            .cmp(&b.last_modified)
            .then_with(|| a.location.key.cmp(&b.location.key))
    });
    let excess = objects.len().saturating_sub(keep);
    objects.truncate(excess);
    objects
}
