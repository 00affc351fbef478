//! Crate-level error type
//!
//! Every failure the driver, artifact manager and confirmation engine can
//! produce, grouped by [`ErrorKind`] for reporting.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::domain::artifact::ArtifactError;
use crate::domain::location::LocationError;
use crate::domain::{GraphError, LayeringError, PlanError, TemplateError};
use crate::remote::{RemoteError, WaitError};

/// Broad category of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Cycle,
    RemoteState,
    Timeout,
    Confirmation,
    Packaging,
    Remote,
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Stack {stack} is missing environment variables: {}", missing.join(", "))]
    MissingEnvironment { stack: String, missing: Vec<String> },

    #[error("No such stack '{0}'")]
    NoSuchStack(String),

    #[error("Stack {stack} has no artifact '{artifact}'")]
    NoSuchArtifact { stack: String, artifact: String },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Found placeholders in the parameters of {stack}: {}", placeholders.join(", "))]
    UnresolvedPlaceholders {
        stack: String,
        placeholders: Vec<String>,
    },

    #[error("Stack {stack} has no output {output}")]
    MissingOutput { stack: String, output: String },

    #[error("Stack {stack} has an invalid template: {}", problems.join("; "))]
    InvalidTemplate { stack: String, problems: Vec<String> },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Layering(#[from] LayeringError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Stack {stack} is in status {status} and could not be updated")]
    CannotUpdate { stack: String, status: String },

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error("Timed out after {}s waiting for {what}", timeout.as_secs())]
    Timeout { what: String, timeout: Duration },

    #[error("Deployment failed on instances: {}", failed.join(", "))]
    FailedInstances { failed: Vec<String> },

    #[error("Failed to receive any messages from {queue}")]
    NoMessages { queue: String },

    #[error("No instances are InService in {group}")]
    NoInstances { group: String },

    #[error("Stack {stack}: {message}")]
    BadStack { stack: String, message: String },

    #[error("Invalid expectation pattern '{pattern}': {message}")]
    BadPattern { pattern: String, message: String },

    #[error("Expected {} to exist for {destination}", host_path.display())]
    MissingSource {
        host_path: PathBuf,
        destination: String,
    },

    #[error("Cannot modify {}, it doesn't exist in the build", path.display())]
    MissingModifyTarget { path: PathBuf },

    #[error("Command `{command}` failed ({status})\n{output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Location(#[from] LocationError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl DeployError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DeployError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::MissingEnvironment { .. }
            | DeployError::NoSuchStack(_)
            | DeployError::NoSuchArtifact { .. }
            | DeployError::Plan(_)
            | DeployError::UnresolvedPlaceholders { .. }
            | DeployError::MissingOutput { .. }
            | DeployError::InvalidTemplate { .. }
            | DeployError::Template(_)
            | DeployError::BadStack { .. }
            | DeployError::BadPattern { .. }
            | DeployError::Artifact(_)
            | DeployError::Location(_) => ErrorKind::Configuration,

            DeployError::Layering(LayeringError::Cycle { .. }) => ErrorKind::Cycle,
            DeployError::Layering(_) | DeployError::Graph(_) => ErrorKind::Configuration,

            DeployError::CannotUpdate { .. } => ErrorKind::RemoteState,
            DeployError::Wait(WaitError::Remote(_)) => ErrorKind::Remote,
            DeployError::Wait(_) => ErrorKind::RemoteState,

            DeployError::Timeout { .. } => ErrorKind::Timeout,

            DeployError::FailedInstances { .. }
            | DeployError::NoMessages { .. }
            | DeployError::NoInstances { .. } => ErrorKind::Confirmation,

            DeployError::MissingSource { .. }
            | DeployError::MissingModifyTarget { .. }
            | DeployError::CommandFailed { .. }
            | DeployError::Io { .. } => ErrorKind::Packaging,

            DeployError::Remote(_) => ErrorKind::Remote,
        }
    }
}

pub type Result<T, E = DeployError> = std::result::Result<T, E>;
