//! Domain models for strata
//!
//! Contains the core business logic without any I/O concerns.

pub mod artifact;
pub mod confirm;
pub mod env;
mod graph;
pub mod layers;
pub mod location;
pub mod plan;
pub mod stack;
mod status;
pub mod variable;

pub use artifact::{Artifact, ArtifactCommand, ArtifactFile, ArtifactPath, Compression};
pub use confirm::ConfirmDeployment;
pub use env::{EnvSource, EnvSpec, Environment, ProcessEnv, TemplateError};
pub use graph::{GraphError, StackGraph};
pub use layers::{layered, LayeringError, Layers};
pub use location::StorageLocation;
pub use plan::PlanError;
pub use stack::{Parameter, Stack};
pub use status::{Status, NONEXISTENT};
pub use variable::{Skipper, StackRef, Variable};
