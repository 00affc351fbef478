//! strata - dependency-ordered deployment of infrastructure stacks
//!
//! Stacks are declared in a YAML file with templates, parameters and
//! cross-stack references. strata layers them by dependency, drives each one
//! through create-or-update against a provisioning API, packages and uploads
//! their artifacts, and confirms deployments through queues, HTTP endpoints
//! or storage markers.

pub mod artifact;
pub mod cli;
pub mod config;
pub mod confirm;
pub mod deploy;
pub mod domain;
pub mod error;
pub mod remote;

pub use config::Config;
pub use deploy::{Deployer, Progress, Settings};
pub use domain::{Stack, Status};
pub use error::{DeployError, ErrorKind};
