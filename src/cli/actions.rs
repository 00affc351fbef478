//! What each command needs before it runs
//!
//! Targets are checked against the configuration up front, so a typo in a
//! stack or plan name fails before any remote call is made.

use anyhow::{bail, Result};

use super::app::Commands;
use crate::config::Config;
use crate::domain::plan;

/// Inputs a command requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Needs {
    pub stack: bool,
    pub plan: bool,
    pub artifacts: bool,
}

impl Needs {
    pub const NOTHING: Needs = Needs {
        stack: false,
        plan: false,
        artifacts: false,
    };
    pub const STACK: Needs = Needs {
        stack: true,
        ..Needs::NOTHING
    };
    pub const PLAN: Needs = Needs {
        plan: true,
        ..Needs::NOTHING
    };
    pub const ARTIFACTS: Needs = Needs {
        stack: true,
        artifacts: true,
        ..Needs::NOTHING
    };
}

impl Commands {
    pub fn needs(&self) -> Needs {
        match self {
            Commands::Deploy { .. }
            | Commands::SanityCheck { .. }
            | Commands::ConfirmDeployment { .. }
            | Commands::SuspendActions { .. }
            | Commands::ResumeActions { .. }
            | Commands::Params { .. }
            | Commands::Outputs { .. }
            | Commands::Tail { .. }
            | Commands::Dependents { .. } => Needs::STACK,

            Commands::DeployPlan { .. } | Commands::SanityCheckPlan { .. } => Needs::PLAN,

            Commands::PublishArtifacts { .. }
            | Commands::CleanOldArtifacts { .. }
            | Commands::ArtifactLocation { .. } => Needs::ARTIFACTS,

            Commands::Show { .. } => Needs::NOTHING,
        }
    }

    /// The stack or plan named on the command line
    pub fn target(&self) -> Option<&str> {
        match self {
            Commands::Deploy { stack }
            | Commands::SanityCheck { stack }
            | Commands::ConfirmDeployment { stack }
            | Commands::SuspendActions { stack }
            | Commands::ResumeActions { stack }
            | Commands::Params { stack }
            | Commands::Outputs { stack, .. }
            | Commands::Tail { stack }
            | Commands::Dependents { stack }
            | Commands::PublishArtifacts { stack }
            | Commands::CleanOldArtifacts { stack }
            | Commands::ArtifactLocation { stack, .. } => Some(stack.as_str()),

            Commands::DeployPlan { plan } | Commands::SanityCheckPlan { plan } => Some(plan.as_str()),

            Commands::Show { .. } => None,
        }
    }
}

/// Fails when the command's target is missing from the configuration
pub fn preflight(command: &Commands, config: &Config) -> Result<()> {
    let needs = command.needs();
    let Some(target) = command.target() else {
        return Ok(());
    };

    if needs.plan {
        plan::resolve(&config.plans, target, &config.stacks)?;
    }

    if needs.stack {
        let Some(stack) = config.stacks.get(target) else {
            let available: Vec<&str> = config.stacks.keys().map(String::as_str).collect();
            bail!("No such stack '{}' (available: {})", target, available.join(", "));
        };
        if needs.artifacts && stack.artifacts.is_empty() {
            bail!("Stack {} has no artifacts", target);
        }
    }
    Ok(())
}
