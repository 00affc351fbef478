//! Main CLI application structure

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use super::output::{Output, OutputFormat};
use super::workspace::Workspace;
use super::{actions, artifact_cmd, inspect, stack_cmd};
use crate::config::DEFAULT_CONFIG_FILE;

#[derive(Parser)]
#[command(name = "strata")]
#[command(author, version, about = "Dependency-ordered deployment of infrastructure stacks")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub globals: Globals,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Enable verbose output for debugging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every command
#[derive(Args, Debug, Clone)]
pub struct Globals {
    /// Configuration file
    #[arg(long, short = 'c', global = true, env = "STRATA_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Environment whose vars are used
    #[arg(long, short = 'e', global = true, env = "STRATA_ENVIRONMENT")]
    pub environment: Option<String>,

    /// Log mutating calls instead of making them
    #[arg(long, short = 'n', global = true)]
    pub dry_run: bool,

    /// Directory holding local backend state (default: .strata next to the config)
    #[arg(long, global = true, env = "STRATA_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Hide Password parameter values in logs and output
    #[arg(long, global = true)]
    pub mask_passwords: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deploy a stack and its dependencies
    Deploy {
        /// Stack key
        stack: String,
    },

    /// Deploy every stack of a plan
    DeployPlan {
        /// Plan name
        plan: String,
    },

    /// Check a stack and its dependencies can be deployed
    SanityCheck {
        /// Stack key
        stack: String,
    },

    /// Check every stack of a plan can be deployed
    SanityCheckPlan {
        /// Plan name
        plan: String,
    },

    /// Build and upload a stack's artifacts
    PublishArtifacts {
        /// Stack key
        stack: String,
    },

    /// Delete all but the newest versions of a stack's artifacts
    CleanOldArtifacts {
        /// Stack key
        stack: String,
    },

    /// Run a stack's deployment confirmation on its own
    ConfirmDeployment {
        /// Stack key
        stack: String,
    },

    /// Suspend the scheduled actions of a stack's scaling group
    SuspendActions {
        /// Stack key
        stack: String,
    },

    /// Resume the scheduled actions of a stack's scaling group
    ResumeActions {
        /// Stack key
        stack: String,
    },

    /// Print the stack name and resolved parameters
    Params {
        /// Stack key
        stack: String,
    },

    /// Print the outputs of a deployed stack
    Outputs {
        /// Stack key
        stack: String,

        /// Print only this output
        output: Option<String>,
    },

    /// Wait for a stack's current transition to finish
    Tail {
        /// Stack key
        stack: String,
    },

    /// Print where a stack's artifacts are uploaded
    ArtifactLocation {
        /// Stack key
        stack: String,

        /// Only this artifact
        #[arg(long)]
        artifact: Option<String>,
    },

    /// List the stacks that depend on a stack
    Dependents {
        /// Stack key
        stack: String,
    },

    /// Show stacks in build order
    Show {
        /// Stack keys (defaults to every stack)
        stacks: Vec<String>,

        /// One stack per line instead of layers
        #[arg(long)]
        flat: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A second initialisation (in-process tests) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(cli.format, cli.verbose);

    let workspace = Workspace::open(&cli.globals, &output)?;
    output.verbose_ctx("strata", "Configuration loaded");
    actions::preflight(&cli.command, &workspace.config)?;

    match cli.command {
        Commands::Deploy { stack } => stack_cmd::deploy(&workspace, &output, &stack)?,
        Commands::DeployPlan { plan } => stack_cmd::deploy_plan(&workspace, &output, &plan)?,
        Commands::SanityCheck { stack } => stack_cmd::sanity_check(&workspace, &output, &stack)?,
        Commands::SanityCheckPlan { plan } => {
            stack_cmd::sanity_check_plan(&workspace, &output, &plan)?
        }
        Commands::ConfirmDeployment { stack } => {
            stack_cmd::confirm_deployment(&workspace, &output, &stack)?
        }
        Commands::SuspendActions { stack } => {
            stack_cmd::scheduled_actions(&workspace, &output, &stack, true)?
        }
        Commands::ResumeActions { stack } => {
            stack_cmd::scheduled_actions(&workspace, &output, &stack, false)?
        }

        Commands::PublishArtifacts { stack } => artifact_cmd::publish(&workspace, &output, &stack)?,
        Commands::CleanOldArtifacts { stack } => artifact_cmd::clean(&workspace, &output, &stack)?,
        Commands::ArtifactLocation { stack, artifact } => {
            artifact_cmd::location(&workspace, &output, &stack, artifact.as_deref())?
        }

        Commands::Params { stack } => inspect::params(&workspace, &output, &stack)?,
        Commands::Outputs { stack, output: name } => {
            inspect::outputs(&workspace, &output, &stack, name.as_deref())?
        }
        Commands::Tail { stack } => inspect::tail(&workspace, &output, &stack)?,
        Commands::Dependents { stack } => inspect::dependents(&workspace, &output, &stack)?,
        Commands::Show { stacks, flat } => inspect::show(&workspace, &output, &stacks, flat)?,
    }

    output.verbose_ctx("strata", "Command completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn globals_work_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "strata",
            "deploy",
            "app",
            "--dry-run",
            "-e",
            "prod",
            "--format",
            "json",
        ])
        .unwrap();

        assert!(cli.globals.dry_run);
        assert_eq!(cli.globals.environment.as_deref(), Some("prod"));
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Deploy { ref stack } if stack == "app"));
    }

    #[test]
    fn show_takes_any_number_of_stacks() {
        let cli = Cli::try_parse_from(["strata", "show", "--flat"]).unwrap();
        assert!(matches!(cli.command, Commands::Show { ref stacks, flat: true } if stacks.is_empty()));
    }
}
