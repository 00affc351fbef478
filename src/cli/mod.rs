//! # Command-Line Interface
//!
//! User-facing commands and output formatting.
//!
//! ## Command Groups
//!
//! | Group | Purpose | Examples |
//! |-------|---------|----------|
//! | Deploy | Make stacks | `deploy`, `deploy-plan` |
//! | Checks | Validate before deploying | `sanity-check`, `sanity-check-plan` |
//! | Artifacts | Package and prune | `publish-artifacts`, `clean-old-artifacts`, `artifact-location` |
//! | Operations | Manual control | `confirm-deployment`, `suspend-actions`, `resume-actions`, `tail` |
//! | Inspection | Read-only views | `params`, `outputs`, `dependents`, `show` |
//!
//! ## Output Formats
//!
//! All commands support `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! Progress is logged to stderr. `RUST_LOG` overrides the default `info`
//! level, and `--verbose` lowers it to `debug`:
//! ```bash
//! strata --verbose deploy app
//! ```
//!
//! ## Entry Point
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod actions;
mod app;
mod artifact_cmd;
mod inspect;
mod output;
mod stack_cmd;
mod workspace;

pub use actions::Needs;
pub use app::{run, Cli, Commands, Globals};
pub use output::{Output, OutputFormat};
