//! strata - dependency-ordered deployment of infrastructure stacks

use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = strata::cli::run() {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
