//! Deploy, sanity check and confirmation commands

use anyhow::Result;
use serde_json::json;

use super::output::Output;
use super::workspace::Workspace;
use crate::deploy::Progress;

pub fn deploy(workspace: &Workspace, output: &Output, key: &str) -> Result<()> {
    let deployer = workspace.deployer();
    let mut progress = Progress::new();
    deployer.deploy_stack(key, &mut progress, false)?;

    output.verbose_ctx("deploy", &format!("Made: {}", progress.made.join(", ")));
    output.success(
        &format!("Deployed {} ({} stacks)", key, progress.made.len()),
        json!({ "stack": key, "made": progress.made }),
    );
    Ok(())
}

pub fn deploy_plan(workspace: &Workspace, output: &Output, plan: &str) -> Result<()> {
    let deployer = workspace.deployer();
    let mut progress = Progress::new();
    deployer.deploy_plan(&workspace.config.plans, plan, &mut progress)?;

    output.success(
        &format!("Deployed plan {} ({} stacks)", plan, progress.made.len()),
        json!({ "plan": plan, "made": progress.made }),
    );
    Ok(())
}

pub fn sanity_check(workspace: &Workspace, output: &Output, key: &str) -> Result<()> {
    let deployer = workspace.deployer();
    let mut progress = Progress::new();
    deployer.sanity_check(key, &mut progress, false)?;

    output.success(
        &format!("Sanity check passed for {} ({} stacks)", key, progress.checked.len()),
        json!({ "stack": key, "checked": progress.checked }),
    );
    Ok(())
}

pub fn sanity_check_plan(workspace: &Workspace, output: &Output, plan: &str) -> Result<()> {
    let deployer = workspace.deployer();
    let mut progress = Progress::new();
    deployer.sanity_check_plan(&workspace.config.plans, plan, &mut progress)?;

    output.success(
        &format!("Sanity check passed for plan {}", plan),
        json!({ "plan": plan, "checked": progress.checked }),
    );
    Ok(())
}

pub fn confirm_deployment(workspace: &Workspace, output: &Output, key: &str) -> Result<()> {
    workspace.deployer().confirm_deployment(key)?;
    output.success(&format!("Confirmed deployment of {}", key), json!({ "stack": key }));
    Ok(())
}

/// Suspends or resumes the scheduled actions of a stack's scaling group
pub fn scheduled_actions(workspace: &Workspace, output: &Output, key: &str, suspend: bool) -> Result<()> {
    let deployer = workspace.deployer();
    let (group, verb) = if suspend {
        (deployer.suspend_actions(key)?, "Suspended")
    } else {
        (deployer.resume_actions(key)?, "Resumed")
    };

    output.success(
        &format!("{} scheduled actions for {}", verb, group),
        json!({ "stack": key, "group": group, "suspended": suspend }),
    );
    Ok(())
}
