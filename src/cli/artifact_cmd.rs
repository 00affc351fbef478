//! Artifact commands

use anyhow::Result;
use serde_json::json;

use super::output::Output;
use super::workspace::Workspace;

pub fn publish(workspace: &Workspace, output: &Output, key: &str) -> Result<()> {
    let published = workspace.deployer().publish_artifacts(key)?;
    output.verbose_ctx("publish", &format!("Handled {} artifacts", published.len()));

    if output.is_json() {
        output.data(&published);
    } else {
        for artifact in &published {
            let size = artifact.size.to_string();
            let state = if artifact.uploaded { "uploaded" } else { "not uploaded" };
            output.row(&[
                artifact.key.as_str(),
                artifact.destination.as_str(),
                artifact.digest.as_str(),
                size.as_str(),
                state,
            ]);
        }
    }
    Ok(())
}

pub fn clean(workspace: &Workspace, output: &Output, key: &str) -> Result<()> {
    let deleted = workspace.deployer().clean_artifacts(key)?;
    let deleted: Vec<String> = deleted.iter().map(ToString::to_string).collect();

    output.success(
        &format!("Cleaned {} old artifacts for {}", deleted.len(), key),
        json!({ "stack": key, "deleted": deleted }),
    );
    if !output.is_json() {
        for location in &deleted {
            output.row(&["  ", location.as_str()]);
        }
    }
    Ok(())
}

pub fn location(workspace: &Workspace, output: &Output, key: &str, artifact: Option<&str>) -> Result<()> {
    let locations = workspace.deployer().artifact_locations(key, artifact)?;

    if output.is_json() {
        let items: Vec<_> = locations
            .iter()
            .map(|(artifact, location)| json!({ "artifact": artifact, "location": location.to_string() }))
            .collect();
        output.data(&items);
    } else {
        for (artifact, location) in &locations {
            output.row(&[artifact.as_str(), &location.to_string()]);
        }
    }
    Ok(())
}
