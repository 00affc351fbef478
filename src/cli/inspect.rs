//! Read-only commands (params, outputs, tail, dependents, show)

use anyhow::{anyhow, Result};
use serde_json::json;

use super::output::Output;
use super::workspace::Workspace;

/// Print the stack name and resolved parameter document
pub fn params(workspace: &Workspace, output: &Output, key: &str) -> Result<()> {
    let (name, params) = workspace.deployer().params(key)?;

    if output.is_json() {
        output.data(&json!({ "stack": key, "stack_name": name, "params": params }));
    } else {
        println!("{}", name);
        output.data(&params);
    }
    Ok(())
}

pub fn outputs(workspace: &Workspace, output: &Output, key: &str, only: Option<&str>) -> Result<()> {
    let outputs = workspace.deployer().outputs(key)?;

    if let Some(only) = only {
        let value = outputs
            .get(only)
            .ok_or_else(|| anyhow!("Stack {} has no output {}", key, only))?;
        if output.is_json() {
            output.data(&json!({ "output": only, "value": value }));
        } else {
            println!("{}", value);
        }
        return Ok(());
    }

    if output.is_json() {
        output.data(&outputs);
    } else if outputs.is_empty() {
        println!("Stack {} has no outputs.", key);
    } else {
        for (name, value) in &outputs {
            output.row(&[name.as_str(), value.as_str()]);
        }
    }
    Ok(())
}

pub fn tail(workspace: &Workspace, output: &Output, key: &str) -> Result<()> {
    let status = workspace.deployer().tail(key)?;
    output.success(
        &format!("Stack {} is {}", key, status.name()),
        json!({ "stack": key, "status": status.name() }),
    );
    Ok(())
}

pub fn dependents(workspace: &Workspace, output: &Output, key: &str) -> Result<()> {
    let dependents = workspace.deployer().dependents(key)?;

    if output.is_json() {
        output.data(&dependents);
    } else if dependents.is_empty() {
        println!("Nothing depends on {}.", key);
    } else {
        for dependent in &dependents {
            println!("{}", dependent);
        }
    }
    Ok(())
}

/// Show stacks in build order, as layers or flat
pub fn show(workspace: &Workspace, output: &Output, keys: &[String], flat: bool) -> Result<()> {
    let deployer = workspace.deployer();
    let layers = if keys.is_empty() {
        deployer.layers(workspace.config.stacks.keys())?
    } else {
        deployer.layers(keys)?
    };
    output.verbose_ctx("show", &format!("Found {} layers", layers.len()));

    if output.is_json() {
        let names: Vec<Vec<&str>> = layers
            .iter()
            .map(|layer| layer.iter().map(|(key, _)| *key).collect())
            .collect();
        if flat {
            output.data(&names.concat());
        } else {
            output.data(&names);
        }
        return Ok(());
    }

    for (index, layer) in layers.iter().enumerate() {
        if !flat {
            println!("Layer {}", index);
        }
        for (key, stack) in layer {
            let name = deployer.physical_name(stack).unwrap_or_else(|_| stack.stack_name.clone());
            if flat {
                output.row(&[*key, name.as_str()]);
            } else {
                output.row(&["  ", *key, name.as_str()]);
            }
        }
    }
    Ok(())
}
