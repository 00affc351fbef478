//! Named, ordered lists of stacks

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("No such plan '{wanted}' (available: {})", available.join(", "))]
    NoSuchPlan { wanted: String, available: Vec<String> },

    #[error("Plan '{plan}' references unknown stacks: {}", missing.join(", "))]
    MissingStacks {
        plan: String,
        missing: Vec<String>,
        available: Vec<String>,
    },
}

/// Looks up `name` and checks every stack it lists exists
///
/// All unknown stacks are reported together.
pub fn resolve<'a, T>(
    plans: &'a BTreeMap<String, Vec<String>>,
    name: &str,
    stacks: &BTreeMap<String, T>,
) -> Result<&'a [String], PlanError> {
    let plan = plans.get(name).ok_or_else(|| PlanError::NoSuchPlan {
        wanted: name.to_string(),
        available: plans.keys().cloned().collect(),
    })?;

    let missing: Vec<String> = plan
        .iter()
        .filter(|key| !stacks.contains_key(key.as_str()))
        .cloned()
        .collect();

    if !missing.is_empty() {
        return Err(PlanError::MissingStacks {
            plan: name.to_string(),
            missing,
            available: stacks.keys().cloned().collect(),
        });
    }

    Ok(plan)
}
