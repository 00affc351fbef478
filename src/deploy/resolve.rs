//! Variable resolution
//!
//! Dynamic variables read another stack's outputs. How a missing stack or
//! output is treated depends on why the value is wanted.

use std::collections::BTreeMap;

use crate::domain::stack::DEFAULT_BUILD_TIMEOUT;
use crate::domain::{Environment, Parameter, Stack, StackRef, Variable};
use crate::error::{DeployError, Result};
use crate::remote::WaitOptions;

use super::Deployer;

/// Stands in for outputs of a stack that isn't deployed yet
pub const MISSING_STACK: &str = "YYY_RESOLVED_BY_MISSING_STACK_YYY";

/// Stands in for an output the next deployment will create
pub const MISSING_OUTPUT: &str = "YYY_RESOLVED_BY_MISSING_OUTPUT_YYY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Every reference must resolve
    Deploy,
    /// Missing stacks and not-yet-deployed outputs get stand-in values
    Sanity,
    /// Anything missing is `None`
    Compare,
}

impl Deployer<'_> {
    /// Resolves `variable`; only [`Lookup::Compare`] ever yields `None`
    pub fn resolve(
        &self,
        variable: &Variable,
        environment: &Environment,
        lookup: Lookup,
    ) -> Result<Option<String>> {
        match variable {
            Variable::Static(value) => Ok(Some(environment.render(value)?)),
            Variable::Dynamic { stack, output } => self.resolve_output(stack, output, lookup),
        }
    }

    fn resolve_output(&self, reference: &StackRef, output: &str, lookup: Lookup) -> Result<Option<String>> {
        let (name, declared) = match reference {
            StackRef::Managed(key) => {
                let target = self.stack(key)?;
                (self.physical_name(target)?, target.declared_outputs())
            }
            StackRef::External(name) => (name.clone(), Vec::new()),
        };

        if lookup != Lookup::Sanity {
            self.client.wait(&name, WaitOptions::new(DEFAULT_BUILD_TIMEOUT))?;
        }

        let missing = || DeployError::MissingOutput {
            stack: name.clone(),
            output: output.to_string(),
        };

        let Some(outputs) = self.client.outputs(&name)? else {
            return match lookup {
                Lookup::Sanity => Ok(Some(MISSING_STACK.to_string())),
                Lookup::Compare => Ok(None),
                Lookup::Deploy => Err(missing()),
            };
        };

        if let Some(value) = outputs.get(output) {
            return Ok(Some(value.clone()));
        }
        match lookup {
            Lookup::Sanity if declared.iter().any(|o| o == output) => Ok(Some(MISSING_OUTPUT.to_string())),
            Lookup::Compare => Ok(None),
            _ => Err(missing()),
        }
    }

    /// The stack's parameter document with every variable substituted
    ///
    /// Values come from the environment's vars, then the stack's
    /// environment, then the stack's own vars, later sources winning.
    pub fn parameters(&self, stack: &Stack, lookup: Lookup) -> Result<Vec<Parameter>> {
        let environment = stack.environment(self.env);

        let mut values: BTreeMap<String, String> = self.settings.vars.clone();
        values.extend(environment.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        for (name, variable) in &stack.vars {
            if let Some(value) = self.resolve(variable, &environment, lookup)? {
                values.insert(name.clone(), value);
            }
        }
        Ok(stack.render_params(&values))
    }
}
