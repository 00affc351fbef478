//! Stack definitions
//!
//! A stack is a template, a parameter document and everything needed to
//! decide when and how it gets deployed. Nothing here talks to the remote
//! API; the deploy driver resolves variables and feeds the values back in.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::artifact::Artifact;
use super::confirm::ConfirmDeployment;
use super::env::{self, EnvSource, EnvSpec, Environment, TemplateError};
use super::variable::{Skipper, Variable};

pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(1200);

/// Value printed instead of password parameters
pub const MASKED: &str = "XXXXXXXXXXXX";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"XXX_[A-Z_]+_XXX").expect("placeholder pattern is valid"));

/// One entry of a parameter document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    #[serde(rename = "ParameterKey")]
    pub key: String,
    #[serde(rename = "ParameterValue")]
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    /// Key in the configuration
    pub key_name: String,
    /// Deployed name, may reference `stack_name_env`
    pub stack_name: String,
    pub stack_name_env: Vec<EnvSpec>,
    pub env: Vec<EnvSpec>,
    pub build_env: Vec<EnvSpec>,
    pub tags: BTreeMap<String, String>,
    pub template: Value,
    pub params: Vec<Parameter>,
    pub vars: BTreeMap<String, Variable>,
    pub build_first: Vec<String>,
    pub build_after: Vec<String>,
    pub build_timeout: Duration,
    pub ignore_deps: bool,
    pub suspend_actions: bool,
    pub auto_scaling_group_name: Option<String>,
    pub skip_update_if_equivalent: Vec<Skipper>,
    pub artifact_retention: bool,
    pub artifacts: Vec<Artifact>,
    pub confirm_deployment: Option<ConfirmDeployment>,
}

impl Stack {
    pub fn new(key_name: impl Into<String>, template: Value) -> Self {
        let key_name = key_name.into();
        Self {
            stack_name: key_name.clone(),
            key_name,
            stack_name_env: Vec::new(),
            env: Vec::new(),
            build_env: Vec::new(),
            tags: BTreeMap::new(),
            template,
            params: Vec::new(),
            vars: BTreeMap::new(),
            build_first: Vec::new(),
            build_after: Vec::new(),
            build_timeout: DEFAULT_BUILD_TIMEOUT,
            ignore_deps: false,
            suspend_actions: false,
            auto_scaling_group_name: None,
            skip_update_if_equivalent: Vec::new(),
            artifact_retention: false,
            artifacts: Vec::new(),
            confirm_deployment: None,
        }
    }

    /// Stacks that must be built before this one
    ///
    /// `build_first` entries come first, then stacks referenced by
    /// variables; duplicates are dropped.
    pub fn dependencies(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.build_first
            .iter()
            .map(String::as_str)
            .chain(self.vars.values().filter_map(Variable::managed_stack))
            .filter(|key| seen.insert(*key))
            .map(str::to_string)
            .collect()
    }

    /// Names of unset variables from `env` and `stack_name_env`
    pub fn missing_env(&self, source: &dyn EnvSource) -> Vec<String> {
        env::missing(self.env.iter().chain(&self.stack_name_env), source)
    }

    /// The deploy-time environment
    pub fn environment(&self, source: &dyn EnvSource) -> Environment {
        Environment::from_specs(self.env.iter().chain(&self.stack_name_env), source)
    }

    /// The artifact build environment, layered over the deploy-time one
    pub fn build_environment(&self, artifact: &Artifact, source: &dyn EnvSource) -> Environment {
        let mut environment = self.environment(source);
        let build = self.build_env.iter().chain(&artifact.build_env);
        for (name, value) in Environment::from_specs(build, source).iter() {
            environment.insert(name, value);
        }
        environment
    }

    /// The deployed name with `stack_name_env` substituted
    pub fn physical_name(&self, source: &dyn EnvSource) -> Result<String, TemplateError> {
        Environment::from_specs(&self.stack_name_env, source).render(&self.stack_name)
    }

    /// Replaces `XXX_<NAME>_XXX` tokens with resolved values
    pub fn render_params(&self, values: &BTreeMap<String, String>) -> Vec<Parameter> {
        self.params
            .iter()
            .map(|param| {
                let mut value = param.value.clone();
                for (name, resolved) in values {
                    let token = format!("XXX_{}_XXX", name.to_uppercase());
                    if value.contains(&token) {
                        value = value.replace(&token, resolved);
                    }
                }
                Parameter::new(param.key.clone(), value)
            })
            .collect()
    }

    /// Names of outputs the template declares
    pub fn declared_outputs(&self) -> Vec<String> {
        self.template
            .get("Outputs")
            .and_then(Value::as_object)
            .map(|outputs| outputs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn template_body(&self) -> String {
        self.template.to_string()
    }
}

/// Placeholder tokens left in a parameter document, in order of appearance
pub fn find_placeholders(params: &[Parameter]) -> Vec<String> {
    params
        .iter()
        .flat_map(|param| PLACEHOLDER.find_iter(&param.value))
        .map(|found| found.as_str().to_string())
        .collect()
}

/// Copy of `params` with password values hidden
pub fn mask_passwords(params: &[Parameter]) -> Vec<Parameter> {
    params
        .iter()
        .map(|param| {
            if param.key.eq_ignore_ascii_case("password") {
                Parameter::new(param.key.clone(), MASKED)
            } else {
                param.clone()
            }
        })
        .collect()
}

/// Structural problems with a template document
///
/// A template needs a `Resources` mapping whose entries carry a string
/// `Type` and, optionally, a `Properties` mapping. `Parameters` and
/// `Outputs` are optional mappings of mappings.
pub fn template_problems(template: &Value) -> Vec<String> {
    let mut problems = Vec::new();

    let Some(root) = template.as_object() else {
        problems.push("template must be a mapping".to_string());
        return problems;
    };

    match root.get("Resources").map(Value::as_object) {
        None => problems.push("template has no Resources".to_string()),
        Some(None) => problems.push("Resources must be a mapping".to_string()),
        Some(Some(resources)) => {
            for (name, resource) in resources {
                match resource.get("Type") {
                    Some(Value::String(_)) => {}
                    Some(_) => problems.push(format!("Resources.{name}.Type must be a string")),
                    None => problems.push(format!("Resources.{name} has no Type")),
                }
                if let Some(properties) = resource.get("Properties") {
                    if !properties.is_object() {
                        problems.push(format!("Resources.{name}.Properties must be a mapping"));
                    }
                }
            }
        }
    }

    for section in ["Parameters", "Outputs"] {
        if let Some(value) = root.get(section) {
            match value.as_object() {
                Some(entries) => {
                    for (name, entry) in entries {
                        if !entry.is_object() {
                            problems.push(format!("{section}.{name} must be a mapping"));
                        }
                    }
                }
                None => problems.push(format!("{section} must be a mapping")),
            }
        }
    }

    problems
}
