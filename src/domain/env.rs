//! Environment variable specifications and `{NAME}` templating
//!
//! Specs come in three forms:
//! - `NAME` - must be present in the environment
//! - `NAME:default` - falls back to `default` when unset
//! - `NAME=value` - always `value`, regardless of the environment

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unknown variable '{name}' in '{template}'")]
    UnknownVariable { name: String, template: String },

    #[error("Unclosed '{{' in '{0}'")]
    Unclosed(String),

    #[error("Single '}}' encountered in '{0}'")]
    UnmatchedClose(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid environment variable spec '{0}'")]
pub struct EnvSpecError(pub String);

/// Where environment values come from
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

/// The process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvSource for BTreeMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// A single environment variable requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSpec {
    pub name: String,
    pub default: Option<String>,
    pub fixed: Option<String>,
}

impl EnvSpec {
    /// A variable that must be set
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            fixed: None,
        }
    }

    /// Parses `NAME`, `NAME:default` or `NAME=value`
    pub fn parse(spec: &str) -> Result<Self, EnvSpecError> {
        let divider = spec.find([':', '=']);
        let (name, rest) = match divider {
            Some(idx) => (&spec[..idx], Some((&spec[idx..idx + 1], &spec[idx + 1..]))),
            None => (spec, None),
        };

        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(EnvSpecError(spec.to_string()));
        }

        let mut parsed = Self::required(name);
        match rest {
            Some((":", value)) => parsed.default = Some(value.to_string()),
            Some((_, value)) => parsed.fixed = Some(value.to_string()),
            None => {}
        }
        Ok(parsed)
    }

    /// Returns the value this spec resolves to, if any
    pub fn value_in(&self, env: &dyn EnvSource) -> Option<String> {
        if let Some(fixed) = &self.fixed {
            return Some(fixed.clone());
        }
        env.var(&self.name).or_else(|| self.default.clone())
    }

    /// True if this spec can't be satisfied
    pub fn is_missing_in(&self, env: &dyn EnvSource) -> bool {
        self.value_in(env).is_none()
    }
}

impl fmt::Display for EnvSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.fixed, &self.default) {
            (Some(fixed), _) => write!(f, "{}={}", self.name, fixed),
            (None, Some(default)) => write!(f, "{}:{}", self.name, default),
            (None, None) => f.write_str(&self.name),
        }
    }
}

/// Names of every unsatisfied spec, in order and without duplicates
pub fn missing<'a>(
    specs: impl IntoIterator<Item = &'a EnvSpec>,
    env: &dyn EnvSource,
) -> Vec<String> {
    let mut seen = BTreeSet::new();
    specs
        .into_iter()
        .filter(|spec| spec.is_missing_in(env))
        .filter(|spec| seen.insert(spec.name.clone()))
        .map(|spec| spec.name.clone())
        .collect()
}

/// Resolved name/value pairs used for templating
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment(BTreeMap<String, String>);

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves every spec; callers check [`missing`] first
    pub fn from_specs<'a>(specs: impl IntoIterator<Item = &'a EnvSpec>, env: &dyn EnvSource) -> Self {
        let mut resolved = Self::new();
        for spec in specs {
            if let Some(value) = spec.value_in(env) {
                resolved.insert(spec.name.clone(), value);
            }
        }
        resolved
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Substitutes `{NAME}` references; `{{` and `}}` are literal braces
    pub fn render(&self, template: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => return Err(TemplateError::Unclosed(template.to_string())),
                        }
                    }
                    let name = name.trim();
                    let value = self.get(name).ok_or_else(|| TemplateError::UnknownVariable {
                        name: name.to_string(),
                        template: template.to_string(),
                    })?;
                    out.push_str(value);
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '}' => return Err(TemplateError::UnmatchedClose(template.to_string())),
                other => out.push(other),
            }
        }

        Ok(out)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
