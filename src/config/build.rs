//! Validation of raw configuration into domain objects
//!
//! Every problem is collected; nothing is built unless there are none.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;

use crate::domain::artifact::{Modification, DEFAULT_COMMAND_TIMEOUT};
use crate::domain::confirm::{
    QueueCheck, StorageCheck, UrlCheck, DEFAULT_QUEUE_TIMEOUT, DEFAULT_STORAGE_TIMEOUT, DEFAULT_URL_TIMEOUT,
};
use crate::domain::stack::DEFAULT_BUILD_TIMEOUT;
use crate::domain::{
    Artifact, ArtifactCommand, ArtifactFile, ArtifactPath, Compression, ConfirmDeployment, EnvSpec, Parameter,
    Skipper, Stack, Variable,
};

use super::raw::{
    scalar, RawArtifact, RawCommand, RawConfirmDeployment, RawParameter, RawParamsJson, RawParamsYaml, RawStack,
    RawStorageCheck, RawVariable,
};

const STORAGE_SCHEME: &str = "s3://";

pub(super) struct Loader<'a> {
    root: &'a Path,
    managed: BTreeSet<String>,
    pub problems: Vec<String>,
}

impl<'a> Loader<'a> {
    pub fn new(root: &'a Path, managed: BTreeSet<String>) -> Self {
        Self {
            root,
            managed,
            problems: Vec::new(),
        }
    }

    fn problem(&mut self, at: &str, message: impl std::fmt::Display) {
        self.problems.push(format!("{}: {}", at, message));
    }

    fn is_managed(&self, key: &str) -> bool {
        self.managed.contains(key)
    }

    // ========================================================================
    // Stacks
    // ========================================================================

    pub fn stack(&mut self, key: &str, raw: RawStack) -> Option<Stack> {
        let at = format!("stacks.{}", key);
        let before = self.problems.len();

        let template = self.template(&at, key, &raw);
        let mut stack = Stack::new(key, template.unwrap_or(Value::Null));

        if let Some(name) = raw.stack_name {
            stack.stack_name = name;
        }
        stack.stack_name_env = self.env_specs(&format!("{}.stack_name_env", at), &raw.stack_name_env);
        stack.env = self.env_specs(&format!("{}.env", at), &raw.env);
        stack.build_env = self.env_specs(&format!("{}.build_env", at), &raw.build_env);
        stack.tags = self.scalars(&format!("{}.tags", at), raw.tags);

        stack.params = match (raw.params_json, raw.params_yaml) {
            (Some(_), Some(_)) => {
                self.problem(&at, "please don't have both params_json and params_yaml");
                Vec::new()
            }
            (Some(json), None) => self.params_json(&format!("{}.params_json", at), json),
            (None, Some(yaml)) => self.params_yaml(&format!("{}.params_yaml", at), yaml),
            (None, None) => Vec::new(),
        };

        for (name, variable) in raw.vars {
            if let Some(variable) = self.variable(&format!("{}.vars.{}", at, name), variable) {
                stack.vars.insert(name, variable);
            }
        }

        for (field, refs) in [("build_first", &raw.build_first), ("build_after", &raw.build_after)] {
            for reference in refs {
                if !self.is_managed(reference) {
                    self.problem(&format!("{}.{}", at, field), format!("unknown stack '{}'", reference));
                }
            }
        }
        stack.build_first = raw.build_first;
        stack.build_after = raw.build_after;

        stack.build_timeout = raw
            .build_timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_BUILD_TIMEOUT);
        stack.ignore_deps = raw.ignore_deps;
        stack.suspend_actions = raw.suspend_actions;
        stack.auto_scaling_group_name = raw.auto_scaling_group_name;
        if stack.suspend_actions && stack.auto_scaling_group_name.is_none() {
            self.problem(&at, "suspend_actions needs an auto_scaling_group_name");
        }

        for (index, pair) in raw.skip_update_if_equivalent.into_iter().enumerate() {
            let field = format!("{}.skip_update_if_equivalent[{}]", at, index);
            let [first, second]: [RawVariable; 2] = match pair.try_into() {
                Ok(pair) => pair,
                Err(pair) => {
                    let pair: Vec<RawVariable> = pair;
                    self.problem(&field, format!("expected two variables, got {}", pair.len()));
                    continue;
                }
            };
            let first = self.variable(&field, first);
            let second = self.variable(&field, second);
            if let (Some(first), Some(second)) = (first, second) {
                stack.skip_update_if_equivalent.push(Skipper::new(first, second));
            }
        }

        stack.artifact_retention = raw.artifact_retention_after_deployment;
        for (name, artifact) in raw.artifacts {
            if let Some(artifact) = self.artifact(&format!("{}.artifacts.{}", at, name), &name, artifact) {
                stack.artifacts.push(artifact);
            }
        }

        if let Some(confirm) = raw.confirm_deployment {
            stack.confirm_deployment = self.confirm(&format!("{}.confirm_deployment", at), confirm);
        }

        (self.problems.len() == before).then_some(stack)
    }

    fn template(&mut self, at: &str, key: &str, raw: &RawStack) -> Option<Value> {
        let path = match (&raw.stack_json, &raw.stack_yaml) {
            (Some(json), _) => self.root.join(json),
            (None, Some(yaml)) => self.root.join(yaml),
            (None, None) => {
                let json = self.root.join(format!("{}.json", key));
                let yaml = self.root.join(format!("{}.yaml", key));
                if !json.exists() && yaml.exists() {
                    yaml
                } else {
                    json
                }
            }
        };
        self.read_document(at, &path)
    }

    /// Reads a JSON or YAML file, picking by extension
    fn read_document<T: serde::de::DeserializeOwned>(&mut self, at: &str, path: &Path) -> Option<T> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                self.problem(at, format!("failed to read {}: {}", path.display(), e));
                return None;
            }
        };

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let parsed = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        };
        match parsed {
            Ok(document) => Some(document),
            Err(e) => {
                self.problem(at, format!("failed to parse {}: {}", path.display(), e));
                None
            }
        }
    }

    fn params_json(&mut self, at: &str, raw: RawParamsJson) -> Vec<Parameter> {
        let list: Vec<RawParameter> = match raw {
            RawParamsJson::Inline(list) => list,
            RawParamsJson::Path(path) => {
                let path = self.root.join(path);
                self.read_document(at, &path).unwrap_or_default()
            }
        };
        list.into_iter()
            .filter_map(|param| {
                let value = self.scalar_value(at, &param.key, &param.value)?;
                Some(Parameter::new(param.key, value))
            })
            .collect()
    }

    fn params_yaml(&mut self, at: &str, raw: RawParamsYaml) -> Vec<Parameter> {
        let mapping: BTreeMap<String, serde_yaml::Value> = match raw {
            RawParamsYaml::Inline(mapping) => mapping,
            RawParamsYaml::Path(path) => {
                let path = self.root.join(path);
                self.read_document(at, &path).unwrap_or_default()
            }
        };
        mapping
            .into_iter()
            .filter_map(|(key, value)| {
                let value = self.scalar_value(at, &key, &value)?;
                Some(Parameter::new(key, value))
            })
            .collect()
    }

    fn scalar_value(&mut self, at: &str, key: &str, value: &serde_yaml::Value) -> Option<String> {
        let text = scalar(value);
        if text.is_none() {
            self.problem(at, format!("value of '{}' must be a scalar", key));
        }
        text
    }

    fn scalars(&mut self, at: &str, raw: BTreeMap<String, serde_yaml::Value>) -> BTreeMap<String, String> {
        raw.into_iter()
            .filter_map(|(key, value)| {
                let value = self.scalar_value(at, &key, &value)?;
                Some((key, value))
            })
            .collect()
    }

    pub fn env_specs(&mut self, at: &str, raw: &[String]) -> Vec<EnvSpec> {
        raw.iter()
            .filter_map(|spec| match EnvSpec::parse(spec) {
                Ok(spec) => Some(spec),
                Err(e) => {
                    self.problem(at, e);
                    None
                }
            })
            .collect()
    }

    fn variable(&mut self, at: &str, raw: RawVariable) -> Option<Variable> {
        match raw {
            RawVariable::Reference { stack, output } => {
                if stack.trim().is_empty() || output.trim().is_empty() {
                    self.problem(at, "a stack reference needs both stack and output");
                    return None;
                }
                Some(Variable::dynamic(&stack, &output, |key| self.is_managed(key)))
            }
            RawVariable::Text(value) => match scalar(&value) {
                Some(text) => Some(Variable::parse(&text, |key| self.is_managed(key))),
                None => {
                    self.problem(at, "a variable must be a string or {stack, output}");
                    None
                }
            },
        }
    }

    // ========================================================================
    // Artifacts
    // ========================================================================

    fn artifact(&mut self, at: &str, key: &str, raw: RawArtifact) -> Option<Artifact> {
        let before = self.problems.len();

        let upload_to = raw.upload_to.unwrap_or_else(|| {
            self.problems.push(format!("{}: upload_to is required", at));
            String::new()
        });
        self.storage_address(&format!("{}.upload_to", at), &upload_to);

        let history_length = raw.history_length.unwrap_or_else(|| {
            self.problems.push(format!("{}: history_length is required", at));
            0
        });

        let compression = match raw.compression_type.as_deref().map(Compression::from_str) {
            None => Compression::default(),
            Some(Ok(compression)) => compression,
            Some(Err(e)) => {
                self.problem(&format!("{}.compression_type", at), e);
                Compression::default()
            }
        };

        if let Some(prefix) = &raw.cleanup_prefix {
            self.storage_address(&format!("{}.cleanup_prefix", at), prefix);
        }

        let mut artifact = Artifact::new(key, upload_to);
        artifact.compression = compression;
        artifact.history_length = history_length;
        artifact.cleanup_prefix = raw.cleanup_prefix;
        artifact.not_created_here = raw.not_created_here;
        artifact.build_env = self.env_specs(&format!("{}.build_env", at), &raw.build_env);
        artifact.paths = self.paths(raw.paths);
        artifact.files = raw
            .files
            .into_iter()
            .map(|file| ArtifactFile {
                content: file.content,
                path: file.path,
            })
            .collect();
        artifact.commands = raw.commands.into_iter().map(|c| self.command(c)).collect();

        (self.problems.len() == before).then_some(artifact)
    }

    fn paths(&self, raw: Vec<(String, String)>) -> Vec<ArtifactPath> {
        raw.into_iter()
            .map(|(host, artifact_path)| ArtifactPath::new(self.host_path(&host), artifact_path))
            .collect()
    }

    fn host_path(&self, host: &str) -> PathBuf {
        self.root.join(host)
    }

    fn command(&self, raw: RawCommand) -> ArtifactCommand {
        ArtifactCommand {
            copy: self.paths(raw.copy),
            modify: raw
                .modify
                .into_iter()
                .map(|(path, modify)| Modification {
                    path,
                    append: modify.append,
                })
                .collect(),
            command: raw.command.map(|c| c.into_vec()).unwrap_or_default(),
            timeout: raw
                .timeout
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            temp_dir: raw.temp_dir,
            add_into_tar: raw
                .add_into_tar
                .into_iter()
                .map(|(host, artifact_path)| ArtifactPath::new(host, artifact_path))
                .collect(),
        }
    }

    fn storage_address(&mut self, at: &str, address: &str) {
        let bucket = address
            .strip_prefix(STORAGE_SCHEME)
            .map(|rest| rest.split('/').next().unwrap_or(""));
        match bucket {
            Some(bucket) if !bucket.is_empty() => {}
            _ => self.problem(at, format!("'{}' is not a valid s3 address", address)),
        }
    }

    // ========================================================================
    // Confirmation
    // ========================================================================

    fn confirm(&mut self, at: &str, raw: RawConfirmDeployment) -> Option<ConfirmDeployment> {
        let mut confirm = ConfirmDeployment {
            auto_scaling_group_name: raw.auto_scaling_group_name,
            zero_instances_is_ok: raw.zero_instances_is_ok,
            ..Default::default()
        };

        confirm.sns_confirmation = raw.sns_confirmation.map(|queue| QueueCheck {
            queue: queue.deployment_queue,
            version_message: queue.version_message,
            timeout: queue
                .timeout
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_QUEUE_TIMEOUT),
        });

        if let Some(url) = raw.url_checker {
            let endpoint = self.variable(&format!("{}.url_checker.endpoint", at), url.endpoint)?;
            confirm.url_checker = Some(UrlCheck {
                endpoint,
                check_url: url.check_url,
                expect: url.expect,
                timeout: url
                    .timeout_after
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_URL_TIMEOUT),
            });
        }

        for (index, path) in raw.deploys_s3_path.into_iter().enumerate() {
            let (address, timeout) = match path {
                RawStorageCheck::Address(address) => (address, DEFAULT_STORAGE_TIMEOUT),
                RawStorageCheck::WithTimeout(address, secs) => (address, Duration::from_secs(secs)),
            };
            self.storage_address(&format!("{}.deploys_s3_path[{}]", at, index), &address);
            confirm.deploys_s3_path.push(StorageCheck { address, timeout });
        }

        if confirm.auto_scaling_group_name.is_none() && confirm.needs_instances() {
            self.problem(at, "sns_confirmation and url_checker need an auto_scaling_group_name");
        }
        Some(confirm)
    }
}
