//! Configuration as written in YAML, before validation

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde_yaml::Value;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub environments: BTreeMap<String, RawEnvironment>,
    pub plans: BTreeMap<String, Vec<String>>,
    pub stacks: BTreeMap<String, RawStack>,
    pub password_noecho: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawEnvironment {
    pub vars: BTreeMap<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawStack {
    pub stack_name: Option<String>,
    pub stack_name_env: Vec<String>,
    pub env: Vec<String>,
    pub build_env: Vec<String>,
    pub tags: BTreeMap<String, Value>,
    pub stack_json: Option<PathBuf>,
    pub stack_yaml: Option<PathBuf>,
    pub params_json: Option<RawParamsJson>,
    pub params_yaml: Option<RawParamsYaml>,
    pub vars: BTreeMap<String, RawVariable>,
    pub build_first: Vec<String>,
    pub build_after: Vec<String>,
    /// Seconds
    pub build_timeout: Option<u64>,
    pub ignore_deps: bool,
    pub suspend_actions: bool,
    pub auto_scaling_group_name: Option<String>,
    pub skip_update_if_equivalent: Vec<Vec<RawVariable>>,
    pub artifact_retention_after_deployment: bool,
    pub artifacts: BTreeMap<String, RawArtifact>,
    pub confirm_deployment: Option<RawConfirmDeployment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawParameter {
    #[serde(rename = "ParameterKey")]
    pub key: String,
    #[serde(rename = "ParameterValue")]
    pub value: Value,
}

/// A JSON parameter file, or the parameter list inline
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawParamsJson {
    Path(PathBuf),
    Inline(Vec<RawParameter>),
}

/// A YAML parameter file, or the mapping inline
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawParamsYaml {
    Path(PathBuf),
    Inline(BTreeMap<String, Value>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawVariable {
    Reference { stack: String, output: String },
    Text(Value),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawArtifact {
    pub compression_type: Option<String>,
    pub history_length: Option<usize>,
    pub cleanup_prefix: Option<String>,
    pub upload_to: Option<String>,
    pub not_created_here: bool,
    pub build_env: Vec<String>,
    /// `[host_path, artifact_path]` pairs
    pub paths: Vec<(String, String)>,
    pub files: Vec<RawFile>,
    pub commands: Vec<RawCommand>,
}

#[derive(Debug, Deserialize)]
pub struct RawFile {
    pub content: String,
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawCommand {
    pub copy: Vec<(String, String)>,
    pub modify: BTreeMap<String, RawModify>,
    pub command: Option<RawCommandLine>,
    /// Seconds
    pub timeout: Option<u64>,
    pub temp_dir: Option<String>,
    pub add_into_tar: Vec<(String, String)>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawModify {
    pub append: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawCommandLine {
    One(String),
    Many(Vec<String>),
}

impl RawCommandLine {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            RawCommandLine::One(command) => vec![command],
            RawCommandLine::Many(commands) => commands,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawConfirmDeployment {
    pub auto_scaling_group_name: Option<String>,
    pub zero_instances_is_ok: bool,
    pub sns_confirmation: Option<RawQueueCheck>,
    pub url_checker: Option<RawUrlCheck>,
    pub deploys_s3_path: Vec<RawStorageCheck>,
}

#[derive(Debug, Deserialize)]
pub struct RawQueueCheck {
    pub deployment_queue: String,
    pub version_message: String,
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RawUrlCheck {
    pub endpoint: RawVariable,
    pub check_url: String,
    pub expect: String,
    pub timeout_after: Option<u64>,
}

/// `s3://bucket/key` or `[s3://bucket/key, timeout]`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawStorageCheck {
    Address(String),
    WithTimeout(String, u64),
}

/// Text form of a scalar, with sequences joined by commas
pub fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Sequence(items) => items
            .iter()
            .map(scalar)
            .collect::<Option<Vec<_>>>()
            .map(|items| items.join(",")),
        _ => None,
    }
}
