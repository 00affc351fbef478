//! Deployment confirmation settings and message decoding

use std::time::Duration;

use serde::Deserialize;

use super::variable::Variable;

pub const DEFAULT_QUEUE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_URL_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(600);

/// Per-instance reports posted to a queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCheck {
    pub queue: String,
    pub version_message: String,
    pub timeout: Duration,
}

/// Polls `endpoint/check_url` until the body matches `expect`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlCheck {
    pub endpoint: Variable,
    pub check_url: String,
    pub expect: String,
    pub timeout: Duration,
}

impl UrlCheck {
    /// Joins an endpoint and path without doubled separators
    pub fn url_for(endpoint: &str, check_url: &str) -> String {
        let endpoint = endpoint.trim_end_matches(['/', '.']);
        let path = check_url.trim_start_matches('/');
        format!("{}/{}", endpoint, path)
    }
}

/// A storage path that must appear during the deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCheck {
    /// Templated `s3://bucket/key`
    pub address: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmDeployment {
    pub auto_scaling_group_name: Option<String>,
    pub zero_instances_is_ok: bool,
    pub sns_confirmation: Option<QueueCheck>,
    pub url_checker: Option<UrlCheck>,
    pub deploys_s3_path: Vec<StorageCheck>,
}

impl ConfirmDeployment {
    /// Queue and URL checks correlate against scaling group instances
    pub fn needs_instances(&self) -> bool {
        self.sns_confirmation.is_some() || self.url_checker.is_some()
    }
}

/// A decoded `result:instance_id:output` report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentMessage {
    pub result: String,
    pub instance_id: String,
    pub output: String,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "Message")]
    message: String,
}

impl DeploymentMessage {
    /// Decodes a raw queue body
    ///
    /// Bodies may be wrapped in a notification envelope (`{"Message": ...}`).
    /// Returns `None` for anything with fewer than two separators.
    pub fn decode(body: &str) -> Option<Self> {
        let inner = serde_json::from_str::<Envelope>(body)
            .map(|envelope| envelope.message)
            .unwrap_or_else(|_| body.to_string());

        let mut parts = inner.trim().splitn(3, ':');
        let result = parts.next()?;
        let instance_id = parts.next()?;
        let output = parts.next()?;

        Some(Self {
            result: result.to_string(),
            instance_id: instance_id.to_string(),
            output: output.to_string(),
        })
    }
}
