//! # Remote services
//!
//! Interfaces to the provisioning, storage, queue, scaling and HTTP services
//! the deploy driver talks to, plus the pieces every caller shares.
//!
//! ## Backends
//!
//! | Backend | Purpose |
//! |---------|---------|
//! | [`local::LocalCloud`] | Filesystem state under the state directory |
//! | [`memory::MemoryCloud`] | Scriptable in-memory fake for tests |
//! | [`http::ReqwestProbe`] | Real HTTP GETs for URL confirmation |
//!
//! ## Call discipline
//!
//! Throttling responses are never surfaced: [`retry::throttled`] sleeps and
//! retries them. [`StackClient`] caches stack descriptions for a few seconds
//! and owns the wait-for-completion loop.

mod client;
pub mod clock;
pub mod http;
pub mod local;
pub mod memory;
pub mod retry;

use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::artifact::StoredObject;
use crate::domain::{Parameter, StorageLocation};

pub use client::{StackClient, WaitError, WaitOptions};
pub use clock::{Clock, ManualClock, Poller, SystemClock};

/// Scaling group members ready to serve
pub const IN_SERVICE: &str = "InService";

/// Rejection message for an update that would change nothing
pub const NO_UPDATES: &str = "No updates are to be performed.";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("{0} does not exist")]
    NotFound(String),

    #[error("Request was throttled")]
    Throttled,

    #[error("{code}: {message}")]
    Rejected { code: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        RemoteError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDescription {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEvent {
    pub timestamp: DateTime<Utc>,
    pub logical_id: String,
    pub resource_type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Everything sent on create or update
#[derive(Debug, Clone, Copy)]
pub struct StackRequest<'a> {
    pub name: &'a str,
    pub template: &'a str,
    pub params: &'a [Parameter],
    pub tags: &'a BTreeMap<String, String>,
}

/// The stack provisioning API
pub trait StackApi {
    /// Fails with [`RemoteError::NotFound`] for unknown stacks
    fn describe(&self, name: &str) -> Result<StackDescription, RemoteError>;

    fn create(&self, request: &StackRequest<'_>) -> Result<(), RemoteError>;

    /// Returns false when there was nothing to update
    fn update(&self, request: &StackRequest<'_>) -> Result<bool, RemoteError>;

    /// Lifecycle events, newest first
    fn list_events(&self, name: &str) -> Result<Vec<StackEvent>, RemoteError>;

    fn physical_resource_id(&self, stack: &str, logical_id: &str) -> Result<String, RemoteError>;

    fn validate_template(&self, body: &str) -> Result<(), RemoteError>;
}

/// Durable object storage
pub trait ObjectStore {
    /// Objects whose key starts with `prefix.key`
    fn list(&self, prefix: &StorageLocation) -> Result<Vec<StoredObject>, RemoteError>;

    fn delete(&self, location: &StorageLocation) -> Result<(), RemoteError>;

    fn upload(&self, local: &Path, destination: &StorageLocation) -> Result<(), RemoteError>;

    /// Last-modified time of an object, `None` if absent
    ///
    /// For a bucket root this reports whether the bucket exists.
    fn head(&self, location: &StorageLocation) -> Result<Option<DateTime<Utc>>, RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub receipt: String,
    pub body: String,
}

pub trait MessageQueue {
    fn receive(&self, queue: &str, max: usize) -> Result<Vec<QueueMessage>, RemoteError>;

    fn delete_message(&self, queue: &str, receipt: &str) -> Result<(), RemoteError>;

    /// Approximate number of waiting messages
    fn depth(&self, queue: &str) -> Result<usize, RemoteError>;
}

/// Compute scaling groups
pub trait ScalingApi {
    fn instances_in_group(&self, group: &str, lifecycle_state: &str) -> Result<Vec<String>, RemoteError>;

    fn suspend_scheduled_actions(&self, group: &str) -> Result<(), RemoteError>;

    fn resume_scheduled_actions(&self, group: &str) -> Result<(), RemoteError>;
}

pub trait HttpProbe {
    /// Body of a GET; connection problems are [`RemoteError::Transport`]
    fn get(&self, url: &str) -> Result<String, RemoteError>;
}

/// An already-authenticated set of service handles
#[derive(Clone)]
pub struct Session {
    pub stacks: Rc<dyn StackApi>,
    pub objects: Rc<dyn ObjectStore>,
    pub queues: Rc<dyn MessageQueue>,
    pub scaling: Rc<dyn ScalingApi>,
    pub http: Rc<dyn HttpProbe>,
    pub clock: Rc<dyn Clock>,
}

impl Session {
    /// Every service backed by the same implementation
    pub fn uniform<C>(cloud: Rc<C>, http: Rc<dyn HttpProbe>, clock: Rc<dyn Clock>) -> Self
    where
        C: StackApi + ObjectStore + MessageQueue + ScalingApi + 'static,
    {
        Self {
            stacks: cloud.clone(),
            objects: cloud.clone(),
            queues: cloud.clone(),
            scaling: cloud,
            http,
            clock,
        }
    }
}
