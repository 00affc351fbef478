//! Status-caching stack client
//!
//! Wraps a [`StackApi`] with throttle retry, a short-lived description cache
//! and the wait-for-completion loop used after every mutation.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use super::clock::{to_chrono, Clock, Poller};
use super::retry::{throttled, DESCRIBE_BACKOFF, EVENTS_BACKOFF};
use super::{RemoteError, StackApi, StackDescription, StackRequest, NO_UPDATES};
use crate::domain::Status;

/// How long a fetched description is reused
pub const STATUS_TTL: Duration = Duration::from_secs(3);

/// Pause between status checks while waiting
pub const WAIT_STEP: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub rollback_is_failure: bool,
    pub may_not_exist: bool,
}

impl WaitOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            rollback_is_failure: false,
            may_not_exist: true,
        }
    }

    pub fn rollback_is_failure(mut self, rollback_is_failure: bool) -> Self {
        self.rollback_is_failure = rollback_is_failure;
        self
    }

    pub fn may_not_exist(mut self, may_not_exist: bool) -> Self {
        self.may_not_exist = may_not_exist;
        self
    }
}

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("Stack {stack} is in a failed state ({status}), it must be deleted first")]
    FailedState { stack: String, status: String },

    #[error("Stack {stack} failed to complete (status {status})")]
    Incomplete { stack: String, status: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

struct Cached {
    fetched: DateTime<Utc>,
    description: Option<StackDescription>,
}

pub struct StackClient {
    api: Rc<dyn StackApi>,
    clock: Rc<dyn Clock>,
    cache: RefCell<HashMap<String, Cached>>,
    step: Duration,
}

impl StackClient {
    pub fn new(api: Rc<dyn StackApi>, clock: Rc<dyn Clock>) -> Self {
        Self {
            api,
            clock,
            cache: RefCell::new(HashMap::new()),
            step: WAIT_STEP,
        }
    }

    /// Overrides the pause between status checks
    pub fn with_step(mut self, step: Duration) -> Self {
        self.step = step;
        self
    }

    pub fn clock(&self) -> &dyn Clock {
        &*self.clock
    }

    // ========================================================================
    // Reads
    // ========================================================================

    fn description(&self, name: &str) -> Result<Option<StackDescription>, RemoteError> {
        let now = self.clock.now();
        if let Some(cached) = self.cache.borrow().get(name) {
            if now - cached.fetched < to_chrono(STATUS_TTL) {
                return Ok(cached.description.clone());
            }
        }

        let description = match throttled(&*self.clock, DESCRIBE_BACKOFF, "describe", || {
            self.api.describe(name)
        }) {
            Ok(description) => Some(description),
            Err(RemoteError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        self.cache.borrow_mut().insert(
            name.to_string(),
            Cached {
                fetched: now,
                description: description.clone(),
            },
        );
        Ok(description)
    }

    /// Current status, [`Status::nonexistent`] for unknown stacks
    pub fn status(&self, name: &str) -> Result<Status, RemoteError> {
        Ok(self
            .description(name)?
            .map(|d| Status::classify(d.status))
            .unwrap_or_else(Status::nonexistent))
    }

    /// Outputs of a deployed stack, `None` if it doesn't exist
    pub fn outputs(&self, name: &str) -> Result<Option<BTreeMap<String, String>>, RemoteError> {
        Ok(self.description(name)?.map(|d| d.outputs))
    }

    /// Forgets the cached description
    pub fn reset(&self, name: &str) {
        self.cache.borrow_mut().remove(name);
    }

    pub fn physical_resource_id(&self, stack: &str, logical_id: &str) -> Result<String, RemoteError> {
        throttled(&*self.clock, DESCRIBE_BACKOFF, "describe_resource", || {
            self.api.physical_resource_id(stack, logical_id)
        })
    }

    pub fn validate_template(&self, body: &str) -> Result<(), RemoteError> {
        throttled(&*self.clock, DESCRIBE_BACKOFF, "validate_template", || {
            self.api.validate_template(body)
        })
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn create(&self, request: &StackRequest<'_>) -> Result<bool, RemoteError> {
        info!(stack = request.name, "Creating stack");
        throttled(&*self.clock, DESCRIBE_BACKOFF, "create", || self.api.create(request))?;
        self.reset(request.name);
        Ok(true)
    }

    /// Returns false when the remote side had nothing to change
    pub fn update(&self, request: &StackRequest<'_>) -> Result<bool, RemoteError> {
        info!(stack = request.name, "Updating stack");
        let changed = match throttled(&*self.clock, DESCRIBE_BACKOFF, "update", || {
            self.api.update(request)
        }) {
            Ok(changed) => changed,
            Err(RemoteError::Rejected { message, .. }) if message.contains(NO_UPDATES) => false,
            Err(e) => return Err(e),
        };

        if !changed {
            info!(stack = request.name, "No updates to be performed");
        }
        self.reset(request.name);
        Ok(changed)
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Logs events newer than `since`, returning the newest timestamp seen
    fn log_events(&self, name: &str, since: DateTime<Utc>) -> Result<DateTime<Utc>, RemoteError> {
        let events = match throttled(&*self.clock, EVENTS_BACKOFF, "events", || {
            self.api.list_events(name)
        }) {
            Ok(events) => events,
            Err(RemoteError::NotFound(_)) => return Ok(since),
            Err(e) => return Err(e),
        };

        let mut newest = since;
        for event in events.iter().rev().filter(|e| e.timestamp > since) {
            newest = newest.max(event.timestamp);
            let reason = event.reason.as_deref().unwrap_or("");
            if event.status.ends_with("_FAILED") {
                warn!(
                    stack = name,
                    "{} {} {} {}", event.resource_type, event.logical_id, event.status, reason
                );
            } else {
                info!(
                    stack = name,
                    "{} {} {} {}", event.resource_type, event.logical_id, event.status, reason
                );
            }
        }
        Ok(newest)
    }

    /// Blocks until the stack leaves its in-progress state
    ///
    /// A stack already in a failed state is an error straight away. Once the
    /// loop ends the stack must be complete, and not rolled back when
    /// `rollback_is_failure` is set.
    pub fn wait(&self, name: &str, options: WaitOptions) -> Result<Status, WaitError> {
        let status = self.status(name)?;
        if !status.exists() && options.may_not_exist {
            return Ok(status);
        }
        if status.failed() {
            return Err(WaitError::FailedState {
                stack: name.to_string(),
                status: status.name().to_string(),
            });
        }

        let mut last_seen = self.clock.now();
        for _ in Poller::new(&*self.clock, options.timeout, self.step) {
            let status = self.status(name)?;
            if !status.exists() || !status.in_progress() {
                break;
            }
            info!(stack = name, status = %status, "Waiting for stack");
            last_seen = self.log_events(name, last_seen)?;
        }

        let status = self.status(name)?;
        let rolled_back = options.rollback_is_failure && status.is_rollback();
        if status.failed() || rolled_back || !status.complete() {
            return Err(WaitError::Incomplete {
                stack: name.to_string(),
                status: status.name().to_string(),
            });
        }
        Ok(status)
    }
}
