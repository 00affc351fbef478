//! Scriptable in-memory backend
//!
//! Every remote interface over one `RefCell`'d state. Tests preload stacks,
//! queue up status transitions, throttle calls and inspect the call log.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::clock::Clock;
use super::{
    HttpProbe, MessageQueue, ObjectStore, QueueMessage, RemoteError, ScalingApi, StackApi,
    StackDescription, StackEvent, StackRequest, NO_UPDATES,
};
use crate::domain::artifact::StoredObject;
use crate::domain::{Parameter, StorageLocation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryStack {
    pub status: String,
    pub outputs: BTreeMap<String, String>,
    pub events: Vec<StackEvent>,
    pub template: String,
    pub params: Vec<Parameter>,
    pub tags: BTreeMap<String, String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct PendingMessage {
    visible_at: DateTime<Utc>,
    body: String,
}

#[derive(Default)]
struct State {
    stacks: BTreeMap<String, MemoryStack>,
    scripts: BTreeMap<String, VecDeque<String>>,
    unchanged: BTreeSet<String>,
    throttles: BTreeMap<String, usize>,
    calls: Vec<String>,
    resources: BTreeMap<(String, String), String>,
    groups: BTreeMap<String, Vec<String>>,
    suspended: BTreeSet<String>,
    buckets: BTreeSet<String>,
    objects: BTreeMap<(String, String), (DateTime<Utc>, Vec<u8>)>,
    queues: BTreeMap<String, Vec<PendingMessage>>,
    receipts: u64,
    responses: BTreeMap<String, VecDeque<Result<String, RemoteError>>>,
}

pub struct MemoryCloud {
    clock: Rc<dyn Clock>,
    state: RefCell<State>,
}

impl MemoryCloud {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            state: RefCell::new(State::default()),
        }
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Adds an already deployed stack
    pub fn with_stack(&self, name: &str, status: &str) {
        let now = self.clock.now();
        self.state.borrow_mut().stacks.insert(
            name.to_string(),
            MemoryStack {
                status: status.to_string(),
                outputs: BTreeMap::new(),
                events: Vec::new(),
                template: String::new(),
                params: Vec::new(),
                tags: BTreeMap::new(),
                last_updated: now,
            },
        );
    }

    /// Statuses the stack moves through, one per describe call
    ///
    /// Replaces the default create/update transition when set beforehand.
    pub fn script(&self, name: &str, statuses: &[&str]) {
        self.state
            .borrow_mut()
            .scripts
            .entry(name.to_string())
            .or_default()
            .extend(statuses.iter().map(|s| s.to_string()));
    }

    pub fn set_outputs(&self, name: &str, outputs: &[(&str, &str)]) {
        if let Some(stack) = self.state.borrow_mut().stacks.get_mut(name) {
            stack.outputs = outputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
        }
    }

    /// Updates to this stack report that nothing changed
    pub fn unchanged(&self, name: &str) {
        self.state.borrow_mut().unchanged.insert(name.to_string());
    }

    /// The next `times` calls of `operation` are throttled
    pub fn throttle(&self, operation: &str, times: usize) {
        self.state
            .borrow_mut()
            .throttles
            .insert(operation.to_string(), times);
    }

    pub fn push_event(&self, name: &str, event: StackEvent) {
        if let Some(stack) = self.state.borrow_mut().stacks.get_mut(name) {
            stack.events.insert(0, event);
        }
    }

    pub fn set_resource(&self, stack: &str, logical_id: &str, physical_id: &str) {
        self.state.borrow_mut().resources.insert(
            (stack.to_string(), logical_id.to_string()),
            physical_id.to_string(),
        );
    }

    /// A scaling group whose members are all in service
    pub fn add_group(&self, group: &str, instances: &[&str]) {
        self.state.borrow_mut().groups.insert(
            group.to_string(),
            instances.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn add_bucket(&self, bucket: &str) {
        self.state.borrow_mut().buckets.insert(bucket.to_string());
    }

    pub fn put_object(&self, location: &StorageLocation, modified: DateTime<Utc>) {
        let mut state = self.state.borrow_mut();
        state.buckets.insert(location.bucket.clone());
        state.objects.insert(
            (location.bucket.clone(), location.key.clone()),
            (modified, Vec::new()),
        );
    }

    /// Queues a message visible immediately
    pub fn send(&self, queue: &str, body: &str) {
        let now = self.clock.now();
        self.send_at(queue, body, now);
    }

    /// Queues a message that becomes visible at `at`
    pub fn send_at(&self, queue: &str, body: &str, at: DateTime<Utc>) {
        self.state
            .borrow_mut()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push(PendingMessage {
                visible_at: at,
                body: body.to_string(),
            });
    }

    /// Responses for successive GETs of `url`; the last one repeats
    pub fn respond(&self, url: &str, responses: Vec<Result<String, RemoteError>>) {
        self.state
            .borrow_mut()
            .responses
            .insert(url.to_string(), responses.into());
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// Number of logged calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn stack(&self, name: &str) -> Option<MemoryStack> {
        self.state.borrow().stacks.get(name).cloned()
    }

    pub fn is_suspended(&self, group: &str) -> bool {
        self.state.borrow().suspended.contains(group)
    }

    pub fn object(&self, location: &StorageLocation) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .objects
            .get(&(location.bucket.clone(), location.key.clone()))
            .map(|(_, bytes)| bytes.clone())
    }

    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        self.state
            .borrow()
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn call(&self, operation: &str, target: &str) -> Result<(), RemoteError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(format!("{} {}", operation, target));

        if let Some(remaining) = state.throttles.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RemoteError::Throttled);
            }
        }
        Ok(())
    }

    fn event(&self, status: &str, logical_id: &str) -> StackEvent {
        StackEvent {
            timestamp: self.clock.now(),
            logical_id: logical_id.to_string(),
            resource_type: "Stack".to_string(),
            status: status.to_string(),
            reason: None,
        }
    }
}

/// Literal `Outputs.*.Value` strings of a template body
fn literal_outputs(template: &str) -> BTreeMap<String, String> {
    let Ok(value) = serde_json::from_str::<Value>(template) else {
        return BTreeMap::new();
    };

    value
        .get("Outputs")
        .and_then(Value::as_object)
        .map(|outputs| {
            outputs
                .iter()
                .filter_map(|(name, output)| {
                    output
                        .get("Value")
                        .and_then(Value::as_str)
                        .map(|v| (name.clone(), v.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

impl StackApi for MemoryCloud {
    fn describe(&self, name: &str) -> Result<StackDescription, RemoteError> {
        self.call("describe", name)?;

        let mut state = self.state.borrow_mut();
        let next = state.scripts.get_mut(name).and_then(VecDeque::pop_front);
        let stack = state
            .stacks
            .get_mut(name)
            .ok_or_else(|| RemoteError::NotFound(name.to_string()))?;

        if let Some(status) = next {
            stack.status = status;
        }

        Ok(StackDescription {
            name: name.to_string(),
            status: stack.status.clone(),
            outputs: stack.outputs.clone(),
            last_updated: stack.last_updated,
        })
    }

    fn create(&self, request: &StackRequest<'_>) -> Result<(), RemoteError> {
        self.call("create", request.name)?;
        let event = self.event("CREATE_IN_PROGRESS", request.name);

        let mut state = self.state.borrow_mut();
        if state.stacks.contains_key(request.name) {
            return Err(RemoteError::rejected(
                "AlreadyExistsException",
                format!("Stack [{}] already exists", request.name),
            ));
        }

        let script = state.scripts.entry(request.name.to_string()).or_default();
        if script.is_empty() {
            script.push_back("CREATE_COMPLETE".to_string());
        }

        state.stacks.insert(
            request.name.to_string(),
            MemoryStack {
                status: "CREATE_IN_PROGRESS".to_string(),
                outputs: literal_outputs(request.template),
                events: vec![event.clone()],
                template: request.template.to_string(),
                params: request.params.to_vec(),
                tags: request.tags.clone(),
                last_updated: event.timestamp,
            },
        );
        Ok(())
    }

    fn update(&self, request: &StackRequest<'_>) -> Result<bool, RemoteError> {
        self.call("update", request.name)?;
        let event = self.event("UPDATE_IN_PROGRESS", request.name);

        let mut state = self.state.borrow_mut();
        if state.unchanged.contains(request.name) {
            return Err(RemoteError::rejected("ValidationError", NO_UPDATES));
        }

        let script = state.scripts.entry(request.name.to_string()).or_default();
        if script.is_empty() {
            script.push_back("UPDATE_COMPLETE".to_string());
        }

        let stack = state
            .stacks
            .get_mut(request.name)
            .ok_or_else(|| RemoteError::NotFound(request.name.to_string()))?;
        stack.status = "UPDATE_IN_PROGRESS".to_string();
        stack.template = request.template.to_string();
        stack.params = request.params.to_vec();
        stack.tags = request.tags.clone();
        stack.last_updated = event.timestamp;
        stack.events.insert(0, event);
        Ok(true)
    }

    fn list_events(&self, name: &str) -> Result<Vec<StackEvent>, RemoteError> {
        self.call("events", name)?;
        self.state
            .borrow()
            .stacks
            .get(name)
            .map(|stack| stack.events.clone())
            .ok_or_else(|| RemoteError::NotFound(name.to_string()))
    }

    fn physical_resource_id(&self, stack: &str, logical_id: &str) -> Result<String, RemoteError> {
        self.call("resource", &format!("{}/{}", stack, logical_id))?;
        let state = self.state.borrow();
        if !state.stacks.contains_key(stack) {
            return Err(RemoteError::NotFound(stack.to_string()));
        }
        Ok(state
            .resources
            .get(&(stack.to_string(), logical_id.to_string()))
            .cloned()
            .unwrap_or_else(|| format!("{}-{}", stack, logical_id)))
    }

    fn validate_template(&self, body: &str) -> Result<(), RemoteError> {
        self.call("validate", "template")?;
        let value: Value = serde_json::from_str(body)
            .map_err(|e| RemoteError::rejected("ValidationError", e.to_string()))?;
        if value.get("Resources").is_none() {
            return Err(RemoteError::rejected(
                "ValidationError",
                "Template format error: At least one Resources member must be defined.",
            ));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryCloud {
    fn list(&self, prefix: &StorageLocation) -> Result<Vec<StoredObject>, RemoteError> {
        self.call("list", &prefix.to_string())?;
        let state = self.state.borrow();
        if !state.buckets.contains(&prefix.bucket) {
            return Err(RemoteError::NotFound(format!("bucket {}", prefix.bucket)));
        }
        Ok(state
            .objects
            .iter()
            .filter(|((bucket, key), _)| *bucket == prefix.bucket && key.starts_with(&prefix.key))
            .map(|((bucket, key), (modified, _))| StoredObject {
                location: StorageLocation::new(bucket.clone(), key.clone()),
                last_modified: *modified,
            })
            .collect())
    }

    fn delete(&self, location: &StorageLocation) -> Result<(), RemoteError> {
        self.call("delete", &location.to_string())?;
        self.state
            .borrow_mut()
            .objects
            .remove(&(location.bucket.clone(), location.key.clone()));
        Ok(())
    }

    fn upload(&self, local: &Path, destination: &StorageLocation) -> Result<(), RemoteError> {
        self.call("upload", &destination.to_string())?;
        let bytes = std::fs::read(local).map_err(|e| RemoteError::Transport(e.to_string()))?;
        let now = self.clock.now();

        let mut state = self.state.borrow_mut();
        state.buckets.insert(destination.bucket.clone());
        state.objects.insert(
            (destination.bucket.clone(), destination.key.clone()),
            (now, bytes),
        );
        Ok(())
    }

    fn head(&self, location: &StorageLocation) -> Result<Option<DateTime<Utc>>, RemoteError> {
        self.call("head", &location.to_string())?;
        let state = self.state.borrow();
        if location.is_bucket_root() {
            return Ok(state.buckets.contains(&location.bucket).then(|| self.clock.now()));
        }
        Ok(state
            .objects
            .get(&(location.bucket.clone(), location.key.clone()))
            .map(|(modified, _)| *modified))
    }
}

impl MessageQueue for MemoryCloud {
    fn receive(&self, queue: &str, max: usize) -> Result<Vec<QueueMessage>, RemoteError> {
        self.call("receive", queue)?;
        let now = self.clock.now();

        let mut state = self.state.borrow_mut();
        let pending = std::mem::take(state.queues.entry(queue.to_string()).or_default());
        let (mut visible, hidden): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|m| m.visible_at <= now);

        let rest = visible.split_off(max.min(visible.len()));
        let mut remaining = rest;
        remaining.extend(hidden);
        state.queues.insert(queue.to_string(), remaining);

        let mut received = Vec::new();
        for message in visible {
            state.receipts += 1;
            received.push(QueueMessage {
                receipt: format!("receipt-{}", state.receipts),
                body: message.body,
            });
        }
        Ok(received)
    }

    fn delete_message(&self, queue: &str, receipt: &str) -> Result<(), RemoteError> {
        self.call("delete_message", &format!("{} {}", queue, receipt))
    }

    fn depth(&self, queue: &str) -> Result<usize, RemoteError> {
        self.call("depth", queue)?;
        let now = self.clock.now();
        Ok(self
            .state
            .borrow()
            .queues
            .get(queue)
            .map(|messages| messages.iter().filter(|m| m.visible_at <= now).count())
            .unwrap_or(0))
    }
}

impl ScalingApi for MemoryCloud {
    fn instances_in_group(&self, group: &str, lifecycle_state: &str) -> Result<Vec<String>, RemoteError> {
        self.call("instances", &format!("{} {}", group, lifecycle_state))?;
        self.state
            .borrow()
            .groups
            .get(group)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("scaling group {}", group)))
    }

    fn suspend_scheduled_actions(&self, group: &str) -> Result<(), RemoteError> {
        self.call("suspend", group)?;
        self.state.borrow_mut().suspended.insert(group.to_string());
        Ok(())
    }

    fn resume_scheduled_actions(&self, group: &str) -> Result<(), RemoteError> {
        self.call("resume", group)?;
        self.state.borrow_mut().suspended.remove(group);
        Ok(())
    }
}

impl HttpProbe for MemoryCloud {
    fn get(&self, url: &str) -> Result<String, RemoteError> {
        self.call("get", url)?;
        let mut state = self.state.borrow_mut();
        let responses = state
            .responses
            .get_mut(url)
            .ok_or_else(|| RemoteError::Transport(format!("connection refused: {}", url)))?;

        if responses.len() > 1 {
            responses
                .pop_front()
                .unwrap_or_else(|| Err(RemoteError::Transport("no response".into())))
        } else {
            responses
                .front()
                .cloned()
                .unwrap_or_else(|| Err(RemoteError::Transport("no response".into())))
        }
    }
}
