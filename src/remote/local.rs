//! Filesystem backend
//!
//! Keeps every remote service under one state directory:
//!
//! ```text
//! <state>/
//!   stacks.json          stacks, events and scaling groups
//!   objects/<bucket>/    uploaded objects
//!   queues/<name>.jsonl  pending queue messages, one JSON string per line
//! ```
//!
//! Stacks settle immediately. Outputs with literal values or `{"Ref": ...}`
//! are materialised, and every `AutoScalingGroup` resource gets
//! `DesiredCapacity` in-service instances.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use walkdir::WalkDir;

use super::clock::Clock;
use super::{
    MessageQueue, ObjectStore, QueueMessage, RemoteError, ScalingApi, StackApi, StackDescription,
    StackEvent, StackRequest, IN_SERVICE, NO_UPDATES,
};
use crate::domain::artifact::StoredObject;
use crate::domain::{Parameter, StorageLocation};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LocalState {
    #[serde(default)]
    stacks: BTreeMap<String, LocalStack>,
    #[serde(default)]
    groups: BTreeMap<String, LocalGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalStack {
    status: String,
    template: String,
    #[serde(default)]
    params: Vec<Parameter>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    outputs: BTreeMap<String, String>,
    #[serde(default)]
    resources: BTreeMap<String, String>,
    #[serde(default)]
    events: Vec<StackEvent>,
    last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LocalGroup {
    instances: Vec<String>,
    #[serde(default)]
    suspended: bool,
}

fn io_error(context: &str, path: &Path, err: impl std::fmt::Display) -> RemoteError {
    RemoteError::Transport(format!("{} {}: {}", context, path.display(), err))
}

fn short_hash(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex()[..12].to_string()
}

/// Backend rooted at a state directory
pub struct LocalCloud {
    root: PathBuf,
    clock: Rc<dyn Clock>,
}

impl LocalCloud {
    pub fn new(root: impl Into<PathBuf>, clock: Rc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self) -> PathBuf {
        self.root.join("stacks.json")
    }

    fn object_path(&self, location: &StorageLocation) -> PathBuf {
        self.root
            .join("objects")
            .join(&location.bucket)
            .join(&location.key)
    }

    fn queue_path(&self, queue: &str) -> PathBuf {
        self.root.join("queues").join(format!("{}.jsonl", queue))
    }

    // ========================================================================
    // State file
    // ========================================================================

    fn read_state(&self) -> Result<LocalState, RemoteError> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(LocalState::default());
        }

        let mut file = File::open(&path).map_err(|e| io_error("Failed to open", &path, e))?;
        file.lock_shared()
            .map_err(|e| io_error("Failed to lock", &path, e))?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| io_error("Failed to read", &path, e))?;
        serde_json::from_str(&content).map_err(|e| io_error("Failed to parse", &path, e))
    }

    fn write_state(&self, state: &LocalState) -> Result<(), RemoteError> {
        let path = self.state_path();
        fs::create_dir_all(&self.root).map_err(|e| io_error("Failed to create", &self.root, e))?;

        let temp_path = path.with_extension("json.tmp");
        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| io_error("Failed to create", &temp_path, e))?;
            file.lock_exclusive()
                .map_err(|e| io_error("Failed to lock", &temp_path, e))?;

            let mut writer = BufWriter::new(&file);
            serde_json::to_writer_pretty(&mut writer, state)
                .map_err(|e| io_error("Failed to write", &temp_path, e))?;
            writer
                .flush()
                .map_err(|e| io_error("Failed to flush", &temp_path, e))?;
        }

        fs::rename(&temp_path, &path).map_err(|e| io_error("Failed to replace", &path, e))
    }

    fn modify<T>(&self, change: impl FnOnce(&mut LocalState) -> Result<T, RemoteError>) -> Result<T, RemoteError> {
        let mut state = self.read_state()?;
        let result = change(&mut state)?;
        self.write_state(&state)?;
        Ok(result)
    }

    // ========================================================================
    // Provisioning
    // ========================================================================

    /// Applies a template: resources, scaling groups and outputs
    fn provision(
        &self,
        state: &mut LocalState,
        request: &StackRequest<'_>,
        operation: &str,
    ) -> Result<(), RemoteError> {
        let template: Value = serde_json::from_str(request.template)
            .map_err(|e| RemoteError::rejected("ValidationError", e.to_string()))?;
        let now = self.clock.now();

        let mut resources = BTreeMap::new();
        if let Some(declared) = template.get("Resources").and_then(Value::as_object) {
            for (logical_id, resource) in declared {
                let physical_id = format!(
                    "{}-{}-{}",
                    request.name,
                    logical_id,
                    short_hash(&format!("{}/{}", request.name, logical_id))
                );

                let kind = resource.get("Type").and_then(Value::as_str).unwrap_or("");
                if kind.ends_with("AutoScalingGroup") {
                    let capacity = desired_capacity(resource);
                    let instances = (0..capacity)
                        .map(|n| format!("i-{}", short_hash(&format!("{}/{}", physical_id, n))))
                        .collect();
                    let suspended = state
                        .groups
                        .get(&physical_id)
                        .map(|g| g.suspended)
                        .unwrap_or(false);
                    state.groups.insert(
                        physical_id.clone(),
                        LocalGroup {
                            instances,
                            suspended,
                        },
                    );
                }
                resources.insert(logical_id.clone(), physical_id);
            }
        }

        let outputs = materialise_outputs(&template, request.params, &resources);
        let events = vec![
            StackEvent {
                timestamp: now,
                logical_id: request.name.to_string(),
                resource_type: "Stack".to_string(),
                status: format!("{}_IN_PROGRESS", operation),
                reason: None,
            },
            StackEvent {
                timestamp: now,
                logical_id: request.name.to_string(),
                resource_type: "Stack".to_string(),
                status: format!("{}_COMPLETE", operation),
                reason: None,
            },
        ];

        let previous = state.stacks.remove(request.name);
        let mut history = previous.map(|s| s.events).unwrap_or_default();
        for event in events {
            history.insert(0, event);
        }

        state.stacks.insert(
            request.name.to_string(),
            LocalStack {
                status: format!("{}_COMPLETE", operation),
                template: request.template.to_string(),
                params: request.params.to_vec(),
                tags: request.tags.clone(),
                outputs,
                resources,
                events: history,
                last_updated: now,
            },
        );
        Ok(())
    }

    // ========================================================================
    // Queue helpers
    // ========================================================================

    /// Appends a message to a local queue
    pub fn send(&self, queue: &str, body: &str) -> Result<(), RemoteError> {
        let path = self.queue_path(queue);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error("Failed to create", parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error("Failed to open", &path, e))?;
        file.lock_exclusive()
            .map_err(|e| io_error("Failed to lock", &path, e))?;

        let mut writer = BufWriter::new(&file);
        let line = serde_json::to_string(body).map_err(|e| io_error("Failed to encode", &path, e))?;
        writeln!(writer, "{}", line).map_err(|e| io_error("Failed to write", &path, e))?;
        writer
            .flush()
            .map_err(|e| io_error("Failed to flush", &path, e))
    }

    fn read_queue(file: &File, path: &Path) -> Result<Vec<String>, RemoteError> {
        let mut bodies = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| io_error("Failed to read", path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let body: String = serde_json::from_str(&line).map_err(|e| {
                io_error("Failed to parse", path, format!("line {}: {}", line_num + 1, e))
            })?;
            bodies.push(body);
        }
        Ok(bodies)
    }
}

fn desired_capacity(resource: &Value) -> usize {
    let capacity = resource
        .get("Properties")
        .and_then(|p| p.get("DesiredCapacity"));
    match capacity {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(1) as usize,
        Some(Value::String(s)) => s.parse().unwrap_or(1),
        _ => 1,
    }
}

/// Output values a template can produce without a real provider
fn materialise_outputs(
    template: &Value,
    params: &[Parameter],
    resources: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let Some(outputs) = template.get("Outputs").and_then(Value::as_object) else {
        return BTreeMap::new();
    };

    let defaults: BTreeMap<&str, &str> = template
        .get("Parameters")
        .and_then(Value::as_object)
        .map(|declared| {
            declared
                .iter()
                .filter_map(|(name, spec)| {
                    spec.get("Default")
                        .and_then(Value::as_str)
                        .map(|d| (name.as_str(), d))
                })
                .collect()
        })
        .unwrap_or_default();

    let lookup = |name: &str| -> Option<String> {
        params
            .iter()
            .find(|p| p.key == name)
            .map(|p| p.value.clone())
            .or_else(|| defaults.get(name).map(|d| d.to_string()))
            .or_else(|| resources.get(name).cloned())
    };

    outputs
        .iter()
        .filter_map(|(name, output)| {
            let value = match output.get("Value")? {
                Value::String(literal) => Some(literal.clone()),
                Value::Object(reference) => reference
                    .get("Ref")
                    .and_then(Value::as_str)
                    .and_then(|name| lookup(name)),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }?;
            Some((name.clone(), value))
        })
        .collect()
}

impl StackApi for LocalCloud {
    fn describe(&self, name: &str) -> Result<StackDescription, RemoteError> {
        let state = self.read_state()?;
        let stack = state
            .stacks
            .get(name)
            .ok_or_else(|| RemoteError::NotFound(name.to_string()))?;

        Ok(StackDescription {
            name: name.to_string(),
            status: stack.status.clone(),
            outputs: stack.outputs.clone(),
            last_updated: stack.last_updated,
        })
    }

    fn create(&self, request: &StackRequest<'_>) -> Result<(), RemoteError> {
        self.modify(|state| {
            if state.stacks.contains_key(request.name) {
                return Err(RemoteError::rejected(
                    "AlreadyExistsException",
                    format!("Stack [{}] already exists", request.name),
                ));
            }
            self.provision(state, request, "CREATE")
        })
    }

    fn update(&self, request: &StackRequest<'_>) -> Result<bool, RemoteError> {
        self.modify(|state| {
            let stack = state
                .stacks
                .get(request.name)
                .ok_or_else(|| RemoteError::NotFound(request.name.to_string()))?;

            let unchanged = stack.template == request.template
                && stack.params == request.params
                && &stack.tags == request.tags;
            if unchanged {
                return Err(RemoteError::rejected("ValidationError", NO_UPDATES));
            }

            self.provision(state, request, "UPDATE")?;
            Ok(true)
        })
    }

    fn list_events(&self, name: &str) -> Result<Vec<StackEvent>, RemoteError> {
        self.read_state()?
            .stacks
            .get(name)
            .map(|stack| stack.events.clone())
            .ok_or_else(|| RemoteError::NotFound(name.to_string()))
    }

    fn physical_resource_id(&self, stack: &str, logical_id: &str) -> Result<String, RemoteError> {
        let state = self.read_state()?;
        let deployed = state
            .stacks
            .get(stack)
            .ok_or_else(|| RemoteError::NotFound(stack.to_string()))?;
        deployed
            .resources
            .get(logical_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("resource {} in {}", logical_id, stack)))
    }

    fn validate_template(&self, body: &str) -> Result<(), RemoteError> {
        let template: Value = serde_json::from_str(body)
            .map_err(|e| RemoteError::rejected("ValidationError", e.to_string()))?;
        if template.get("Resources").and_then(Value::as_object).is_none() {
            return Err(RemoteError::rejected(
                "ValidationError",
                "Template format error: At least one Resources member must be defined.",
            ));
        }
        Ok(())
    }
}

impl ObjectStore for LocalCloud {
    fn list(&self, prefix: &StorageLocation) -> Result<Vec<StoredObject>, RemoteError> {
        let bucket_root = self.root.join("objects").join(&prefix.bucket);
        if !bucket_root.is_dir() {
            return Err(RemoteError::NotFound(format!("bucket {}", prefix.bucket)));
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&bucket_root).sort_by_file_name() {
            let entry = entry.map_err(|e| io_error("Failed to walk", &bucket_root, e))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&bucket_root)
                .map_err(|e| io_error("Failed to walk", entry.path(), e))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.starts_with(&prefix.key) {
                continue;
            }

            let modified = entry
                .metadata()
                .map_err(|e| io_error("Failed to stat", entry.path(), e))?
                .modified()
                .map_err(|e| io_error("Failed to stat", entry.path(), e))?;
            objects.push(StoredObject {
                location: StorageLocation::new(prefix.bucket.clone(), key),
                last_modified: DateTime::<Utc>::from(modified),
            });
        }
        Ok(objects)
    }

    fn delete(&self, location: &StorageLocation) -> Result<(), RemoteError> {
        let path = self.object_path(location);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("Failed to delete", &path, e)),
        }
    }

    fn upload(&self, local: &Path, destination: &StorageLocation) -> Result<(), RemoteError> {
        let path = self.object_path(destination);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error("Failed to create", parent, e))?;
        }
        fs::copy(local, &path).map_err(|e| io_error("Failed to upload", local, e))?;
        Ok(())
    }

    fn head(&self, location: &StorageLocation) -> Result<Option<DateTime<Utc>>, RemoteError> {
        let path = self.object_path(location);
        if location.is_bucket_root() {
            return Ok(path.is_dir().then(|| self.clock.now()));
        }
        if !path.is_file() {
            return Ok(None);
        }

        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| io_error("Failed to stat", &path, e))?;
        Ok(Some(DateTime::<Utc>::from(modified)))
    }
}

impl MessageQueue for LocalCloud {
    fn receive(&self, queue: &str, max: usize) -> Result<Vec<QueueMessage>, RemoteError> {
        let path = self.queue_path(queue);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_error("Failed to open", &path, e))?;
        file.lock_exclusive()
            .map_err(|e| io_error("Failed to lock", &path, e))?;

        let mut bodies = Self::read_queue(&file, &path)?;
        let rest = bodies.split_off(max.min(bodies.len()));

        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .map_err(|e| io_error("Failed to truncate", &path, e))?;
        let mut writer = BufWriter::new(&file);
        for body in &rest {
            let line = serde_json::to_string(body).map_err(|e| io_error("Failed to encode", &path, e))?;
            writeln!(writer, "{}", line).map_err(|e| io_error("Failed to write", &path, e))?;
        }
        writer
            .flush()
            .map_err(|e| io_error("Failed to flush", &path, e))?;

        Ok(bodies
            .into_iter()
            .map(|body| QueueMessage {
                receipt: short_hash(&body),
                body,
            })
            .collect())
    }

    /// Received messages are already gone from the file
    fn delete_message(&self, _queue: &str, _receipt: &str) -> Result<(), RemoteError> {
        Ok(())
    }

    fn depth(&self, queue: &str) -> Result<usize, RemoteError> {
        let path = self.queue_path(queue);
        if !path.exists() {
            return Ok(0);
        }
        let file = File::open(&path).map_err(|e| io_error("Failed to open", &path, e))?;
        file.lock_shared()
            .map_err(|e| io_error("Failed to lock", &path, e))?;
        Ok(Self::read_queue(&file, &path)?.len())
    }
}

impl ScalingApi for LocalCloud {
    fn instances_in_group(&self, group: &str, lifecycle_state: &str) -> Result<Vec<String>, RemoteError> {
        let state = self.read_state()?;
        let found = state
            .groups
            .get(group)
            .ok_or_else(|| RemoteError::NotFound(format!("scaling group {}", group)))?;

        if lifecycle_state == IN_SERVICE {
            Ok(found.instances.clone())
        } else {
            Ok(Vec::new())
        }
    }

    fn suspend_scheduled_actions(&self, group: &str) -> Result<(), RemoteError> {
        self.modify(|state| {
            let found = state
                .groups
                .get_mut(group)
                .ok_or_else(|| RemoteError::NotFound(format!("scaling group {}", group)))?;
            found.suspended = true;
            Ok(())
        })
    }

    fn resume_scheduled_actions(&self, group: &str) -> Result<(), RemoteError> {
        self.modify(|state| {
            let found = state
                .groups
                .get_mut(group)
                .ok_or_else(|| RemoteError::NotFound(format!("scaling group {}", group)))?;
            found.suspended = false;
            Ok(())
        })
    }
}
