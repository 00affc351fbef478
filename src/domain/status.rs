//! Remote stack lifecycle status
//!
//! A status is the raw state name reported by the provisioning API plus a set
//! of predicates derived from its prefix and suffix. Unknown but well-formed
//! names are classified by the same rules; only [`Status::nonexistent`]
//! represents a stack that has not been deployed.

use std::fmt;

use serde::Serialize;

/// Name used for the "no such stack" sentinel
pub const NONEXISTENT: &str = "NONEXISTENT";

/// Classified lifecycle status of a remote stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    name: String,
    exists: bool,
    failed: bool,
    complete: bool,
    in_progress: bool,
    cleanup_in_progress: bool,
    is_create: bool,
    is_delete: bool,
    is_update: bool,
    is_rollback: bool,
}

impl Status {
    /// Classifies a raw state name such as `UPDATE_ROLLBACK_COMPLETE`
    pub fn classify(name: impl Into<String>) -> Self {
        let name = name.into();
        if name == NONEXISTENT {
            return Self::nonexistent();
        }

        let is_update_rollback = name.starts_with("UPDATE_ROLLBACK");
        Self {
            exists: true,
            failed: name.ends_with("_FAILED"),
            complete: name.ends_with("_COMPLETE"),
            in_progress: name.ends_with("_IN_PROGRESS"),
            cleanup_in_progress: name.ends_with("_CLEANUP_IN_PROGRESS"),
            is_create: name.starts_with("CREATE"),
            is_delete: name.starts_with("DELETE"),
            is_update: name.starts_with("UPDATE") && !is_update_rollback,
            is_rollback: name.starts_with("ROLLBACK") || is_update_rollback,
            name,
        }
    }

    /// The status of a stack that doesn't exist
    pub fn nonexistent() -> Self {
        Self {
            name: NONEXISTENT.to_string(),
            exists: false,
            failed: false,
            complete: false,
            in_progress: false,
            cleanup_in_progress: false,
            is_create: false,
            is_delete: false,
            is_update: false,
            is_rollback: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn complete(&self) -> bool {
        self.complete
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn cleanup_in_progress(&self) -> bool {
        self.cleanup_in_progress
    }

    pub fn is_create(&self) -> bool {
        self.is_create
    }

    pub fn is_delete(&self) -> bool {
        self.is_delete
    }

    pub fn is_update(&self) -> bool {
        self.is_update
    }

    pub fn is_rollback(&self) -> bool {
        self.is_rollback
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
