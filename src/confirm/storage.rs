//! Storage-path confirmation

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::domain::confirm::StorageCheck;
use crate::domain::{Environment, StorageLocation};
use crate::error::{DeployError, Result};
use crate::remote::retry::{throttled, DESCRIBE_BACKOFF};
use crate::remote::{Clock, ObjectStore, Poller};

pub const STORAGE_STEP: Duration = Duration::from_secs(5);

/// Waits for an object to be written after `start`
///
/// A bucket root only has to exist.
pub fn confirm(
    objects: &dyn ObjectStore,
    clock: &dyn Clock,
    check: &StorageCheck,
    environment: &Environment,
    start: DateTime<Utc>,
) -> Result<()> {
    let location = StorageLocation::parse(&environment.render(&check.address)?)?;
    info!(location = %location, "Waiting for storage path to be written");

    for _ in Poller::new(clock, check.timeout, STORAGE_STEP) {
        let modified = throttled(clock, DESCRIBE_BACKOFF, "head_object", || objects.head(&location))?;
        match modified {
            Some(_) if location.is_bucket_root() => return Ok(()),
            Some(modified) if modified > start => {
                info!(location = %location, modified = %modified, "Found storage path");
                return Ok(());
            }
            _ => {}
        }
    }

    Err(DeployError::Timeout {
        what: format!("{} to be written", location),
        timeout: check.timeout,
    })
}
