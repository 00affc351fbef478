//! Scheduled-action suspension around a build

use tracing::{error, info};

use crate::remote::retry::{throttled, DESCRIBE_BACKOFF};
use crate::remote::{Clock, RemoteError, ScalingApi};

pub fn suspend(
    scaling: &dyn ScalingApi,
    clock: &dyn Clock,
    group: &str,
    dry_run: bool,
) -> Result<(), RemoteError> {
    if dry_run {
        info!(group, "DRYRUN: Would suspend scheduled actions");
        return Ok(());
    }
    throttled(clock, DESCRIBE_BACKOFF, "suspend_processes", || {
        scaling.suspend_scheduled_actions(group)
    })?;
    info!(group, "Suspended scheduled actions");
    Ok(())
}

pub fn resume(
    scaling: &dyn ScalingApi,
    clock: &dyn Clock,
    group: &str,
    dry_run: bool,
) -> Result<(), RemoteError> {
    if dry_run {
        info!(group, "DRYRUN: Would resume scheduled actions");
        return Ok(());
    }
    throttled(clock, DESCRIBE_BACKOFF, "resume_processes", || {
        scaling.resume_scheduled_actions(group)
    })?;
    info!(group, "Resumed scheduled actions");
    Ok(())
}

/// Keeps a scaling group's scheduled actions suspended while alive
///
/// [`SuspendGuard::finish`] resumes them and reports failure. Dropping the
/// guard without finishing (an error path) resumes them too, logging any
/// failure instead. A killed process resumes nothing.
pub struct SuspendGuard<'a> {
    scaling: &'a dyn ScalingApi,
    clock: &'a dyn Clock,
    group: String,
    dry_run: bool,
    active: bool,
}

impl<'a> SuspendGuard<'a> {
    pub fn suspend(
        scaling: &'a dyn ScalingApi,
        clock: &'a dyn Clock,
        group: String,
        dry_run: bool,
    ) -> Result<Self, RemoteError> {
        suspend(scaling, clock, &group, dry_run)?;
        Ok(Self {
            scaling,
            clock,
            group,
            dry_run,
            active: true,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn finish(mut self) -> Result<(), RemoteError> {
        self.active = false;
        resume(self.scaling, self.clock, &self.group, self.dry_run)
    }
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(e) = resume(self.scaling, self.clock, &self.group, self.dry_run) {
            error!(group = %self.group, error = %e, "Failed to resume scheduled actions");
        }
    }
}
