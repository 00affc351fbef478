//! # Deployment confirmation
//!
//! After a stack update, proves the new version actually went live. Three
//! channels are supported and any combination may be configured:
//!
//! | Channel | Module | Succeeds when |
//! |---------|--------|---------------|
//! | Queue | [`queue`] | every in-service instance reported a matching version |
//! | URL | [`http`] | the check URL returns a matching body |
//! | Storage | [`storage`] | each path was written after the deploy began |
//!
//! Queue and URL checks only make sense against a scaling group, so a
//! configuration that names them without a group is rejected.

pub mod http;
pub mod queue;
pub mod storage;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::{ConfirmDeployment, Environment, Variable};
use crate::error::{DeployError, Result};
use crate::remote::retry::{throttled, DESCRIBE_BACKOFF};
use crate::remote::{Session, StackClient, IN_SERVICE};

/// The stack being confirmed
pub struct Target<'a> {
    pub key: &'a str,
    /// Physical stack name holding the scaling group
    pub stack_name: &'a str,
    pub settings: &'a ConfirmDeployment,
    pub environment: &'a Environment,
    /// When the deployment began
    pub start: DateTime<Utc>,
}

pub struct Confirmer<'a> {
    session: &'a Session,
    client: &'a StackClient,
}

impl<'a> Confirmer<'a> {
    pub fn new(session: &'a Session, client: &'a StackClient) -> Self {
        Self { session, client }
    }

    /// In-service instances of a group declared in `stack_name`
    pub fn instances(&self, stack_name: &str, logical_group: &str) -> Result<(String, Vec<String>)> {
        let group = self.client.physical_resource_id(stack_name, logical_group)?;
        let clock = self.session.clock.as_ref();
        let instances = throttled(clock, DESCRIBE_BACKOFF, "describe_auto_scaling_groups", || {
            self.session.scaling.instances_in_group(&group, IN_SERVICE)
        })?;
        Ok((group, instances))
    }

    /// Runs every configured check
    ///
    /// `endpoint` resolves the URL checker's endpoint variable; it is only
    /// called when a URL check is configured and instances are in service.
    pub fn confirm(
        &self,
        target: &Target<'_>,
        endpoint: impl FnOnce(&Variable) -> Result<String>,
    ) -> Result<()> {
        let settings = target.settings;
        let clock = self.session.clock.as_ref();

        let mut instances = Vec::new();
        if let Some(logical) = &settings.auto_scaling_group_name {
            let (group, found) = self.instances(target.stack_name, logical)?;
            if found.is_empty() {
                if settings.zero_instances_is_ok {
                    warn!(stack = target.key, group = %group, "No instances are in service, skipping confirmation");
                    return Ok(());
                }
                return Err(DeployError::NoInstances { group });
            }
            info!(stack = target.key, group = %group, instances = %found.join(","), "Found instances to confirm");
            instances = found;
        } else if settings.needs_instances() {
            return Err(DeployError::BadStack {
                stack: target.key.to_string(),
                message: "queue and url confirmation need an auto_scaling_group_name".into(),
            });
        }

        if let Some(check) = &settings.sns_confirmation {
            queue::confirm(
                self.session.queues.as_ref(),
                clock,
                check,
                &instances,
                target.environment,
            )?;
        }

        if let Some(check) = &settings.url_checker {
            let endpoint = endpoint(&check.endpoint)?;
            http::confirm(
                self.session.http.as_ref(),
                clock,
                check,
                &endpoint,
                target.environment,
            )?;
        }

        for check in &settings.deploys_s3_path {
            storage::confirm(
                self.session.objects.as_ref(),
                clock,
                check,
                target.environment,
                target.start,
            )?;
        }

        info!(stack = target.key, "Deployment confirmed");
        Ok(())
    }
}
