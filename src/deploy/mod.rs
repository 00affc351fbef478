//! # Stack lifecycle driver
//!
//! Deploys stacks in dependency order and drives each one through
//! create-or-update, waiting and confirmation.
//!
//! ## Deploying one stack
//!
//! 1. Sanity check the stack and everything it depends on
//! 2. Deploy its dependencies (one level of dependency triggering)
//! 3. Build it: suspend scheduled actions, create or update, wait
//! 4. Deploy its `build_after` stacks
//! 5. Prune old artifacts when retention is on
//! 6. Confirm the deployment
//!
//! A [`Progress`] owned by the caller records what was checked and made so
//! shared dependencies are handled once per invocation, including across
//! every stack of a plan.

mod guard;
mod resolve;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{debug, info};

use crate::artifact::{ArtifactManager, Published};
use crate::confirm::{Confirmer, Target};
use crate::domain::stack::{find_placeholders, mask_passwords, template_problems};
use crate::domain::{layered, plan, EnvSource, Layers, Parameter, Stack, StackGraph, Status, StorageLocation};
use crate::error::{DeployError, Result};
use crate::remote::{Session, StackClient, StackRequest, WaitError, WaitOptions};

pub use guard::SuspendGuard;
pub use resolve::{Lookup, MISSING_OUTPUT, MISSING_STACK};

/// Pause between a mutation and the first status check
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Settings {
    /// Log mutating calls instead of making them
    pub dry_run: bool,
    /// Hide `Password` parameter values when logging
    pub mask_passwords: bool,
    pub settle: Duration,
    /// Values from the selected environment
    pub vars: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dry_run: false,
            mask_passwords: false,
            settle: SETTLE_DELAY,
            vars: BTreeMap::new(),
        }
    }
}

/// Stacks handled so far in one invocation
#[derive(Debug, Default)]
pub struct Progress {
    /// Stacks deployed, in the order they were started
    pub made: Vec<String>,
    pub checked: BTreeSet<String>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_made(&self, key: &str) -> bool {
        self.made.iter().any(|made| made == key)
    }
}

pub struct Deployer<'a> {
    stacks: &'a BTreeMap<String, Stack>,
    session: Session,
    client: StackClient,
    env: &'a dyn EnvSource,
    settings: Settings,
}

impl<'a> Deployer<'a> {
    pub fn new(
        stacks: &'a BTreeMap<String, Stack>,
        session: Session,
        env: &'a dyn EnvSource,
        settings: Settings,
    ) -> Self {
        let client = StackClient::new(session.stacks.clone(), session.clock.clone());
        Self {
            stacks,
            session,
            client,
            env,
            settings,
        }
    }

    pub fn client(&self) -> &StackClient {
        &self.client
    }

    pub fn stack(&self, key: &str) -> Result<&'a Stack> {
        self.stacks
            .get(key)
            .ok_or_else(|| DeployError::NoSuchStack(key.to_string()))
    }

    pub fn physical_name(&self, stack: &Stack) -> Result<String> {
        Ok(stack.physical_name(self.env)?)
    }

    /// Fails on a dependency cycle before any remote call is made
    fn check_order(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.stack(key)?;
        }
        layered(self.stacks, keys, Stack::dependencies)?;
        Ok(())
    }

    fn artifacts(&self) -> ArtifactManager<'_> {
        ArtifactManager::new(self.session.objects.as_ref(), self.env, self.settings.dry_run)
    }

    // ========================================================================
    // Sanity checks
    // ========================================================================

    /// Checks a stack and, recursively, the stacks around it
    ///
    /// Dependencies are checked first unless either `ignore_deps` or the
    /// stack's own `ignore_deps` is set; `build_after` stacks are always
    /// checked afterwards.
    pub fn sanity_check(&self, key: &str, progress: &mut Progress, ignore_deps: bool) -> Result<()> {
        self.check_order(&[key])?;
        self.check_tree(key, progress, ignore_deps)
    }

    fn check_tree(&self, key: &str, progress: &mut Progress, ignore_deps: bool) -> Result<()> {
        if !progress.checked.insert(key.to_string()) {
            return Ok(());
        }
        let stack = self.stack(key)?;

        if !ignore_deps && !stack.ignore_deps {
            for dependency in stack.dependencies() {
                self.check_tree(&dependency, progress, ignore_deps)?;
            }
        }

        info!(stack = key, "Sanity checking");
        self.check_stack(stack)?;

        for after in &stack.build_after {
            self.check_tree(after, progress, ignore_deps)?;
        }
        Ok(())
    }

    fn check_stack(&self, stack: &Stack) -> Result<()> {
        let missing = stack.missing_env(self.env);
        if !missing.is_empty() {
            return Err(DeployError::MissingEnvironment {
                stack: stack.key_name.clone(),
                missing,
            });
        }

        let problems = template_problems(&stack.template);
        if !problems.is_empty() {
            return Err(DeployError::InvalidTemplate {
                stack: stack.key_name.clone(),
                problems,
            });
        }

        let params = self.parameters(stack, Lookup::Sanity)?;
        let placeholders = find_placeholders(&params);
        if !placeholders.is_empty() {
            return Err(DeployError::UnresolvedPlaceholders {
                stack: stack.key_name.clone(),
                placeholders,
            });
        }

        let name = self.physical_name(stack)?;
        let status = self.client.status(&name)?;
        if status.failed() {
            return Err(WaitError::FailedState {
                stack: name,
                status: status.name().to_string(),
            }
            .into());
        }

        self.client.validate_template(&stack.template_body())?;
        Ok(())
    }

    /// Sanity checks every stack of a plan, sharing one progress
    pub fn sanity_check_plan(
        &self,
        plans: &BTreeMap<String, Vec<String>>,
        name: &str,
        progress: &mut Progress,
    ) -> Result<()> {
        let keys: Vec<&str> = plan::resolve(plans, name, self.stacks)?
            .iter()
            .map(String::as_str)
            .collect();
        self.check_order(&keys)?;
        for key in keys {
            self.check_tree(key, progress, false)?;
        }
        Ok(())
    }

    // ========================================================================
    // Deploying
    // ========================================================================

    /// Deploys a stack and its dependencies
    pub fn deploy_stack(&self, key: &str, progress: &mut Progress, ignore_deps: bool) -> Result<()> {
        self.check_order(&[key])?;
        let start = self.client.clock().now();
        self.deploy_from(key, progress, ignore_deps, start)
    }

    fn deploy_from(
        &self,
        key: &str,
        progress: &mut Progress,
        ignore_deps: bool,
        start: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        if progress.is_made(key) {
            return Ok(());
        }
        let stack = self.stack(key)?;

        self.check_tree(key, progress, ignore_deps)?;
        progress.made.push(key.to_string());

        if !ignore_deps && !stack.ignore_deps {
            for dependency in stack.dependencies() {
                self.deploy_from(&dependency, progress, true, start)?;
            }
        }

        info!(stack = key, "Making stack");
        self.build_stack(stack)?;

        for after in &stack.build_after {
            self.deploy_from(after, progress, true, start)?;
        }

        if stack.artifact_retention {
            self.artifacts().clean(stack)?;
        }

        self.confirm(stack, start)
    }

    /// Deploys every stack of a plan in order, sharing one progress
    pub fn deploy_plan(
        &self,
        plans: &BTreeMap<String, Vec<String>>,
        name: &str,
        progress: &mut Progress,
    ) -> Result<()> {
        let keys: Vec<&str> = plan::resolve(plans, name, self.stacks)?
            .iter()
            .map(String::as_str)
            .collect();
        self.check_order(&keys)?;
        for key in keys {
            let start = self.client.clock().now();
            self.deploy_from(key, progress, false, start)?;
        }
        Ok(())
    }

    /// Creates or updates one stack and waits for it to settle
    pub fn build_stack(&self, stack: &Stack) -> Result<()> {
        let name = self.physical_name(stack)?;

        let guard = if stack.suspend_actions && self.client.status(&name)?.exists() {
            Some(self.suspend_guard(stack, &name)?)
        } else {
            None
        };

        info!(stack = %stack.key_name, "Building - {}", name);
        let lookup = if self.settings.dry_run {
            Lookup::Sanity
        } else {
            Lookup::Deploy
        };
        let params = self.parameters(stack, lookup)?;
        self.log_params(&params);

        let placeholders = find_placeholders(&params);
        if !placeholders.is_empty() {
            return Err(DeployError::UnresolvedPlaceholders {
                stack: stack.key_name.clone(),
                placeholders,
            });
        }

        let changed = if self.is_equivalent(stack, &name)? {
            info!(stack = %name, "Stack is determined to be the same, not updating");
            false
        } else {
            self.create_or_update(stack, &name, &params)?
        };

        if self.settings.dry_run {
            if let Some(guard) = guard {
                guard.finish()?;
            }
            return Ok(());
        }

        if changed {
            self.client.clock().sleep(self.settings.settle);
            self.client.reset(&name);
            self.client.wait(
                &name,
                WaitOptions::new(stack.build_timeout).rollback_is_failure(true),
            )?;
        } else {
            self.client.wait(&name, WaitOptions::new(stack.build_timeout))?;
        }
        self.client.reset(&name);

        if let Some(guard) = guard {
            guard.finish()?;
        }
        Ok(())
    }

    fn log_params(&self, params: &[Parameter]) {
        let shown = if self.settings.mask_passwords {
            mask_passwords(params)
        } else {
            params.to_vec()
        };
        match serde_json::to_string_pretty(&shown) {
            Ok(document) => info!("Parameters\n{}", document),
            Err(e) => debug!(error = %e, "Failed to render parameters"),
        }
    }

    /// True when the stack exists and every skip pair resolves equal
    fn is_equivalent(&self, stack: &Stack, name: &str) -> Result<bool> {
        if stack.skip_update_if_equivalent.is_empty() || !self.client.status(name)?.exists() {
            return Ok(false);
        }

        let environment = stack.environment(self.env);
        for skipper in &stack.skip_update_if_equivalent {
            let same = skipper.equivalent(|variable| self.resolve(variable, &environment, Lookup::Compare))?;
            if !same {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns whether anything changed remotely
    fn create_or_update(&self, stack: &Stack, name: &str, params: &[Parameter]) -> Result<bool> {
        info!(stack = name, "Creating or updating the stack");
        let status = self.client.wait(name, WaitOptions::new(stack.build_timeout))?;

        let template = stack.template_body();
        let request = StackRequest {
            name,
            template: &template,
            params,
            tags: &stack.tags,
        };

        if !status.exists() {
            info!(stack = name, "No existing stack, making one now");
            if self.settings.dry_run {
                info!(stack = name, "DRYRUN: Would create stack");
                debug!(template = %template, "Would use this template");
                return Ok(false);
            }
            return Ok(self.client.create(&request)?);
        }

        if status.complete() {
            info!(stack = name, "Found existing stack, doing an update");
            if self.settings.dry_run {
                info!(stack = name, "DRYRUN: Would update stack");
                debug!(template = %template, "Would use this template");
                return Ok(false);
            }
            return Ok(self.client.update(&request)?);
        }

        Err(DeployError::CannotUpdate {
            stack: name.to_string(),
            status: status.name().to_string(),
        })
    }

    // ========================================================================
    // Scheduled actions
    // ========================================================================

    fn scaling_group(&self, stack: &Stack, name: &str) -> Result<String> {
        let logical = stack
            .auto_scaling_group_name
            .as_deref()
            .ok_or_else(|| DeployError::BadStack {
                stack: stack.key_name.clone(),
                message: "suspending scheduled actions needs an auto_scaling_group_name".into(),
            })?;
        Ok(self.client.physical_resource_id(name, logical)?)
    }

    fn suspend_guard(&self, stack: &Stack, name: &str) -> Result<SuspendGuard<'_>> {
        let group = self.scaling_group(stack, name)?;
        Ok(SuspendGuard::suspend(
            self.session.scaling.as_ref(),
            self.session.clock.as_ref(),
            group,
            self.settings.dry_run,
        )?)
    }

    /// Suspends the stack's scaling group scheduled actions, returning the group
    pub fn suspend_actions(&self, key: &str) -> Result<String> {
        let stack = self.stack(key)?;
        let group = self.scaling_group(stack, &self.physical_name(stack)?)?;
        guard::suspend(
            self.session.scaling.as_ref(),
            self.session.clock.as_ref(),
            &group,
            self.settings.dry_run,
        )?;
        Ok(group)
    }

    pub fn resume_actions(&self, key: &str) -> Result<String> {
        let stack = self.stack(key)?;
        let group = self.scaling_group(stack, &self.physical_name(stack)?)?;
        guard::resume(
            self.session.scaling.as_ref(),
            self.session.clock.as_ref(),
            &group,
            self.settings.dry_run,
        )?;
        Ok(group)
    }

    // ========================================================================
    // Confirmation
    // ========================================================================

    fn confirm(&self, stack: &Stack, start: chrono::DateTime<chrono::Utc>) -> Result<()> {
        let Some(settings) = &stack.confirm_deployment else {
            return Ok(());
        };
        if self.settings.dry_run {
            info!(stack = %stack.key_name, "DRYRUN: Would confirm the deployment");
            return Ok(());
        }

        let name = self.physical_name(stack)?;
        let environment = stack.environment(self.env);
        let target = Target {
            key: &stack.key_name,
            stack_name: &name,
            settings,
            environment: &environment,
            start,
        };

        Confirmer::new(&self.session, &self.client).confirm(&target, |endpoint| {
            Ok(self
                .resolve(endpoint, &environment, Lookup::Deploy)?
                .unwrap_or_default())
        })
    }

    /// Runs a stack's confirmation on its own, counting from now
    pub fn confirm_deployment(&self, key: &str) -> Result<()> {
        let stack = self.stack(key)?;
        let start = self.client.clock().now();
        self.confirm(stack, start)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// The deployed name and resolved parameter document
    ///
    /// Stacks that aren't deployed yet get stand-in values rather than
    /// failing.
    pub fn params(&self, key: &str) -> Result<(String, Vec<Parameter>)> {
        let stack = self.stack(key)?;
        let missing = stack.missing_env(self.env);
        if !missing.is_empty() {
            return Err(DeployError::MissingEnvironment {
                stack: key.to_string(),
                missing,
            });
        }
        let params = self.parameters(stack, Lookup::Sanity)?;
        let params = if self.settings.mask_passwords {
            mask_passwords(&params)
        } else {
            params
        };
        Ok((self.physical_name(stack)?, params))
    }

    /// Outputs of a deployed stack, after any transition settles
    pub fn outputs(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let stack = self.stack(key)?;
        let name = self.physical_name(stack)?;
        self.client.wait(&name, WaitOptions::new(stack.build_timeout))?;
        self.client
            .outputs(&name)?
            .ok_or_else(|| crate::remote::RemoteError::NotFound(name).into())
    }

    /// Waits on a stack's in-flight transition, logging its events
    pub fn tail(&self, key: &str) -> Result<Status> {
        let stack = self.stack(key)?;
        let name = self.physical_name(stack)?;
        Ok(self.client.wait(&name, WaitOptions::new(stack.build_timeout))?)
    }

    /// Stacks that depend on `key`, directly or not
    pub fn dependents(&self, key: &str) -> Result<Vec<String>> {
        self.stack(key)?;
        let graph = StackGraph::from_stacks(self.stacks)?;
        Ok(graph.transitive_dependents(key)?)
    }

    /// `keys` and their dependencies in build order
    pub fn layers<S: AsRef<str>>(&self, keys: impl IntoIterator<Item = S>) -> Result<Layers<'a, Stack>> {
        Ok(layered(self.stacks, keys, Stack::dependencies)?)
    }

    // ========================================================================
    // Artifacts
    // ========================================================================

    pub fn publish_artifacts(&self, key: &str) -> Result<Vec<Published>> {
        self.artifacts().publish(self.stack(key)?)
    }

    pub fn clean_artifacts(&self, key: &str) -> Result<Vec<StorageLocation>> {
        self.artifacts().clean(self.stack(key)?)
    }

    pub fn artifact_locations(&self, key: &str, artifact: Option<&str>) -> Result<Vec<(String, StorageLocation)>> {
        self.artifacts().locations(self.stack(key)?, artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::confirm::QueueCheck;
    use crate::domain::{ConfirmDeployment, EnvSpec, LayeringError, Skipper, Variable};
    use crate::error::ErrorKind;
    use crate::remote::memory::MemoryCloud;
    use crate::remote::ManualClock;
    use serde_json::json;
    use std::rc::Rc;

    fn template() -> serde_json::Value {
        json!({
            "Resources": {"Queue": {"Type": "Queue"}},
            "Outputs": {"Url": {"Value": "https://db.internal"}}
        })
    }

    fn stack(key: &str) -> Stack {
        let mut stack = Stack::new(key, template());
        stack.stack_name = format!("{}-prod", key);
        stack
    }

    fn managed(name: &str) -> bool {
        matches!(name, "db" | "app")
    }

    fn stacks() -> BTreeMap<String, Stack> {
        let db = stack("db");
        let mut app = stack("app");
        app.params = vec![Parameter::new("DbUrl", "XXX_DB_URL_XXX")];
        app.vars
            .insert("db_url".into(), Variable::parse("db|Url", managed));
        BTreeMap::from([("db".to_string(), db), ("app".to_string(), app)])
    }

    struct Fixture {
        clock: Rc<ManualClock>,
        cloud: Rc<MemoryCloud>,
        session: Session,
        env: BTreeMap<String, String>,
    }

    fn fixture() -> Fixture {
        let clock = Rc::new(ManualClock::default());
        let cloud = Rc::new(MemoryCloud::new(clock.clone()));
        let session = Session::uniform(cloud.clone(), cloud.clone(), clock.clone());
        Fixture {
            clock,
            cloud,
            session,
            env: BTreeMap::new(),
        }
    }

    impl Fixture {
        fn deployer<'a>(&'a self, stacks: &'a BTreeMap<String, Stack>, settings: Settings) -> Deployer<'a> {
            Deployer::new(stacks, self.session.clone(), &self.env, settings)
        }
    }

    #[test]
    fn deploying_app_creates_db_first() {
        let f = fixture();
        let stacks = stacks();
        let deployer = f.deployer(&stacks, Settings::default());

        let mut progress = Progress::new();
        deployer.deploy_stack("app", &mut progress, false).unwrap();

        assert_eq!(progress.made, vec!["app", "db"]);
        let calls = f.cloud.calls();
        let create_db = calls.iter().position(|c| c == "create db-prod").unwrap();
        let create_app = calls.iter().position(|c| c == "create app-prod").unwrap();
        assert!(create_db < create_app);

        let app = f.cloud.stack("app-prod").unwrap();
        assert_eq!(app.status, "CREATE_COMPLETE");
        assert_eq!(app.params, vec![Parameter::new("DbUrl", "https://db.internal")]);
    }

    #[test]
    fn deploying_twice_with_shared_progress_builds_once() {
        let f = fixture();
        let stacks = stacks();
        let deployer = f.deployer(&stacks, Settings::default());

        let mut progress = Progress::new();
        deployer.deploy_stack("db", &mut progress, false).unwrap();
        deployer.deploy_stack("db", &mut progress, false).unwrap();

        assert_eq!(f.cloud.count("create db-prod"), 1);
        assert_eq!(f.cloud.count("update db-prod"), 0);
        assert_eq!(progress.made, vec!["db"]);
    }

    #[test]
    fn existing_stacks_are_updated() {
        let f = fixture();
        f.cloud.with_stack("db-prod", "CREATE_COMPLETE");
        let stacks = stacks();
        let deployer = f.deployer(&stacks, Settings::default());

        deployer.build_stack(deployer.stack("db").unwrap()).unwrap();
        assert_eq!(f.cloud.count("update db-prod"), 1);
        assert_eq!(f.cloud.stack("db-prod").unwrap().status, "UPDATE_COMPLETE");
        assert!(f.clock.sleeps().contains(&SETTLE_DELAY));
    }

    #[test]
    fn stacks_that_never_settle_are_not_updated() {
        let f = fixture();
        f.cloud.with_stack("db-prod", "UPDATE_IN_PROGRESS");
        let mut stacks = stacks();
        if let Some(db) = stacks.get_mut("db") {
            db.build_timeout = Duration::from_secs(60);
        }
        let deployer = f.deployer(&stacks, Settings::default());

        let err = deployer.build_stack(deployer.stack("db").unwrap()).unwrap_err();
        assert!(matches!(err, DeployError::Wait(WaitError::Incomplete { ref status, .. }) if status == "UPDATE_IN_PROGRESS"));
        assert_eq!(f.cloud.count("update"), 0);
    }

    #[test]
    fn rollbacks_after_an_update_fail_the_build() {
        let f = fixture();
        f.cloud.with_stack("db-prod", "CREATE_COMPLETE");
        let stacks = stacks();
        let deployer = f.deployer(&stacks, Settings::default());
        deployer.client().status("db-prod").unwrap();
        f.cloud.script(
            "db-prod",
            &["UPDATE_ROLLBACK_IN_PROGRESS", "UPDATE_ROLLBACK_COMPLETE"],
        );

        let err = deployer.build_stack(deployer.stack("db").unwrap()).unwrap_err();
        assert!(matches!(err, DeployError::Wait(WaitError::Incomplete { .. })));
    }

    fn cyclic_stacks() -> BTreeMap<String, Stack> {
        let mut a = stack("a");
        a.build_first = vec!["b".into()];
        let mut b = stack("b");
        b.build_first = vec!["a".into()];
        BTreeMap::from([("a".to_string(), a), ("b".to_string(), b)])
    }

    #[test]
    fn cycles_stop_a_deploy_before_any_remote_call() {
        let f = fixture();
        let stacks = cyclic_stacks();
        let deployer = f.deployer(&stacks, Settings::default());

        let mut progress = Progress::new();
        let err = deployer.deploy_stack("a", &mut progress, false).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cycle);
        assert!(matches!(
            err,
            DeployError::Layering(LayeringError::Cycle { ref chain }) if chain == &["a", "b", "a"]
        ));
        assert!(f.cloud.calls().is_empty());
        assert!(progress.made.is_empty());
    }

    #[test]
    fn cycles_stop_plans_and_sanity_checks() {
        let f = fixture();
        let stacks = cyclic_stacks();
        let deployer = f.deployer(&stacks, Settings::default());
        let plans = BTreeMap::from([("all".to_string(), vec!["b".to_string()])]);

        let err = deployer
            .deploy_plan(&plans, "all", &mut Progress::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cycle);

        let err = deployer
            .sanity_check_plan(&plans, "all", &mut Progress::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cycle);

        let mut progress = Progress::new();
        let err = deployer.sanity_check("a", &mut progress, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cycle);
        assert!(progress.checked.is_empty());
        assert!(f.cloud.calls().is_empty());
    }

    #[test]
    fn unknown_stacks_are_reported_by_name() {
        let f = fixture();
        let stacks = stacks();
        let deployer = f.deployer(&stacks, Settings::default());

        let err = deployer
            .deploy_stack("cache", &mut Progress::new(), false)
            .unwrap_err();
        assert!(matches!(err, DeployError::NoSuchStack(ref key) if key == "cache"));
    }

    #[test]
    fn failed_stacks_fail_the_sanity_check() {
        let f = fixture();
        f.cloud.with_stack("db-prod", "CREATE_FAILED");
        let stacks = stacks();
        let deployer = f.deployer(&stacks, Settings::default());

        let err = deployer
            .sanity_check("app", &mut Progress::new(), false)
            .unwrap_err();
        assert!(matches!(err, DeployError::Wait(WaitError::FailedState { .. })));
    }

    #[test]
    fn sanity_checks_tolerate_undeployed_dependencies() {
        let f = fixture();
        let stacks = stacks();
        let deployer = f.deployer(&stacks, Settings::default());

        let mut progress = Progress::new();
        deployer.sanity_check("app", &mut progress, false).unwrap();
        assert_eq!(progress.checked, BTreeSet::from(["app".to_string(), "db".to_string()]));

        let (_, params) = deployer.params("app").unwrap();
        assert_eq!(params[0].value, MISSING_STACK);
    }

    #[test]
    fn declared_outputs_not_yet_deployed_are_tolerated() {
        let f = fixture();
        f.cloud.with_stack("db-prod", "CREATE_COMPLETE");
        let stacks = stacks();
        let deployer = f.deployer(&stacks, Settings::default());

        let (_, params) = deployer.params("app").unwrap();
        assert_eq!(params[0].value, MISSING_OUTPUT);
    }

    #[test]
    fn leftover_placeholders_fail_the_sanity_check() {
        let f = fixture();
        let mut stacks = stacks();
        if let Some(db) = stacks.get_mut("db") {
            db.params = vec![Parameter::new("Size", "XXX_SIZE_XXX")];
        }
        let deployer = f.deployer(&stacks, Settings::default());

        let err = deployer
            .sanity_check("db", &mut Progress::new(), false)
            .unwrap_err();
        match err {
            DeployError::UnresolvedPlaceholders { placeholders, .. } => {
                assert_eq!(placeholders, vec!["XXX_SIZE_XXX"])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_environment_is_reported_together() {
        let mut f = fixture();
        f.env.insert("A".into(), "1".into());
        let mut stacks = stacks();
        if let Some(db) = stacks.get_mut("db") {
            db.env = ["A", "B", "C"].into_iter().map(EnvSpec::required).collect();
        }
        let deployer = f.deployer(&stacks, Settings::default());

        let err = deployer
            .sanity_check("db", &mut Progress::new(), false)
            .unwrap_err();
        assert!(matches!(err, DeployError::MissingEnvironment { ref missing, .. } if missing == &["B", "C"]));
    }

    #[test]
    fn dry_run_changes_nothing() {
        let f = fixture();
        let stacks = stacks();
        let settings = Settings {
            dry_run: true,
            ..Settings::default()
        };
        let deployer = f.deployer(&stacks, settings);

        deployer.deploy_stack("app", &mut Progress::new(), false).unwrap();
        assert!(f.cloud.stack("db-prod").is_none());
        assert_eq!(f.cloud.count("create"), 0);
    }

    #[test]
    fn equivalent_stacks_are_skipped() {
        let f = fixture();
        f.cloud.with_stack("db-prod", "CREATE_COMPLETE");
        f.cloud.set_outputs("db-prod", &[("Version", "v9")]);
        let mut stacks = stacks();
        if let Some(db) = stacks.get_mut("db") {
            db.skip_update_if_equivalent = vec![Skipper::new(
                Variable::parse("db|Version", managed),
                Variable::Static("v9".into()),
            )];
        }
        let deployer = f.deployer(&stacks, Settings::default());

        deployer.build_stack(deployer.stack("db").unwrap()).unwrap();
        assert_eq!(f.cloud.count("update"), 0);
    }

    #[test]
    fn scheduled_actions_are_resumed_after_a_failed_build() {
        let f = fixture();
        f.cloud.with_stack("db-prod", "UPDATE_IN_PROGRESS");
        f.cloud.set_resource("db-prod", "Group", "db-asg");
        let mut stacks = stacks();
        if let Some(db) = stacks.get_mut("db") {
            db.suspend_actions = true;
            db.auto_scaling_group_name = Some("Group".into());
            db.build_timeout = Duration::from_secs(30);
        }
        let deployer = f.deployer(&stacks, Settings::default());

        let err = deployer.build_stack(deployer.stack("db").unwrap()).unwrap_err();
        assert!(matches!(err, DeployError::Wait(WaitError::Incomplete { .. })));
        assert_eq!(f.cloud.count("suspend db-asg"), 1);
        assert_eq!(f.cloud.count("resume db-asg"), 1);
        assert!(!f.cloud.is_suspended("db-asg"));
    }

    #[test]
    fn confirmation_runs_after_the_build() {
        let f = fixture();
        let mut stacks = stacks();
        if let Some(db) = stacks.get_mut("db") {
            db.confirm_deployment = Some(ConfirmDeployment {
                auto_scaling_group_name: Some("Group".into()),
                sns_confirmation: Some(QueueCheck {
                    queue: "deploys".into(),
                    version_message: "v9".into(),
                    timeout: Duration::from_secs(30),
                }),
                ..Default::default()
            });
        }
        f.cloud.add_group("db-prod-Group", &["i-1"]);
        f.cloud.send("deploys", "fail:i-1:v8");
        let deployer = f.deployer(&stacks, Settings::default());

        let err = deployer
            .deploy_stack("db", &mut Progress::new(), false)
            .unwrap_err();
        assert!(matches!(err, DeployError::FailedInstances { ref failed } if failed == &["i-1"]));
        assert_eq!(f.cloud.count("create db-prod"), 1);
    }

    #[test]
    fn plans_report_every_missing_stack() {
        let f = fixture();
        let stacks = stacks();
        let deployer = f.deployer(&stacks, Settings::default());
        let plans = BTreeMap::from([(
            "release".to_string(),
            vec!["db".to_string(), "cache".to_string(), "web".to_string()],
        )]);

        let err = deployer
            .deploy_plan(&plans, "release", &mut Progress::new())
            .unwrap_err();
        match err {
            DeployError::Plan(crate::domain::PlanError::MissingStacks { missing, .. }) => {
                assert_eq!(missing, vec!["cache", "web"])
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(f.cloud.calls().is_empty());
    }

    #[test]
    fn dependents_follow_variables() {
        let f = fixture();
        let stacks = stacks();
        let deployer = f.deployer(&stacks, Settings::default());
        assert_eq!(deployer.dependents("db").unwrap(), vec!["app"]);
        assert!(deployer.dependents("app").unwrap().is_empty());
    }
}
