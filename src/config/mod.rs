//! Configuration handling for strata
//!
//! Configuration lives in a single YAML file (`strata.yml` by default).
//! Templates and parameter files are resolved relative to its directory.

mod build;
mod raw;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::Stack;

use build::Loader;
use raw::{scalar, RawConfig};

pub const DEFAULT_CONFIG_FILE: &str = "strata.yml";

/// Directory under the config root holding local backend state
pub const DEFAULT_STATE_DIR: &str = ".strata";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration:\n  {}", problems.join("\n  "))]
    Invalid { problems: Vec<String> },

    #[error("No such environment '{wanted}' (available: {})", available.join(", "))]
    NoSuchEnvironment { wanted: String, available: Vec<String> },
}

/// A validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory the configuration file lives in
    pub root: PathBuf,
    pub environments: BTreeMap<String, BTreeMap<String, String>>,
    pub plans: BTreeMap<String, Vec<String>>,
    pub stacks: BTreeMap<String, Stack>,
    pub password_noecho: bool,
}

impl Config {
    /// Loads and validates a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&content, &root)
    }

    /// Validates configuration text, resolving files against `root`
    pub fn parse(content: &str, root: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let managed: BTreeSet<String> = raw.stacks.keys().cloned().collect();
        let mut loader = Loader::new(root, managed.clone());

        let mut environments = BTreeMap::new();
        for (name, environment) in raw.environments {
            let mut vars = BTreeMap::new();
            for (key, value) in environment.vars {
                match scalar(&value) {
                    Some(value) => {
                        vars.insert(key, value);
                    }
                    None => loader
                        .problems
                        .push(format!("environments.{}.vars.{}: must be a scalar", name, key)),
                }
            }
            environments.insert(name, vars);
        }

        for (plan, keys) in &raw.plans {
            for key in keys {
                if !managed.contains(key) {
                    loader
                        .problems
                        .push(format!("plans.{}: unknown stack '{}'", plan, key));
                }
            }
        }

        let mut stacks = BTreeMap::new();
        for (key, stack) in raw.stacks {
            if let Some(stack) = loader.stack(&key, stack) {
                stacks.insert(key, stack);
            }
        }

        if !loader.problems.is_empty() {
            return Err(ConfigError::Invalid {
                problems: loader.problems,
            });
        }

        Ok(Self {
            root: root.to_path_buf(),
            environments,
            plans: raw.plans,
            stacks,
            password_noecho: raw.password_noecho,
        })
    }

    /// The vars of the named environment, empty when none is selected
    pub fn environment_vars(&self, name: Option<&str>) -> Result<BTreeMap<String, String>, ConfigError> {
        let Some(name) = name else {
            return Ok(BTreeMap::new());
        };
        self.environments
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::NoSuchEnvironment {
                wanted: name.to_string(),
                available: self.environments.keys().cloned().collect(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Compression, StackRef, Variable};
    use std::time::Duration;
    use tempfile::TempDir;

    const TEMPLATE: &str = r#"{"Resources": {"Queue": {"Type": "Queue"}}}"#;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
        dir
    }

    fn problems(err: ConfigError) -> Vec<String> {
        match err {
            ConfigError::Invalid { problems } => problems,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn loads_stacks_with_default_templates() {
        let dir = project(&[
            ("db.json", TEMPLATE),
            ("app.yaml", "Resources:\n  Web:\n    Type: Server\n"),
            (
                "strata.yml",
                r#"
environments:
  prod:
    vars:
      REGION: ap-southeast-2
      COUNT: 3
plans:
  release: [db, app]
stacks:
  db:
    stack_name: "db-{ENV}"
    stack_name_env: [ENV]
    params_yaml:
      Size: 10
      Zones: [a, b]
  app:
    build_first: [db]
    build_timeout: 60
    vars:
      db_url: db|Url
      external: { stack: shared-network, output: VpcId }
      plain: "literal=value"
"#,
            ),
        ]);

        let config = Config::load(&dir.path().join("strata.yml")).unwrap();
        assert_eq!(config.plans["release"], vec!["db", "app"]);
        assert_eq!(
            config.environment_vars(Some("prod")).unwrap()["COUNT"],
            "3"
        );

        let db = &config.stacks["db"];
        assert_eq!(db.stack_name, "db-{ENV}");
        assert_eq!(db.params[0].key, "Size");
        assert_eq!(db.params[0].value, "10");
        assert_eq!(db.params[1].value, "a,b");

        let app = &config.stacks["app"];
        assert!(app.template.get("Resources").is_some());
        assert_eq!(app.build_timeout, Duration::from_secs(60));
        assert_eq!(app.vars["db_url"].managed_stack(), Some("db"));
        assert_eq!(
            app.vars["external"],
            Variable::Dynamic {
                stack: StackRef::External("shared-network".into()),
                output: "VpcId".into()
            }
        );
        assert_eq!(app.vars["plain"], Variable::Static("literal=value".into()));
    }

    #[test]
    fn every_problem_is_reported() {
        let dir = project(&[(
            "strata.yml",
            r#"
plans:
  release: [db, cache]
stacks:
  db:
    stack_json: missing.json
    build_after: [web]
    suspend_actions: true
    params_json: []
    params_yaml: {}
    artifacts:
      bundle:
        compression_type: bz2
        upload_to: "not-a-bucket"
"#,
        )]);

        let problems = problems(Config::load(&dir.path().join("strata.yml")).unwrap_err());
        let all = problems.join("\n");
        assert!(all.contains("plans.release: unknown stack 'cache'"));
        assert!(all.contains("missing.json"));
        assert!(all.contains("stacks.db.build_after: unknown stack 'web'"));
        assert!(all.contains("suspend_actions needs an auto_scaling_group_name"));
        assert!(all.contains("both params_json and params_yaml"));
        assert!(all.contains("history_length is required"));
        assert!(all.contains("compression_type"));
        assert!(all.contains("is not a valid s3 address"));
        assert_eq!(problems.len(), 8);
    }

    #[test]
    fn artifacts_and_confirmation() {
        let dir = project(&[
            ("app.json", TEMPLATE),
            (
                "strata.yml",
                r#"
stacks:
  app:
    artifact_retention_after_deployment: true
    artifacts:
      bundle:
        compression_type: gz
        history_length: 3
        upload_to: "s3://releases/app/app-{VERSION}.tar.gz"
        paths:
          - [src, /srv/app]
        files:
          - content: "{VERSION}"
            path: /srv/app/VERSION
        commands:
          - copy:
              - [package.json, package.json]
            modify:
              package.json:
                append: ["// built"]
            command: npm install
            timeout: 120
            add_into_tar:
              - [node_modules, /srv/app/node_modules]
    confirm_deployment:
      auto_scaling_group_name: Group
      sns_confirmation:
        deployment_queue: deploys
        version_message: "{VERSION}"
      url_checker:
        endpoint: { stack: shared-lb, output: Dns }
        check_url: /version
        expect: "{VERSION}"
      deploys_s3_path:
        - s3://releases/markers/app
        - ["s3://releases/markers/other", 30]
"#,
            ),
        ]);

        let config = Config::load(&dir.path().join("strata.yml")).unwrap();
        let app = &config.stacks["app"];
        assert!(app.artifact_retention);

        let artifact = &app.artifacts[0];
        assert_eq!(artifact.key, "bundle");
        assert_eq!(artifact.compression, Compression::Gzip);
        assert_eq!(artifact.history_length, 3);
        assert_eq!(artifact.paths[0].host_path, dir.path().join("src"));
        assert_eq!(artifact.files[0].path, "/srv/app/VERSION");

        let command = &artifact.commands[0];
        assert_eq!(command.command, vec!["npm install"]);
        assert_eq!(command.timeout, Duration::from_secs(120));
        assert_eq!(command.modify[0].append, vec!["// built"]);

        let confirm = app.confirm_deployment.as_ref().unwrap();
        assert_eq!(confirm.sns_confirmation.as_ref().unwrap().queue, "deploys");
        assert_eq!(
            confirm.sns_confirmation.as_ref().unwrap().timeout,
            Duration::from_secs(300)
        );
        assert_eq!(confirm.deploys_s3_path.len(), 2);
        assert_eq!(confirm.deploys_s3_path[1].timeout, Duration::from_secs(30));
        assert_eq!(
            confirm.url_checker.as_ref().unwrap().timeout,
            Duration::from_secs(600)
        );
    }

    #[test]
    fn queue_checks_without_a_group_are_rejected() {
        let dir = project(&[
            ("app.json", TEMPLATE),
            (
                "strata.yml",
                r#"
stacks:
  app:
    confirm_deployment:
      sns_confirmation:
        deployment_queue: deploys
        version_message: v1
"#,
            ),
        ]);

        let problems = problems(Config::load(&dir.path().join("strata.yml")).unwrap_err());
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("need an auto_scaling_group_name"));
    }

    #[test]
    fn unknown_environments_list_the_choices() {
        let config = Config::parse("environments:\n  dev: {}\n  prod: {}\n", Path::new(".")).unwrap();
        let err = config.environment_vars(Some("stage")).unwrap_err();
        assert_eq!(err.to_string(), "No such environment 'stage' (available: dev, prod)");
        assert!(config.environment_vars(None).unwrap().is_empty());
    }
}
