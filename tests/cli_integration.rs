//! CLI integration tests for strata
//!
//! These drive the binary against the filesystem backend, so every command
//! runs end to end inside a temporary project directory.

use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tempfile::TempDir;

use strata::remote::local::LocalCloud;
use strata::remote::{ScalingApi, StackApi, SystemClock, IN_SERVICE};

const DB_TEMPLATE: &str = r#"{
    "Resources": {"Table": {"Type": "Database"}},
    "Outputs": {"Url": {"Value": "postgres://db.internal"}}
}"#;

const WEB_TEMPLATE: &str = r#"{
    "Parameters": {"DbUrl": {"Type": "String"}, "Version": {"Type": "String"}},
    "Resources": {
        "Group": {"Type": "AWS::AutoScaling::AutoScalingGroup", "Properties": {"DesiredCapacity": 1}}
    },
    "Outputs": {"Version": {"Value": {"Ref": "Version"}}}
}"#;

const CONFIG: &str = r#"
environments:
  prod:
    vars:
      region: ap-southeast-2
plans:
  release: [web, db]
stacks:
  db:
    stack_name: "db-{STAGE}"
    stack_name_env: ["STAGE:prod"]
  web:
    stack_name: web-prod
    env: [VERSION]
    params_yaml:
      DbUrl: XXX_DB_URL_XXX
      Version: XXX_VERSION_XXX
    vars:
      db_url: db|Url
    auto_scaling_group_name: Group
    suspend_actions: true
    artifacts:
      bundle:
        history_length: 1
        upload_to: "s3://releases/web/web-{VERSION}.tar.gz"
        paths:
          - [site, /srv/site]
        files:
          - content: "{VERSION}"
            path: /srv/site/VERSION
"#;

const CONFIRMATION: &str = r#"
    confirm_deployment:
      auto_scaling_group_name: Group
      sns_confirmation:
        deployment_queue: web-deploys
        version_message: "{VERSION}"
        timeout: 30
"#;

/// Get a command instance for the strata binary
fn strata_cmd(dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::new(assert_cmd::cargo::cargo_bin!("strata"));
    cmd.current_dir(dir)
        .env_remove("STRATA_CONFIG")
        .env_remove("STRATA_ENVIRONMENT")
        .env_remove("STRATA_STATE_DIR")
        .env_remove("VERSION")
        .env_remove("STAGE");
    cmd
}

/// Create a project with the db and web stacks
fn setup_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("db.json"), DB_TEMPLATE).unwrap();
    fs::write(dir.path().join("web.json"), WEB_TEMPLATE).unwrap();
    fs::write(dir.path().join("strata.yml"), CONFIG).unwrap();
    fs::create_dir_all(dir.path().join("site")).unwrap();
    fs::write(dir.path().join("site/index.html"), "<h1>hello</h1>").unwrap();
    dir
}

fn deploy_web(dir: &Path, version: &str) {
    strata_cmd(dir)
        .env("VERSION", version)
        .args(["deploy", "web"])
        .assert()
        .success();
}

fn local_state(dir: &Path) -> serde_json::Value {
    let content = fs::read_to_string(dir.join(".strata/stacks.json")).unwrap();
    serde_json::from_str(&content).unwrap()
}

fn group_suspended(dir: &Path) -> bool {
    let state = local_state(dir);
    let groups = state["groups"].as_object().unwrap();
    assert_eq!(groups.len(), 1);
    groups.values().next().unwrap()["suspended"].as_bool().unwrap()
}

// =============================================================================
// Deploy Tests
// =============================================================================

#[test]
fn test_deploy_builds_dependencies_first() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["deploy", "web", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""made":["web","db"]"#));

    let state = local_state(dir.path());
    assert_eq!(state["stacks"]["db-prod"]["status"], "CREATE_COMPLETE");
    assert_eq!(state["stacks"]["web-prod"]["status"], "CREATE_COMPLETE");
}

#[test]
fn test_deployed_outputs_feed_parameters() {
    let dir = setup_project();
    deploy_web(dir.path(), "v1");

    let output = strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["params", "web", "--format", "json"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();

    assert_eq!(json["stack_name"], "web-prod");
    assert_eq!(json["params"][0]["ParameterKey"], "DbUrl");
    assert_eq!(json["params"][0]["ParameterValue"], "postgres://db.internal");
    assert_eq!(json["params"][1]["ParameterValue"], "v1");

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["outputs", "web", "Version"])
        .assert()
        .success()
        .stdout("v1\n");
}

#[test]
fn test_params_before_deploying() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["params", "web"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("web-prod\n"))
        .stdout(predicate::str::contains("YYY_RESOLVED_BY_MISSING_STACK_YYY"));
}

#[test]
fn test_redeploy_updates_and_resumes_actions() {
    let dir = setup_project();
    deploy_web(dir.path(), "v1");
    deploy_web(dir.path(), "v2");

    let state = local_state(dir.path());
    assert_eq!(state["stacks"]["web-prod"]["status"], "UPDATE_COMPLETE");
    // db was unchanged so it was never updated
    assert_eq!(state["stacks"]["db-prod"]["status"], "CREATE_COMPLETE");
    assert!(!group_suspended(dir.path()));
}

#[test]
fn test_dry_run_changes_nothing() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["deploy", "web", "--dry-run"])
        .assert()
        .success()
        .stderr(predicate::str::contains("DRYRUN: Would create stack"));

    assert!(!dir.path().join(".strata/stacks.json").exists());
}

#[test]
fn test_deploy_plan() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["deploy-plan", "release"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deployed plan release (2 stacks)"));
}

#[test]
fn test_unknown_plan_lists_the_choices() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["deploy-plan", "nightly"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No such plan 'nightly' (available: release)"));

    assert!(!dir.path().join(".strata/stacks.json").exists());
}

// =============================================================================
// Sanity Check Tests
// =============================================================================

#[test]
fn test_sanity_check_passes() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["sanity-check", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Sanity check passed for web (2 stacks)"));
}

#[test]
fn test_sanity_check_reports_missing_environment() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .args(["sanity-check", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Stack web is missing environment variables: VERSION",
        ));
}

#[test]
fn test_invalid_configuration_lists_problems() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("app.json"), DB_TEMPLATE).unwrap();
    fs::write(
        dir.path().join("strata.yml"),
        "stacks:\n  app:\n    build_first: [db]\n    build_after: [cache]\n",
    )
    .unwrap();

    strata_cmd(dir.path())
        .args(["show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"))
        .stderr(predicate::str::contains("unknown stack 'db'"))
        .stderr(predicate::str::contains("unknown stack 'cache'"));
}

#[test]
fn test_unknown_environment() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .args(["show", "--environment", "stage"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No such environment 'stage' (available: prod)"));
}

// =============================================================================
// Inspection Tests
// =============================================================================

#[test]
fn test_show_layers() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .args(["show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Layer 0\n  \tdb\tdb-prod\nLayer 1\n  \tweb\tweb-prod\n"));
}

#[test]
fn test_show_flat_json() {
    let dir = setup_project();

    let output = strata_cmd(dir.path())
        .args(["show", "web", "--flat", "--format", "json"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();

    assert_eq!(json, serde_json::json!(["db", "web"]));
}

#[test]
fn test_show_detects_cycles() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.json"), DB_TEMPLATE).unwrap();
    fs::write(dir.path().join("b.json"), DB_TEMPLATE).unwrap();
    fs::write(
        dir.path().join("strata.yml"),
        "stacks:\n  a:\n    build_first: [b]\n  b:\n    build_first: [a]\n",
    )
    .unwrap();

    strata_cmd(dir.path())
        .args(["show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("dependency cycle"));
}

#[test]
fn test_deploy_refuses_cycles() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.json"), DB_TEMPLATE).unwrap();
    fs::write(dir.path().join("b.json"), DB_TEMPLATE).unwrap();
    fs::write(
        dir.path().join("strata.yml"),
        "stacks:\n  a:\n    build_first: [b]\n  b:\n    build_first: [a]\n",
    )
    .unwrap();

    strata_cmd(dir.path())
        .args(["deploy", "a"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Found a dependency cycle: a -> b -> a"));

    assert!(!dir.path().join(".strata/stacks.json").exists());
}

#[test]
fn test_dependents() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .args(["dependents", "db"])
        .assert()
        .success()
        .stdout("web\n");
}

#[test]
fn test_tail_reports_status() {
    let dir = setup_project();
    deploy_web(dir.path(), "v1");

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["tail", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Stack web is CREATE_COMPLETE"));
}

#[test]
fn test_outputs_of_an_undeployed_stack_fail() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .args(["outputs", "db"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("db-prod does not exist"));
}

// =============================================================================
// Scheduled Action Tests
// =============================================================================

#[test]
fn test_suspend_and_resume_actions() {
    let dir = setup_project();
    deploy_web(dir.path(), "v1");

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["suspend-actions", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Suspended scheduled actions for web-prod-Group-"));
    assert!(group_suspended(dir.path()));

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["resume-actions", "web"])
        .assert()
        .success();
    assert!(!group_suspended(dir.path()));
}

#[test]
fn test_suspend_actions_needs_a_group() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .args(["suspend-actions", "db"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("needs an auto_scaling_group_name"));
}

// =============================================================================
// Artifact Tests
// =============================================================================

#[test]
fn test_publish_and_clean_artifacts() {
    let dir = setup_project();
    let objects = dir.path().join(".strata/objects/releases/web");

    for version in ["v1", "v2"] {
        strata_cmd(dir.path())
            .env("VERSION", version)
            .args(["publish-artifacts", "web"])
            .assert()
            .success()
            .stdout(predicate::str::contains(format!(
                "bundle\ts3://releases/web/web-{}.tar.gz",
                version
            )));
    }
    assert!(objects.join("web-v1.tar.gz").is_file());
    assert!(objects.join("web-v2.tar.gz").is_file());

    strata_cmd(dir.path())
        .env("VERSION", "v2")
        .args(["clean-old-artifacts", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleaned 1 old artifacts for web"));

    assert!(!objects.join("web-v1.tar.gz").exists());
    assert!(objects.join("web-v2.tar.gz").is_file());
}

#[test]
fn test_publish_dry_run_uploads_nothing() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["publish-artifacts", "web", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not uploaded"));

    assert!(!dir.path().join(".strata/objects").exists());
}

#[test]
fn test_artifact_location() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .env("VERSION", "v3")
        .args(["artifact-location", "web"])
        .assert()
        .success()
        .stdout("bundle\ts3://releases/web/web-v3.tar.gz\n");

    strata_cmd(dir.path())
        .env("VERSION", "v3")
        .args(["artifact-location", "web", "--artifact", "docs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Stack web has no artifact 'docs'"));
}

// =============================================================================
// Confirmation Tests
// =============================================================================

#[test]
fn test_confirm_deployment_reads_instance_reports() {
    let dir = setup_project();
    deploy_web(dir.path(), "v1");

    let config = format!("{}{}", CONFIG.trim_end(), CONFIRMATION);
    fs::write(dir.path().join("strata.yml"), config).unwrap();

    let cloud = LocalCloud::new(dir.path().join(".strata"), Rc::new(SystemClock));
    let group = cloud.physical_resource_id("web-prod", "Group").unwrap();
    let instances = cloud.instances_in_group(&group, IN_SERVICE).unwrap();
    assert_eq!(instances.len(), 1);
    cloud
        .send("web-deploys", &format!("success:{}:v1", instances[0]))
        .unwrap();

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["confirm-deployment", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Confirmed deployment of web"));
}

#[test]
fn test_confirmation_failures_name_the_instances() {
    let dir = setup_project();
    deploy_web(dir.path(), "v1");

    let config = format!("{}{}", CONFIG.trim_end(), CONFIRMATION);
    fs::write(dir.path().join("strata.yml"), config).unwrap();

    let cloud = LocalCloud::new(dir.path().join(".strata"), Rc::new(SystemClock));
    let group = cloud.physical_resource_id("web-prod", "Group").unwrap();
    let instance = cloud.instances_in_group(&group, IN_SERVICE).unwrap().remove(0);
    cloud
        .send("web-deploys", &format!("failure:{}:v0", instance))
        .unwrap();

    strata_cmd(dir.path())
        .env("VERSION", "v1")
        .args(["confirm-deployment", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(format!(
            "Deployment failed on instances: {}",
            instance
        )));
}

#[test]
fn artifact_commands_need_a_stack_with_artifacts() {
    let dir = setup_project();

    strata_cmd(dir.path())
        .args(["publish-artifacts", "db"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Stack db has no artifacts"));

    strata_cmd(dir.path())
        .args(["deploy", "cache"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No such stack 'cache' (available: db, web)"));
}
