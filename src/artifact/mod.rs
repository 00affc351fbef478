//! # Artifact lifecycle
//!
//! Packages a stack's artifacts, uploads them and prunes old versions.
//!
//! ## Packaging order
//!
//! | Step | Source | Notes |
//! |------|--------|-------|
//! | 1 | `commands` | each runs in its own temporary build directory |
//! | 2 | `paths` | host files and directories |
//! | 3 | `files` | rendered content |
//!
//! Archives are temporary files removed when dropped, whether the upload
//! happened or not.

mod archive;
mod command;
mod staging;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::{NamedTempFile, TempDir};
use tracing::info;

use crate::domain::artifact::stale_versions;
use crate::domain::{env, Artifact, ArtifactCommand, EnvSource, Environment, Stack, StorageLocation};
use crate::error::{DeployError, Result};
use crate::remote::ObjectStore;

pub use archive::ArchiveWriter;

/// What happened to one artifact during publish
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Published {
    pub key: String,
    pub destination: String,
    pub digest: String,
    pub size: u64,
    pub uploaded: bool,
}

pub struct ArtifactManager<'a> {
    objects: &'a dyn ObjectStore,
    env: &'a dyn EnvSource,
    dry_run: bool,
}

impl<'a> ArtifactManager<'a> {
    pub fn new(objects: &'a dyn ObjectStore, env: &'a dyn EnvSource, dry_run: bool) -> Self {
        Self {
            objects,
            env,
            dry_run,
        }
    }

    /// Fails with every unset variable the stack's artifacts need
    fn check_environment(&self, stack: &Stack) -> Result<()> {
        let artifact_env = stack.artifacts.iter().flat_map(|a| a.build_env.iter());
        let specs = stack
            .env
            .iter()
            .chain(&stack.stack_name_env)
            .chain(&stack.build_env)
            .chain(artifact_env);

        let missing = env::missing(specs, self.env);
        if !missing.is_empty() {
            return Err(DeployError::MissingEnvironment {
                stack: stack.key_name.clone(),
                missing,
            });
        }
        Ok(())
    }

    /// Builds and uploads every artifact the stack creates
    pub fn publish(&self, stack: &Stack) -> Result<Vec<Published>> {
        self.check_environment(stack)?;

        let mut published = Vec::new();
        for artifact in &stack.artifacts {
            if artifact.not_created_here {
                info!(stack = %stack.key_name, artifact = %artifact.key, "Artifact is not created here, skipping");
                continue;
            }

            let environment = stack.build_environment(artifact, self.env);
            let destination = artifact.destination(&environment)?;
            let archive = self.package(artifact, &environment)?;
            let (digest, size) = digest(archive.path())?;

            if self.dry_run {
                info!(
                    artifact = %artifact.key,
                    %destination,
                    digest = %digest,
                    size,
                    "DRYRUN: Would upload artifact"
                );
            } else {
                info!(artifact = %artifact.key, %destination, digest = %digest, size, "Uploading artifact");
                self.objects.upload(archive.path(), &destination)?;
            }

            published.push(Published {
                key: artifact.key.clone(),
                destination: destination.to_string(),
                digest,
                size,
                uploaded: !self.dry_run,
            });
        }
        Ok(published)
    }

    /// Builds the archive for one artifact into a temporary file
    pub fn package(&self, artifact: &Artifact, environment: &Environment) -> Result<NamedTempFile> {
        let archive = tempfile::Builder::new()
            .prefix("strata-artifact-")
            .suffix(&format!(".{}", artifact.compression.extension()))
            .tempfile()
            .map_err(|e| DeployError::io("Failed to create archive file", e))?;
        let file = archive
            .reopen()
            .map_err(|e| DeployError::io("Failed to open archive file", e))?;

        let mut writer = ArchiveWriter::new(file, artifact.compression);
        for command in &artifact.commands {
            run_build_step(command, environment, &mut writer)?;
        }
        for path in &artifact.paths {
            let host = render_path(&path.host_path, environment)?;
            writer.add_tree(&host, &environment.render(&path.artifact_path)?)?;
        }
        for file in &artifact.files {
            let content = environment.render(&file.content)?;
            writer.add_bytes(&environment.render(&file.path)?, content.as_bytes())?;
        }

        info!(artifact = %artifact.key, entries = writer.entries(), "Packaged artifact");
        writer.finish()?;
        Ok(archive)
    }

    /// Deletes all but the newest `history_length` versions of each artifact
    pub fn clean(&self, stack: &Stack) -> Result<Vec<StorageLocation>> {
        self.check_environment(stack)?;

        let mut deleted = Vec::new();
        for artifact in &stack.artifacts {
            let environment = stack.build_environment(artifact, self.env);
            let prefix = artifact.prune_prefix(&environment)?;
            let existing = self.objects.list(&prefix)?;

            for stale in stale_versions(existing, artifact.history_length) {
                if self.dry_run {
                    info!(location = %stale.location, "DRYRUN: Would delete old artifact");
                } else {
                    info!(location = %stale.location, "Deleting old artifact");
                    self.objects.delete(&stale.location)?;
                }
                deleted.push(stale.location);
            }
        }
        Ok(deleted)
    }

    /// Upload destinations, optionally narrowed to one artifact
    pub fn locations(&self, stack: &Stack, key: Option<&str>) -> Result<Vec<(String, StorageLocation)>> {
        self.check_environment(stack)?;

        let mut locations = Vec::new();
        for artifact in &stack.artifacts {
            if key.is_some_and(|wanted| wanted != artifact.key) {
                continue;
            }
            let environment = stack.build_environment(artifact, self.env);
            locations.push((artifact.key.clone(), artifact.destination(&environment)?));
        }

        if let Some(wanted) = key {
            if locations.is_empty() {
                return Err(DeployError::NoSuchArtifact {
                    stack: stack.key_name.clone(),
                    artifact: wanted.to_string(),
                });
            }
        }
        Ok(locations)
    }
}

fn render_path(path: &Path, environment: &Environment) -> Result<PathBuf> {
    Ok(PathBuf::from(environment.render(&path.to_string_lossy())?))
}

/// One `commands` entry: stage inputs, run the commands, collect outputs
fn run_build_step(
    step: &ArtifactCommand,
    environment: &Environment,
    writer: &mut ArchiveWriter,
) -> Result<()> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("strata-build-");
    let workdir: TempDir = match &step.temp_dir {
        Some(base) => builder.tempdir_in(environment.render(base)?),
        None => builder.tempdir(),
    }
    .map_err(|e| DeployError::io("Failed to create build directory", e))?;

    for copy in &step.copy {
        let host = render_path(&copy.host_path, environment)?;
        staging::copy_into(&host, workdir.path(), &environment.render(&copy.artifact_path)?)?;
    }

    for modification in &step.modify {
        let lines = modification
            .append
            .iter()
            .map(|line| environment.render(line))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        staging::append_lines(workdir.path(), &environment.render(&modification.path)?, &lines)?;
    }

    for line in &step.command {
        command::run(&environment.render(line)?, workdir.path(), step.timeout)?;
    }

    for add in &step.add_into_tar {
        let inside = environment.render(&add.host_path.to_string_lossy())?;
        let host = staging::staged_path(workdir.path(), &inside);
        writer.add_tree(&host, &environment.render(&add.artifact_path)?)?;
    }
    Ok(())
}

/// blake3 digest and size of a file
fn digest(path: &Path) -> Result<(String, u64)> {
    let mut file =
        File::open(path).map_err(|e| DeployError::io(format!("Failed to open {}", path.display()), e))?;
    let mut hasher = blake3::Hasher::new();
    let size = io::copy(&mut file, &mut hasher)
        .map_err(|e| DeployError::io(format!("Failed to read {}", path.display()), e))?;
    Ok((hasher.finalize().to_hex().to_string(), size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::Modification;
    use crate::domain::{ArtifactFile, ArtifactPath, Compression, EnvSpec};
    use crate::remote::clock::ManualClock;
    use crate::remote::memory::MemoryCloud;
    use crate::remote::Clock;
    use flate2::read::GzDecoder;
    use std::collections::BTreeMap;
    use std::io::Read;
    use std::rc::Rc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn names_in(bytes: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(GzDecoder::new(bytes));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    fn stack_with(artifact: Artifact) -> Stack {
        let mut stack = Stack::new("app", serde_json::json!({"Resources": {}}));
        stack.artifacts.push(artifact);
        stack
    }

    #[test]
    fn missing_build_env_is_reported_in_full() {
        let clock = Rc::new(ManualClock::default());
        let cloud = MemoryCloud::new(clock);
        let source = env(&[("A", "1")]);
        let manager = ArtifactManager::new(&cloud, &source, false);

        let mut artifact = Artifact::new("app", "s3://bucket/app-{B}.tar.gz");
        artifact.build_env = vec![EnvSpec::required("A"), EnvSpec::required("B")];
        let mut stack = stack_with(artifact);
        stack.build_env = vec![EnvSpec::required("C")];

        match manager.publish(&stack).unwrap_err() {
            DeployError::MissingEnvironment { missing, .. } => assert_eq!(missing, vec!["C", "B"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn publish_packages_and_uploads() {
        let host = TempDir::new().unwrap();
        std::fs::write(host.path().join("app.py"), "print('hi')").unwrap();

        let clock = Rc::new(ManualClock::default());
        let cloud = MemoryCloud::new(clock);
        let source = env(&[("VERSION", "7")]);
        let manager = ArtifactManager::new(&cloud, &source, false);

        let mut artifact = Artifact::new("app", "s3://releases/app/app-{VERSION}.tar.gz");
        artifact.compression = Compression::Gzip;
        artifact.build_env = vec![EnvSpec::required("VERSION")];
        artifact.paths = vec![ArtifactPath::new(host.path(), "/srv/app")];
        artifact.files = vec![ArtifactFile {
            content: "{VERSION}".into(),
            path: "/srv/app/VERSION".into(),
        }];
        artifact.commands = vec![ArtifactCommand {
            copy: vec![ArtifactPath::new(host.path().join("app.py"), "app.py")],
            modify: vec![Modification {
                path: "app.py".into(),
                append: vec!["# {VERSION}".into()],
            }],
            command: vec!["cp app.py built.py".into()],
            add_into_tar: vec![ArtifactPath::new("built.py", "/srv/built.py")],
            ..ArtifactCommand::default()
        }];

        let published = manager.publish(&stack_with(artifact)).unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].destination, "s3://releases/app/app-7.tar.gz");
        assert!(published[0].uploaded);
        assert_eq!(published[0].digest.len(), 64);

        let bytes = cloud
            .object(&StorageLocation::new("releases", "app/app-7.tar.gz"))
            .unwrap();
        assert_eq!(
            names_in(&bytes),
            vec!["srv/app/VERSION", "srv/app/app.py", "srv/built.py"]
        );

        let mut archive = tar::Archive::new(GzDecoder::new(&bytes[..]));
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            if entry.path().unwrap().ends_with("built.py") {
                let mut content = String::new();
                entry.read_to_string(&mut content).unwrap();
                assert_eq!(content, "print('hi')# 7\n");
            }
        }
    }

    #[test]
    fn dry_run_uploads_nothing() {
        let clock = Rc::new(ManualClock::default());
        let cloud = MemoryCloud::new(clock);
        let source = env(&[]);
        let manager = ArtifactManager::new(&cloud, &source, true);

        let mut artifact = Artifact::new("app", "s3://releases/app.tar");
        artifact.files = vec![ArtifactFile {
            content: "x".into(),
            path: "x".into(),
        }];

        let published = manager.publish(&stack_with(artifact)).unwrap();
        assert!(!published[0].uploaded);
        assert_eq!(cloud.count("upload"), 0);
    }

    #[test]
    fn not_created_here_is_skipped() {
        let clock = Rc::new(ManualClock::default());
        let cloud = MemoryCloud::new(clock);
        let source = env(&[]);
        let manager = ArtifactManager::new(&cloud, &source, false);

        let mut artifact = Artifact::new("app", "s3://releases/app.tar");
        artifact.not_created_here = true;
        assert!(manager.publish(&stack_with(artifact)).unwrap().is_empty());
    }

    #[test]
    fn failing_command_stops_packaging() {
        let clock = Rc::new(ManualClock::default());
        let cloud = MemoryCloud::new(clock);
        let source = env(&[]);
        let manager = ArtifactManager::new(&cloud, &source, false);

        let mut artifact = Artifact::new("app", "s3://releases/app.tar");
        artifact.commands = vec![ArtifactCommand {
            command: vec!["echo nope; exit 1".into()],
            ..ArtifactCommand::default()
        }];

        let err = manager.publish(&stack_with(artifact)).unwrap_err();
        assert!(matches!(err, DeployError::CommandFailed { ref output, .. } if output.contains("nope")));
        assert_eq!(cloud.count("upload"), 0);
    }

    #[test]
    fn clean_keeps_the_newest_versions() {
        let clock = Rc::new(ManualClock::default());
        let cloud = MemoryCloud::new(clock.clone());
        let source = env(&[]);

        for n in 1..=4 {
            cloud.put_object(
                &StorageLocation::new("releases", format!("app/app-{n}.tar.gz")),
                clock.now(),
            );
            clock.advance(Duration::from_secs(60));
        }

        let mut artifact = Artifact::new("app", "s3://releases/app/app-4.tar.gz");
        artifact.history_length = 2;
        let mut stack = stack_with(artifact);

        let manager = ArtifactManager::new(&cloud, &source, false);
        let deleted = manager.clean(&stack).unwrap();
        let keys: Vec<_> = deleted.iter().map(|l| l.key.as_str()).collect();
        assert_eq!(keys, vec!["app/app-1.tar.gz", "app/app-2.tar.gz"]);
        assert_eq!(cloud.object_keys("releases"), vec!["app/app-3.tar.gz", "app/app-4.tar.gz"]);

        assert!(manager.clean(&stack).unwrap().is_empty());

        stack.artifacts[0].history_length = 1;
        manager.clean(&stack).unwrap();
        assert_eq!(cloud.object_keys("releases"), vec!["app/app-4.tar.gz"]);
    }

    #[test]
    fn clean_dry_run_deletes_nothing() {
        let clock = Rc::new(ManualClock::default());
        let cloud = MemoryCloud::new(clock.clone());
        let source = env(&[]);
        cloud.put_object(&StorageLocation::new("releases", "app/1.tar"), clock.now());
        cloud.put_object(&StorageLocation::new("releases", "app/2.tar"), clock.now());

        let mut artifact = Artifact::new("app", "s3://releases/app/2.tar");
        artifact.history_length = 1;

        let manager = ArtifactManager::new(&cloud, &source, true);
        assert_eq!(manager.clean(&stack_with(artifact)).unwrap().len(), 1);
        assert_eq!(cloud.object_keys("releases").len(), 2);
    }

    #[test]
    fn locations_filter_by_key() {
        let clock = Rc::new(ManualClock::default());
        let cloud = MemoryCloud::new(clock);
        let source = env(&[("V", "3")]);
        let manager = ArtifactManager::new(&cloud, &source, false);

        let mut artifact = Artifact::new("web", "s3://releases/web-{V}.tar");
        artifact.build_env = vec![EnvSpec::required("V")];
        let stack = stack_with(artifact);

        let found = manager.locations(&stack, Some("web")).unwrap();
        assert_eq!(found[0].1.to_string(), "s3://releases/web-3.tar");
        assert!(manager.locations(&stack, Some("api")).is_err());
    }
}
