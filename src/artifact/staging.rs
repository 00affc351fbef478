//! Copying sources into a build directory and editing them in place

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{DeployError, Result};

/// Where `artifact_path` lands inside `root`
pub fn staged_path(root: &Path, artifact_path: &str) -> PathBuf {
    root.join(artifact_path.trim_start_matches('/'))
}

/// Copies a file or directory tree from the host into the build directory
pub fn copy_into(host_path: &Path, root: &Path, artifact_path: &str) -> Result<usize> {
    if !host_path.exists() {
        return Err(DeployError::MissingSource {
            host_path: host_path.to_path_buf(),
            destination: artifact_path.to_string(),
        });
    }

    let target = staged_path(root, artifact_path);
    let mut copied = 0;
    for entry in WalkDir::new(host_path).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            DeployError::io(format!("Failed to walk {}", host_path.display()), io::Error::other(e))
        })?;
        let relative = entry
            .path()
            .strip_prefix(host_path)
            .map_err(|e| DeployError::io("Failed to walk", io::Error::other(e)))?;
        let destination = if relative.as_os_str().is_empty() {
            target.clone()
        } else {
            target.join(relative)
        };

        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination).map_err(|e| {
                DeployError::io(format!("Failed to create {}", destination.display()), e)
            })?;
            continue;
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DeployError::io(format!("Failed to create {}", parent.display()), e))?;
        }
        fs::copy(entry.path(), &destination).map_err(|e| {
            DeployError::io(
                format!("Failed to copy {} to {}", entry.path().display(), destination.display()),
                e,
            )
        })?;
        copied += 1;
    }
    Ok(copied)
}

/// Appends lines to a file that must already be in the build directory
pub fn append_lines(root: &Path, path: &str, lines: &[String]) -> Result<()> {
    let target = staged_path(root, path);
    if !target.is_file() {
        return Err(DeployError::MissingModifyTarget { path: target });
    }

    let mut file = OpenOptions::new()
        .append(true)
        .open(&target)
        .map_err(|e| DeployError::io(format!("Failed to open {}", target.display()), e))?;
    for line in lines {
        writeln!(file, "{}", line)
            .map_err(|e| DeployError::io(format!("Failed to write {}", target.display()), e))?;
    }
    Ok(())
}
