//! Tar archive writer with optional gzip compression

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use walkdir::WalkDir;

use crate::domain::Compression;
use crate::error::{DeployError, Result};

enum Sink {
    Plain(File),
    Gzip(GzEncoder<File>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(file) => file.write(buf),
            Sink::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(file) => file.flush(),
            Sink::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Name of an entry inside the archive
fn entry_name(artifact_path: &str, relative: &Path) -> PathBuf {
    let base = Path::new(artifact_path.trim_start_matches('/'));
    if relative.as_os_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

pub struct ArchiveWriter {
    builder: tar::Builder<Sink>,
    entries: usize,
}

impl ArchiveWriter {
    pub fn new(file: File, compression: Compression) -> Self {
        let sink = match compression {
            Compression::None => Sink::Plain(file),
            Compression::Gzip => Sink::Gzip(GzEncoder::new(file, flate2::Compression::default())),
        };
        let mut builder = tar::Builder::new(sink);
        builder.follow_symlinks(true);
        Self {
            builder,
            entries: 0,
        }
    }

    /// Adds a file, or every file below a directory, under `artifact_path`
    pub fn add_tree(&mut self, host_path: &Path, artifact_path: &str) -> Result<()> {
        if !host_path.exists() {
            return Err(DeployError::MissingSource {
                host_path: host_path.to_path_buf(),
                destination: artifact_path.to_string(),
            });
        }

        for entry in WalkDir::new(host_path).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                DeployError::io(
                    format!("Failed to walk {}", host_path.display()),
                    io::Error::other(e),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(host_path)
                .map_err(|e| DeployError::io("Failed to walk", io::Error::other(e)))?;
            let name = entry_name(artifact_path, relative);
            self.builder
                .append_path_with_name(entry.path(), &name)
                .map_err(|e| DeployError::io(format!("Failed to add {}", entry.path().display()), e))?;
            self.entries += 1;
        }
        Ok(())
    }

    /// Adds in-memory content as a regular file
    pub fn add_bytes(&mut self, path: &str, content: &[u8]) -> Result<()> {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
        header.set_cksum();

        let name = entry_name(path, Path::new(""));
        self.builder
            .append_data(&mut header, &name, content)
            .map_err(|e| DeployError::io(format!("Failed to add {}", path), e))?;
        self.entries += 1;
        Ok(())
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Writes the trailer and flushes compression
    pub fn finish(self) -> Result<()> {
        let sink = self
            .builder
            .into_inner()
            .map_err(|e| DeployError::io("Failed to finish archive", e))?;
        let mut file = match sink {
            Sink::Plain(file) => file,
            Sink::Gzip(encoder) => encoder
                .finish()
                .map_err(|e| DeployError::io("Failed to finish compression", e))?,
        };
        file.flush()
            .map_err(|e| DeployError::io("Failed to flush archive", e))
    }
}
