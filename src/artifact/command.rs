//! Build commands run while staging an artifact

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::error::{DeployError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long a killed command's output may keep draining
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Runs `command` through `sh` in `cwd`, returning its combined output
///
/// Stderr is folded into stdout. A command still running after `timeout`
/// is killed and reported as failed with whatever it printed so far.
pub fn run(command: &str, cwd: &Path, timeout: Duration) -> Result<String> {
    info!(command, cwd = %cwd.display(), "Running command");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(format!("exec 2>&1\n{}", command))
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| DeployError::io(format!("Failed to spawn `{}`", command), e))?;

    let mut stdout = child.stdout.take().ok_or_else(|| {
        DeployError::io(
            format!("Failed to capture output of `{}`", command),
            std::io::Error::other("no stdout"),
        )
    })?;
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    let reader = thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match stdout.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    });
    let output = move || {
        captured
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    };

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                error!(command, timeout = timeout.as_secs(), "Command took longer than its timeout, killing it");
                let _ = child.kill();
                let _ = child.wait();
                // Processes the command started may still hold the pipe open
                let killed = Instant::now();
                while !reader.is_finished() && killed.elapsed() < DRAIN_GRACE {
                    thread::sleep(POLL_INTERVAL);
                }
                return Err(DeployError::CommandFailed {
                    command: command.to_string(),
                    status: format!("timed out after {}s", timeout.as_secs()),
                    output: output(),
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(DeployError::io(format!("Failed to wait for `{}`", command), e)),
        }
    };

    let _ = reader.join();
    let output = output();
    debug!(command, output = %output, "Command finished");

    if !status.success() {
        return Err(DeployError::CommandFailed {
            command: command.to_string(),
            status: status.to_string(),
            output,
        });
    }
    Ok(output)
}
