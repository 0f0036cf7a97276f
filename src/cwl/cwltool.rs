// External CWL toolchain invocation
//
// This module provides a client for running the external validator/packer
// (cwltool) as a blocking subprocess, parsing its exit status, and exposing
// the two operations the packaging engine needs behind a trait so tests can
// inject fakes.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::RepoConfig;

/// Acceptance gate and packer used by the packaging engine
pub trait CwlToolchain {
    /// Validate a staged workflow document; non-zero exit is an error
    fn validate(&self, workflow_path: &Path, working_dir: Option<&Path>) -> Result<()>;

    /// Pack a workflow into a flattened single-document JSON string
    fn pack(&self, workflow_path: &Path) -> Result<String>;
}

/// Result of one toolchain subprocess invocation
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code from the command
    pub exit_code: i32,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Execution duration
    pub duration: Duration,
    /// Whether the command exited zero
    pub success: bool,
}

impl CommandResult {
    fn new(exit_code: i32, stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            duration,
            success: exit_code == 0,
        }
    }

    /// Get a human-readable error message if the command failed
    pub fn error_message(&self) -> Option<String> {
        if self.success {
            return None;
        }

        let mut message = format!("cwltool exited with code {}", self.exit_code);
        if !self.stderr.is_empty() {
            message.push_str(&format!("\nError output: {}", self.stderr));
        }
        Some(message)
    }
}

/// Client for the external cwltool binary
pub struct CwltoolClient {
    /// Path to the cwltool binary
    binary_path: String,
    /// Timeout for each invocation
    timeout: Duration,
}

impl CwltoolClient {
    /// Create a client from the repository configuration
    pub fn new(config: &RepoConfig) -> Self {
        Self {
            binary_path: config.cwltool_path.clone(),
            timeout: config.subprocess_timeout,
        }
    }

    /// Execute cwltool with the given arguments
    fn execute(&self, args: &[&str], working_dir: Option<&Path>) -> Result<CommandResult> {
        info!("Executing: {} {}", self.binary_path, args.join(" "));

        let start_time = Instant::now();
        let mut command = Command::new(&self.binary_path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to execute {}", self.binary_path))?;

        // Collect output on a worker thread so the wait can be bounded
        let (sender, receiver) = mpsc::channel();
        let stdout = child.stdout.take().context("Child stdout not captured")?;
        let stderr = child.stderr.take().context("Child stderr not captured")?;
        std::thread::spawn(move || {
            use std::io::Read;
            let mut stdout_buf = String::new();
            let mut stderr_buf = String::new();
            let mut stdout = stdout;
            let mut stderr = stderr;
            let _ = stdout.read_to_string(&mut stdout_buf);
            let _ = stderr.read_to_string(&mut stderr_buf);
            let _ = sender.send((stdout_buf, stderr_buf));
        });

        let (stdout_buf, stderr_buf) = match receiver.recv_timeout(self.timeout) {
            Ok(output) => output,
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                anyhow::bail!(
                    "{} timed out after {:?}",
                    self.binary_path,
                    self.timeout
                );
            },
        };

        let status = child
            .wait()
            .with_context(|| format!("Failed to wait on {}", self.binary_path))?;

        let result = CommandResult::new(
            status.code().unwrap_or(-1),
            stdout_buf,
            stderr_buf,
            start_time.elapsed(),
        );

        if result.success {
            debug!("cwltool completed successfully in {:?}", result.duration);
        } else {
            warn!(
                "cwltool failed: {}",
                result.error_message().unwrap_or_default()
            );
        }

        Ok(result)
    }
}

impl CwlToolchain for CwltoolClient {
    fn validate(&self, workflow_path: &Path, working_dir: Option<&Path>) -> Result<()> {
        let path = workflow_path.to_string_lossy().to_string();
        let result = self.execute(&["--no-doc-cache", "--validate", &path], working_dir)?;

        if !result.success {
            anyhow::bail!(
                "Validation of {} failed: {}",
                workflow_path.display(),
                result.error_message().unwrap_or_default()
            );
        }
        Ok(())
    }

    fn pack(&self, workflow_path: &Path) -> Result<String> {
        let path = workflow_path.to_string_lossy().to_string();
        let result = self.execute(&["--no-doc-cache", "--pack", &path], None)?;

        if !result.success {
            anyhow::bail!(
                "Packing of {} failed: {}",
                workflow_path.display(),
                result.error_message().unwrap_or_default()
            );
        }
        Ok(result.stdout)
    }
}
