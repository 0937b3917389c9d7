//! Runtime Command Execution
//!
//! Runs the container runtime binary as a subprocess and folds every outcome
//! (success, non-zero exit, missing binary, timeout) into a [`CommandOutput`].
//! Nothing here returns an error to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

use super::timeout::CallTimeout;
use crate::metrics;

/// Captured outcome of one runtime command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// The full command line, space-joined
    pub cmd: String,

    /// Trimmed standard output
    pub stdout: String,

    /// Trimmed standard error
    pub stderr: String,

    /// Process exit code (-1 when the process never exited normally)
    pub exit_code: i32,

    /// Failure description, `None` on success
    pub error: Option<String>,
}

impl CommandOutput {
    /// Build an output from a finished process
    pub fn from_exit(cmd: String, stdout: &str, stderr: &str, exit_code: i32) -> Self {
        let stdout = stdout.trim().to_string();
        let stderr = stderr.trim().to_string();
        let error = if exit_code == 0 {
            None
        } else if stderr.is_empty() {
            Some(format!("exit {}", exit_code))
        } else {
            Some(stderr.clone())
        };

        Self {
            cmd,
            stdout,
            stderr,
            exit_code,
            error,
        }
    }

    /// Build an output for a process that could not be run to completion
    pub fn failed(cmd: String, error: impl Into<String>) -> Self {
        Self {
            cmd,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            error: Some(error.into()),
        }
    }

    /// Whether the command succeeded
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Join a program and its arguments for display and logging
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Executes runtime commands
///
/// The production implementation is [`ProcessRunner`]; tests substitute a
/// scripted fake.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, bounded by `timeout`
    async fn run(&self, program: &str, args: &[String], timeout: CallTimeout) -> CommandOutput;
}

/// Subprocess-backed command runner
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String], timeout: CallTimeout) -> CommandOutput {
        let cmd = command_line(program, args);
        let subcommand = args.first().map(String::as_str).unwrap_or("");
        let start = Instant::now();
        debug!("Executing: {}", cmd);

        let child = TokioCommand::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Runtime binary not found: {}", program);
                return CommandOutput::failed(cmd, format!("{} not found: {}", program, e));
            }
            Err(e) => {
                warn!("Failed to spawn {}: {}", program, e);
                return CommandOutput::failed(cmd, format!("Unexpected error: {}", e));
            }
        };

        let output = match timeout.run(child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return CommandOutput::failed(cmd, format!("Unexpected error: {}", e)),
            Err(_) => {
                warn!("Command timed out after {:?}: {}", timeout.duration(), cmd);
                return CommandOutput::failed(cmd, "Timeout");
            }
        };

        metrics::RUNTIME_COMMAND_SECONDS
            .with_label_values(&[subcommand])
            .observe(start.elapsed().as_secs_f64());

        let result = CommandOutput::from_exit(
            cmd,
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            output.status.code().unwrap_or(-1),
        );
        if let Some(ref error) = result.error {
            debug!("Command failed: {} ({})", result.cmd, error);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_exit_success() {
        let out = CommandOutput::from_exit("docker pause a".into(), "a\n", "", 0);
        assert!(out.is_ok());
        assert_eq!(out.stdout, "a");
        assert_eq!(out.exit_code, 0);
    }

    #[test]
    fn test_from_exit_uses_stderr_as_error() {
        let out = CommandOutput::from_exit(
            "docker pause a".into(),
            "",
            "Error: No such container: a\n",
            1,
        );
        assert_eq!(out.error.as_deref(), Some("Error: No such container: a"));
    }

    #[test]
    fn test_from_exit_without_stderr() {
        let out = CommandOutput::from_exit("docker kill a".into(), "", "  ", 137);
        assert_eq!(out.error.as_deref(), Some("exit 137"));
    }

    #[test]
    fn test_command_line() {
        let args = vec!["ps".to_string(), "-a".to_string()];
        assert_eq!(command_line("docker", &args), "docker ps -a");
    }

    #[tokio::test]
    async fn test_missing_binary_is_captured() {
        let out = ProcessRunner
            .run(
                "definitely-not-a-runtime-binary",
                &["ps".to_string()],
                CallTimeout::from_secs(5),
            )
            .await;

        assert_eq!(out.exit_code, -1);
        assert!(out.error.unwrap().contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_captured() {
        let out = ProcessRunner
            .run(
                "sh",
                &["-c".to_string(), "echo boom >&2; exit 3".to_string()],
                CallTimeout::from_secs(5),
            )
            .await;

        assert_eq!(out.exit_code, 3);
        assert_eq!(out.error.as_deref(), Some("boom"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_captured() {
        let out = ProcessRunner
            .run(
                "sleep",
                &["5".to_string()],
                CallTimeout::new(std::time::Duration::from_millis(100)),
            )
            .await;

        assert_eq!(out.error.as_deref(), Some("Timeout"));
    }
}
