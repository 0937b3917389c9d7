//! Container runtime client
//!
//! Thin wrapper over the runtime CLI (`docker` by default). Each operation
//! builds an argument list, runs it through a [`CommandRunner`], and parses
//! the textual output into a structured result.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::command::{CommandOutput, CommandRunner, ProcessRunner};
use super::stats::{parse_stats_line, ResourceSample, STATS_FORMAT};
use super::timeout::CallTimeout;

/// Runtime binary used when nothing else is configured
pub const DEFAULT_RUNTIME_BINARY: &str = "docker";

/// Fixed CFS scheduler period in microseconds
pub const CPU_PERIOD_US: u64 = 100_000;

/// One line of `ps --format {{json .}}` output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
    #[serde(rename = "Names", default)]
    pub name: String,

    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "Image", default)]
    pub image: String,

    #[serde(rename = "State", default)]
    pub state: String,

    #[serde(rename = "Status", default)]
    pub status: String,
}

/// Result of listing containers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerList {
    pub containers: Vec<ContainerSummary>,
    pub error: Option<String>,
}

impl ContainerList {
    /// Non-empty container names in listing order
    pub fn names(&self) -> Vec<String> {
        self.containers
            .iter()
            .filter(|c| !c.name.is_empty())
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.containers.iter().any(|c| c.name == name)
    }

    /// Parse JSON-per-line output, skipping lines that are not valid JSON
    pub fn from_json_lines(stdout: &str) -> Self {
        let containers = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Self {
            containers,
            error: None,
        }
    }
}

/// Requested cgroup limits for `update`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdate {
    /// CPU share as a percentage of one core's period
    pub cpu_percent: Option<u32>,

    /// Hard memory limit in megabytes
    pub mem_limit_mb: Option<u64>,
}

impl ResourceUpdate {
    pub fn cpu(percent: u32) -> Self {
        Self {
            cpu_percent: Some(percent),
            mem_limit_mb: None,
        }
    }

    pub fn memory(mb: u64) -> Self {
        Self {
            cpu_percent: None,
            mem_limit_mb: Some(mb),
        }
    }
}

/// CFS quota for a CPU percentage of [`CPU_PERIOD_US`], never below 1
pub fn cpu_quota(percent: u32) -> u64 {
    (CPU_PERIOD_US * u64::from(percent) / 100).max(1)
}

/// Arguments for `update`; only flags for requested limits are emitted
pub fn update_args(name: &str, update: &ResourceUpdate) -> Vec<String> {
    let mut args = vec!["update".to_string()];
    if let Some(percent) = update.cpu_percent {
        args.extend([
            "--cpu-period".to_string(),
            CPU_PERIOD_US.to_string(),
            "--cpu-quota".to_string(),
            cpu_quota(percent).to_string(),
        ]);
    }
    if let Some(mb) = update.mem_limit_mb {
        args.extend(["--memory".to_string(), format!("{}m", mb)]);
    }
    args.push(name.to_string());
    args
}

/// Arguments for `exec`
pub fn exec_args(name: &str, command: &[String], detach: bool) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    if detach {
        args.push("-d".to_string());
    }
    args.push(name.to_string());
    args.extend(command.iter().cloned());
    args
}

/// Client for the container runtime control surface
#[derive(Clone)]
pub struct RuntimeClient {
    binary: String,
    runner: Arc<dyn CommandRunner>,
    timeout: CallTimeout,
}

impl std::fmt::Debug for RuntimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeClient")
            .field("binary", &self.binary)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for RuntimeClient {
    fn default() -> Self {
        Self::new(DEFAULT_RUNTIME_BINARY)
    }
}

impl RuntimeClient {
    /// Create a client that shells out to `binary`
    pub fn new(binary: impl Into<String>) -> Self {
        Self::with_runner(binary, Arc::new(ProcessRunner))
    }

    /// Create a client with a custom command runner
    pub fn with_runner(binary: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            runner,
            timeout: CallTimeout::control(),
        }
    }

    /// Override the timeout for control calls
    pub fn with_timeout(mut self, timeout: CallTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn run(&self, args: Vec<String>) -> CommandOutput {
        self.run_with_timeout(args, self.timeout).await
    }

    async fn run_with_timeout(&self, args: Vec<String>, timeout: CallTimeout) -> CommandOutput {
        self.runner.run(&self.binary, &args, timeout).await
    }

    /// List containers; stopped ones are included when `include_stopped` is set
    pub async fn list_containers(&self, include_stopped: bool) -> ContainerList {
        let mut args = vec!["ps".to_string()];
        if include_stopped {
            args.push("-a".to_string());
        }
        args.extend(["--format".to_string(), "{{json .}}".to_string()]);

        let out = self.run(args).await;
        if let Some(error) = out.error {
            debug!("Container listing failed: {}", error);
            return ContainerList {
                containers: Vec::new(),
                error: Some(error),
            };
        }
        ContainerList::from_json_lines(&out.stdout)
    }

    pub async fn pause(&self, name: &str) -> CommandOutput {
        self.run(vec!["pause".to_string(), name.to_string()]).await
    }

    pub async fn unpause(&self, name: &str) -> CommandOutput {
        self.run(vec!["unpause".to_string(), name.to_string()]).await
    }

    pub async fn restart(&self, name: &str) -> CommandOutput {
        self.run(vec!["restart".to_string(), name.to_string()]).await
    }

    pub async fn kill(&self, name: &str) -> CommandOutput {
        self.run(vec!["kill".to_string(), name.to_string()]).await
    }

    pub async fn start(&self, name: &str) -> CommandOutput {
        self.run(vec!["start".to_string(), name.to_string()]).await
    }

    /// Apply new cgroup limits to a running container
    pub async fn update_resources(&self, name: &str, update: &ResourceUpdate) -> CommandOutput {
        self.run(update_args(name, update)).await
    }

    /// Run a command inside the container
    pub async fn exec(
        &self,
        name: &str,
        command: &[String],
        detach: bool,
        timeout: Duration,
    ) -> CommandOutput {
        self.run_with_timeout(exec_args(name, command, detach), CallTimeout::new(timeout))
            .await
    }

    /// Take a single resource usage snapshot
    pub async fn stats_once(&self, name: &str) -> ResourceSample {
        let args = vec![
            "stats".to_string(),
            name.to_string(),
            "--no-stream".to_string(),
            "--format".to_string(),
            STATS_FORMAT.to_string(),
        ];
        let out = self.run(args).await;
        if let Some(error) = out.error {
            return ResourceSample::unavailable(error);
        }
        parse_stats_line(&out.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRunner;

    #[test]
    fn test_cpu_update_args() {
        let args = update_args("cart", &ResourceUpdate::cpu(40));
        assert_eq!(
            args,
            vec!["update", "--cpu-period", "100000", "--cpu-quota", "40000", "cart"]
        );
    }

    #[test]
    fn test_memory_update_args() {
        let args = update_args("cart", &ResourceUpdate::memory(256));
        assert_eq!(args, vec!["update", "--memory", "256m", "cart"]);
    }

    #[test]
    fn test_update_args_without_limits() {
        let args = update_args("cart", &ResourceUpdate::default());
        assert_eq!(args, vec!["update", "cart"]);
    }

    #[test]
    fn test_cpu_quota_floor() {
        assert_eq!(cpu_quota(0), 1);
        assert_eq!(cpu_quota(20), 20_000);
        assert_eq!(cpu_quota(60), 60_000);
    }

    #[test]
    fn test_exec_args() {
        let cmd = vec!["sh".to_string(), "-c".to_string(), "true".to_string()];
        assert_eq!(
            exec_args("cart", &cmd, true),
            vec!["exec", "-d", "cart", "sh", "-c", "true"]
        );
        assert_eq!(exec_args("cart", &cmd, false), vec!["exec", "cart", "sh", "-c", "true"]);
    }

    #[test]
    fn test_container_list_skips_bad_lines() {
        let stdout = "{\"Names\":\"a\",\"State\":\"running\"}\nnot json\n\n{\"Names\":\"b\"}";
        let list = ContainerList::from_json_lines(stdout);
        assert_eq!(list.names(), vec!["a", "b"]);
        assert_eq!(list.containers[0].state, "running");
    }

    #[tokio::test]
    async fn test_list_containers_running_and_all() {
        let fake = FakeRunner::new()
            .with_running(&["testapp_cart"])
            .with_stopped(&["testapp_payment"]);
        let client = fake.client();

        let running = client.list_containers(false).await;
        assert_eq!(running.names(), vec!["testapp_cart"]);

        let all = client.list_containers(true).await;
        assert!(all.contains("testapp_payment"));
        assert_eq!(all.containers.len(), 2);
    }

    #[tokio::test]
    async fn test_list_containers_error_is_captured() {
        let fake = FakeRunner::new().fail_subcommand("ps", "Cannot connect to the Docker daemon");
        let list = fake.client().list_containers(false).await;
        assert!(list.containers.is_empty());
        assert_eq!(list.error.as_deref(), Some("Cannot connect to the Docker daemon"));
    }

    #[tokio::test]
    async fn test_stats_once_parses_output() {
        let fake = FakeRunner::new()
            .with_running(&["testapp_cart"])
            .with_stats("5.00%|64MiB / 512MiB|12.50%|1kB / 2kB|0B / 0B");
        let sample = fake.client().stats_once("testapp_cart").await;
        assert_eq!(sample.cpu_pct(), Some(5.0));
        assert_eq!(sample.mem_used_bytes(), Some(64.0 * 1024.0 * 1024.0));

        let calls = fake.calls();
        assert_eq!(calls[0][0], "stats");
        assert_eq!(calls[0][2], "--no-stream");
    }

    #[tokio::test]
    async fn test_stats_once_error() {
        let fake = FakeRunner::new().fail_subcommand("stats", "No such container");
        let sample = fake.client().stats_once("ghost").await;
        assert_eq!(sample, ResourceSample::unavailable("No such container"));
    }

    #[tokio::test]
    async fn test_update_resources_sends_flags() {
        let fake = FakeRunner::new().with_running(&["testapp_cart"]);
        let out = fake
            .client()
            .update_resources("testapp_cart", &ResourceUpdate::cpu(40))
            .await;
        assert!(out.is_ok());
        assert_eq!(
            fake.calls()[0],
            vec!["update", "--cpu-period", "100000", "--cpu-quota", "40000", "testapp_cart"]
        );
    }
}
