//! Fault Action Library
//!
//! The catalog of injectable faults and the builders that assemble it for a
//! run. Each fault is composed from runtime primitives (see
//! [`crate::runtime`]); when a [`Monitor`] is supplied every entry is wrapped
//! in the eligibility guard.
//!
//! # Faults
//!
//! | name | effect | reverted |
//! |------|--------|----------|
//! | `cpu_hog` | detached busy loop inside the container | when the loop ends |
//! | `memory_hog` | detached allocation of N x 1 MiB buffers | when the process exits |
//! | `pause` | pause, short sleep, unpause | yes (same call) |
//! | `restart` | restart | n/a |
//! | `kill_restart` | kill, short downtime, start | yes (same call) |
//! | `cpu_quota` | lower CFS quota | no |
//! | `mem_limit` | lower memory limit | no |
//! | `disk_fill` | write filler file, detached delayed removal | best effort |
//! | `metrics_block` | drop traffic to the metrics port | best effort |

mod actions;
mod firewall;
mod recovery;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::eligibility::{require_valid_target, Monitor};
use crate::observe::TargetRegistry;
use crate::runtime::{CommandOutput, RuntimeClient};

pub use actions::{
    Fault, CPU_HOG_SECONDS, CPU_QUOTA_PERCENT, DISK_FILL_CLEANUP_DELAY_SECS, DISK_FILL_MB,
    DISK_FILL_PATH, KILL_DOWNTIME_SECONDS, MEMORY_HOG_MB, MEM_LIMIT_MB, METRICS_BLOCK_SECS,
    PAUSE_SECONDS,
};
pub use firewall::MetricsBlockRule;
pub use recovery::{PendingStep, RecoveryLedger, RecoveryOutcome};

/// Unknown fault name in configuration
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown fault '{0}' (expected one of: {list})", list = FaultKind::names().join(", "))]
pub struct UnknownFault(pub String);

/// Every fault the agent knows how to inject
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    CpuHog,
    MemoryHog,
    Pause,
    Restart,
    KillRestart,
    CpuQuota,
    MemLimit,
    DiskFill,
    MetricsBlock,
}

impl FaultKind {
    pub const ALL: [FaultKind; 9] = [
        FaultKind::CpuHog,
        FaultKind::MemoryHog,
        FaultKind::Pause,
        FaultKind::Restart,
        FaultKind::KillRestart,
        FaultKind::CpuQuota,
        FaultKind::MemLimit,
        FaultKind::DiskFill,
        FaultKind::MetricsBlock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CpuHog => "cpu_hog",
            Self::MemoryHog => "memory_hog",
            Self::Pause => "pause",
            Self::Restart => "restart",
            Self::KillRestart => "kill_restart",
            Self::CpuQuota => "cpu_quota",
            Self::MemLimit => "mem_limit",
            Self::DiskFill => "disk_fill",
            Self::MetricsBlock => "metrics_block",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(FaultKind::as_str).collect()
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultKind {
    type Err = UnknownFault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| UnknownFault(s.to_string()))
    }
}

/// Outcome of one fault action
///
/// `details` is action-specific; a non-null `error` marks the action failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(flatten)]
    pub details: Map<String, Value>,

    #[serde(default)]
    pub error: Option<String>,
}

impl ActionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            details: Map::new(),
            error: Some(error.into()),
        }
    }

    /// A single runtime command as the whole result
    pub fn from_command(output: CommandOutput) -> Self {
        let error = output.error.clone();
        let mut details = match serde_json::to_value(&output) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        details.remove("error");
        Self { details, error }
    }

    /// Attach a serializable detail under `key`
    pub fn with<T: Serialize + ?Sized>(mut self, key: &str, value: &T) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.details.insert(key.to_string(), value);
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A single injectable behavior
#[async_trait]
pub trait FaultAction: Send + Sync {
    /// Catalog name, used in logs and statistics
    fn name(&self) -> &str;

    /// Inject the fault into `target`
    ///
    /// Runtime failures are reported in the returned result. `Err` is
    /// reserved for unexpected failures; the orchestration loop converts
    /// it into a failed result.
    async fn execute(&self, target: &str) -> anyhow::Result<ActionResult>;
}

#[async_trait]
impl<T: FaultAction + ?Sized> FaultAction for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn execute(&self, target: &str) -> anyhow::Result<ActionResult> {
        (**self).execute(target).await
    }
}

/// Shared dependencies of every fault in a catalog
#[derive(Debug, Clone)]
pub struct FaultContext {
    pub runtime: RuntimeClient,

    /// Known service ports, needed by `metrics_block`
    pub registry: Arc<TargetRegistry>,

    /// In-flight two-step actions awaiting their compensating call
    pub recovery: RecoveryLedger,

    /// Buffers allocated by `memory_hog`; random when unset
    pub hog_mem_mb: Option<u64>,

    /// Timeout for in-container `exec` calls
    pub exec_timeout: Duration,
}

impl FaultContext {
    pub fn new(runtime: RuntimeClient, registry: Arc<TargetRegistry>) -> Self {
        Self {
            runtime,
            registry,
            recovery: RecoveryLedger::default(),
            hog_mem_mb: None,
            exec_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_hog_mem_mb(mut self, mb: Option<u64>) -> Self {
        self.hog_mem_mb = mb;
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryLedger) -> Self {
        self.recovery = recovery;
        self
    }
}

/// Named fault catalog for mixed mode
pub type Catalog = BTreeMap<FaultKind, Arc<dyn FaultAction>>;

fn wrap(kind: FaultKind, ctx: &FaultContext, monitor: Option<&Arc<Monitor>>) -> Arc<dyn FaultAction> {
    let fault = Fault::new(kind, ctx.clone());
    match monitor {
        Some(monitor) => Arc::new(require_valid_target(monitor.clone(), fault)),
        None => Arc::new(fault),
    }
}

/// The single action bound for a focused run
pub fn build_focused_executor(
    fault: FaultKind,
    ctx: &FaultContext,
    monitor: Option<Arc<Monitor>>,
) -> Arc<dyn FaultAction> {
    wrap(fault, ctx, monitor.as_ref())
}

/// The full catalog for a mixed run
pub fn build_mixed_actions(ctx: &FaultContext, monitor: Option<Arc<Monitor>>) -> Catalog {
    FaultKind::ALL
        .into_iter()
        .map(|kind| (kind, wrap(kind, ctx, monitor.as_ref())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventLog;
    use crate::runtime::fake::FakeRunner;
    use tempfile::TempDir;

    #[test]
    fn test_fault_names_round_trip() {
        for kind in FaultKind::ALL {
            assert_eq!(kind.as_str().parse::<FaultKind>(), Ok(kind));
        }
        assert_eq!(FaultKind::KillRestart.to_string(), "kill_restart");
    }

    #[test]
    fn test_unknown_fault_rejected() {
        let err = "network_partition".parse::<FaultKind>().unwrap_err();
        assert_eq!(err, UnknownFault("network_partition".to_string()));
        assert!(err.to_string().contains("cpu_hog"));
    }

    #[test]
    fn test_action_result_from_command() {
        let out = CommandOutput::from_exit("docker restart a".into(), "a", "", 0);
        let result = ActionResult::from_command(out);
        assert!(!result.is_error());
        assert_eq!(result.details["cmd"], "docker restart a");
        assert!(!result.details.contains_key("error"));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error"], Value::Null);
        assert_eq!(json["stdout"], "a");
    }

    #[test]
    fn test_action_result_deserializes_error() {
        let result: ActionResult =
            serde_json::from_value(serde_json::json!({"error": "target not found"})).unwrap();
        assert_eq!(result, ActionResult::failed("target not found"));
    }

    #[test]
    fn test_mixed_catalog_covers_all_faults() {
        let fake = FakeRunner::new();
        let ctx = FaultContext::new(fake.client(), Arc::new(TargetRegistry::default()));
        let catalog = build_mixed_actions(&ctx, None);

        assert_eq!(catalog.len(), FaultKind::ALL.len());
        for (kind, action) in &catalog {
            assert_eq!(action.name(), kind.as_str());
        }
    }

    #[tokio::test]
    async fn test_guarded_catalog_refuses_infrastructure() {
        let dir = TempDir::new().unwrap();
        let fake = FakeRunner::new().with_running(&["prometheus"]);
        let ctx = FaultContext::new(fake.client(), Arc::new(TargetRegistry::default()));
        let monitor = Arc::new(Monitor::new(
            fake.client(),
            EventLog::new(dir.path().join("chaos.log")),
        ));

        for (_, action) in build_mixed_actions(&ctx, Some(monitor)) {
            let result = action.execute("prometheus").await.unwrap();
            assert_eq!(
                result.error.as_deref(),
                Some("target excluded (monitoring container)")
            );
        }
        assert!(fake.control_calls().is_empty());
    }

    #[tokio::test]
    async fn test_focused_executor_runs_bound_fault() {
        let fake = FakeRunner::new().with_running(&["testapp_cart"]);
        let ctx = FaultContext::new(fake.client(), Arc::new(TargetRegistry::default()));
        let action = build_focused_executor(FaultKind::Restart, &ctx, None);

        let result = action.execute("testapp_cart").await.unwrap();

        assert!(!result.is_error());
        assert_eq!(fake.control_calls(), vec![vec!["restart", "testapp_cart"]]);
    }
}
