//! Target Eligibility
//!
//! Decides whether a container may receive a fault. A target is eligible
//! when it is not part of the monitoring/tracing/logging stack, exists in the
//! runtime inventory, and is currently running. [`Guarded`] is the single
//! enforcement point: every catalog action built with a monitor goes through
//! it, so a fault can never reach an infrastructure or stopped container.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::event_log::{now_ts, EventLog};
use crate::faults::{ActionResult, FaultAction};
use crate::metrics;
use crate::runtime::RuntimeClient;

/// Why a target was refused
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum Ineligible {
    #[error("target excluded (monitoring container)")]
    Infrastructure,

    #[error("target not found")]
    NotFound,

    #[error("target not running")]
    NotRunning,
}

impl Ineligible {
    /// Short label for metrics
    pub fn code(&self) -> &'static str {
        match self {
            Self::Infrastructure => "infrastructure",
            Self::NotFound => "not_found",
            Self::NotRunning => "not_running",
        }
    }
}

/// Names and prefixes of containers that must never be disturbed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfraExclusions {
    /// Exact container names
    pub names: BTreeSet<String>,

    /// Container name prefixes
    pub prefixes: Vec<String>,
}

impl Default for InfraExclusions {
    fn default() -> Self {
        let names = [
            "testapp_prometheus",
            "testapp_grafana",
            "prometheus",
            "grafana",
            "jaeger",
            "zipkin",
            "loki",
            "tempo",
            "otel-collector",
        ];
        let prefixes = ["prometheus", "grafana", "otel", "loki", "tempo", "zipkin", "jaeger"];
        Self {
            names: names.iter().map(|s| s.to_string()).collect(),
            prefixes: prefixes.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl InfraExclusions {
    /// Whether `name` belongs to the monitoring/tracing/logging stack
    pub fn is_infrastructure(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.names.iter().any(|n| n.to_lowercase() == name)
            || self
                .prefixes
                .iter()
                .any(|p| name.starts_with(&p.to_lowercase()))
    }
}

/// Line written to the event log when an action is refused
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub ts: f64,
    pub action: String,
    pub target: String,
    pub violation: String,
}

/// Eligibility of one named target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetVerdict {
    pub target: String,
    pub eligible: bool,
    pub reason: Option<String>,
}

/// Target eligibility monitor
#[derive(Debug, Clone)]
pub struct Monitor {
    runtime: RuntimeClient,
    log: EventLog,
    exclusions: InfraExclusions,
}

impl Monitor {
    pub fn new(runtime: RuntimeClient, log: EventLog) -> Self {
        Self::with_exclusions(runtime, log, InfraExclusions::default())
    }

    pub fn with_exclusions(runtime: RuntimeClient, log: EventLog, exclusions: InfraExclusions) -> Self {
        Self {
            runtime,
            log,
            exclusions,
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn is_infrastructure(&self, name: &str) -> bool {
        self.exclusions.is_infrastructure(name)
    }

    /// Check a target; the first failing condition wins
    pub async fn check_target(&self, name: &str) -> Result<(), Ineligible> {
        if self.is_infrastructure(name) {
            return Err(Ineligible::Infrastructure);
        }
        if !self.runtime.list_containers(true).await.contains(name) {
            return Err(Ineligible::NotFound);
        }
        if !self.runtime.list_containers(false).await.contains(name) {
            return Err(Ineligible::NotRunning);
        }
        Ok(())
    }

    /// Append a violation record; never fails
    pub fn log_violation(&self, action: &str, target: &str, reason: &str) {
        warn!(action, container = target, reason, "Refusing fault on ineligible target");
        self.log.append(&ViolationRecord {
            ts: now_ts(),
            action: action.to_string(),
            target: target.to_string(),
            violation: reason.to_string(),
        });
    }

    /// Current injection pool
    ///
    /// Running non-infrastructure containers; when `configured` is non-empty
    /// only those configured names that are running qualify.
    pub async fn pick_targets(&self, configured: &[String]) -> Vec<String> {
        let running = self.runtime.list_containers(false).await;
        let mut base = if configured.is_empty() {
            running.names()
        } else {
            configured
                .iter()
                .filter(|name| running.contains(name))
                .cloned()
                .collect()
        };
        let mut seen = BTreeSet::new();
        base.retain(|name| !self.is_infrastructure(name) && seen.insert(name.clone()));

        metrics::ELIGIBLE_TARGETS.set(base.len() as i64);
        debug!("Target pool: {:?}", base);
        base
    }

    /// Check every name in `names` without logging violations
    pub async fn verdicts(&self, names: &[String]) -> Vec<TargetVerdict> {
        let mut verdicts = Vec::with_capacity(names.len());
        for name in names {
            let check = self.check_target(name).await;
            verdicts.push(TargetVerdict {
                target: name.clone(),
                eligible: check.is_ok(),
                reason: check.err().map(|reason| reason.to_string()),
            });
        }
        verdicts
    }

    /// Running containers outside the infrastructure stack
    pub async fn eligible_running(&self) -> Vec<String> {
        self.runtime
            .list_containers(false)
            .await
            .names()
            .into_iter()
            .filter(|name| !self.is_infrastructure(name))
            .collect()
    }
}

/// A fault action that only runs against eligible targets
pub struct Guarded<A> {
    inner: A,
    monitor: Arc<Monitor>,
}

impl<A: FaultAction> Guarded<A> {
    pub fn new(inner: A, monitor: Arc<Monitor>) -> Self {
        Self { inner, monitor }
    }
}

/// Wrap `action` so eligibility is checked before every execution
pub fn require_valid_target<A: FaultAction>(monitor: Arc<Monitor>, action: A) -> Guarded<A> {
    Guarded::new(action, monitor)
}

#[async_trait]
impl<A: FaultAction> FaultAction for Guarded<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn execute(&self, target: &str) -> anyhow::Result<ActionResult> {
        if let Err(reason) = self.monitor.check_target(target).await {
            let reason_text = reason.to_string();
            metrics::TARGET_VIOLATIONS_TOTAL
                .with_label_values(&[reason.code()])
                .inc();
            self.monitor
                .log_violation(self.inner.name(), target, &reason_text);
            return Ok(ActionResult::failed(reason_text));
        }
        self.inner.execute(target).await
    }
}
