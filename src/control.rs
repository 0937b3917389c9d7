//! Control-plane injection
//!
//! Translates a coarse control-plane request (`cpu`, `network`, ...) into a
//! focused chaos run: the fault type maps onto one catalog fault, the target
//! hint onto at most a couple of running containers, and the duration onto
//! a loop interval.

use serde::Serialize;
use tracing::{info, warn};

use crate::agent::ChaosAgent;
use crate::config::{Config, InjectConfig, RunMode};
use crate::faults::FaultKind;
use crate::runtime::RuntimeClient;
use crate::stats::Summary;

/// Shortest loop interval an injection uses
pub const MIN_INJECT_INTERVAL_SECS: u64 = 5;

/// Fault categories understood by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ControlFault {
    Cpu,
    Memory,
    Network,
    Disk,
    Latency,
    Exception,
}

impl ControlFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlFault::Cpu => "cpu",
            ControlFault::Memory => "memory",
            ControlFault::Network => "network",
            ControlFault::Disk => "disk",
            ControlFault::Latency => "latency",
            ControlFault::Exception => "exception",
        }
    }

    /// Catalog fault that approximates this category
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            ControlFault::Cpu => FaultKind::CpuHog,
            ControlFault::Memory => FaultKind::MemoryHog,
            ControlFault::Network => FaultKind::Pause,
            ControlFault::Disk => FaultKind::DiskFill,
            ControlFault::Latency => FaultKind::CpuQuota,
            ControlFault::Exception => FaultKind::KillRestart,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InjectMode {
    Production,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectRequest {
    pub fault_type: ControlFault,
    pub target_hint: String,
    pub duration_secs: u64,
    pub mode: InjectMode,
    pub intensity: u8,
}

/// Resolved injection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectPlan {
    pub fault: FaultKind,
    pub targets: Vec<String>,
    pub duration_secs: u64,
    pub interval_secs: u64,
    pub intensity: u8,
}

impl InjectPlan {
    /// Point the run section of `config` at this plan
    pub fn apply(&self, config: &mut Config) {
        config.run.mode = RunMode::Focused;
        config.run.fault = self.fault;
        config.run.targets = self.targets.clone();
        config.run.duration_secs = self.duration_secs;
        config.run.interval_secs = self.interval_secs;
        config.inject.intensity = self.intensity;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InjectOutcome {
    /// Nothing was injected
    DryRun { fault: FaultKind, duration_secs: u64 },
    Completed { plan: InjectPlan, summary: Summary },
}

/// Half the duration, never below the minimum interval
pub fn interval_for(duration_secs: u64) -> u64 {
    (duration_secs / 2).max(MIN_INJECT_INTERVAL_SECS)
}

/// Containers matching `hint` or a known service keyword, minus exclusions
pub fn match_targets(names: &[String], hint: &str, cfg: &InjectConfig) -> Vec<String> {
    let hint = hint.to_lowercase();
    names
        .iter()
        .filter(|name| {
            let lower = name.to_lowercase();
            let wanted = lower.contains(&hint)
                || cfg
                    .service_keywords
                    .iter()
                    .any(|k| lower.contains(&k.to_lowercase()));
            let excluded = cfg
                .excluded_keywords
                .iter()
                .any(|k| lower.contains(&k.to_lowercase()));
            wanted && !excluded
        })
        .take(cfg.max_targets)
        .cloned()
        .collect()
}

/// Discover running targets for `hint`, falling back to the configured default
pub async fn discover_targets(runtime: &RuntimeClient, hint: &str, cfg: &InjectConfig) -> Vec<String> {
    let listing = runtime.list_containers(false).await;
    if let Some(e) = &listing.error {
        warn!(error = %e, "Failed to discover containers");
    }

    let targets = match_targets(&listing.names(), hint, cfg);
    if targets.is_empty() {
        warn!(
            hint,
            fallback = %cfg.fallback_target,
            "No containers found for target, using fallback"
        );
        vec![cfg.fallback_target.clone()]
    } else {
        targets
    }
}

/// Resolve a request against the running containers
pub async fn plan(request: &InjectRequest, runtime: &RuntimeClient, cfg: &InjectConfig) -> InjectPlan {
    InjectPlan {
        fault: request.fault_type.fault_kind(),
        targets: discover_targets(runtime, &request.target_hint, cfg).await,
        duration_secs: request.duration_secs,
        interval_secs: interval_for(request.duration_secs),
        intensity: request.intensity,
    }
}

/// Execute a control-plane request as a focused chaos run
///
/// # Errors
///
/// Returns an error if the resulting configuration is invalid.
pub async fn inject(
    request: &InjectRequest,
    config: &Config,
    runtime: RuntimeClient,
) -> anyhow::Result<InjectOutcome> {
    if request.mode == InjectMode::DryRun {
        info!(
            fault_type = ?request.fault_type,
            duration_secs = request.duration_secs,
            "Dry run, nothing injected"
        );
        return Ok(InjectOutcome::DryRun {
            fault: request.fault_type.fault_kind(),
            duration_secs: request.duration_secs,
        });
    }

    let plan = plan(request, &runtime, &config.inject).await;
    let mut config = config.clone();
    plan.apply(&mut config);
    config.validate()?;

    info!(
        fault = %plan.fault,
        targets = ?plan.targets,
        interval_secs = plan.interval_secs,
        intensity = plan.intensity,
        "Executing fault injection"
    );
    let summary = ChaosAgent::new(&config, runtime).run().await;
    Ok(InjectOutcome::Completed { plan, summary })
}
