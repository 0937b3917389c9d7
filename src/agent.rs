//! Orchestration Loop
//!
//! Drives one chaos run: pick a target, observe it, inject a fault, observe
//! it again, record both events, repeat until the deadline, then report.
//!
//! ```text
//! INIT -> SELECT_TARGET -> OBSERVE_BEFORE -> EXECUTE -> OBSERVE_AFTER -> RECORD
//!              ^                                                          |
//!              +---------------------- interval sleep --------------------+
//!                                                                         |
//!                                                         deadline -> FINALIZE
//! ```
//!
//! The loop runs on a single task; actions never overlap. An action that
//! returns `Err` is converted into a failed result and the loop carries on.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, RunMode};
use crate::eligibility::Monitor;
use crate::event_log::{now_ts, EventLog};
use crate::faults::{
    build_focused_executor, build_mixed_actions, ActionResult, FaultAction, FaultContext,
    FaultKind, RecoveryLedger, RecoveryOutcome,
};
use crate::metrics;
use crate::observe::{
    HealthProber, MetricValues, Observation, Observer, Phase, PromClient, TargetRegistry,
};
use crate::runtime::{CallTimeout, ResourceSample, RuntimeClient};
use crate::stats::{RunningStats, Summary};

pub const NO_ELIGIBLE_ENDPOINTS: &str = "no eligible endpoints available";
pub const CONFIGURED_NOT_ELIGIBLE: &str = "configured endpoints not eligible";

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    SelectTarget,
    ObserveBefore,
    Execute,
    ObserveAfter,
    Record,
    Finalize,
}

/// Loop parameters resolved from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub mode: RunMode,
    pub fault: FaultKind,
    pub targets: Vec<String>,
    pub duration: Duration,
    pub interval: Duration,
    pub refresh_every: u64,
    pub json: bool,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        let run = &config.run;
        Self {
            mode: run.mode,
            fault: run.fault,
            targets: run.targets.clone(),
            duration: Duration::from_secs(run.duration_secs),
            interval: Duration::from_secs(run.interval_secs),
            refresh_every: run.refresh_every.max(1),
            json: run.json,
        }
    }

    /// Action name used for run-level records
    pub fn action_label(&self) -> &'static str {
        match self.mode {
            RunMode::Focused => self.fault.as_str(),
            RunMode::Mixed => "mixed",
        }
    }
}

/// Immediate record of one executed action
#[derive(Debug, Clone, Serialize)]
pub struct ActionEvent {
    pub ts: f64,
    pub action: String,
    pub target: String,
    pub result: ActionResult,
    pub up_before: Option<f64>,
    pub prom_before: Option<MetricValues>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeforeAfter<T> {
    pub before: T,
    pub after: T,
}

/// Follow-up record with both observation samples
#[derive(Debug, Clone, Serialize)]
pub struct ObservationEvent {
    pub ts: f64,
    pub action: String,
    pub target: String,
    pub probe_ms: BeforeAfter<Option<f64>>,
    pub up: BeforeAfter<Option<f64>>,
    pub prom: BeforeAfter<Option<MetricValues>>,
    pub docker: BeforeAfter<ResourceSample>,
}

impl ObservationEvent {
    fn new(action: &str, target: &str, before: Observation, after: Observation) -> Self {
        Self {
            ts: now_ts(),
            action: action.to_string(),
            target: target.to_string(),
            probe_ms: BeforeAfter {
                before: before.probe_latency_ms,
                after: after.probe_latency_ms,
            },
            up: BeforeAfter {
                before: before.uptime,
                after: after.uptime,
            },
            prom: BeforeAfter {
                before: before.metrics,
                after: after.metrics,
            },
            docker: BeforeAfter {
                before: before.resources,
                after: after.resources,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NoTargets {
    pub eligible_running: Vec<String>,
    pub message: String,
}

/// Written instead of any iteration when the pool starts empty
#[derive(Debug, Clone, Serialize)]
pub struct NoTargetsRecord {
    pub ts: f64,
    pub action: String,
    pub summary: NoTargets,
}

/// Final line of a run
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRecord<'a> {
    pub ts: f64,
    pub summary: &'a Summary,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub interrupted: bool,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recovered: Vec<RecoveryOutcome>,
}

/// Faults the loop can dispatch
enum Dispatch {
    Focused(FaultKind, Arc<dyn FaultAction>),
    Mixed(Vec<(FaultKind, Arc<dyn FaultAction>)>),
}

impl Dispatch {
    fn choose(&self) -> (FaultKind, Arc<dyn FaultAction>) {
        match self {
            Dispatch::Focused(kind, action) => (*kind, action.clone()),
            Dispatch::Mixed(catalog) => {
                let (kind, action) = &catalog[fastrand::usize(..catalog.len())];
                (*kind, action.clone())
            }
        }
    }
}

/// A single chaos run
pub struct ChaosAgent {
    settings: RunSettings,
    monitor: Arc<Monitor>,
    observer: Observer,
    dispatch: Dispatch,
    recovery: RecoveryLedger,
    runtime: RuntimeClient,
    log: EventLog,
    stats: RunningStats,
    state: LoopState,
    no_targets: Option<NoTargets>,
}

impl ChaosAgent {
    /// Wire monitor, fault catalog and observer from `config`
    pub fn new(config: &Config, runtime: RuntimeClient) -> Self {
        let settings = RunSettings::from_config(config);
        let runtime = runtime.with_timeout(config.runtime.control_timeout());
        let log = EventLog::new(config.run.log_file.clone());
        let registry: Arc<TargetRegistry> = Arc::new(config.services.clone());

        let monitor = Arc::new(Monitor::with_exclusions(
            runtime.clone(),
            log.clone(),
            config.exclusions.clone(),
        ));

        let recovery = RecoveryLedger::default();
        let mut ctx = FaultContext::new(runtime.clone(), registry.clone())
            .with_hog_mem_mb(config.run.hog_mem_mb)
            .with_recovery(recovery.clone());
        ctx.exec_timeout = config.runtime.exec_timeout();

        let dispatch = match settings.mode {
            RunMode::Focused => Dispatch::Focused(
                settings.fault,
                build_focused_executor(settings.fault, &ctx, Some(monitor.clone())),
            ),
            RunMode::Mixed => Dispatch::Mixed(
                build_mixed_actions(&ctx, Some(monitor.clone()))
                    .into_iter()
                    .collect(),
            ),
        };

        let prober = HealthProber::new(registry.clone())
            .with_host(config.observe.probe_host.clone())
            .with_timeout(CallTimeout::from_secs(config.observe.probe_timeout_secs));
        let prom = PromClient::new(config.observe.prom_url.clone())
            .with_timeout(CallTimeout::from_secs(config.observe.query_timeout_secs));
        let observer = Observer::new(
            runtime.clone(),
            registry,
            prober,
            prom,
            config.observe.prom_job.clone(),
        )
        .with_probing(config.run.probe);

        Self {
            settings,
            monitor,
            observer,
            dispatch,
            recovery,
            runtime,
            log,
            stats: RunningStats::new(),
            state: LoopState::Init,
            no_targets: None,
        }
    }

    /// Replace the dispatched fault with `action`
    #[cfg(test)]
    fn with_action(mut self, kind: FaultKind, action: Arc<dyn FaultAction>) -> Self {
        self.dispatch = Dispatch::Focused(kind, action);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn recovery(&self) -> &RecoveryLedger {
        &self.recovery
    }

    /// Set when the run ended before its first iteration for lack of targets
    pub fn no_targets(&self) -> Option<&NoTargets> {
        self.no_targets.as_ref()
    }

    /// Snapshot of the statistics gathered so far
    pub fn summary(&self) -> Summary {
        self.stats.summary()
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = ?self.state, to = ?next, "Loop state");
        self.state = next;
    }

    /// Run until the deadline passes or the target pool empties
    pub async fn run(&mut self) -> Summary {
        let configured = self.settings.targets.clone();
        let mut targets = self.monitor.pick_targets(&configured).await;
        if targets.is_empty() {
            self.record_no_targets(&configured).await;
            self.transition(LoopState::Finalize);
            return self.stats.summary();
        }

        info!(
            mode = self.settings.mode.as_str(),
            fault = self.settings.action_label(),
            ?targets,
            duration_secs = self.settings.duration.as_secs(),
            interval_secs = self.settings.interval.as_secs(),
            run_id = %self.log.run_id(),
            "Chaos agent starting"
        );

        let deadline = Instant::now() + self.settings.duration;
        let mut iteration: u64 = 0;
        while Instant::now() < deadline {
            if iteration % self.settings.refresh_every == 0 {
                targets = self.monitor.pick_targets(&configured).await;
                if targets.is_empty() {
                    warn!("No targets remaining; exiting");
                    break;
                }
            }

            self.iterate(&targets).await;
            iteration += 1;
            metrics::LOOP_ITERATIONS_TOTAL.inc();

            sleep(self.settings.interval).await;
        }

        self.finalize()
    }

    async fn iterate(&mut self, targets: &[String]) {
        self.transition(LoopState::SelectTarget);
        let target = targets[fastrand::usize(..targets.len())].clone();

        self.transition(LoopState::ObserveBefore);
        let instance = self.observer.resolve_instance(&target).await;
        let before = self
            .observer
            .sample(&target, instance.as_deref(), Phase::Before)
            .await;

        self.transition(LoopState::Execute);
        let (kind, action) = self.dispatch.choose();
        let result = match action.execute(&target).await {
            Ok(result) => result,
            Err(e) => {
                warn!(action = kind.as_str(), container = %target, error = %e, "Action failed unexpectedly");
                ActionResult::failed(e.to_string())
            }
        };
        let failed = result.is_error();
        metrics::record_action(kind.as_str(), failed);
        self.stats.add_action(kind.as_str(), &target, !failed);

        let event = ActionEvent {
            ts: now_ts(),
            action: kind.as_str().to_string(),
            target: target.clone(),
            result,
            up_before: before.uptime,
            prom_before: before.metrics.clone(),
        };
        self.emit(&event);
        self.log.append(&event);

        self.transition(LoopState::ObserveAfter);
        let after = self
            .observer
            .sample(&target, instance.as_deref(), Phase::After)
            .await;

        self.transition(LoopState::Record);
        self.stats
            .add_observations(&before, &after, self.observer.probe_enabled());
        self.log
            .append(&ObservationEvent::new(kind.as_str(), &target, before, after));
    }

    /// Console line for one action
    fn emit(&self, event: &ActionEvent) {
        if self.settings.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize action event: {}", e),
            }
        } else {
            let status = event.result.error.as_deref().unwrap_or("ok");
            info!(
                action = %event.action,
                container = %event.target,
                status,
                "[CHAOS]"
            );
        }
    }

    async fn record_no_targets(&mut self, configured: &[String]) {
        let action = self.settings.action_label();
        for verdict in self.monitor.verdicts(configured).await {
            if let Some(reason) = verdict.reason {
                self.monitor.log_violation(action, &verdict.target, &reason);
            }
        }

        let eligible_running = self.monitor.eligible_running().await;
        let message = if eligible_running.is_empty() {
            NO_ELIGIBLE_ENDPOINTS
        } else {
            CONFIGURED_NOT_ELIGIBLE
        };
        warn!(?eligible_running, message, "No eligible target containers found");

        let summary = NoTargets {
            eligible_running,
            message: message.to_string(),
        };
        self.log.append(&NoTargetsRecord {
            ts: now_ts(),
            action: action.to_string(),
            summary: summary.clone(),
        });
        self.no_targets = Some(summary);
    }

    fn finalize(&mut self) -> Summary {
        self.transition(LoopState::Finalize);
        let summary = self.stats.summary();
        info!(
            total_actions = summary.total_actions,
            errors = summary.errors,
            "Chaos agent finished"
        );
        self.log.append(&SummaryRecord {
            ts: now_ts(),
            summary: &summary,
            interrupted: false,
            recovered: Vec::new(),
        });
        summary
    }

    /// Put targets back after the loop was cancelled mid-run
    ///
    /// Runs every compensating step still owed (unpause / start) and writes
    /// the partial summary.
    pub async fn interrupt(&mut self) -> Summary {
        self.transition(LoopState::Finalize);
        let recovered = self.recovery.drain(&self.runtime).await;
        let summary = self.stats.summary();
        warn!(
            total_actions = summary.total_actions,
            recovered = recovered.len(),
            "Chaos run interrupted"
        );
        self.log.append(&SummaryRecord {
            ts: now_ts(),
            summary: &summary,
            interrupted: true,
            recovered,
        });
        summary
    }
}
