//! Observation Layer
//!
//! Samples a target's health around each injection. One [`Observation`] is
//! taken before and one after the action; every signal in it degrades to
//! `None` (or an unavailable resource sample) independently of the others.
//!
//! # Signals
//!
//! - probe latency: timed GET of the target's metrics endpoint (optional)
//! - uptime: the Prometheus `up` series for the target's instance
//! - metrics: per-target PromQL query set from the [`TargetRegistry`]
//! - resources: single-shot runtime stats

mod probe;
mod promql;
mod registry;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::runtime::{ResourceSample, RuntimeClient};

pub use probe::{HealthProber, DEFAULT_PROBE_HOST};
pub use promql::{PromClient, PromError, QueryData, QueryResponse, QuerySample};
pub use registry::{QueryProfile, TargetEntry, TargetRegistry};

/// Alias -> value; `None` when the query produced no usable number
pub type MetricValues = BTreeMap<String, Option<f64>>;

/// Which side of the action a sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    After,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Before => "before",
            Phase::After => "after",
        }
    }
}

/// One health sample of one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub probe_latency_ms: Option<f64>,
    pub uptime: Option<f64>,

    /// `None` when no instance label is known for the target
    pub metrics: Option<MetricValues>,

    pub resources: ResourceSample,
}

impl Observation {
    /// Sample with no signal at all
    pub fn empty() -> Self {
        Self {
            probe_latency_ms: None,
            uptime: None,
            metrics: None,
            resources: ResourceSample::unavailable("not sampled"),
        }
    }
}

/// Collects observations for the orchestration loop
#[derive(Debug, Clone)]
pub struct Observer {
    runtime: RuntimeClient,
    registry: Arc<TargetRegistry>,
    prober: HealthProber,
    prom: PromClient,
    job: String,
    probe_enabled: bool,
}

impl Observer {
    pub fn new(
        runtime: RuntimeClient,
        registry: Arc<TargetRegistry>,
        prober: HealthProber,
        prom: PromClient,
        job: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            registry,
            prober,
            prom,
            job: job.into(),
            probe_enabled: false,
        }
    }

    pub fn with_probing(mut self, enabled: bool) -> Self {
        self.probe_enabled = enabled;
        self
    }

    pub fn probe_enabled(&self) -> bool {
        self.probe_enabled
    }

    /// Instance label for `target`: discovered by port, else the static label
    pub async fn resolve_instance(&self, target: &str) -> Option<String> {
        if let Some(port) = self.registry.port(target) {
            if let Some(label) = self.prom.discover_instance_label(&self.job, port).await {
                return Some(label);
            }
        }
        self.registry.instance_label(target).map(str::to_string)
    }

    /// Take one sample of `target`
    pub async fn sample(&self, target: &str, instance: Option<&str>, phase: Phase) -> Observation {
        let probe_latency_ms = if self.probe_enabled {
            self.prober.probe_target(target, phase.as_str()).await
        } else {
            None
        };

        let resources = self.runtime.stats_once(target).await;

        let (uptime, metrics) = match instance {
            Some(instance) => {
                let uptime = self.prom.uptime(instance).await;
                let queries = self.registry.queries_for(target, instance);
                (uptime, Some(self.prom.eval_metric_queries(&queries).await))
            }
            None => (None, None),
        };

        Observation {
            probe_latency_ms,
            uptime,
            metrics,
            resources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRunner;

    fn observer(fake: &FakeRunner) -> Observer {
        let registry = Arc::new(TargetRegistry::default());
        Observer::new(
            fake.client(),
            registry.clone(),
            HealthProber::new(registry),
            PromClient::new("http://127.0.0.1:1"),
            "test_app",
        )
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_static_label() {
        let fake = FakeRunner::new();
        let observer = observer(&fake);
        assert_eq!(
            observer.resolve_instance("testapp_cart").await.as_deref(),
            Some("cart:5002")
        );
        assert_eq!(observer.resolve_instance("mystery").await, None);
    }

    #[tokio::test]
    async fn test_sample_without_instance_or_probe() {
        let fake = FakeRunner::new()
            .with_running(&["mystery"])
            .with_stats("12.50%|64MiB / 1GiB|6.25%|1kB / 2kB|0B / 0B");
        let obs = observer(&fake).sample("mystery", None, Phase::Before).await;

        assert_eq!(obs.probe_latency_ms, None);
        assert_eq!(obs.uptime, None);
        assert_eq!(obs.metrics, None);
        assert_eq!(obs.resources.cpu_pct(), Some(12.5));
        assert_eq!(obs.resources.mem_used_bytes(), Some(64.0 * 1024.0 * 1024.0));
    }

    #[tokio::test]
    async fn test_sample_with_unreachable_prometheus() {
        let fake = FakeRunner::new().with_running(&["testapp_payment"]);
        let obs = observer(&fake)
            .sample("testapp_payment", Some("payment:5003"), Phase::After)
            .await;

        assert_eq!(obs.uptime, None);
        let metrics = obs.metrics.unwrap();
        assert_eq!(metrics.len(), 5);
        assert!(metrics.values().all(Option::is_none));
    }

    #[test]
    fn test_observation_serializes_nulls() {
        let json = serde_json::to_value(Observation::empty()).unwrap();
        assert_eq!(json["probe_latency_ms"], serde_json::Value::Null);
        assert_eq!(json["resources"]["error"], "not sampled");
    }
}
