// Prometheus metrics for the chaos agent itself
//
// Exposed on the optional /metrics endpoint:
// - Injected actions by fault and outcome (counter)
// - Eligibility violations by reason (counter)
// - Runtime command durations (histogram)
// - Health probe latencies before/after injection (histogram)
// - Size of the eligible target pool (gauge)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref CHAOS_ACTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chaos_actions_total", "Fault actions executed"),
        &["action", "outcome"]
    ).expect("Failed to create chaos actions metric");

    pub static ref TARGET_VIOLATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("chaos_target_violations_total", "Actions refused because the target was ineligible"),
        &["reason"]
    ).expect("Failed to create target violations metric");

    pub static ref RUNTIME_COMMAND_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("chaos_runtime_command_seconds", "Duration of container runtime commands"),
        &["command"]
    ).expect("Failed to create runtime command metric");

    pub static ref PROBE_LATENCY_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("chaos_probe_latency_seconds", "Health probe latency around injections"),
        &["phase"]
    ).expect("Failed to create probe latency metric");

    pub static ref ELIGIBLE_TARGETS: IntGauge = IntGauge::new(
        "chaos_eligible_targets",
        "Number of containers currently eligible for injection"
    ).expect("Failed to create eligible targets metric");

    pub static ref LOOP_ITERATIONS_TOTAL: IntCounter = IntCounter::new(
        "chaos_loop_iterations_total",
        "Completed orchestration loop iterations"
    ).expect("Failed to create loop iterations metric");
}

/// Register all metrics - must be called once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(CHAOS_ACTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TARGET_VIOLATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RUNTIME_COMMAND_SECONDS.clone()))?;
    REGISTRY.register(Box::new(PROBE_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ELIGIBLE_TARGETS.clone()))?;
    REGISTRY.register(Box::new(LOOP_ITERATIONS_TOTAL.clone()))?;
    Ok(())
}

/// Record the outcome of one injected action
pub fn record_action(action: &str, failed: bool) {
    let outcome = if failed { "error" } else { "ok" };
    CHAOS_ACTIONS_TOTAL
        .with_label_values(&[action, outcome])
        .inc();
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
