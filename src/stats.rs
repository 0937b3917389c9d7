//! Statistics Aggregator
//!
//! [`RunningStats`] accumulates every iteration of a run; [`Summary`] is the
//! read-only snapshot derived from it. Accumulation is monotonic: nothing is
//! ever retracted.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::observe::{MetricValues, Observation};

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Percent change from `before` to `after`, rounded to 2 decimals
///
/// Undefined when either side is missing or `before` is zero.
pub fn delta_pct(before: Option<f64>, after: Option<f64>) -> Option<f64> {
    match (before, after) {
        (Some(b), Some(a)) if b != 0.0 => Some(round_to((a - b) / b * 100.0, 2)),
        _ => None,
    }
}

/// Before/after value lists for one signal
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    pub before: Vec<f64>,
    pub after: Vec<f64>,
}

impl Series {
    fn push(&mut self, before: Option<f64>, after: Option<f64>) {
        self.before.extend(before);
        self.after.extend(after);
    }

    /// Averages rounded to `decimals` and their percent delta
    pub fn averages(&self, decimals: i32) -> Averages {
        let before = mean(&self.before);
        let after = mean(&self.after);
        Averages {
            avg_before: before.map(|v| round_to(v, decimals)),
            avg_after: after.map(|v| round_to(v, decimals)),
            delta_pct: delta_pct(before, after),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Averages {
    pub avg_before: Option<f64>,
    pub avg_after: Option<f64>,
    pub delta_pct: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeSummary {
    pub avg_latency_ms_before: Option<f64>,
    pub avg_latency_ms_after: Option<f64>,
    pub failed_probes_before: u64,
    pub failed_probes_after: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UptimeSummary {
    #[serde(flatten)]
    pub averages: Averages,
    pub missing_before: u64,
    pub missing_after: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub cpu_pct: Averages,
    pub mem_used_bytes: Averages,
}

/// End-of-run report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_actions: u64,
    pub errors: u64,
    pub error_pct: f64,
    pub by_action: BTreeMap<String, u64>,
    pub by_target: BTreeMap<String, u64>,
    pub probe: ProbeSummary,
    pub prom: BTreeMap<String, Averages>,
    pub uptime: UptimeSummary,
    pub docker: ResourceSummary,
}

/// Accumulator owned by the orchestration loop
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    total: u64,
    errors: u64,
    by_action: BTreeMap<String, u64>,
    by_target: BTreeMap<String, u64>,
    latency: Series,
    failed_probes_before: u64,
    failed_probes_after: u64,
    metrics: BTreeMap<String, Series>,
    uptime: Series,
    uptime_missing_before: u64,
    uptime_missing_after: u64,
    cpu: Series,
    mem: Series,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one executed action
    pub fn add_action(&mut self, action: &str, target: &str, ok: bool) {
        self.total += 1;
        if !ok {
            self.errors += 1;
        }
        *self.by_action.entry(action.to_string()).or_default() += 1;
        *self.by_target.entry(target.to_string()).or_default() += 1;
    }

    pub fn add_probe(&mut self, before_ms: Option<f64>, after_ms: Option<f64>) {
        if before_ms.is_none() {
            self.failed_probes_before += 1;
        }
        if after_ms.is_none() {
            self.failed_probes_after += 1;
        }
        self.latency.push(before_ms, after_ms);
    }

    /// Append every numeric value; absent or null aliases are skipped
    pub fn add_metrics(&mut self, before: Option<&MetricValues>, after: Option<&MetricValues>) {
        let aliases: BTreeSet<String> = before
            .into_iter()
            .chain(after)
            .flat_map(|values| values.keys().cloned())
            .collect();

        for alias in aliases {
            let b = before.and_then(|values| values.get(&alias).copied().flatten());
            let a = after.and_then(|values| values.get(&alias).copied().flatten());
            self.metrics.entry(alias).or_default().push(b, a);
        }
    }

    pub fn add_uptime(&mut self, before: Option<f64>, after: Option<f64>) {
        if before.is_none() {
            self.uptime_missing_before += 1;
        }
        if after.is_none() {
            self.uptime_missing_after += 1;
        }
        self.uptime.push(before, after);
    }

    pub fn add_resources(&mut self, before: &Observation, after: &Observation) {
        self.cpu
            .push(before.resources.cpu_pct(), after.resources.cpu_pct());
        self.mem.push(
            before.resources.mem_used_bytes(),
            after.resources.mem_used_bytes(),
        );
    }

    /// Record the observation pair of one iteration
    ///
    /// Probe latency is only counted when probing is enabled.
    pub fn add_observations(&mut self, before: &Observation, after: &Observation, probed: bool) {
        if probed {
            self.add_probe(before.probe_latency_ms, after.probe_latency_ms);
        }
        self.add_metrics(before.metrics.as_ref(), after.metrics.as_ref());
        self.add_uptime(before.uptime, after.uptime);
        self.add_resources(before, after);
    }

    pub fn summary(&self) -> Summary {
        let error_pct = if self.total == 0 {
            0.0
        } else {
            round_to(self.errors as f64 / self.total as f64 * 100.0, 2)
        };

        Summary {
            total_actions: self.total,
            errors: self.errors,
            error_pct,
            by_action: self.by_action.clone(),
            by_target: self.by_target.clone(),
            probe: ProbeSummary {
                avg_latency_ms_before: mean(&self.latency.before).map(|v| round_to(v, 2)),
                avg_latency_ms_after: mean(&self.latency.after).map(|v| round_to(v, 2)),
                failed_probes_before: self.failed_probes_before,
                failed_probes_after: self.failed_probes_after,
            },
            prom: self
                .metrics
                .iter()
                .map(|(alias, series)| (alias.clone(), series.averages(6)))
                .collect(),
            uptime: UptimeSummary {
                averages: self.uptime.averages(6),
                missing_before: self.uptime_missing_before,
                missing_after: self.uptime_missing_after,
            },
            docker: ResourceSummary {
                cpu_pct: self.cpu.averages(3),
                mem_used_bytes: self.mem.averages(1),
            },
        }
    }
}
