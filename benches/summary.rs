// Summary Benchmarks (Criterion)
//
// Measures the per-iteration bookkeeping of a chaos run: feeding
// observations into the running statistics and rendering the summary.
//
// Usage:
//   cargo bench --bench summary

use chaos_agent::observe::Observation;
use chaos_agent::runtime::parse_stats_line;
use chaos_agent::stats::RunningStats;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use std::hint::black_box;

fn observation(i: usize) -> Observation {
    let metrics: BTreeMap<String, Option<f64>> = [
        ("cpu_seconds_per_s", Some(0.1 + i as f64 * 0.01)),
        ("rss_bytes", Some(5.0e7 + i as f64)),
        ("throughput_rps", Some(12.0)),
        ("amount_p90", None),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    Observation {
        probe_latency_ms: Some(3.0 + (i % 7) as f64),
        uptime: Some(1.0),
        metrics: Some(metrics),
        resources: parse_stats_line("2.50%|64MiB / 512MiB|12.50%|1kB / 2kB|0B / 0B"),
    }
}

fn filled(iterations: usize) -> RunningStats {
    let mut stats = RunningStats::new();
    for i in 0..iterations {
        let before = observation(i);
        let after = observation(i + 1);
        stats.add_action("cpu_hog", "testapp_cart", i % 5 != 0);
        stats.add_observations(&before, &after, true);
    }
    stats
}

fn bench_record_iteration(c: &mut Criterion) {
    let before = observation(0);
    let after = observation(1);

    c.bench_function("record_iteration", |b| {
        let mut stats = RunningStats::new();
        b.iter(|| {
            stats.add_action("pause", "testapp_payment", true);
            stats.add_observations(black_box(&before), black_box(&after), true);
        });
    });
}

fn bench_summary(c: &mut Criterion) {
    let mut group = c.benchmark_group("summary");

    // a 300s run at a 30s interval is 10 iterations; long soaks reach thousands
    for iterations in [10, 100, 1000].iter() {
        let stats = filled(*iterations);
        group.bench_with_input(
            BenchmarkId::from_parameter(iterations),
            &stats,
            |b, stats| {
                b.iter(|| black_box(stats.summary()));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_record_iteration, bench_summary);
criterion_main!(benches);
