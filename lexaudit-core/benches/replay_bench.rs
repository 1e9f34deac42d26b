//! Benchmarks for trace replay and hashing
//!
//! Measures build, replay and both digest schemes over growing decision logs.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use lexaudit_core::{
    DecisionKind, ExecutionTrace, Metadata, MockClock, Replayer, TraceBuilder,
};

fn build_trace(decisions: usize) -> ExecutionTrace {
    let clock = Arc::new(MockClock::ticking(
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        Duration::milliseconds(1),
    ));
    let mut builder = TraceBuilder::with_clock("bench-case", clock);
    for i in 0..decisions {
        let chunk = format!("chunk:{}", i % 64);
        builder
            .record_decision(
                &format!("step_{}", i),
                DecisionKind::EvidenceCheck,
                "evidence verified against source",
                [chunk],
                None,
                Metadata::new(),
            )
            .unwrap();
    }
    builder.mark_completed();
    builder.build().unwrap()
}

fn bench_build(c: &mut Criterion) {
    c.bench_function("build_1000_decisions", |b| {
        b.iter(|| black_box(build_trace(1000)));
    });
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");
    let replayer = Replayer::new();
    let verified_at = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

    for size in [10usize, 100, 1000, 10_000] {
        let trace = build_trace(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &trace, |b, trace| {
            b.iter(|| black_box(replayer.replay_at(trace, None, verified_at)));
        });
    }
    group.finish();
}

fn bench_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("integrity_hash");
    let trace = build_trace(1000);

    group.bench_function(BenchmarkId::new("full_content", 1000), |b| {
        b.iter(|| black_box(trace.compute_hash()));
    });
    group.bench_function(BenchmarkId::new("summary", 1000), |b| {
        b.iter(|| black_box(trace.compute_summary_hash()));
    });
    group.finish();
}

criterion_group!(benches, bench_build, bench_replay, bench_hash);
criterion_main!(benches);
