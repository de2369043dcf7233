/*
 * STRESS FORGE - ENGINE BENCHMARKS
 * =================================================================
 * Component Name: benches/engine_bench.rs
 * Core Responsibility: Barrier round throughput and aggregator merge cost.
 * Design Pattern: Statistical Benchmarking
 * Forensic Impact: Round cost bounds how many samples a time budget can buy.
 * =================================================================
 */

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stress_forge::harness::{GenerationEngine, IntOutcome, IntResult, SpinLoopStyle, StrideRange, StressTest};
use stress_forge::ResultAggregator;

fn counting_test(actors: usize) -> Arc<StressTest<AtomicI64, IntResult<1>>> {
    let mut builder = StressTest::<AtomicI64, IntResult<1>>::builder("bench", || AtomicI64::new(0));
    for a in 0..actors {
        builder = builder.actor(format!("actor{}", a), |s, _| {
            s.fetch_add(1, Ordering::Relaxed);
        });
    }
    Arc::new(
        builder
            .arbiter(|s, r| r.set(0, s.load(Ordering::Relaxed)))
            .build()
            .unwrap(),
    )
}

/// Time per 1000 barrier rounds on a one-pair pool.
fn bench_rounds(c: &mut Criterion) {
    let mut group = c.benchmark_group("barrier_rounds_x1000");
    group.sample_size(10);

    for actors in [2usize, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(actors), &actors, |b, &actors| {
            b.iter_custom(|iters| {
                let mut total = Duration::ZERO;
                for _ in 0..iters {
                    let engine =
                        GenerationEngine::new(counting_test(actors), StrideRange::fixed(1, 1), SpinLoopStyle::Yield);
                    let handle = engine.start().unwrap();
                    let start = Instant::now();
                    while handle.stats().publishes < 1_000 {
                        thread::yield_now();
                    }
                    total += start.elapsed();
                    handle.stop();
                    handle.join().unwrap();
                }
                total
            })
        });
    }
    group.finish();
}

fn bench_aggregator_merge(c: &mut Criterion) {
    let mut left = ResultAggregator::new();
    let mut right = ResultAggregator::new();
    for i in 0..64i64 {
        left.record_n(IntOutcome([i, i % 3]), 10);
        right.record_n(IntOutcome([i / 2, i % 5]), 7);
    }

    c.bench_function("aggregator_merge_64", |b| {
        b.iter(|| black_box(left.merge(black_box(&right))))
    });
}

criterion_group!(benches, bench_rounds, bench_aggregator_merge);
criterion_main!(benches);
