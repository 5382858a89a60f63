//! Unit-of-work benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use idstore_core::{CoreResult, Transaction, TransactionRunner};
use idstore_testkit::TestEnv;

fn nest(runner: &TransactionRunner, depth: usize) -> CoreResult<usize> {
    runner.run_in_transaction_ret(|tx: &Transaction| {
        if depth <= 1 {
            Ok(tx.depth())
        } else {
            nest(runner, depth - 1)
        }
    })
}

/// Benchmark empty units of work nested to various depths.
fn bench_nested(c: &mut Criterion) {
    let mut group = c.benchmark_group("nested_required");
    let env = TestEnv::memory();

    for depth in [1, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| nest(env.runner(), black_box(depth)).unwrap());
        });
    }
    group.finish();
}

/// Benchmark a separate transaction inside a required one.
fn bench_separate(c: &mut Criterion) {
    let env = TestEnv::memory();
    c.bench_function("separate_inside_required", |b| {
        b.iter(|| {
            env.runner()
                .run_in_transaction(|_| env.runner().run_in_separate_transaction(|_| Ok(())))
                .unwrap();
        });
    });
}

criterion_group!(benches, bench_nested, bench_separate);
criterion_main!(benches);
