//! Benchmarks for k-d tree construction and nearest-node lookup.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqwrs::model::magnon::{MagnonModel, MagnonParams};
use sqwrs::{KdTree, SqwModel};

fn random_records(n: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..5).map(|_| rng.gen_range(-2.0..2.0)).collect())
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("KdTree build");

    for n in [1_000, 10_000, 100_000] {
        let records = random_records(n, 42);
        group.bench_with_input(BenchmarkId::from_parameter(n), &records, |b, records| {
            b.iter(|| black_box(KdTree::load(records.clone(), 4)));
        });
    }
    group.finish();
}

fn bench_nearest(c: &mut Criterion) {
    let mut group = c.benchmark_group("KdTree nearest");

    for n in [1_000, 10_000, 100_000] {
        let tree = KdTree::load(random_records(n, 42), 4);
        let queries: Vec<[f64; 4]> = random_records(256, 7)
            .into_iter()
            .map(|r| [r[0], r[1], r[2], r[3]])
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(n), &queries, |b, queries| {
            b.iter(|| {
                for q in queries {
                    black_box(tree.nearest(q));
                }
            });
        });
    }
    group.finish();
}

fn bench_magnon_evaluate(c: &mut Criterion) {
    let model = MagnonModel::new(MagnonParams::default());
    c.bench_function("magnon evaluate", |b| {
        b.iter(|| black_box(model.evaluate(black_box(1.1), 0.05, 0.0, 0.3)));
    });
}

criterion_group!(benches, bench_build, bench_nearest, bench_magnon_evaluate);
criterion_main!(benches);
