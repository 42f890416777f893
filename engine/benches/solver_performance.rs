//! Criterion benchmarks for optimizer throughput

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lootbox_engine::fixtures::{five_tier_skeleton, two_tier_config, two_tier_skeleton};
use lootbox_engine::{EngineConfig, Optimizer, Strategy};

fn benchmark_direct_two_tier(c: &mut Criterion) {
    let config = two_tier_config();
    let skeleton = two_tier_skeleton();
    c.bench_function("direct_two_tier", |b| {
        b.iter(|| {
            Optimizer::new(&config)
                .optimize(black_box(&skeleton), black_box(0.15), Strategy::Direct)
                .unwrap()
        })
    });
}

fn benchmark_direct_five_tier(c: &mut Criterion) {
    let config = EngineConfig::default();
    let skeleton = five_tier_skeleton();
    c.bench_function("direct_five_tier", |b| {
        b.iter(|| {
            Optimizer::new(&config)
                .optimize(black_box(&skeleton), black_box(0.2), Strategy::Direct)
                .unwrap()
        })
    });
}

fn benchmark_evolutionary_five_tier(c: &mut Criterion) {
    let mut config = EngineConfig::default().seeded(42);
    config.evolutionary.generations = 100;
    let skeleton = five_tier_skeleton();
    let mut group = c.benchmark_group("evolutionary");
    group.sample_size(10);
    group.bench_function("five_tier_100_generations", |b| {
        b.iter(|| {
            Optimizer::new(&config)
                .optimize(black_box(&skeleton), black_box(0.2), Strategy::Evolutionary)
                .unwrap()
        })
    });
    group.finish();
}

fn benchmark_feasibility_check(c: &mut Criterion) {
    let config = EngineConfig::default();
    let skeleton = five_tier_skeleton();
    c.bench_function("feasibility_check", |b| {
        b.iter(|| Optimizer::new(&config).feasibility(black_box(&skeleton)))
    });
}

criterion_group!(
    benches,
    benchmark_direct_two_tier,
    benchmark_direct_five_tier,
    benchmark_evolutionary_five_tier,
    benchmark_feasibility_check,
);
criterion_main!(benches);
