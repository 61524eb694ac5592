//! Performance benchmarks for FORAGE-SWEEP

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use forage_sweep::analysis::bootstrap::bootstrap_ci;
use forage_sweep::analysis::survival::{km_curve, rmst_km};
use forage_sweep::grid::Field;
use forage_sweep::rng::SimRng;
use forage_sweep::{Mode, SimConfig, World};
use ndarray::Array2;

fn benchmark_world_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("world_update");

    for agents in [0usize, 50, 200].iter() {
        let config = SimConfig {
            grid_size: 61,
            initial_agents: *agents,
            max_agents: 1000,
            seed: 42,
            ..Default::default()
        };
        let mut world = World::new(config).unwrap();

        // Warm up
        for _ in 0..10 {
            world.update(Mode::Informed).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("agents", agents), agents, |b, _| {
            b.iter(|| world.update(Mode::Informed).unwrap());
        });
    }

    group.finish();
}

fn benchmark_diffusion(c: &mut Criterion) {
    let mut field = Field::uniform(101, 1.0);
    field.set(50, 50, 100.0);
    let mut proxy = Array2::zeros((101, 101));

    c.bench_function("diffuse_101", |b| {
        b.iter(|| field.diffuse(black_box(0.2), 1.0, 1.0, &mut proxy));
    });
}

fn benchmark_statistics(c: &mut Criterion) {
    let mut rng = SimRng::new(7);
    let times: Vec<f64> = (0..200).map(|_| (rng.uniform() * 2000.0).floor()).collect();
    let events: Vec<bool> = (0..200).map(|_| rng.uniform() < 0.7).collect();

    c.bench_function("km_curve_200", |b| {
        b.iter(|| km_curve(black_box(&times), black_box(&events)));
    });

    c.bench_function("rmst_200", |b| {
        b.iter(|| rmst_km(black_box(&times), black_box(&events), 2000.0));
    });

    c.bench_function("bootstrap_ci_200x2000", |b| {
        b.iter(|| bootstrap_ci(black_box(&times), 2000, 0.05, &mut rng));
    });
}

criterion_group!(benches, benchmark_world_update, benchmark_diffusion, benchmark_statistics);
criterion_main!(benches);
