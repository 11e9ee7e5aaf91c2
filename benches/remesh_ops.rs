//! Benchmarks for the remeshing stages.

use criterion::{criterion_group, criterion_main, Criterion};
use quadmesh::algo::hierarchy::Hierarchy;
use quadmesh::algo::orientation::solve_orientation;
use quadmesh::algo::prepare::prepare;
use quadmesh::algo::Progress;
use quadmesh::mesh::primitives::{icosphere, torus};
use quadmesh::prelude::*;

fn bench_hierarchy(c: &mut Criterion) {
    let mesh = icosphere(1.0, 4).unwrap();
    let config = Config::default().with_target_faces(2000);

    c.bench_function("hierarchy_icosphere_4", |b| {
        b.iter(|| {
            let working = prepare(&mesh, &config).unwrap();
            Hierarchy::build(working, config.parallel).unwrap()
        });
    });
}

fn bench_orientation(c: &mut Criterion) {
    let mesh = icosphere(1.0, 4).unwrap();
    let config = Config::default().with_target_faces(2000);
    let hierarchy = Hierarchy::build(prepare(&mesh, &config).unwrap(), true).unwrap();
    let progress = Progress::none();

    c.bench_function("orientation_parallel", |b| {
        b.iter(|| solve_orientation(&hierarchy, &config, &progress));
    });

    let sequential = config.clone().sequential();
    c.bench_function("orientation_sequential", |b| {
        b.iter(|| solve_orientation(&hierarchy, &sequential, &progress));
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let mesh = torus(1.0, 0.4, 48, 24).unwrap();
    let mut group = c.benchmark_group("remesh_torus");
    group.sample_size(10);

    let config = Config::default().with_target_faces(1000);
    group.bench_function("default", |b| {
        b.iter(|| remesh(&mesh, &config).unwrap());
    });

    let mcf = config.clone().with_minimum_cost_flow(true);
    group.bench_function("min_cost_flow", |b| {
        b.iter(|| remesh(&mesh, &mcf).unwrap());
    });

    let sat = config.clone().with_aggressive_sat(true);
    group.bench_function("constraint_search", |b| {
        b.iter(|| remesh(&mesh, &sat).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_hierarchy, bench_orientation, bench_pipeline);
criterion_main!(benches);
