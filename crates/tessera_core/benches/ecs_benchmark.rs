//! # ECS Benchmark
//!
//! Allocation, cached queries and sequential vs parallel iteration.
//!
//! Run with: `cargo bench --package tessera_core`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tessera_core::{ArenaConfig, EntityId, Position, Velocity, World, WorldConfig};

fn populated(count: usize) -> World {
    let config = WorldConfig {
        entities: ArenaConfig::new(count, count),
        components: ArenaConfig::new(count, count),
        ..WorldConfig::default()
    };
    let mut world = World::new(config).unwrap();
    world.register_component::<Position>().unwrap();
    world.register_component::<Velocity>().unwrap();
    for i in 0..count {
        let entity = world.spawn();
        let p = world.create_with(Position::new(i as f32, 0.0)).unwrap();
        let v = world.create_with(Velocity::new(1.0, 1.0)).unwrap();
        world.add_component(entity, p).unwrap();
        world.add_component(entity, v).unwrap();
    }
    world
}

fn bench_spawn(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_with_components");
    for count in [1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| black_box(populated(count).entity_count()));
        });
    }
    group.finish();
}

fn bench_query_cache(c: &mut Criterion) {
    let world = populated(10_000);
    c.bench_function("query_cached_10k", |b| {
        b.iter(|| black_box(world.query::<(Position, Velocity)>().unwrap().len()));
    });
}

fn bench_iteration(c: &mut Criterion) {
    let mut group = c.benchmark_group("for_each_10k");
    let mut world = populated(10_000);
    for parallel in [false, true] {
        group.bench_with_input(BenchmarkId::from_parameter(parallel), &parallel, |b, &parallel| {
            b.iter(|| {
                world
                    .for_each::<(Position, Velocity), _>(parallel, |_: EntityId, p: &mut Position, v: &mut Velocity| {
                        p.integrate(*v, 1.0 / 60.0);
                    })
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_spawn, bench_query_cache, bench_iteration);
criterion_main!(benches);
