//! Registry and staging buffer benchmarks.
//!
//! Covers the per-frame hot paths: view iteration, staged value writes,
//! structural migration and bulk creation through the staging buffer.
//!
//! Run with: `cargo bench --bench ecs_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use tessera_ecs::prelude::*;

// ---------------------------------------------------------------------------
// Benchmark component types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Position {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Velocity {
    dx: f64,
    dy: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Health(u32);

impl Component for Position {}
impl Component for Velocity {}
impl Component for Health {}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A registry with `entity_count` entities spread over four archetypes.
fn setup_registry(entity_count: usize) -> (Registry, Vec<Entity>) {
    let mut registry = Registry::new();
    let mut entities = Vec::with_capacity(entity_count);
    for i in 0..entity_count {
        let mut components = ComponentMap::new().with(Position {
            x: i as f64,
            y: 0.0,
        });
        if i % 2 == 0 {
            components.insert(Velocity { dx: 1.0, dy: 0.5 });
        }
        if i % 4 == 0 {
            components.insert(Health(100));
        }
        let e = registry.allocate_entity();
        registry
            .create(e, components)
            .expect("fresh entity accepts its initial components");
        entities.push(e);
    }
    (registry, entities)
}

// ---------------------------------------------------------------------------
// Benchmark 1: View iteration
// ---------------------------------------------------------------------------

fn bench_view_iteration(c: &mut Criterion) {
    let (registry, _entities) = setup_registry(10_000);

    c.bench_function("view_position_velocity_10k", |b| {
        b.iter(|| {
            let mut sum = 0.0;
            for (_, (pos, vel)) in registry.view::<(&Position, &Velocity)>().iter() {
                sum += pos.x * vel.dx + pos.y * vel.dy;
            }
            black_box(sum);
        });
    });
}

// ---------------------------------------------------------------------------
// Benchmark 2: Staged value writes applied at the sync point
// ---------------------------------------------------------------------------

fn bench_staged_set_apply(c: &mut Criterion) {
    let (mut registry, _entities) = setup_registry(1_000);
    let staging = StagingBuffer::new(&registry);

    c.bench_function("staged_set_apply_1k", |b| {
        b.iter(|| {
            for (e, (pos, vel)) in registry.view::<(&Position, &Velocity)>().iter() {
                staging.stage_set(
                    e,
                    Position {
                        x: pos.x + vel.dx,
                        y: pos.y + vel.dy,
                    },
                );
            }
            black_box(staging.apply(&mut registry));
        });
    });
}

// ---------------------------------------------------------------------------
// Benchmark 3: Structural migration
// ---------------------------------------------------------------------------

fn bench_add_remove_migration(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_remove_migration");

    for &count in &[100usize, 1_000, 5_000] {
        let (mut registry, entities) = setup_registry(count);
        let targets: Vec<Entity> = entities
            .iter()
            .copied()
            .filter(|e| !registry.has::<Health>(*e))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &_count| {
            b.iter(|| {
                for e in &targets {
                    let _ = registry.add_component(*e, Health(1));
                }
                for e in &targets {
                    let _ = registry.remove_component::<Health>(*e);
                }
                black_box(registry.archetype_count());
            });
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark 4: Bulk creation and destruction through the staging buffer
// ---------------------------------------------------------------------------

fn bench_staged_spawn_despawn(c: &mut Criterion) {
    let mut registry = Registry::new();
    let staging = StagingBuffer::new(&registry);

    c.bench_function("staged_spawn_despawn_1k", |b| {
        b.iter(|| {
            let spawned: Vec<Entity> = (0..1_000)
                .map(|i| {
                    staging.stage_new_entity(
                        ComponentMap::new()
                            .with(Position { x: i as f64, y: 0.0 })
                            .with(Health(10)),
                    )
                })
                .collect();
            staging.apply(&mut registry);
            for e in spawned {
                staging.stage_destroy(&registry, e);
            }
            black_box(staging.apply(&mut registry));
        });
    });
}

// ---------------------------------------------------------------------------
// Criterion groups and main
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_view_iteration,
    bench_staged_set_apply,
    bench_add_remove_migration,
    bench_staged_spawn_despawn,
);
criterion_main!(benches);
