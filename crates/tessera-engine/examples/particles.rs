//! Particle fountain: spawns particles, moves them on the worker pool and
//! retires them when their lifetime runs out.
//!
//! Run with: `RUST_LOG=debug cargo run -p tessera-engine --example particles`

use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tessera_engine::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
}

/// Remaining fixed steps before the particle is destroyed.
#[derive(Debug, Clone, PartialEq)]
struct Lifetime(u32);

/// Particle source. Persistent, so it survives a scene reset.
#[derive(Debug, Clone, PartialEq)]
struct Emitter;

impl Component for Position {}
impl Component for Velocity {}
impl Component for Lifetime {}
impl Component for Emitter {}

fn spawn_emitter(ctx: &SystemContext<'_>) {
    ctx.staging.stage_new_entity(
        ComponentMap::new()
            .with(Emitter)
            .with(Position { x: 0.0, y: 0.0 })
            .with(Persistent),
    );
}

fn emit(ctx: &SystemContext<'_>) {
    for (_, (origin, _)) in ctx.registry.view::<(&Position, &Emitter)>().iter() {
        let spread = (ctx.time.frame % 7) as f32 - 3.0;
        ctx.staging.stage_new_entity(
            ComponentMap::new()
                .with(origin.clone())
                .with(Velocity { dx: spread, dy: 10.0 })
                .with(Lifetime(30)),
        );
    }
}

fn integrate(ctx: &SystemContext<'_>) {
    let dt = ctx.time.fixed_step.as_secs_f32();
    for (entity, (pos, vel)) in ctx.registry.view::<(&Position, &Velocity)>().iter() {
        ctx.staging.stage_set(
            entity,
            Position {
                x: pos.x + vel.dx * dt,
                y: pos.y + vel.dy * dt,
            },
        );
    }
}

fn age(ctx: &SystemContext<'_>) {
    for (entity, (life,)) in ctx.registry.view::<(&Lifetime,)>().iter() {
        if life.0 == 0 {
            ctx.staging.stage_destroy(ctx.registry, entity);
        } else {
            ctx.staging.stage_set(entity, Lifetime(life.0 - 1));
        }
    }
}

fn report(ctx: &SystemContext<'_>) {
    info!(
        frame = ctx.time.frame,
        particles = ctx.registry.view::<(&Lifetime,)>().size(),
        archetypes = ctx.registry.archetype_count(),
        "fountain status"
    );
}

fn has_emitter(registry: &Registry) -> bool {
    !registry.view::<(&Emitter,)>().is_empty()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = EngineConfig::from_json(r#"{ "fixed_step_secs": 0.02, "reserved_threads": 1 }"#)?;
    let mut scheduler = Scheduler::new(config)?;

    scheduler
        .add_group(
            Stage::Start,
            SystemGroup::new("setup").with_system("spawn_emitter", spawn_emitter),
        )
        .add_group(
            Stage::Main,
            SystemGroup::new("emission")
                .run_if(has_emitter)
                .with_system("emit", emit),
        )
        .add_group(
            Stage::FixedThreaded,
            SystemGroup::new("simulation")
                .with_system("integrate", integrate)
                .with_system("age", age),
        )
        .add_group(
            Stage::Late,
            SystemGroup::new("diagnostics")
                .run_if(|registry| registry.entity_count() > 0)
                .with_system("report", report),
        );

    scheduler.run_frames(60, Duration::from_millis(16));

    let diag = scheduler.last_diagnostics();
    info!(
        frames = scheduler.frame_count(),
        last_fixed_steps = diag.fixed_steps,
        last_frame_us = diag.total_time.as_micros() as u64,
        "fountain simulated"
    );

    // A scene reset keeps the persistent emitter and drops every particle.
    scheduler.staging().stage_scene_reset(|_| {});
    scheduler.run_frame(Duration::from_millis(16));

    let registry = scheduler.registry();
    info!(
        entities = registry.entity_count(),
        emitters = registry.view::<(&Emitter,)>().size(),
        "after scene reset"
    );
    anyhow::ensure!(registry.is_consistent(), "registry invariants violated");
    Ok(())
}
