//! Particle integration demo.
//!
//! Spawns particles, integrates them with a parallel system, ages them out
//! through deferred destroys and respawns replacements.
//!
//! Run with `RUST_LOG=chunk_ecs=debug cargo run --example particles`.

use bytemuck::{Pod, Zeroable};
use chunk_ecs::prelude::*;
use tracing_subscriber::EnvFilter;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct Position {
    x: f32,
    y: f32,
}

impl Component for Position {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct Velocity {
    x: f32,
    y: f32,
}

impl Component for Velocity {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct Lifetime {
    remaining: f32,
}

impl Component for Lifetime {
    fn schema() -> Schema {
        Schema::builder().field::<f32>("remaining").build()
    }
}

struct Gravity(f32);

const CONFIG: &str = r#"
threads = 4
chunk_byte_budget = 16384
max_entities = 65536
"#;

fn particle(seed: u32) -> Bundle {
    let angle = seed as f32 * 0.618;
    Bundle::new()
        .with(Position::default())
        .with(Velocity { x: angle.cos() * 4.0, y: angle.sin().abs() * 8.0 })
        .with(Lifetime { remaining: 1.0 + (seed % 5) as f32 * 0.5 })
}

fn integrate() -> impl System {
    FnSystem::new(
        SystemDescriptor::new("integrate"),
        |init: &mut SystemInit<'_>| {
            let query = init.query().write::<Position>().write::<Velocity>().build();
            Ok(init.register_query(&query))
        },
        |query: &mut SystemQuery, ctx: &mut SystemContext<'_>| {
            let dt = ctx.delta_time();
            let gravity = ctx.resource::<Gravity>().map_or(-9.81, |g| g.0);
            ctx.schedule_parallel(query, move |view, _| {
                let mut velocity = view.write::<Velocity>()?;
                let mut position = view.write::<Position>()?;
                for (p, v) in position.iter_mut().zip(velocity.iter_mut()) {
                    v.y += gravity * dt;
                    p.x += v.x * dt;
                    p.y += v.y * dt;
                }
                Ok(())
            });
            Ok(())
        },
    )
}

fn age() -> impl System {
    FnSystem::new(
        SystemDescriptor::new("age").after("integrate"),
        |init: &mut SystemInit<'_>| {
            let query = init.query().write::<Lifetime>().build();
            Ok(init.register_query(&query))
        },
        |query: &mut SystemQuery, ctx: &mut SystemContext<'_>| {
            let dt = ctx.delta_time();
            ctx.schedule_parallel(query, move |view, commands| {
                let mut lifetime = view.write::<Lifetime>()?;
                for (row, entity) in view.entities().iter().enumerate() {
                    lifetime[row].remaining -= dt;
                    if lifetime[row].remaining <= 0.0 {
                        commands.destroy(*entity);
                    }
                }
                Ok(())
            });
            Ok(())
        },
    )
}

fn respawn(target: usize) -> impl System {
    FnSystem::new(
        SystemDescriptor::new("respawn").after("age").tick_rate(10),
        |_: &mut SystemInit<'_>| Ok(0u32),
        move |seed: &mut u32, ctx: &mut SystemContext<'_>| {
            let missing = target.saturating_sub(ctx.store().len());
            for _ in 0..missing {
                *seed = seed.wrapping_add(1);
                ctx.commands().create(&[], Init::Values(particle(*seed)));
            }
            if missing > 0 {
                tracing::info!(missing, step = ctx.step(), "respawning particles");
            }
            Ok(())
        },
    )
}

fn main() -> ECSResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = WorldConfig::from_toml_str(CONFIG)?;
    let mut world = World::builder()
        .config(config)
        .component::<Position>()
        .component::<Velocity>()
        .component::<Lifetime>()
        .singleton(Gravity(-9.81))
        .system(respawn(10_000))
        .system(age())
        .system(integrate())
        .build()?;

    tracing::info!(order = ?world.system_order(), "systems planned");

    for seed in 0..10_000 {
        world.spawn_bundle(particle(seed))?;
    }
    for _ in 0..240 {
        world.step(1.0 / 60.0)?;
    }
    world.flush()?;

    tracing::info!(particles = world.store().len(), steps = world.step_index(), "done");
    world.dispose()
}
