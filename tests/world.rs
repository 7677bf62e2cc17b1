mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chunk_ecs::prelude::*;
use chunk_ecs::{BuildError, ComponentID, ExecutionError, SpawnError, WorldBuilder};

use common::{Frozen, Health, Position, Velocity};

fn base(threads: usize) -> WorldBuilder {
    World::builder()
        .threads(threads)
        .component::<Position>()
        .component::<Velocity>()
        .component::<Health>()
        .tag::<Frozen>()
}

fn movement() -> impl System {
    FnSystem::new(
        SystemDescriptor::new("movement"),
        |init: &mut SystemInit<'_>| {
            let query = init.query().write::<Position>().read::<Velocity>().without::<Frozen>().build();
            Ok(init.register_query(&query))
        },
        |query: &mut SystemQuery, ctx: &mut SystemContext<'_>| {
            let dt = ctx.delta_time();
            ctx.schedule_parallel(query, move |view, _| {
                let velocity = view.read::<Velocity>()?;
                let mut position = view.write::<Position>()?;
                for (p, v) in position.iter_mut().zip(velocity.iter()) {
                    p.x += v.x * dt;
                    p.y += v.y * dt;
                }
                Ok(())
            });
            Ok(())
        },
    )
}

fn counter(name: &str, runs: Arc<AtomicUsize>) -> impl System {
    FnSystem::new(
        SystemDescriptor::new(name),
        |_: &mut SystemInit<'_>| Ok(()),
        move |_: &mut (), _: &mut SystemContext<'_>| {
            runs.fetch_add(1, Ordering::Relaxed);
            Ok(())
        },
    )
}

#[test]
fn systems_move_entities_each_step() {
    let mut world = base(2).system(movement()).build().unwrap();
    let moving = world
        .spawn_bundle(Bundle::new().with(Position::default()).with(Velocity { x: 2.0, y: -1.0 }))
        .unwrap();
    let frozen = world
        .spawn_bundle(Bundle::new().with(Position::default()).with(Velocity { x: 2.0, y: 0.0 }).tag::<Frozen>())
        .unwrap();

    for _ in 0..4 {
        world.step(0.5).unwrap();
    }

    assert_eq!(world.get::<Position>(moving), Some(Position { x: 4.0, y: -2.0 }));
    assert_eq!(world.get::<Position>(frozen), Some(Position::default()));
    assert_eq!(world.step_index(), 4);
    world.dispose().unwrap();
}

#[test]
fn writer_results_are_visible_to_later_readers() {
    let seen = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&seen);

    let damage = FnSystem::new(
        SystemDescriptor::new("damage"),
        |init: &mut SystemInit<'_>| {
            let query = init.query().write::<Health>().build();
            Ok(init.register_query(&query))
        },
        |query: &mut SystemQuery, ctx: &mut SystemContext<'_>| {
            let step = ctx.step() as f32;
            ctx.schedule_parallel(query, move |view, _| {
                for health in view.write::<Health>()?.iter_mut() {
                    health.current = step;
                }
                Ok(())
            });
            Ok(())
        },
    );
    let report = FnSystem::new(
        SystemDescriptor::new("report").after("damage"),
        |init: &mut SystemInit<'_>| {
            let query = init.query().read::<Health>().build();
            Ok(init.register_query(&query))
        },
        move |query: &mut SystemQuery, ctx: &mut SystemContext<'_>| {
            let step = ctx.step() as f32;
            let observed = Arc::clone(&observed);
            ctx.schedule_parallel(query, move |view, _| {
                let column = view.read::<Health>()?;
                if column.iter().any(|h| h.current != step) {
                    return Err(ECSError::custom("reader saw a stale value"));
                }
                observed.fetch_add(column.len(), Ordering::Relaxed);
                Ok(())
            });
            Ok(())
        },
    );

    let mut world = base(4)
        .config(WorldConfig { chunk_byte_budget: 256, ..WorldConfig::default() })
        .threads(4)
        .system(report)
        .system(damage)
        .build()
        .unwrap();
    assert_eq!(world.system_order(), ["damage", "report"]);

    let health = world.id_of::<Health>().unwrap();
    for _ in 0..300 {
        world.spawn(&[health], Init::Zeroed).unwrap();
    }
    for _ in 0..5 {
        world.step(1.0).unwrap();
    }
    world.dispose().unwrap();
    assert_eq!(seen.load(Ordering::Relaxed), 1500);
}

#[test]
fn readers_are_planned_before_writers_by_default() {
    let noop_with = |name: &'static str, write: bool| {
        FnSystem::new(
            SystemDescriptor::new(name),
            move |init: &mut SystemInit<'_>| {
                let builder = init.query();
                let builder = if write { builder.write::<Health>() } else { builder.read::<Health>() };
                let query = builder.build();
                Ok(init.register_query(&query))
            },
            |_: &mut SystemQuery, _: &mut SystemContext<'_>| Ok(()),
        )
    };
    let world = base(0).system(noop_with("writer", true)).system(noop_with("reader", false)).build().unwrap();

    assert_eq!(world.system_order(), ["reader", "writer"]);
}

#[test]
fn tick_rate_gates_updates() {
    let every = Arc::new(AtomicUsize::new(0));
    let third = Arc::new(AtomicUsize::new(0));
    let slow = FnSystem::new(
        SystemDescriptor::new("slow").tick_rate(3),
        |_: &mut SystemInit<'_>| Ok(()),
        {
            let third = Arc::clone(&third);
            move |_: &mut (), _: &mut SystemContext<'_>| {
                third.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        },
    );

    let mut world = base(0).system(counter("fast", Arc::clone(&every))).system(slow).build().unwrap();
    for _ in 0..9 {
        world.step(0.1).unwrap();
    }

    assert_eq!(every.load(Ordering::Relaxed), 9);
    assert_eq!(third.load(Ordering::Relaxed), 3);
}

#[test]
fn deactivated_systems_do_not_run() {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut world = base(0).system(counter("counted", Arc::clone(&runs))).build().unwrap();

    world.step(0.1).unwrap();
    assert!(world.deactivate_system("counted"));
    world.step(0.1).unwrap();
    assert_eq!(world.is_system_active("counted"), Some(false));
    assert!(world.activate_system("counted"));
    world.step(0.1).unwrap();

    assert_eq!(runs.load(Ordering::Relaxed), 2);
    assert!(!world.activate_system("missing"));
}

#[test]
fn deferred_commands_apply_at_the_next_step() {
    let spawner = FnSystem::new(
        SystemDescriptor::new("spawner"),
        |init: &mut SystemInit<'_>| Ok(init.registry().id_of::<Health>().unwrap_or_default()),
        |health: &mut ComponentID, ctx: &mut SystemContext<'_>| {
            let health = *health;
            ctx.commands().create(&[health], Init::Values(Bundle::new().with(Health { current: 1.0, max: 1.0 })));
            Ok(())
        },
    );
    let mut world = base(2).system(spawner).build().unwrap();

    world.step(1.0).unwrap();
    assert_eq!(world.store().len(), 0);
    assert_eq!(world.pending_commands(), 1);

    world.step(1.0).unwrap();
    assert_eq!(world.store().len(), 1);

    world.flush().unwrap();
    assert_eq!(world.store().len(), 2);
}

#[test]
fn jobs_can_destroy_entities_through_commands() {
    let reaper = FnSystem::new(
        SystemDescriptor::new("reaper"),
        |init: &mut SystemInit<'_>| {
            let query = init.query().read::<Health>().build();
            Ok(init.register_query(&query))
        },
        |query: &mut SystemQuery, ctx: &mut SystemContext<'_>| {
            ctx.schedule(query, |view, commands| {
                let health = view.read::<Health>()?;
                for (row, entity) in view.entities().iter().enumerate() {
                    if health[row].current <= 0.0 {
                        commands.destroy(*entity);
                    }
                }
                Ok(())
            });
            Ok(())
        },
    );
    let mut world = base(2).system(reaper).build().unwrap();
    let dead = world.spawn_bundle(Bundle::new().with(Health { current: 0.0, max: 10.0 })).unwrap();
    let alive = world.spawn_bundle(Bundle::new().with(Health { current: 5.0, max: 10.0 })).unwrap();

    world.step(1.0).unwrap();
    // Job commands surface once the job is observed complete.
    world.flush().unwrap();

    assert!(!world.exists(dead));
    assert!(world.exists(alive));
}

#[test]
fn stale_deferred_commands_are_skipped() {
    let mut world = base(0).build().unwrap();
    let position = world.id_of::<Position>().unwrap();
    let e = world.spawn(&[position], Init::Zeroed).unwrap();

    world.defer(Command::Destroy { entity: e });
    world.defer(Command::Attach { entity: e, types: vec![position], init: Init::Zeroed });
    world.destroy(e);

    let stats = world.flush().unwrap();
    assert_eq!(stats.skipped, 2);
    world.step(0.0).unwrap();
}

#[test]
fn immediate_mutations_fence_running_jobs() {
    let mut world = base(2).system(movement()).build().unwrap();
    let position = world.id_of::<Position>().unwrap();
    let velocity = world.id_of::<Velocity>().unwrap();
    let e = world
        .spawn(&[position, velocity], Init::Values(Bundle::new().with(Velocity { x: 1.0, y: 0.0 })))
        .unwrap();

    let health = world.id_of::<Health>().unwrap();
    for i in 0..10 {
        world.step(1.0).unwrap();
        // Structural changes while movement jobs may still be running.
        world.attach(e, &[health], Init::Zeroed).unwrap();
        world.detach(e, &[health]).unwrap();
        world.spawn(&[position, velocity], Init::Zeroed).unwrap();
        assert_eq!(world.get::<Position>(e).map(|p| p.x), Some(i as f32 + 1.0));
    }
}

#[test]
fn component_queries_on_entities() {
    let mut world = base(0).build().unwrap();
    let e = world
        .spawn_bundle(Bundle::new().with_field::<Health, f32>("max", 20.0).tag::<Frozen>())
        .unwrap();

    assert!(world.has_component::<Health>(e));
    assert!(world.has_component::<Frozen>(e));
    assert!(!world.has_component::<Position>(e));
    assert_eq!(world.get::<Health>(e), Some(Health { current: 0.0, max: 20.0 }));

    world.set(e, Health { current: 5.0, max: 20.0 }).unwrap();
    assert_eq!(world.get::<Health>(e).map(|h| h.current), Some(5.0));
    assert_eq!(world.get::<Position>(e), None);
}

#[test]
fn resources_reach_systems() {
    struct Gravity(f32);
    let seen = Arc::new(AtomicUsize::new(0));
    let reader = FnSystem::new(
        SystemDescriptor::new("reader"),
        |init: &mut SystemInit<'_>| Ok(init.resources().contains::<Gravity>()),
        {
            let seen = Arc::clone(&seen);
            move |present: &mut bool, ctx: &mut SystemContext<'_>| {
                let gravity = ctx.resource::<Gravity>().map_or(0.0, |g| g.0);
                let scratch = ctx.resources().make::<Vec<u32>>().unwrap_or_default();
                if *present && gravity == 9.81 && scratch.capacity() >= 16 {
                    seen.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            }
        },
    );

    let mut world = base(0)
        .singleton(Gravity(9.81))
        .transient(|| Vec::<u32>::with_capacity(16))
        .system(reader)
        .build()
        .unwrap();
    world.step(0.0).unwrap();

    assert_eq!(seen.load(Ordering::Relaxed), 1);
}

#[test]
fn system_errors_propagate_from_step() {
    let failing = FnSystem::new(
        SystemDescriptor::new("failing"),
        |_: &mut SystemInit<'_>| Ok(()),
        |_: &mut (), _: &mut SystemContext<'_>| Err(ECSError::custom("bad update")),
    );
    let mut world = base(0).system(failing).build().unwrap();

    assert!(matches!(world.step(0.0), Err(ECSError::Custom(message)) if message == "bad update"));
    assert_eq!(world.step_index(), 1);
}

#[test]
fn init_errors_abort_the_build() {
    let broken = FnSystem::new(
        SystemDescriptor::new("broken"),
        |_: &mut SystemInit<'_>| -> ECSResult<()> { Err(ECSError::custom("no init")) },
        |_: &mut (), _: &mut SystemContext<'_>| Ok(()),
    );
    assert!(base(0).system(broken).build().is_err());
}

#[test]
fn invalid_config_is_rejected() {
    let config = WorldConfig::from_toml_str("threads = 0\nmax_entities = 0\n").unwrap();
    let err = base(0).config(config).build().unwrap_err();
    assert!(matches!(err, ECSError::Build(BuildError::InvalidConfig(_))));
}

#[test]
fn entity_limit_comes_from_config() {
    let config = WorldConfig { threads: 0, max_entities: 3, ..WorldConfig::default() };
    let mut world = base(0).config(config).build().unwrap();
    let health = world.id_of::<Health>().unwrap();
    for _ in 0..3 {
        world.spawn(&[health], Init::Zeroed).unwrap();
    }
    assert!(matches!(
        world.spawn(&[health], Init::Zeroed),
        Err(ECSError::Spawn(SpawnError::Capacity(_)))
    ));
}

#[test]
fn systems_wait_for_their_own_previous_jobs() {
    let started = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    let slow = FnSystem::new(
        SystemDescriptor::new("slow"),
        |init: &mut SystemInit<'_>| {
            let query = init.query().write::<Health>().build();
            Ok(init.register_query(&query))
        },
        {
            let (started, finished) = (Arc::clone(&started), Arc::clone(&finished));
            move |query: &mut SystemQuery, ctx: &mut SystemContext<'_>| {
                let runs = started.fetch_add(1, Ordering::SeqCst);
                if finished.load(Ordering::SeqCst) != runs {
                    return Err(ECSError::custom("update overlapped its previous job"));
                }
                let finished = Arc::clone(&finished);
                ctx.schedule(query, move |view, _| {
                    std::thread::sleep(Duration::from_millis(20));
                    view.write::<Health>()?[0].current += 1.0;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                Ok(())
            }
        },
    );
    let mut world = base(2).system(slow).build().unwrap();
    let e = world.spawn_bundle(Bundle::new().with(Health::default())).unwrap();

    for _ in 0..5 {
        world.step(0.1).unwrap();
    }

    assert_eq!(started.load(Ordering::SeqCst), 5);
    assert_eq!(world.get::<Health>(e).map(|h| h.current), Some(5.0));
}

fn failing_health_writer(world: &mut World) -> JobHandle {
    let query = {
        let health = world.id_of::<Health>().unwrap();
        world.register_query(&chunk_ecs::QueryDescriptor::new().write(health))
    };
    let (store, jobs) = world.jobs();
    jobs.schedule(store, &query, |_, _| Err(ECSError::custom("health job failed")))
}

#[test]
fn immediate_operations_ignore_failures_of_other_jobs() {
    let mut world = base(2).build().unwrap();
    let target = world.spawn_bundle(Bundle::new().with(Health::default())).unwrap();
    let mut failing = failing_health_writer(&mut world);

    let spawned = world.spawn_bundle(Bundle::new().with(Position { x: 1.0, y: 1.0 })).unwrap();
    world.set(spawned, Position { x: 2.0, y: 2.0 }).unwrap();
    let velocity = world.id_of::<Velocity>().unwrap();
    world.attach(spawned, &[velocity], Init::Zeroed).unwrap();
    world.destroy(target);

    assert_eq!(world.store().len(), 1);
    assert_eq!(world.get::<Position>(spawned), Some(Position { x: 2.0, y: 2.0 }));
    assert_eq!(world.scheduler_mut().unclaimed_failures(), 1);

    let err = failing.complete(world.scheduler_mut()).unwrap_err();
    assert!(matches!(err, ECSError::Execution(ExecutionError::JobFailed { .. })));
    assert_eq!(world.scheduler_mut().unclaimed_failures(), 0);
    world.dispose().unwrap();
}

#[test]
fn failing_system_jobs_surface_on_the_next_update() {
    let failing = FnSystem::new(
        SystemDescriptor::new("failing"),
        |init: &mut SystemInit<'_>| {
            let query = init.query().write::<Health>().build();
            Ok(init.register_query(&query))
        },
        |query: &mut SystemQuery, ctx: &mut SystemContext<'_>| {
            ctx.schedule(query, |_, _| Err(ECSError::custom("bad job")));
            Ok(())
        },
    );
    let mut world = base(2).system(failing).build().unwrap();
    world.spawn_bundle(Bundle::new().with(Health::default())).unwrap();

    world.step(0.1).unwrap();
    world.spawn_bundle(Bundle::new().with(Health::default())).unwrap();
    assert_eq!(world.store().len(), 2);

    let err = world.step(0.1).unwrap_err();
    assert!(matches!(err, ECSError::Execution(ExecutionError::JobFailed { .. })));
}

#[test]
fn dispose_reports_unclaimed_job_failures() {
    let mut world = base(2).build().unwrap();
    world.spawn_bundle(Bundle::new().with(Health::default())).unwrap();
    drop(failing_health_writer(&mut world));

    assert!(matches!(world.dispose(), Err(ECSError::Execution(ExecutionError::JobFailed { .. }))));
}
