use std::hint::black_box;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chunk_ecs::QueryBuilder;
use criterion::*;
use rayon::prelude::*;

mod common;
use common::*;

fn iterate_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");
    group.throughput(Throughput::Elements(AGENTS_MED as u64));

    for threads in [0usize, 2, 4] {
        let mut world = make_world(threads).unwrap();
        populate(&mut world, AGENTS_MED).unwrap();
        let integrate = {
            let descriptor = QueryBuilder::new(world.registry()).write::<Position>().read::<Velocity>().build();
            world.register_query(&descriptor)
        };

        group.bench_with_input(BenchmarkId::new("integrate_parallel", threads), &threads, |b, _| {
            b.iter(|| {
                let (store, jobs) = world.jobs();
                let mut handle = jobs.schedule_parallel(store, &integrate, |view, _| {
                    let velocity = view.read::<Velocity>()?;
                    let mut position = view.write::<Position>()?;
                    for (p, v) in position.iter_mut().zip(velocity.iter()) {
                        p.x += v.x * 0.016;
                        p.y += v.y * 0.016;
                    }
                    Ok(())
                });
                handle.complete(jobs).unwrap();
            });
        });

        let drain = {
            let descriptor = QueryBuilder::new(world.registry()).read::<Energy>().build();
            world.register_query(&descriptor)
        };
        group.bench_with_input(BenchmarkId::new("sum_energy", threads), &threads, |b, _| {
            b.iter(|| {
                let total = Arc::new(AtomicU64::new(0));
                let sink = Arc::clone(&total);
                let (store, jobs) = world.jobs();
                let mut handle = jobs.schedule_parallel(store, &drain, move |view, _| {
                    let sum: f32 = view.read::<Energy>()?.iter().map(|e| e.value).sum();
                    sink.fetch_add(sum as u64, Ordering::Relaxed);
                    Ok(())
                });
                handle.complete(jobs).unwrap();
                black_box(total.load(Ordering::Relaxed));
            });
        });

        world.dispose().unwrap();
    }

    // Plain slices as a lower bound.
    let mut positions = vec![Position::default(); AGENTS_MED];
    let velocities = vec![Velocity { x: 1.0, y: 0.5 }; AGENTS_MED];
    group.bench_function("rayon_baseline", |b| {
        b.iter(|| {
            positions.par_iter_mut().zip(velocities.par_iter()).for_each(|(p, v)| {
                p.x += v.x * 0.016;
                p.y += v.y * 0.016;
            });
            black_box(&positions);
        });
    });

    group.finish();
}

criterion_group!(benches, iterate_benchmark);
criterion_main!(benches);
