use std::hint::black_box;

use chunk_ecs::{Bundle, Command, Init};
use criterion::*;

mod common;
use common::*;

fn spawn_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");
    group.throughput(Throughput::Elements(AGENTS_MED as u64));

    group.bench_function("immediate_100k", |b| {
        b.iter_batched(
            || make_world(0).unwrap(),
            |mut world| {
                populate(&mut world, AGENTS_MED).unwrap();
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("deferred_100k", |b| {
        b.iter_batched(
            || make_world(0).unwrap(),
            |mut world| {
                for i in 0..AGENTS_MED {
                    let bundle = Bundle::new().with(Position { x: i as f32, y: 0.0 }).with(Energy { value: 1.0 });
                    let types = bundle.component_ids(world.registry()).unwrap();
                    world.defer(Command::Create { types, init: Init::Values(bundle) });
                }
                world.flush().unwrap();
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("destroy_100k", |b| {
        b.iter_batched(
            || {
                let mut world = make_world(0).unwrap();
                let energy = world.id_of::<Energy>().unwrap();
                let entities: Vec<_> =
                    (0..AGENTS_MED).map(|_| world.spawn(&[energy], Init::Zeroed).unwrap()).collect();
                (world, entities)
            },
            |(mut world, entities)| {
                for entity in entities {
                    world.destroy(entity);
                }
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, spawn_benchmark);
criterion_main!(benches);
