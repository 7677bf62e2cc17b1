#![allow(dead_code)]

use bytemuck::{Pod, Zeroable};
use chunk_ecs::prelude::*;

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;

#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Component for Position {}

#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

impl Component for Velocity {}

#[repr(C)]
#[derive(Clone, Copy, Default, Pod, Zeroable)]
pub struct Energy {
    pub value: f32,
}

impl Component for Energy {
    fn schema() -> Schema {
        Schema::builder().field::<f32>("value").build()
    }
}

pub fn make_world(threads: usize) -> ECSResult<World> {
    World::builder()
        .threads(threads)
        .component::<Position>()
        .component::<Velocity>()
        .component::<Energy>()
        .build()
}

pub fn populate(world: &mut World, agents: usize) -> ECSResult<()> {
    for i in 0..agents {
        let bundle = Bundle::new()
            .with(Position { x: i as f32, y: 0.0 })
            .with(Velocity { x: 1.0, y: 0.5 })
            .with(Energy { value: 100.0 });
        world.spawn_bundle(bundle)?;
    }
    Ok(())
}
