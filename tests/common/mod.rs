#![allow(dead_code)]

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use chunk_ecs::{Component, ComponentID, ComponentRegistry, EntityStore, Schema};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Component for Position {
    fn schema() -> Schema {
        Schema::builder().field::<f32>("x").field::<f32>("y").build()
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

impl Component for Velocity {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Health {
    pub current: f32,
    pub max: f32,
}

impl Component for Health {
    fn schema() -> Schema {
        Schema::builder().field::<f32>("current").field::<f32>("max").build()
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct A(pub u64);
impl Component for A {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct B(pub u32);
impl Component for B {}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct C(pub u16);
impl Component for C {}

/// Zero-size marker.
pub struct Frozen;

pub struct Ids {
    pub position: ComponentID,
    pub velocity: ComponentID,
    pub health: ComponentID,
    pub a: ComponentID,
    pub b: ComponentID,
    pub c: ComponentID,
    pub frozen: ComponentID,
}

pub fn registry() -> (Arc<ComponentRegistry>, Ids) {
    let mut registry = ComponentRegistry::new();
    let ids = Ids {
        position: registry.register::<Position>(),
        velocity: registry.register::<Velocity>(),
        health: registry.register::<Health>(),
        a: registry.register::<A>(),
        b: registry.register::<B>(),
        c: registry.register::<C>(),
        frozen: registry.register_tag::<Frozen>(),
    };
    (Arc::new(registry), ids)
}

pub fn store_with_budget(budget: usize, max_entities: u64) -> (EntityStore, Ids) {
    let (registry, ids) = registry();
    (EntityStore::new(registry, budget, max_entities), ids)
}

pub fn store() -> (EntityStore, Ids) {
    store_with_budget(16 * 1024, 1 << 20)
}

/// Small deterministic generator for operation sequences.
pub struct Lcg(pub u64);

impl Lcg {
    pub fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    pub fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}
