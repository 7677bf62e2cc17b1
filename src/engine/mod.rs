//! # Engine Module
//!
//! Internal ECS engine implementation.
//!
//! Layers, bottom up:
//! - ids, signatures and access declarations (`types`)
//! - component registration and field schemas
//! - entity table, chunks and archetypes
//! - the entity store and its query registry
//! - worker pool, job scheduler and deferred commands
//! - planner, systems and the world facade
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod schema;
pub mod component;
pub mod entity;
pub mod storage;
pub mod archetype;
pub mod borrow;
pub mod view;
pub mod query;
pub mod store;
pub mod commands;
pub mod worker;
pub mod scheduler;
pub mod planner;
pub mod systems;
pub mod resources;
pub mod config;
pub mod world;
