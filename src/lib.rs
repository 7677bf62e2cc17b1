//! # Chunk ECS
//!
//! Archetype Entity-Component-System runtime with chunked columnar storage
//! and a dependency-graph job scheduler over a fixed worker pool.
//!
//! ## Design Goals
//! - Archetype + chunk storage for cache-friendly iteration
//! - Jobs declare component access; the scheduler orders conflicting jobs
//! - Structural changes are deferred and applied between steps
//! - Deterministic system order from explicit and inferred constraints
//!
//! ## Quick start
//! ```ignore
//! use chunk_ecs::prelude::*;
//!
//! let mut world = World::builder()
//!     .threads(2)
//!     .component::<Position>()
//!     .component::<Velocity>()
//!     .system(movement)
//!     .build()?;
//!
//! world.spawn_bundle(Bundle::new().with(Position::default()).with(Velocity { x: 1.0, y: 0.0 }))?;
//! world.step(1.0 / 60.0)?;
//! world.dispose()?;
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::world::{World, WorldBuilder};
pub use engine::config::WorldConfig;

pub use engine::component::{Bundle, Component, ComponentRegistry, ComponentType};
pub use engine::schema::{Field, FieldView, FieldViewMut, Schema, SchemaBuilder};
pub use engine::entity::{Entity, EntityRecord};
pub use engine::storage::{Init, RowWriter};
pub use engine::archetype::Archetype;
pub use engine::store::{EntityStore, MatchedChunk};
pub use engine::view::{ChunkView, ColumnMut, ColumnRef};

pub use engine::query::{QueryBuilder, QueryDescriptor, QueryId, SystemQuery};

pub use engine::scheduler::{JobHandle, JobScheduler};
pub use engine::worker::{TaskResult, TaskRunner, WorkerPool};
pub use engine::commands::{Command, Commands, DeferredCommandsProcessor, FlushStats};

pub use engine::planner::{PlanGroup, PlanNode, Planner};
pub use engine::systems::{
    FnSystem,
    GroupDescriptor,
    System,
    SystemContext,
    SystemDescriptor,
    SystemInit,
    SystemProcessor,
};
pub use engine::resources::Resources;

pub use engine::error::{
    BuildError,
    CapacityError,
    ConfigError,
    ECSError,
    ECSResult,
    ExecutionError,
    SpawnError,
    TaskError,
};

pub use engine::types::{
    Access,
    AccessMode,
    ArchetypeID,
    ComponentID,
    EntityID,
    JobID,
    Signature,
    SystemID,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used ECS types.
///
/// Import with:
/// ```rust
/// use chunk_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Bundle,
        ChunkView,
        Command,
        Commands,
        Component,
        ECSError,
        ECSResult,
        Entity,
        FnSystem,
        GroupDescriptor,
        Init,
        JobHandle,
        Schema,
        System,
        SystemContext,
        SystemDescriptor,
        SystemInit,
        SystemQuery,
        World,
        WorldConfig,
    };
}
