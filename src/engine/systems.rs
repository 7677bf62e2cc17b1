//! ECS system abstractions and the per-step system driver.
//!
//! A **system** is per-step simulation logic. Systems:
//! - declare their queries once, during `init`, through the [`Planner`],
//! - schedule jobs over those queries from `update`,
//! - mutate structure only through deferred [`Commands`].
//!
//! ## Lifecycle
//! 1. `descriptor()` is read when the system is added to a world. It names
//!    the system and places it in a group with before/after constraints.
//! 2. `init()` runs once while the world is built. Queries registered here
//!    carry the access the planner uses to order systems.
//! 3. `update()` runs from [`SystemProcessor::update`] every `tick_rate`
//!    steps, in planner order.
//!
//! ## Dependency handles
//! Every job a system schedules through its [`SystemContext`] is merged into
//! that system's dependency handle. Before the system's next update the
//! handle is completed, so a system never races its own earlier jobs while
//! independent systems are free to overlap.
//!
//! ## Function-backed systems
//! [`FnSystem`] wraps an init closure that returns state and an update
//! closure over that state. It is the usual way to write small systems.

use std::any::Any;

use crate::engine::commands::Commands;
use crate::engine::component::{Component, ComponentRegistry};
use crate::engine::entity::Entity;
use crate::engine::error::ECSResult;
use crate::engine::planner::Planner;
use crate::engine::query::{QueryBuilder, QueryDescriptor, SystemQuery};
use crate::engine::resources::Resources;
use crate::engine::scheduler::{JobHandle, JobScheduler};
use crate::engine::store::EntityStore;
use crate::engine::types::{SystemID, Tick};
use crate::engine::view::ChunkView;


/// Name, placement and cadence of a system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemDescriptor {
    pub name: String,
    /// Owning group; `None` places the system in the root group.
    pub group: Option<String>,
    /// Labels this system must run before.
    pub before: Vec<String>,
    /// Labels this system must run after.
    pub after: Vec<String>,
    /// Run every `tick_rate` steps.
    pub tick_rate: u32,
    pub active: bool,
}

impl SystemDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: None,
            before: Vec::new(),
            after: Vec::new(),
            tick_rate: 1,
            active: true,
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn before(mut self, label: impl Into<String>) -> Self {
        self.before.push(label.into());
        self
    }

    pub fn after(mut self, label: impl Into<String>) -> Self {
        self.after.push(label.into());
        self
    }

    /// ## Panics
    /// Panics if `rate` is zero.
    pub fn tick_rate(mut self, rate: u32) -> Self {
        assert!(rate > 0, "tick rate of `{}` must be at least 1", self.name);
        self.tick_rate = rate;
        self
    }

    /// Starts the system deactivated.
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A named group of systems and nested groups.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupDescriptor {
    pub name: String,
    /// Enclosing group; `None` nests directly under the root.
    pub parent: Option<String>,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

impl GroupDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), parent: None, before: Vec::new(), after: Vec::new() }
    }

    pub fn in_group(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn before(mut self, label: impl Into<String>) -> Self {
        self.before.push(label.into());
        self
    }

    pub fn after(mut self, label: impl Into<String>) -> Self {
        self.after.push(label.into());
        self
    }
}

/// Per-step simulation logic.

pub trait System: Send {
    fn descriptor(&self) -> SystemDescriptor;

    /// Registers queries. Runs once while the world is built.
    fn init(&mut self, _init: &mut SystemInit<'_>) -> ECSResult<()> {
        Ok(())
    }

    fn update(&mut self, context: &mut SystemContext<'_>) -> ECSResult<()>;
}

/// What a system sees during `init`.

pub struct SystemInit<'a> {
    system: SystemID,
    registry: std::sync::Arc<ComponentRegistry>,
    planner: &'a mut Planner,
    store: &'a mut EntityStore,
    resources: &'a Resources,
}

impl<'a> SystemInit<'a> {
    pub(crate) fn new(
        system: SystemID,
        planner: &'a mut Planner,
        store: &'a mut EntityStore,
        resources: &'a Resources,
    ) -> Self {
        let registry = std::sync::Arc::clone(store.registry());
        Self { system, registry, planner, store, resources }
    }

    #[inline]
    pub fn system(&self) -> SystemID {
        self.system
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Starts a typed query description.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.registry)
    }

    /// Registers `descriptor` on behalf of this system.
    pub fn register_query(&mut self, descriptor: &QueryDescriptor) -> SystemQuery {
        self.planner.register_system_query(self.system, descriptor, self.store)
    }

    pub fn resources(&self) -> &Resources {
        self.resources
    }
}

/// What a system sees during `update`.

pub struct SystemContext<'a> {
    delta_time: f32,
    step: Tick,
    store: &'a EntityStore,
    scheduler: &'a mut JobScheduler,
    resources: &'a Resources,
    commands: &'a mut Commands,
    dependency: JobHandle,
}

impl<'a> SystemContext<'a> {
    pub(crate) fn new(
        delta_time: f32,
        step: Tick,
        store: &'a EntityStore,
        scheduler: &'a mut JobScheduler,
        resources: &'a Resources,
        commands: &'a mut Commands,
    ) -> Self {
        Self { delta_time, step, store, scheduler, resources, commands, dependency: JobHandle::completed() }
    }

    #[inline] pub fn delta_time(&self) -> f32 { self.delta_time }
    #[inline] pub fn step(&self) -> Tick { self.step }

    pub fn store(&self) -> &EntityStore {
        self.store
    }

    pub fn resources(&self) -> &Resources {
        self.resources
    }

    pub fn resource<T: Any>(&self) -> Option<&T> {
        self.resources.get::<T>()
    }

    /// Deferred structural commands, applied at the top of the next step.
    pub fn commands(&mut self) -> &mut Commands {
        self.commands
    }

    /// Schedules `body` as one background task over every matched chunk.
    pub fn schedule<F>(&mut self, query: &SystemQuery, body: F) -> JobHandle
    where
        F: Fn(&ChunkView, &mut Commands) -> ECSResult<()> + Send + Sync + 'static,
    {
        let handle = self.scheduler.schedule(self.store, query, body);
        self.dependency.merge(&handle);
        handle
    }

    /// Schedules `body` as one background task per matched chunk.
    pub fn schedule_parallel<F>(&mut self, query: &SystemQuery, body: F) -> JobHandle
    where
        F: Fn(&ChunkView, &mut Commands) -> ECSResult<()> + Send + Sync + 'static,
    {
        let handle = self.scheduler.schedule_parallel(self.store, query, body);
        self.dependency.merge(&handle);
        handle
    }

    /// Runs `body` on this thread after conflicting jobs have finished.
    pub fn run<F>(&mut self, query: &SystemQuery, body: F) -> ECSResult<()>
    where
        F: FnMut(&ChunkView, &mut Commands) -> ECSResult<()>,
    {
        self.scheduler.run(self.store, query, body)
    }

    /// Blocks until `handle` has finished.
    pub fn complete(&mut self, handle: &mut JobHandle) -> ECSResult<()> {
        handle.complete(self.scheduler)
    }

    /// Reads `T` on `entity` after fencing every job that writes `T`.
    pub fn get<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if let Some(component) = self.store.registry().id_of::<T>() {
            self.scheduler.complete_writers_of(component);
        }
        self.store.get::<T>(entity)
    }

    fn into_dependency(self) -> JobHandle {
        self.dependency
    }
}

/// A [`System`] backed by closures.
///
/// `init` runs once and returns the system's state; `update` receives that
/// state on every run.
///
/// ```ignore
/// let movement = FnSystem::new(
///     SystemDescriptor::new("movement"),
///     |init| {
///         let query = init.query().write::<Position>().read::<Velocity>().build();
///         Ok(init.register_query(&query))
///     },
///     |query, ctx| {
///         let dt = ctx.delta_time();
///         ctx.schedule_parallel(query, move |view, _| { /* ... */ Ok(()) });
///         Ok(())
///     },
/// );
/// ```

pub struct FnSystem<S, I, U> {
    descriptor: SystemDescriptor,
    init: Option<I>,
    update: U,
    state: Option<S>,
}

impl<S, I, U> FnSystem<S, I, U>
where
    S: Send + 'static,
    I: FnOnce(&mut SystemInit<'_>) -> ECSResult<S> + Send + 'static,
    U: FnMut(&mut S, &mut SystemContext<'_>) -> ECSResult<()> + Send + 'static,
{
    pub fn new(descriptor: SystemDescriptor, init: I, update: U) -> Self {
        Self { descriptor, init: Some(init), update, state: None }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

impl<S, I, U> System for FnSystem<S, I, U>
where
    S: Send + 'static,
    I: FnOnce(&mut SystemInit<'_>) -> ECSResult<S> + Send + 'static,
    U: FnMut(&mut S, &mut SystemContext<'_>) -> ECSResult<()> + Send + 'static,
{
    fn descriptor(&self) -> SystemDescriptor {
        self.descriptor.clone()
    }

    fn init(&mut self, init: &mut SystemInit<'_>) -> ECSResult<()> {
        if let Some(f) = self.init.take() {
            self.state = Some(f(init)?);
        }
        Ok(())
    }

    fn update(&mut self, context: &mut SystemContext<'_>) -> ECSResult<()> {
        let Some(state) = self.state.as_mut() else {
            panic!("system `{}` updated before init", self.descriptor.name);
        };
        (self.update)(state, context)
    }
}

struct SystemEntry {
    id: SystemID,
    name: String,
    system: Box<dyn System>,
    tick_rate: u32,
    ticks_since_last_execution: u32,
    active: bool,
    dependency: JobHandle,
}

/// Runs systems in planner order with tick-rate gating.

pub struct SystemProcessor {
    entries: Vec<SystemEntry>,
}

impl std::fmt::Debug for SystemProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|e| &e.name)).finish()
    }
}

impl SystemProcessor {
    /// Builds the processor from systems already in execution order.
    pub fn new(ordered: Vec<(SystemID, SystemDescriptor, Box<dyn System>)>) -> Self {
        let entries = ordered
            .into_iter()
            .map(|(id, descriptor, system)| SystemEntry {
                id,
                name: descriptor.name,
                system,
                tick_rate: descriptor.tick_rate.max(1),
                ticks_since_last_execution: 0,
                active: descriptor.active,
                dependency: JobHandle::completed(),
            })
            .collect();
        Self { entries }
    }

    /// One pass over every active system.
    ///
    /// A system runs when its tick counter reaches its tick rate. Its
    /// previous dependency handle is completed first. Errors from either
    /// stop the pass.

    pub fn update(
        &mut self,
        delta_time: f32,
        step: Tick,
        store: &EntityStore,
        scheduler: &mut JobScheduler,
        resources: &Resources,
        commands: &mut Commands,
    ) -> ECSResult<()> {
        for entry in self.entries.iter_mut().filter(|e| e.active) {
            entry.ticks_since_last_execution += 1;
            if entry.ticks_since_last_execution < entry.tick_rate {
                continue;
            }

            entry.dependency.complete(scheduler)?;

            let span = tracing::debug_span!("system", system = %entry.name, id = entry.id);
            let _guard = span.enter();

            let mut context = SystemContext::new(delta_time, step, store, scheduler, resources, commands);
            let result = entry.system.update(&mut context);
            entry.dependency = context.into_dependency();
            entry.ticks_since_last_execution = 0;
            if let Err(error) = result {
                tracing::error!(system = %entry.name, %error, "system update failed");
                return Err(error);
            }
        }
        Ok(())
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut SystemEntry> {
        self.entries.iter_mut().find(|e| e.name == name)
    }

    /// Returns `false` if no system is called `name`.
    pub fn activate(&mut self, name: &str) -> bool {
        self.entry_mut(name).map(|e| e.active = true).is_some()
    }

    /// Returns `false` if no system is called `name`.
    pub fn deactivate(&mut self, name: &str) -> bool {
        self.entry_mut(name).map(|e| e.active = false).is_some()
    }

    pub fn is_active(&self, name: &str) -> Option<bool> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.active)
    }

    /// System names in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    #[inline] pub fn len(&self) -> usize { self.entries.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}
