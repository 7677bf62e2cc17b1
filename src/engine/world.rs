//! # World
//!
//! Top-level facade tying storage, systems and scheduling together.
//!
//! ## Build
//! [`WorldBuilder`] collects components, systems, groups and resources, then
//! [`WorldBuilder::build`]:
//! 1. validates the [`WorldConfig`],
//! 2. freezes the component registry,
//! 3. runs every system's `init` so its queries reach the planner,
//! 4. plans and flattens the system order,
//! 5. starts the worker pool.
//!
//! ## Step
//! [`World::step`] is the only place where deferred commands are applied.
//! It first gathers commands returned by completed jobs. If any commands
//! are pending it fences every in-flight job and flushes them, then runs the
//! [`SystemProcessor`] once. Commands issued by systems during the step are
//! queued for the next one.
//!
//! ## Immediate operations
//! `spawn`, `attach`, `detach`, `destroy` and `set` fence every in-flight
//! job before touching storage. `get` fences only the writers of the
//! requested component. Fencing never consumes a job failure: it stays with
//! the job's handle, and anything left unclaimed is reported by
//! [`World::dispose`].

use std::sync::Arc;

use crate::engine::commands::{resolve_types, Command, Commands, DeferredCommandsProcessor, FlushStats};
use crate::engine::component::{Bundle, Component, ComponentRegistry};
use crate::engine::config::WorldConfig;
use crate::engine::entity::Entity;
use crate::engine::error::{BuildError, ECSResult};
use crate::engine::planner::Planner;
use crate::engine::query::{QueryDescriptor, SystemQuery};
use crate::engine::resources::Resources;
use crate::engine::scheduler::JobScheduler;
use crate::engine::storage::Init;
use crate::engine::store::EntityStore;
use crate::engine::systems::{GroupDescriptor, System, SystemDescriptor, SystemInit, SystemProcessor};
use crate::engine::types::{ComponentID, Tick};


enum Registration {
    System(Box<dyn System>),
    Group(GroupDescriptor),
}

/// Collects everything a [`World`] is built from.

pub struct WorldBuilder {
    config: WorldConfig,
    registry: ComponentRegistry,
    registrations: Vec<Registration>,
    resources: Resources,
}

impl Default for WorldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldBuilder {
    pub fn new() -> Self {
        Self {
            config: WorldConfig::default(),
            registry: ComponentRegistry::new(),
            registrations: Vec::new(),
            resources: Resources::new(),
        }
    }

    pub fn config(mut self, config: WorldConfig) -> Self {
        self.config = config;
        self
    }

    /// Worker thread count; `0` runs jobs inline.
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    pub fn component<T: Component>(mut self) -> Self {
        self.registry.register::<T>();
        self
    }

    /// Registers a zero-size marker type.
    pub fn tag<T: 'static>(mut self) -> Self {
        self.registry.register_tag::<T>();
        self
    }

    pub fn system<S: System + 'static>(mut self, system: S) -> Self {
        self.registrations.push(Registration::System(Box::new(system)));
        self
    }

    pub fn group(mut self, group: GroupDescriptor) -> Self {
        self.registrations.push(Registration::Group(group));
        self
    }

    pub fn singleton<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.resources.insert_singleton(value);
        self
    }

    pub fn transient<T, F>(mut self, factory: F) -> Self
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.resources.insert_transient(factory);
        self
    }

    /// Builds the world.
    ///
    /// ## Errors
    /// Invalid configuration, planner failures, errors returned by a
    /// system's `init`, and worker threads that fail to spawn.
    ///
    /// ## Panics
    /// Panics on duplicate system or group names.

    pub fn build(self) -> ECSResult<World> {
        let WorldBuilder { config, registry, registrations, resources } = self;
        config.validate()?;
        if registry.len() > config.component_capacity {
            return Err(BuildError::InvalidConfig(format!(
                "{} components registered; capacity is {}",
                registry.len(),
                config.component_capacity
            ))
            .into());
        }

        let registry = Arc::new(registry);
        let mut store = EntityStore::new(Arc::clone(&registry), config.chunk_byte_budget, config.max_entities);
        let mut planner = Planner::new();

        let mut systems: Vec<Option<(SystemDescriptor, Box<dyn System>)>> = Vec::new();
        for registration in registrations {
            match registration {
                Registration::Group(group) => planner.add_group(group),
                Registration::System(system) => {
                    let descriptor = system.descriptor();
                    let id = planner.add_system(descriptor.clone());
                    debug_assert_eq!(id as usize, systems.len());
                    systems.push(Some((descriptor, system)));
                }
            }
        }

        for (index, slot) in systems.iter_mut().enumerate() {
            let Some((_, system)) = slot.as_mut() else { continue };
            let id = index as crate::engine::types::SystemID;
            planner.begin_init(id);
            let result = {
                let mut init = SystemInit::new(id, &mut planner, &mut store, &resources);
                system.init(&mut init)
            };
            planner.end_init();
            result?;
        }

        let order = planner.create_system_root()?.flatten();
        let ordered = order
            .into_iter()
            .filter_map(|id| systems[id as usize].take().map(|(descriptor, system)| (id, descriptor, system)))
            .collect();
        let processor = SystemProcessor::new(ordered);
        let scheduler = JobScheduler::new(Arc::clone(&registry), config.threads)?;

        tracing::info!(
            components = registry.len(),
            systems = processor.len(),
            threads = config.threads,
            "world built"
        );

        Ok(World {
            config,
            registry,
            store,
            scheduler,
            processor,
            deferred: DeferredCommandsProcessor::new(),
            resources,
            step: 0,
            disposed: false,
        })
    }
}

/// A running simulation.

pub struct World {
    config: WorldConfig,
    registry: Arc<ComponentRegistry>,
    store: EntityStore,
    scheduler: JobScheduler,
    processor: SystemProcessor,
    deferred: DeferredCommandsProcessor,
    resources: Resources,
    step: Tick,
    disposed: bool,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("step", &self.step)
            .field("entities", &self.store.len())
            .field("systems", &self.processor)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl World {
    pub fn builder() -> WorldBuilder {
        WorldBuilder::new()
    }

    #[inline] pub fn config(&self) -> &WorldConfig { &self.config }
    #[inline] pub fn registry(&self) -> &Arc<ComponentRegistry> { &self.registry }
    #[inline] pub fn store(&self) -> &EntityStore { &self.store }
    #[inline] pub fn resources(&self) -> &Resources { &self.resources }
    #[inline] pub fn step_index(&self) -> Tick { self.step }

    pub fn scheduler_mut(&mut self) -> &mut JobScheduler {
        &mut self.scheduler
    }

    /// Store and scheduler together, for scheduling jobs outside a system.
    pub fn jobs(&mut self) -> (&EntityStore, &mut JobScheduler) {
        (&self.store, &mut self.scheduler)
    }

    /// Registers a query outside any system. It takes no part in planning.
    pub fn register_query(&mut self, descriptor: &QueryDescriptor) -> SystemQuery {
        let id = self.store.register_query(descriptor);
        SystemQuery { id, access: descriptor.access().into() }
    }

    pub fn id_of<T: 'static>(&self) -> Option<ComponentID> {
        self.registry.id_of::<T>()
    }

    /// Creates an entity with `types`, plus any component a bundle initializer names.

    pub fn spawn(&mut self, types: &[ComponentID], init: Init) -> ECSResult<Entity> {
        self.scheduler.fence_all();
        let types = resolve_types(&self.registry, types, &init)?;
        self.store.create_entity(&types, init)
    }

    pub fn spawn_bundle(&mut self, bundle: Bundle) -> ECSResult<Entity> {
        self.spawn(&[], Init::Values(bundle))
    }

    /// ## Panics
    /// Panics if `entity` does not exist.
    pub fn attach(&mut self, entity: Entity, types: &[ComponentID], init: Init) -> ECSResult<()> {
        self.scheduler.fence_all();
        let types = resolve_types(&self.registry, types, &init)?;
        self.store.attach_components(entity, &types, init)
    }

    /// ## Panics
    /// Panics if `entity` does not exist.
    pub fn detach(&mut self, entity: Entity, types: &[ComponentID]) -> ECSResult<()> {
        self.scheduler.fence_all();
        self.store.detach_components(entity, types)
    }

    /// ## Panics
    /// Panics if `entity` does not exist.
    pub fn destroy(&mut self, entity: Entity) {
        self.scheduler.fence_all();
        self.store.destroy_entity(entity);
    }

    #[inline]
    pub fn exists(&self, entity: Entity) -> bool {
        self.store.exists(entity)
    }

    /// ## Panics
    /// Panics if `entity` does not exist.
    pub fn has(&self, entity: Entity, component: ComponentID) -> bool {
        self.store.has(entity, component)
    }

    pub fn has_component<T: 'static>(&self, entity: Entity) -> bool {
        self.registry.id_of::<T>().is_some_and(|component| self.store.has(entity, component))
    }

    /// Reads `T` on `entity` once every job writing `T` has finished.
    ///
    /// ## Panics
    /// Panics if `entity` does not exist.

    pub fn get<T: Component>(&mut self, entity: Entity) -> Option<T> {
        if let Some(component) = self.registry.id_of::<T>() {
            self.scheduler.complete_writers_of(component);
        }
        self.store.get::<T>(entity)
    }

    /// Overwrites `T` on `entity` in place.
    pub fn set<T: Component>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        self.scheduler.fence_all();
        self.store.set(entity, value)
    }

    /// Queues a structural command for the next step.
    pub fn defer(&mut self, command: Command) {
        self.deferred.push(command);
    }

    pub fn pending_commands(&self) -> usize {
        self.deferred.len()
    }

    /// Applies pending commands now, fencing every job first.
    pub fn flush(&mut self) -> ECSResult<FlushStats> {
        self.scheduler.fence_all();
        self.deferred.enqueue(self.scheduler.take_commands());
        self.deferred.flush(&mut self.store)
    }

    /// Advances the simulation by one step.

    pub fn step(&mut self, delta_time: f32) -> ECSResult<()> {
        let span = tracing::info_span!("step", step = self.step);
        let _guard = span.enter();

        self.deferred.enqueue(self.scheduler.take_commands());
        if !self.deferred.is_empty() {
            self.flush()?;
        }

        let mut commands = Commands::new();
        let result = self.processor.update(
            delta_time,
            self.step,
            &self.store,
            &mut self.scheduler,
            &self.resources,
            &mut commands,
        );
        self.deferred.enqueue(commands);
        self.step += 1;
        result
    }

    /// System names in execution order.
    pub fn system_order(&self) -> Vec<&str> {
        self.processor.order()
    }

    pub fn activate_system(&mut self, name: &str) -> bool {
        self.processor.activate(name)
    }

    pub fn deactivate_system(&mut self, name: &str) -> bool {
        self.processor.deactivate(name)
    }

    pub fn is_system_active(&self, name: &str) -> Option<bool> {
        self.processor.is_active(name)
    }

    /// Waits for every job and stops the worker pool.
    ///
    /// ## Errors
    /// The earliest job failure no handle has claimed.
    pub fn dispose(mut self) -> ECSResult<()> {
        let result = self.scheduler.complete_all();
        self.scheduler.dispose();
        self.disposed = true;
        tracing::debug!(step = self.step, "world disposed");
        result
    }
}

impl Drop for World {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        if let Err(error) = self.scheduler.complete_all() {
            tracing::error!(%error, "job failed while dropping world");
        }
        self.scheduler.dispose();
    }
}
