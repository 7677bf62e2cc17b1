//! # Commands
//!
//! Deferred structural mutations.
//!
//! ## Purpose
//! Systems and jobs never restructure storage while chunks are shared with
//! workers. They record [`Command`]s into a [`Commands`] buffer instead, and
//! the [`DeferredCommandsProcessor`] applies them at the top of the next step.
//!
//! ## Ordering
//! Buffers are appended in issue order, including buffers returned by
//! completed background jobs. A flush applies them in four passes:
//!
//! 1. every create,
//! 2. every attach,
//! 3. every detach,
//! 4. every destroy.
//!
//! Order is kept within a pass but not across kinds, so a create and a
//! destroy issued in either order both take effect.
//!
//! ## Stale targets
//! A command whose entity no longer exists when the flush reaches it is
//! skipped and logged at `warn`. This covers entities destroyed by an
//! earlier step and double destroys within one batch.

use crate::engine::component::ComponentRegistry;
use crate::engine::entity::Entity;
use crate::engine::error::ECSResult;
use crate::engine::storage::Init;
use crate::engine::store::EntityStore;
use crate::engine::types::ComponentID;


/// One deferred structural mutation.

#[derive(Debug)]
pub enum Command {
    /// Creates an entity with `types` (plus any component a bundle initializer names).
    Create {
        types: Vec<ComponentID>,
        init: Init,
    },

    /// Adds `types` to `entity` and runs `init` against the resulting row.
    Attach {
        entity: Entity,
        types: Vec<ComponentID>,
        init: Init,
    },

    /// Removes `types` from `entity`.
    Detach {
        entity: Entity,
        types: Vec<ComponentID>,
    },

    /// Destroys `entity`.
    Destroy {
        entity: Entity,
    },
}

/// Ordered buffer of deferred commands.

#[derive(Debug, Default)]
pub struct Commands {
    queue: Vec<Command>,
}

impl Commands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.queue.push(command);
    }

    pub fn create(&mut self, types: &[ComponentID], init: Init) {
        self.push(Command::Create { types: types.to_vec(), init });
    }

    pub fn attach(&mut self, entity: Entity, types: &[ComponentID], init: Init) {
        self.push(Command::Attach { entity, types: types.to_vec(), init });
    }

    pub fn detach(&mut self, entity: Entity, types: &[ComponentID]) {
        self.push(Command::Detach { entity, types: types.to_vec() });
    }

    pub fn destroy(&mut self, entity: Entity) {
        self.push(Command::Destroy { entity });
    }

    /// Moves every command of `other` to the end of this buffer.
    pub fn append(&mut self, other: &mut Commands) {
        self.queue.append(&mut other.queue);
    }

    #[inline] pub fn len(&self) -> usize { self.queue.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.queue.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.queue.iter()
    }

    fn drain(&mut self) -> std::vec::Drain<'_, Command> {
        self.queue.drain(..)
    }
}

impl Extend<Command> for Commands {
    fn extend<I: IntoIterator<Item = Command>>(&mut self, iter: I) {
        self.queue.extend(iter);
    }
}

/// Widens `types` with every component a bundle initializer addresses.
pub(crate) fn resolve_types(
    registry: &ComponentRegistry,
    types: &[ComponentID],
    init: &Init,
) -> ECSResult<Vec<ComponentID>> {
    let mut resolved = types.to_vec();
    if let Init::Values(bundle) = init {
        for id in bundle.component_ids(registry)? {
            if !resolved.contains(&id) {
                resolved.push(id);
            }
        }
    }
    Ok(resolved)
}

/// Counts of what one flush did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub created: usize,
    pub attached: usize,
    pub detached: usize,
    pub destroyed: usize,
    /// Commands dropped because their target no longer existed.
    pub skipped: usize,
    /// Commands that returned an error.
    pub failed: usize,
}

/// Applies buffered commands to an [`EntityStore`] between steps.
///
/// ## Errors
/// Every command is attempted. Failures are logged at `error` and the first
/// one is returned after the whole batch has been applied.

#[derive(Debug, Default)]
pub struct DeferredCommandsProcessor {
    pending: Commands,
}

impl DeferredCommandsProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a buffer for the next flush.
    pub fn enqueue(&mut self, mut commands: Commands) {
        self.pending.append(&mut commands);
    }

    pub fn push(&mut self, command: Command) {
        self.pending.push(command);
    }

    #[inline] pub fn len(&self) -> usize { self.pending.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.pending.is_empty() }

    /// Applies every pending command in create / attach / detach / destroy order.
    ///
    /// Callers must have fenced all in-flight jobs.

    pub fn flush(&mut self, store: &mut EntityStore) -> ECSResult<FlushStats> {
        let mut stats = FlushStats::default();
        if self.pending.is_empty() {
            return Ok(stats);
        }

        let mut creates = Vec::new();
        let mut attaches = Vec::new();
        let mut detaches = Vec::new();
        let mut destroys = Vec::new();
        for command in self.pending.drain() {
            match command {
                Command::Create { types, init } => creates.push((types, init)),
                Command::Attach { entity, types, init } => attaches.push((entity, types, init)),
                Command::Detach { entity, types } => detaches.push((entity, types)),
                Command::Destroy { entity } => destroys.push(entity),
            }
        }

        let mut first_error = None;
        let mut record = |stats: &mut FlushStats, result: ECSResult<()>, verb: &str| {
            if let Err(error) = result {
                tracing::error!(%error, command = verb, "deferred command failed");
                stats.failed += 1;
                first_error.get_or_insert(error);
            }
        };

        for (types, init) in creates {
            let result = resolve_types(store.registry(), &types, &init)
                .and_then(|types| store.create_entity(&types, init).map(|_| ()));
            if result.is_ok() {
                stats.created += 1;
            }
            record(&mut stats, result, "create");
        }

        for (entity, types, init) in attaches {
            if !store.exists(entity) {
                tracing::warn!(%entity, "skipping attach on a destroyed entity");
                stats.skipped += 1;
                continue;
            }
            let result = resolve_types(store.registry(), &types, &init)
                .and_then(|types| store.attach_components(entity, &types, init));
            if result.is_ok() {
                stats.attached += 1;
            }
            record(&mut stats, result, "attach");
        }

        for (entity, types) in detaches {
            if !store.exists(entity) {
                tracing::warn!(%entity, "skipping detach on a destroyed entity");
                stats.skipped += 1;
                continue;
            }
            let result = store.detach_components(entity, &types);
            if result.is_ok() {
                stats.detached += 1;
            }
            record(&mut stats, result, "detach");
        }

        for entity in destroys {
            if !store.exists(entity) {
                tracing::warn!(%entity, "skipping destroy of a destroyed entity");
                stats.skipped += 1;
                continue;
            }
            store.destroy_entity(entity);
            stats.destroyed += 1;
        }

        tracing::debug!(?stats, "applied deferred commands");
        match first_error {
            Some(error) => Err(error),
            None => Ok(stats),
        }
    }
}
