//! Entity store: archetypes, entity records and structural mutation.
//!
//! [`EntityStore`] owns every archetype, the entity → location table and the
//! query registry. It is the only place where rows are created, moved
//! between archetypes, or removed.
//!
//! ## Structural operations
//! * **create**: allocate an id, append a zeroed row to the archetype of the
//!   requested type set, then apply the initializer.
//! * **destroy**: swap-remove the row, repoint the entity that moved into the
//!   hole, recycle the id.
//! * **attach / detach**: compute the new type set; if it differs, move the
//!   row into the matching archetype, copying every shared column and
//!   compacting the source chunk with the same swap-remove.
//!
//! ## Concurrency
//! The store is owned by the orchestrating thread. Jobs see chunks through
//! `Arc<Chunk>` handles; every structural operation asserts, through
//! [`Archetype::chunk_mut`], that no job still holds the chunks it touches.
//!
//! ## Errors
//! Operating on a dead or stale entity is a programmer error and panics.
//! Capacity exhaustion and initializer failures are returned.

use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::Pod;

use crate::engine::archetype::Archetype;
use crate::engine::component::{Component, ComponentRegistry};
use crate::engine::entity::{Entities, Entity, EntityRecord};
use crate::engine::error::{ECSResult, SpawnError};
use crate::engine::query::{QueryDescriptor, QueryId, QueryRecord, QueryRegistry};
use crate::engine::storage::{Chunk, Init, RowWriter};
use crate::engine::types::{ArchetypeID, ChunkID, ComponentID, RowID, Signature};


/// A non-empty chunk selected by a query.
#[derive(Clone, Debug)]
pub struct MatchedChunk {
    pub archetype: ArchetypeID,
    pub index: ChunkID,
    pub signature: Signature,
    pub chunk: Arc<Chunk>,
}

/// Owner of all entity data.

#[derive(Debug)]
pub struct EntityStore {
    registry: Arc<ComponentRegistry>,
    entities: Entities,
    archetypes: Vec<Archetype>,
    by_signature: HashMap<Signature, ArchetypeID>,
    queries: QueryRegistry,
    chunk_byte_budget: usize,
}

impl EntityStore {
    pub fn new(registry: Arc<ComponentRegistry>, chunk_byte_budget: usize, max_entities: u64) -> Self {
        Self {
            registry,
            entities: Entities::new(max_entities),
            archetypes: Vec::new(),
            by_signature: HashMap::new(),
            queries: QueryRegistry::new(),
            chunk_byte_budget,
        }
    }

    #[inline]
    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    fn signature_for(&self, types: &[ComponentID]) -> ECSResult<Signature> {
        let mut signature = Signature::default();
        for &component in types {
            if self.registry.get(component).is_none() {
                return Err(SpawnError::UnknownComponentId(component).into());
            }
            signature.set(component);
        }
        Ok(signature)
    }

    fn expect_record(&self, entity: Entity) -> EntityRecord {
        match self.entities.record(entity) {
            Some(record) => record,
            None => panic!("entity {entity} does not exist"),
        }
    }

    /// Returns the archetype for `signature`, creating it on first use.
    ///
    /// New archetypes are offered to every registered query.

    pub fn find_or_create_archetype(&mut self, signature: Signature) -> ArchetypeID {
        if let Some(&id) = self.by_signature.get(&signature) {
            return id;
        }
        let id = self.archetypes.len() as ArchetypeID;
        let archetype = Archetype::new(id, signature, &self.registry, self.chunk_byte_budget);
        tracing::debug!(
            archetype = id,
            components = signature.len(),
            chunk_capacity = archetype.chunk_capacity(),
            "created archetype"
        );
        self.queries.on_archetype_created(&archetype);
        self.archetypes.push(archetype);
        self.by_signature.insert(signature, id);
        id
    }

    fn archetype_pair_mut(&mut self, a: ArchetypeID, b: ArchetypeID) -> (&mut Archetype, &mut Archetype) {
        assert_ne!(a, b, "archetype pair must be distinct");
        let (lo, hi) = (a.min(b) as usize, a.max(b) as usize);
        let (left, right) = self.archetypes.split_at_mut(hi);
        let (low, high) = (&mut left[lo], &mut right[0]);
        if a < b { (low, high) } else { (high, low) }
    }

    fn apply_init(&mut self, record: EntityRecord, init: Init) -> ECSResult<()> {
        let archetype = &mut self.archetypes[record.archetype as usize];
        let signature = *archetype.signature();
        let chunk = archetype.chunk_mut(record.chunk);
        let mut writer = RowWriter::new(&self.registry, chunk, record.row as usize, &signature);
        init.apply(&mut writer)
    }

    /// Creates an entity with exactly the component set `types`.
    ///
    /// Rows start zeroed; `init` then fills any subset of the components.
    /// If the initializer fails the entity is destroyed again and the error
    /// returned.

    pub fn create_entity(&mut self, types: &[ComponentID], init: Init) -> ECSResult<Entity> {
        let signature = self.signature_for(types)?;
        let entity = self.entities.allocate(EntityRecord::default())?;

        let archetype = self.find_or_create_archetype(signature);
        let record = self.archetypes[archetype as usize].push_zeroed(entity);
        self.entities.set_record(entity, record);

        if let Err(error) = self.apply_init(record, init) {
            self.destroy_entity(entity);
            return Err(error);
        }
        Ok(entity)
    }

    /// Removes `entity` and recycles its id.
    ///
    /// ## Panics
    /// Panics if `entity` does not exist.

    pub fn destroy_entity(&mut self, entity: Entity) {
        let record = self.expect_record(entity);
        let moved = self.archetypes[record.archetype as usize].swap_remove(record.chunk, record.row);
        if let Some(moved) = moved {
            self.entities.set_record(moved, record);
        }
        self.entities.free(entity);
    }

    fn move_entity(&mut self, entity: Entity, from: EntityRecord, signature: Signature) -> EntityRecord {
        let target = self.find_or_create_archetype(signature);
        let (source, destination) = self.archetype_pair_mut(from.archetype, target);

        let to = destination.push_zeroed(entity);
        source
            .chunk_mut(from.chunk)
            .copy_row_into(from.row as usize, destination.chunk_mut(to.chunk), to.row as usize);

        if let Some(moved) = source.swap_remove(from.chunk, from.row) {
            self.entities.set_record(moved, from);
        }
        self.entities.set_record(entity, to);
        to
    }

    /// Adds `types` to `entity`.
    ///
    /// When the set changes, the entity moves to the new archetype with its
    /// existing values preserved and the added components zeroed. `init`
    /// then runs against the row and may write any component of the
    /// resulting type.
    ///
    /// ## Errors
    /// If `init` fails the entity is returned to its previous type with its
    /// previous values, and the error is returned.
    ///
    /// ## Panics
    /// Panics if `entity` does not exist.

    pub fn attach_components(&mut self, entity: Entity, types: &[ComponentID], init: Init) -> ECSResult<()> {
        let record = self.expect_record(entity);
        let added = self.signature_for(types)?;
        let current = *self.archetypes[record.archetype as usize].signature();
        let next = current.union(&added);
        let saved = self.archetypes[record.archetype as usize]
            .chunk(record.chunk)
            .snapshot_row(record.row as usize);

        let moved = if next == current { record } else { self.move_entity(entity, record, next) };
        if let Err(error) = self.apply_init(moved, init) {
            let restored = if next == current { moved } else { self.move_entity(entity, moved, current) };
            self.archetypes[restored.archetype as usize]
                .chunk_mut(restored.chunk)
                .restore_row(restored.row as usize, &saved);
            return Err(error);
        }
        Ok(())
    }

    /// Removes `types` from `entity`. Removed values are discarded.
    ///
    /// ## Panics
    /// Panics if `entity` does not exist.

    pub fn detach_components(&mut self, entity: Entity, types: &[ComponentID]) -> ECSResult<()> {
        let record = self.expect_record(entity);
        let removed = self.signature_for(types)?;
        let current = *self.archetypes[record.archetype as usize].signature();
        let next = current.difference(&removed);

        if next != current {
            self.move_entity(entity, record, next);
        }
        Ok(())
    }

    /// Registers (or finds) the query record for `descriptor`.
    pub fn register_query(&mut self, descriptor: &QueryDescriptor) -> QueryId {
        self.queries.register(descriptor, &self.archetypes)
    }

    pub fn query(&self, id: QueryId) -> &QueryRecord {
        self.queries.get(id)
    }

    pub fn queries(&self) -> &QueryRegistry {
        &self.queries
    }

    /// Non-empty chunks of every archetype matched by `id`.
    pub fn matching_chunks(&self, id: QueryId) -> Vec<MatchedChunk> {
        let mut out = Vec::new();
        for &archetype_id in self.queries.get(id).archetypes() {
            let archetype = &self.archetypes[archetype_id as usize];
            for (index, chunk) in archetype.chunks().iter().enumerate() {
                if chunk.is_empty() {
                    continue;
                }
                out.push(MatchedChunk {
                    archetype: archetype_id,
                    index: index as ChunkID,
                    signature: *archetype.signature(),
                    chunk: Arc::clone(chunk),
                });
            }
        }
        out
    }

    #[inline]
    pub fn exists(&self, entity: Entity) -> bool {
        self.entities.is_alive(entity)
    }

    /// Returns `true` if `entity` currently has `component`.
    ///
    /// ## Panics
    /// Panics if `entity` does not exist.
    pub fn has(&self, entity: Entity, component: ComponentID) -> bool {
        let record = self.expect_record(entity);
        self.archetypes[record.archetype as usize].has(component)
    }

    /// Exact component set of `entity`.
    ///
    /// ## Panics
    /// Panics if `entity` does not exist.
    pub fn entity_type(&self, entity: Entity) -> Signature {
        let record = self.expect_record(entity);
        *self.archetypes[record.archetype as usize].signature()
    }

    #[inline]
    pub fn record(&self, entity: Entity) -> Option<EntityRecord> {
        self.entities.record(entity)
    }

    fn value_bytes(&self, entity: Entity, component: ComponentID) -> Option<&[u8]> {
        let record = self.expect_record(entity);
        self.archetypes[record.archetype as usize]
            .chunk(record.chunk)
            .row_bytes(component, record.row as usize)
    }

    /// Copies out the value of `T` on `entity`, or `None` if it lacks `T`.
    ///
    /// Jobs writing `T` must be fenced first.
    ///
    /// ## Panics
    /// Panics if `entity` does not exist.

    pub fn get<T: Component>(&self, entity: Entity) -> Option<T> {
        let component = self.registry.id_of::<T>()?;
        self.value_bytes(entity, component).map(bytemuck::pod_read_unaligned)
    }

    /// Reads one schema field of `T` on `entity`.
    pub fn get_field<T: Component, F: Pod>(&self, entity: Entity, field: &str) -> Option<F> {
        let component = self.registry.id_of::<T>()?;
        let bytes = self.value_bytes(entity, component)?;
        self.registry.describe(component).schema.view(bytes).get::<F>(field)
    }

    /// Overwrites the value of `T` on `entity` in place.
    ///
    /// ## Panics
    /// Panics if `entity` does not exist.
    pub fn set<T: Component>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        let component = self.registry.require_id_of::<T>()?;
        let record = self.expect_record(entity);
        let bytes = self.archetypes[record.archetype as usize]
            .chunk_mut(record.chunk)
            .row_bytes_mut(component, record.row as usize)
            .ok_or(SpawnError::MissingComponent { component: std::any::type_name::<T>() })?;
        bytes.copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    pub fn archetype(&self, id: ArchetypeID) -> &Archetype {
        &self.archetypes[id as usize]
    }

    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Location of the row at `(archetype, chunk, row)`, for diagnostics.
    pub fn entity_at(&self, archetype: ArchetypeID, chunk: ChunkID, row: RowID) -> Option<Entity> {
        self.archetypes
            .get(archetype as usize)?
            .chunks()
            .get(chunk as usize)?
            .entities()
            .get(row as usize)
            .copied()
    }
}
