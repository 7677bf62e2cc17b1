//! Entity identities and the entity → location table.
//!
//! An [`Entity`] packs a recycled slot index with a version counter. The
//! [`Entities`] table owns the per-slot version, liveness flag and current
//! [`EntityRecord`], which is the only lookup path from an entity to its row.
//!
//! Destroying an entity bumps the slot's version, so handles kept across a
//! destroy fail [`Entities::is_alive`] even after the slot is reused.

use crate::engine::error::CapacityError;
use crate::engine::types::{
    ArchetypeID, ChunkID, EntityID, IndexID, RowID, VersionID, INDEX_BITS, INDEX_MASK,
};

/// Slots added to the table whenever the free store runs dry.
const GROWTH_STEP: u64 = 1024;


#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct Entity(pub EntityID);

#[inline]
const fn make_id(index: IndexID, version: VersionID) -> EntityID {
    ((version as EntityID) << INDEX_BITS) | (index as EntityID)
}

impl Entity {
    #[inline]
    pub(crate) fn from_parts(index: IndexID, version: VersionID) -> Self {
        debug_assert!((index as EntityID) <= INDEX_MASK);
        Entity(make_id(index, version))
    }

    #[inline] pub fn index(self) -> IndexID { (self.0 & INDEX_MASK) as IndexID }
    #[inline] pub fn version(self) -> VersionID { (self.0 >> INDEX_BITS) as VersionID }
    #[inline] pub fn to_bits(self) -> EntityID { self.0 }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index(), self.version())
    }
}

/// Current storage location of a live entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityRecord {
    pub archetype: ArchetypeID,
    pub chunk: ChunkID,
    pub row: RowID,
}

/// Slot allocator with version tracking.
///
/// ## Invariants
/// - `versions`, `alive` and `records` have equal length.
/// - A slot index is in `free_store` iff it is not alive.
/// - The table never grows beyond `max_entities` slots.

#[derive(Debug)]
pub struct Entities {
    versions: Vec<VersionID>,
    free_store: Vec<IndexID>,
    alive: Vec<bool>,
    records: Vec<EntityRecord>,
    live: usize,
    max_entities: u64,
}

impl Entities {
    pub fn new(max_entities: u64) -> Self {
        Self {
            versions: Vec::new(),
            free_store: Vec::new(),
            alive: Vec::new(),
            records: Vec::new(),
            live: 0,
            max_entities: max_entities.min(INDEX_MASK + 1),
        }
    }

    fn grow(&mut self) -> Result<(), CapacityError> {
        let current = self.versions.len() as u64;
        if current >= self.max_entities {
            return Err(CapacityError { entities_needed: current + 1, capacity: self.max_entities });
        }
        let target = (current + GROWTH_STEP).min(self.max_entities);

        self.versions.resize(target as usize, 0);
        self.alive.resize(target as usize, false);
        self.records.resize(target as usize, EntityRecord::default());

        // Reverse so the lowest fresh index is handed out first.
        self.free_store.extend((current..target).rev().map(|index| index as IndexID));
        Ok(())
    }

    /// Reserves a slot and binds it to `record`.
    pub fn allocate(&mut self, record: EntityRecord) -> Result<Entity, CapacityError> {
        if self.free_store.is_empty() {
            self.grow()?;
        }
        let Some(index) = self.free_store.pop() else {
            return Err(CapacityError {
                entities_needed: self.live as u64 + 1,
                capacity: self.max_entities,
            });
        };

        let slot = index as usize;
        self.alive[slot] = true;
        self.records[slot] = record;
        self.live += 1;
        Ok(Entity::from_parts(index, self.versions[slot]))
    }

    /// Frees `entity`'s slot and bumps its version.
    ///
    /// Returns `false` for a dead or stale handle.
    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = entity.index() as usize;
        self.versions[slot] = self.versions[slot].wrapping_add(1);
        self.alive[slot] = false;
        self.records[slot] = EntityRecord::default();
        self.free_store.push(entity.index());
        self.live -= 1;
        true
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        let slot = entity.index() as usize;
        slot < self.versions.len() && self.alive[slot] && self.versions[slot] == entity.version()
    }

    pub fn record(&self, entity: Entity) -> Option<EntityRecord> {
        self.is_alive(entity).then(|| self.records[entity.index() as usize])
    }

    /// Rebinds a live entity to a new location.
    ///
    /// ## Panics
    /// Panics if `entity` is dead or stale.
    pub fn set_record(&mut self, entity: Entity, record: EntityRecord) {
        assert!(
            self.is_alive(entity),
            "set_record called on a dead or stale entity {entity} (record {record:?})"
        );
        self.records[entity.index() as usize] = record;
    }

    /// Number of live entities.
    #[inline] pub fn len(&self) -> usize { self.live }
    #[inline] pub fn is_empty(&self) -> bool { self.live == 0 }
    #[inline] pub fn capacity(&self) -> u64 { self.max_entities }
}
