//! # Archetypes
//!
//! An [`Archetype`] owns every entity whose component set is exactly its
//! [`Signature`]. Rows live in an ordered list of fixed-capacity [`Chunk`]s.
//!
//! ## Layout
//! - The signature includes tags and is used for query matching.
//! - Only non-zero-size components get a column ([`ColumnLayout`]), sorted
//!   by component id.
//! - Chunk capacity is `byte_budget / (sum of column sizes + entity id size)`,
//!   never less than one row.
//!
//! ## Sharing
//! Chunks are held as `Arc<Chunk>` so job payloads can reference them
//! without copying. Structural mutation goes through [`Archetype::chunk_mut`],
//! which requires the archetype to hold the only reference. A job that still
//! holds a chunk when the store restructures it is a scheduling bug and
//! panics.
//!
//! Archetypes are never destroyed. Empty chunks are kept for reuse.

use std::sync::Arc;

use crate::engine::component::ComponentRegistry;
use crate::engine::entity::{Entity, EntityRecord};
use crate::engine::storage::{Chunk, ColumnLayout};
use crate::engine::types::{ArchetypeID, ChunkID, ComponentID, RowID, Signature};


/// Rows computed for a chunk with the given column layout and byte budget.
pub fn chunk_capacity_for(layout: &[ColumnLayout], byte_budget: usize) -> usize {
    let per_entity: usize =
        layout.iter().map(|c| c.size).sum::<usize>() + std::mem::size_of::<Entity>();
    (byte_budget / per_entity).max(1)
}

/// Storage for one exact component set.
///
/// ## Invariants
/// - Every chunk shares `layout` and `chunk_capacity`.
/// - There is always at least one chunk.

#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeID,
    signature: Signature,
    layout: Vec<ColumnLayout>,
    chunk_capacity: usize,
    chunks: Vec<Arc<Chunk>>,
}

impl Archetype {
    /// Creates the archetype for `signature` and allocates its first chunk.

    pub fn new(
        id: ArchetypeID,
        signature: Signature,
        registry: &ComponentRegistry,
        byte_budget: usize,
    ) -> Self {
        let layout: Vec<ColumnLayout> = signature
            .iterate_over_components()
            .map(|component| registry.describe(component))
            .filter(|desc| !desc.is_tag())
            .map(|desc| ColumnLayout { component: desc.id, size: desc.size })
            .collect();

        let chunk_capacity = chunk_capacity_for(&layout, byte_budget);
        let first = Arc::new(Chunk::new(chunk_capacity, &layout));

        Self { id, signature, layout, chunk_capacity, chunks: vec![first] }
    }

    #[inline] pub fn id(&self) -> ArchetypeID { self.id }
    #[inline] pub fn signature(&self) -> &Signature { &self.signature }
    #[inline] pub fn layout(&self) -> &[ColumnLayout] { &self.layout }
    #[inline] pub fn chunk_capacity(&self) -> usize { self.chunk_capacity }
    #[inline] pub fn chunks(&self) -> &[Arc<Chunk>] { &self.chunks }
    #[inline] pub fn chunk_count(&self) -> usize { self.chunks.len() }

    /// Returns `true` if `component` is part of this archetype (tags included).
    #[inline]
    pub fn has(&self, component: ComponentID) -> bool {
        self.signature.has(component)
    }

    /// Total number of rows across all chunks.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.is_empty())
    }

    pub fn chunk(&self, chunk: ChunkID) -> &Arc<Chunk> {
        &self.chunks[chunk as usize]
    }

    /// Exclusive access to a chunk for structural mutation.
    ///
    /// ## Panics
    /// Panics if a job still holds a reference to the chunk.

    pub fn chunk_mut(&mut self, chunk: ChunkID) -> &mut Chunk {
        let id = self.id;
        match Arc::get_mut(&mut self.chunks[chunk as usize]) {
            Some(chunk) => chunk,
            None => panic!(
                "structural mutation of chunk {chunk} in archetype {id} while a job still holds it"
            ),
        }
    }

    /// Index of the first chunk with a free row, appending a chunk if all are full.
    pub fn find_or_create_available_chunk(&mut self) -> ChunkID {
        if let Some(index) = self.chunks.iter().position(|c| !c.is_full()) {
            return index as ChunkID;
        }
        self.chunks.push(Arc::new(Chunk::new(self.chunk_capacity, &self.layout)));
        tracing::trace!(archetype = self.id, chunks = self.chunks.len(), "allocated chunk");
        (self.chunks.len() - 1) as ChunkID
    }

    /// Appends a zeroed row for `entity` and returns where it landed.
    pub fn push_zeroed(&mut self, entity: Entity) -> EntityRecord {
        let chunk = self.find_or_create_available_chunk();
        let row = self.chunk_mut(chunk).push_zeroed(entity);
        EntityRecord { archetype: self.id, chunk, row: row as RowID }
    }

    /// Swap-removes a row. Returns the entity moved into `row`, if any.
    pub fn swap_remove(&mut self, chunk: ChunkID, row: RowID) -> Option<Entity> {
        self.chunk_mut(chunk).swap_remove(row as usize)
    }
}
