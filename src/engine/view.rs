//! Worker-side access to one chunk.
//!
//! A [`ChunkView`] is what a job body receives for each chunk it processes.
//! It pairs an `Arc<Chunk>` with the job's declared access list and hands
//! out typed column slices:
//!
//! - [`ChunkView::read`] requires a declared read or write on the component.
//! - [`ChunkView::write`] requires a declared write.
//! - Anything else is [`ExecutionError::UndeclaredAccess`].
//!
//! Column guards release their borrow on drop. Two live guards on the same
//! column conflict unless both are reads.

use std::any::type_name;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytemuck::Pod;

use crate::engine::borrow::BorrowTracker;
use crate::engine::component::{Component, ComponentRegistry};
use crate::engine::entity::Entity;
use crate::engine::error::{ECSResult, ExecutionError, SpawnError};
use crate::engine::storage::Chunk;
use crate::engine::types::{Access, AccessMode, ArchetypeID, ChunkID, ComponentID, Signature};


/// One chunk as seen by a running job.

pub struct ChunkView {
    chunk: Arc<Chunk>,
    archetype: ArchetypeID,
    chunk_index: ChunkID,
    signature: Signature,
    access: Arc<[Access]>,
    registry: Arc<ComponentRegistry>,
    borrows: BorrowTracker,
}

impl std::fmt::Debug for ChunkView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkView")
            .field("archetype", &self.archetype)
            .field("chunk", &self.chunk_index)
            .field("len", &self.chunk.len())
            .finish()
    }
}

impl ChunkView {
    pub(crate) fn new(
        chunk: Arc<Chunk>,
        archetype: ArchetypeID,
        chunk_index: ChunkID,
        signature: Signature,
        access: Arc<[Access]>,
        registry: Arc<ComponentRegistry>,
    ) -> Self {
        let borrows = BorrowTracker::new(access.iter().map(|a| a.component));
        Self { chunk, archetype, chunk_index, signature, access, registry, borrows }
    }

    #[inline] pub fn len(&self) -> usize { self.chunk.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.chunk.is_empty() }
    #[inline] pub fn archetype(&self) -> ArchetypeID { self.archetype }
    #[inline] pub fn chunk_index(&self) -> ChunkID { self.chunk_index }

    /// Entity ids of the rows, index-aligned with every column.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        self.chunk.entities()
    }

    /// Returns `true` if the chunk's archetype contains `T` (tags included).
    pub fn has<T: 'static>(&self) -> bool {
        self.registry.id_of::<T>().is_some_and(|id| self.signature.has(id))
    }

    fn declared(&self, component: ComponentID) -> Option<AccessMode> {
        self.access.iter().find(|a| a.component == component).map(|a| a.mode)
    }

    fn resolve<T: 'static>(&self, requested: AccessMode) -> ECSResult<ComponentID> {
        let id = self
            .registry
            .id_of::<T>()
            .ok_or(SpawnError::UnregisteredComponent { name: type_name::<T>() })?;
        let allowed = match (self.declared(id), requested) {
            (Some(AccessMode::Write), _) => true,
            (Some(AccessMode::Read), AccessMode::Read) => true,
            _ => false,
        };
        if !allowed {
            return Err(ExecutionError::UndeclaredAccess { component: type_name::<T>(), requested }.into());
        }
        Ok(id)
    }

    /// Borrows the column of `T` for reading.
    ///
    /// ## Errors
    /// - `UndeclaredAccess` if the job declared no access to `T`,
    /// - `MissingColumn` if this chunk has no column for `T`,
    /// - `BorrowConflict` if the column is currently borrowed for writing.

    pub fn read<T: Component>(&self) -> ECSResult<ColumnRef<'_, T>> {
        self.try_read::<T>()?
            .ok_or_else(|| ExecutionError::MissingColumn { component: type_name::<T>() }.into())
    }

    /// Like [`read`](Self::read), but yields `None` when the chunk lacks `T`.
    ///
    /// Use this for components matched through a query's `some` filter.
    pub fn try_read<T: Component>(&self) -> ECSResult<Option<ColumnRef<'_, T>>> {
        let id = self.resolve::<T>(AccessMode::Read)?;
        if !self.chunk.has_column(id) {
            return Ok(None);
        }
        self.borrows.try_acquire_read(id, type_name::<T>())?;
        // SAFETY: the tracker rules out a live write guard on this column in
        // this view, and the scheduler rules out a concurrent writer job.
        let bytes = unsafe { self.chunk.column_bytes(id) }.unwrap_or(&[]);
        Ok(Some(ColumnRef { slice: bytemuck::cast_slice(bytes), tracker: &self.borrows, component: id }))
    }

    /// Borrows the column of `T` for writing.
    ///
    /// ## Errors
    /// - `UndeclaredAccess` unless the job declared a write to `T`,
    /// - `MissingColumn` if this chunk has no column for `T`,
    /// - `BorrowConflict` if the column is already borrowed.

    pub fn write<T: Component>(&self) -> ECSResult<ColumnMut<'_, T>> {
        self.try_write::<T>()?
            .ok_or_else(|| ExecutionError::MissingColumn { component: type_name::<T>() }.into())
    }

    /// Like [`write`](Self::write), but yields `None` when the chunk lacks `T`.
    pub fn try_write<T: Component>(&self) -> ECSResult<Option<ColumnMut<'_, T>>> {
        let id = self.resolve::<T>(AccessMode::Write)?;
        if !self.chunk.has_column(id) {
            return Ok(None);
        }
        self.borrows.try_acquire_write(id, type_name::<T>())?;
        // SAFETY: the tracker grants at most one write guard per column and
        // no concurrent read guard; the scheduler grants this job exclusive
        // write access to the component.
        let bytes = unsafe { self.chunk.column_bytes_mut(id) }.unwrap_or(&mut []);
        Ok(Some(ColumnMut {
            slice: bytemuck::cast_slice_mut(bytes),
            tracker: &self.borrows,
            component: id,
        }))
    }

    /// Reads one schema field of `T` at `row`.
    pub fn get_field<T: Component, F: Pod>(&self, row: usize, field: &str) -> ECSResult<F> {
        let column = self.read::<T>()?;
        let schema = &self.registry.describe(column.component).schema;
        let value = &column[row];
        schema.view(bytemuck::bytes_of(value)).get::<F>(field).ok_or_else(|| {
            SpawnError::FieldType {
                component: type_name::<T>(),
                field: field.to_owned(),
                provided: type_name::<F>(),
            }
            .into()
        })
    }

    /// Writes one schema field of `T` at `row`.
    pub fn set_field<T: Component, F: Pod>(&self, row: usize, field: &str, value: F) -> ECSResult<()> {
        let mut column = self.write::<T>()?;
        let schema = &self.registry.describe(column.component).schema;
        let slot = &mut column[row];
        if !schema.view_mut(bytemuck::bytes_of_mut(slot)).set(field, value) {
            return Err(SpawnError::FieldType {
                component: type_name::<T>(),
                field: field.to_owned(),
                provided: type_name::<F>(),
            }
            .into());
        }
        Ok(())
    }
}

/// Shared borrow of one column.
pub struct ColumnRef<'v, T> {
    slice: &'v [T],
    tracker: &'v BorrowTracker,
    component: ComponentID,
}

impl<T> Deref for ColumnRef<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.slice
    }
}

impl<T> Drop for ColumnRef<'_, T> {
    fn drop(&mut self) {
        self.tracker.release_read(self.component);
    }
}

/// Exclusive borrow of one column.
pub struct ColumnMut<'v, T> {
    slice: &'v mut [T],
    tracker: &'v BorrowTracker,
    component: ComponentID,
}

impl<T> Deref for ColumnMut<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.slice
    }
}

impl<T> DerefMut for ColumnMut<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.slice
    }
}

impl<T> Drop for ColumnMut<'_, T> {
    fn drop(&mut self) {
        self.tracker.release_write(self.component);
    }
}
