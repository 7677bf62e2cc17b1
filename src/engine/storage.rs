//! Fixed-capacity columnar chunks.
//!
//! A [`Chunk`] holds up to `capacity` entities of one archetype. It stores
//! one packed byte column per non-tag component plus an entity-id array, all
//! index-aligned: row `r` of every column belongs to `entities()[r]`.
//!
//! # Storage model
//!
//! ```text
//! entities: [e0, e1, e2, .. e(len-1) | unused ..]
//! column A: [a0, a1, a2, .. a(len-1) | zeroed ..]
//! column B: [b0, b1, b2, .. b(len-1) | zeroed ..]
//! ```
//!
//! Columns are backed by `u128` words, so every column starts on a
//! [`COLUMN_ALIGN`]-byte boundary and can be reinterpreted as `&[T]` for any
//! registered component.
//!
//! # Safety and invariants
//!
//! Chunks are shared with worker threads as `Arc<Chunk>`. Column bytes live
//! in `UnsafeCell`s and the chunk itself takes **no locks**:
//!
//! - Structural mutation (push, swap-remove, row copies) requires
//!   `&mut Chunk`, which the owning archetype obtains through `Arc::get_mut`.
//!   A chunk still referenced by a job therefore cannot be restructured.
//! - Column access through `&Chunk` is `unsafe` and only reachable through
//!   [`crate::ChunkView`], which checks the job's declared access. The job
//!   scheduler orders conflicting jobs, so a column is never written by one
//!   job while another reads it.
//! - Zero-size components (tags) have no column.

use std::cell::UnsafeCell;

use bytemuck::Pod;

use crate::engine::component::{Bundle, BundleEntry, Component, ComponentRegistry};
use crate::engine::entity::Entity;
use crate::engine::error::{ECSResult, SpawnError};
use crate::engine::types::{ComponentID, Signature, COLUMN_ALIGN};

const _: () = assert!(std::mem::align_of::<u128>() <= COLUMN_ALIGN);

/// Position and width of one stored component in a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnLayout {
    pub component: ComponentID,
    pub size: usize,
}

/// Packed bytes of one component across all rows of a chunk.
struct Column {
    component: ComponentID,
    size: usize,
    data: UnsafeCell<Box<[u128]>>,
}

impl Column {
    fn new(layout: ColumnLayout, capacity: usize) -> Self {
        let words = (layout.size * capacity).div_ceil(std::mem::size_of::<u128>());
        Self {
            component: layout.component,
            size: layout.size,
            data: UnsafeCell::new(vec![0u128; words].into_boxed_slice()),
        }
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(self.data.get_mut())
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        // SAFETY: callers hold either `&mut Chunk` or a scheduler-ordered view
        // that forbids a concurrent writer on this column.
        let words: &[u128] = unsafe { &*self.data.get() };
        bytemuck::cast_slice(words)
    }

    #[inline]
    fn row_range(&self, row: usize) -> std::ops::Range<usize> {
        row * self.size..(row + 1) * self.size
    }
}

/// Fixed-capacity slab of rows for one archetype.

pub struct Chunk {
    capacity: usize,
    entities: Vec<Entity>,
    columns: Vec<Column>,
    signature: Signature,
}

// SAFETY: column bytes are only mutated through `&mut Chunk` or through a
// `ChunkView` whose writes are exclusive per the job dependency graph.
unsafe impl Sync for Chunk {}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("len", &self.entities.len())
            .field("capacity", &self.capacity)
            .field("columns", &self.columns.iter().map(|c| c.component).collect::<Vec<_>>())
            .finish()
    }
}

impl Chunk {
    /// Allocates a zeroed chunk.
    ///
    /// `layout` must be sorted by component id and contain only non-zero sizes.
    pub fn new(capacity: usize, layout: &[ColumnLayout]) -> Self {
        debug_assert!(capacity > 0);
        debug_assert!(layout.windows(2).all(|w| w[0].component < w[1].component));
        let mut signature = Signature::default();
        let columns = layout
            .iter()
            .map(|&l| {
                debug_assert!(l.size > 0);
                signature.set(l.component);
                Column::new(l, capacity)
            })
            .collect();
        Self { capacity, entities: Vec::with_capacity(capacity), columns, signature }
    }

    #[inline] pub fn len(&self) -> usize { self.entities.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.entities.is_empty() }
    #[inline] pub fn capacity(&self) -> usize { self.capacity }
    #[inline] pub fn is_full(&self) -> bool { self.entities.len() >= self.capacity }

    /// Entity ids of the occupied rows.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Returns `true` if `component` has a column here.
    #[inline]
    pub fn has_column(&self, component: ComponentID) -> bool {
        self.signature.has(component)
    }

    fn column_index(&self, component: ComponentID) -> Option<usize> {
        if !self.signature.has(component) {
            return None;
        }
        self.columns.binary_search_by_key(&component, |c| c.component).ok()
    }

    /// Appends `entity` with all column bytes zeroed and returns its row.
    ///
    /// ## Panics
    /// Panics if the chunk is full.

    pub fn push_zeroed(&mut self, entity: Entity) -> usize {
        assert!(!self.is_full(), "push into a full chunk (capacity {})", self.capacity);
        let row = self.entities.len();
        for column in &mut self.columns {
            let range = column.row_range(row);
            column.bytes_mut()[range].fill(0);
        }
        self.entities.push(entity);
        row
    }

    /// Removes `row`, moving the last row into its place.
    ///
    /// Returns the entity that now occupies `row`, or `None` if `row` was
    /// the last row. The vacated tail slot is zeroed.
    ///
    /// ## Panics
    /// Panics if `row >= len`.

    pub fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        let last = self.entities.len().checked_sub(1).filter(|&last| row <= last);
        let Some(last) = last else {
            panic!("swap_remove of row {row} in a chunk of {} rows", self.entities.len());
        };

        for column in &mut self.columns {
            let size = column.size;
            let bytes = column.bytes_mut();
            if row != last {
                bytes.copy_within(last * size..(last + 1) * size, row * size);
            }
            bytes[last * size..(last + 1) * size].fill(0);
        }

        self.entities.swap_remove(row);
        (row != last).then(|| self.entities[row])
    }

    /// Copies every column `destination` shares with `self` from `src_row`
    /// into `dst_row`.
    pub fn copy_row_into(&self, src_row: usize, destination: &mut Chunk, dst_row: usize) {
        for column in &mut destination.columns {
            let Some(index) = self.column_index(column.component) else { continue };
            let source = &self.columns[index];
            let range = column.row_range(dst_row);
            column.bytes_mut()[range].copy_from_slice(&source.bytes()[source.row_range(src_row)]);
        }
    }

    /// Copies out every stored value of `row`.
    pub fn snapshot_row(&self, row: usize) -> Vec<(ComponentID, Vec<u8>)> {
        self.columns
            .iter()
            .filter_map(|c| self.row_bytes(c.component, row).map(|bytes| (c.component, bytes.to_vec())))
            .collect()
    }

    /// Writes back values taken with [`Chunk::snapshot_row`].
    ///
    /// Components without a column in this chunk are ignored.
    pub fn restore_row(&mut self, row: usize, saved: &[(ComponentID, Vec<u8>)]) {
        for (component, bytes) in saved {
            if let Some(slot) = self.row_bytes_mut(*component, row) {
                if slot.len() == bytes.len() {
                    slot.copy_from_slice(bytes);
                }
            }
        }
    }

    /// Mutable bytes of one component value.
    pub fn row_bytes_mut(&mut self, component: ComponentID, row: usize) -> Option<&mut [u8]> {
        let index = self.column_index(component)?;
        if row >= self.entities.len() {
            return None;
        }
        let column = &mut self.columns[index];
        let range = column.row_range(row);
        Some(&mut column.bytes_mut()[range])
    }

    /// Bytes of one component value.
    ///
    /// Readers on the orchestrating thread must fence in-flight writers of
    /// `component` before calling this.
    pub fn row_bytes(&self, component: ComponentID, row: usize) -> Option<&[u8]> {
        let index = self.column_index(component)?;
        if row >= self.entities.len() {
            return None;
        }
        let column = &self.columns[index];
        Some(&column.bytes()[column.row_range(row)])
    }

    /// Occupied bytes of a column, shared.
    ///
    /// # Safety
    /// No other thread may hold a mutable slice of the same column.
    pub(crate) unsafe fn column_bytes(&self, component: ComponentID) -> Option<&[u8]> {
        let index = self.column_index(component)?;
        let column = &self.columns[index];
        let len = self.entities.len() * column.size;
        Some(&column.bytes()[..len])
    }

    /// Occupied bytes of a column, exclusive.
    ///
    /// # Safety
    /// The caller must be the only accessor of this column for the lifetime
    /// of the returned slice.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn column_bytes_mut(&self, component: ComponentID) -> Option<&mut [u8]> {
        let index = self.column_index(component)?;
        let column = &self.columns[index];
        let len = self.entities.len() * column.size;
        let words: &mut [u128] = unsafe { &mut *column.data.get() };
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(words);
        Some(&mut bytes[..len])
    }
}

/// Entry-point for writing the initial values of one row.
///
/// Handed to [`Init::With`] callbacks and used to apply [`Bundle`]s. The
/// writer only addresses components of the entity's type; everything else
/// is reported as [`SpawnError::MissingComponent`].

pub struct RowWriter<'a> {
    registry: &'a ComponentRegistry,
    chunk: &'a mut Chunk,
    row: usize,
    signature: &'a Signature,
}

impl<'a> RowWriter<'a> {
    pub(crate) fn new(
        registry: &'a ComponentRegistry,
        chunk: &'a mut Chunk,
        row: usize,
        signature: &'a Signature,
    ) -> Self {
        Self { registry, chunk, row, signature }
    }

    /// Entity being written.
    pub fn entity(&self) -> Entity {
        self.chunk.entities()[self.row]
    }

    fn slot<T: 'static>(&mut self) -> ECSResult<(&'static str, &mut [u8], ComponentID)> {
        let id = self.registry.require_id_of::<T>()?;
        let name = self.registry.name_of(id);
        if !self.signature.has(id) {
            return Err(SpawnError::MissingComponent { component: name }.into());
        }
        let bytes = self
            .chunk
            .row_bytes_mut(id, self.row)
            .ok_or(SpawnError::MissingComponent { component: name })?;
        Ok((name, bytes, id))
    }

    /// Writes a whole component value.
    pub fn set<T: Component>(&mut self, value: T) -> ECSResult<()> {
        let (_, bytes, _) = self.slot::<T>()?;
        bytes.copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    /// Reads back the current value of `T` in this row.
    pub fn get<T: Component>(&mut self) -> ECSResult<T> {
        let (_, bytes, _) = self.slot::<T>()?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Writes one named field of `T`.
    pub fn set_field<T: Component, F: Pod>(&mut self, field: &str, value: F) -> ECSResult<()> {
        let registry = self.registry;
        let (name, bytes, id) = self.slot::<T>()?;
        let schema = &registry.describe(id).schema;
        if schema.field(field).is_none() {
            return Err(SpawnError::UnknownField { component: name, field: field.to_owned() }.into());
        }
        if !schema.view_mut(bytes).set(field, value) {
            return Err(SpawnError::FieldType {
                component: name,
                field: field.to_owned(),
                provided: std::any::type_name::<F>(),
            }
            .into());
        }
        Ok(())
    }

    /// Applies every entry of `bundle`, in insertion order.
    pub(crate) fn apply_bundle(&mut self, bundle: &Bundle) -> ECSResult<()> {
        let registry = self.registry;
        for entry in bundle.entries() {
            let id = registry
                .id_of_type_id(entry.type_id())
                .ok_or(SpawnError::UnregisteredComponent { name: entry.name() })?;
            if !self.signature.has(id) {
                return Err(SpawnError::MissingComponent { component: entry.name() }.into());
            }
            let desc = registry.describe(id);

            match entry {
                BundleEntry::Tag { .. } => {}
                BundleEntry::Value { name, bytes, .. } => {
                    let name = *name;
                    let slot = self
                        .chunk
                        .row_bytes_mut(id, self.row)
                        .ok_or(SpawnError::MissingComponent { component: name })?;
                    if slot.len() != bytes.len() {
                        return Err(SpawnError::SizeMismatch {
                            component: name,
                            expected: slot.len(),
                            actual: bytes.len(),
                        }
                        .into());
                    }
                    slot.copy_from_slice(bytes);
                }
                BundleEntry::Field { name, field, field_type, field_type_name, bytes, .. } => {
                    let (name, field) = (*name, *field);
                    if desc.schema.field(field).is_none() {
                        return Err(SpawnError::UnknownField {
                            component: name,
                            field: field.to_owned(),
                        }
                        .into());
                    }
                    let slot = self
                        .chunk
                        .row_bytes_mut(id, self.row)
                        .ok_or(SpawnError::MissingComponent { component: name })?;
                    if desc.schema.view_mut(slot).set_erased(field, *field_type, bytes).is_none() {
                        return Err(SpawnError::FieldType {
                            component: name,
                            field: field.to_owned(),
                            provided: *field_type_name,
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Initial values for a created or attached row.
///
/// Rows start zeroed; the initializer then overwrites any subset of the
/// entity's components.

#[derive(Default)]
pub enum Init {
    /// Leave every new component zeroed.
    #[default]
    Zeroed,
    /// Copy values from a bundle.
    Values(Bundle),
    /// Run a callback against the row.
    With(Box<dyn FnOnce(&mut RowWriter<'_>) -> ECSResult<()> + Send>),
}

impl Init {
    /// Wraps a row callback.
    pub fn with<F>(f: F) -> Self
    where
        F: FnOnce(&mut RowWriter<'_>) -> ECSResult<()> + Send + 'static,
    {
        Init::With(Box::new(f))
    }

    pub(crate) fn apply(self, writer: &mut RowWriter<'_>) -> ECSResult<()> {
        match self {
            Init::Zeroed => Ok(()),
            Init::Values(bundle) => writer.apply_bundle(&bundle),
            Init::With(f) => f(writer),
        }
    }
}

impl From<Bundle> for Init {
    fn from(bundle: Bundle) -> Self {
        Init::Values(bundle)
    }
}

impl std::fmt::Debug for Init {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Init::Zeroed => f.write_str("Init::Zeroed"),
            Init::Values(bundle) => f.debug_tuple("Init::Values").field(bundle).finish(),
            Init::With(_) => f.write_str("Init::With(..)"),
        }
    }
}
