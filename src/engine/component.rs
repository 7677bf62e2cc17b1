//! # Component Registry
//!
//! This module assigns stable [`ComponentID`] values to Rust component types
//! and records the fixed layout (size, alignment, field schema) that chunk
//! storage uses for its byte columns.
//!
//! ## Design
//! - The registry is an explicit value owned by the world build step. Two
//!   worlds never share ids, and tests stay isolated from each other.
//! - Data components are `bytemuck::Pod`, so a column is plain bytes and a
//!   value round-trips through its byte representation without `unsafe`.
//! - Tags are zero-size marker types registered with
//!   [`ComponentRegistry::register_tag`]. They take part in archetype identity
//!   and query matching but own no column.
//! - After the world is built the registry is frozen behind an `Arc` and
//!   shared read-only with worker threads.
//!
//! ## Invariants
//! - Ids are dense, assigned in registration order, and below
//!   [`COMPONENT_CAP`].
//! - Registering the same type twice returns the existing id.
//! - A registered layout never changes.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::mem::{align_of, size_of};

use bytemuck::Pod;

use crate::engine::error::{ECSResult, SpawnError};
use crate::engine::schema::Schema;
use crate::engine::types::{ComponentID, COLUMN_ALIGN, COMPONENT_CAP};


/// A data component: plain-old-data with a fixed byte layout.
///
/// Override [`Component::schema`] to expose named fields; the declared
/// layout must match the type's size.
///
/// ```ignore
/// #[repr(C)]
/// #[derive(Clone, Copy, Pod, Zeroable)]
/// struct Health { current: f32, max: f32 }
///
/// impl Component for Health {
///     fn schema() -> Schema {
///         Schema::builder().field::<f32>("current").field::<f32>("max").build()
///     }
/// }
/// ```

pub trait Component: Pod + Send + Sync {
    /// Field layout of this component.
    fn schema() -> Schema
    where
        Self: Sized,
    {
        Schema::opaque::<Self>()
    }
}

/// Describes a registered component type.
///
/// ## Notes
/// `size == 0` marks a tag.

#[derive(Clone, Debug)]
pub struct ComponentType {
    /// Runtime identifier assigned by the registry.
    pub id: ComponentID,
    /// Rust type name for diagnostics.
    pub name: &'static str,
    /// Runtime `TypeId` of the component.
    pub type_id: TypeId,
    /// Byte size of one value.
    pub size: usize,
    /// Alignment of one value.
    pub align: usize,
    /// Field layout.
    pub schema: Schema,
}

impl ComponentType {
    /// Returns `true` for zero-size marker components.
    #[inline]
    pub fn is_tag(&self) -> bool {
        self.size == 0
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ComponentType {{ id: {}, name: {}, size: {}, align: {} }}",
            self.id, self.name, self.size, self.align
        )
    }
}

/// Mapping between Rust component types and compact `ComponentID` values.

#[derive(Debug)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentID>,
    by_id: Vec<ComponentType>,
    capacity: usize,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_capacity(COMPONENT_CAP)
    }
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry limited to `capacity` component types.
    ///
    /// The limit is clamped to [`COMPONENT_CAP`].
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            by_type: HashMap::new(),
            by_id: Vec::new(),
            capacity: capacity.min(COMPONENT_CAP),
        }
    }

    fn alloc_id(&self) -> ComponentID {
        let component_id = self.by_id.len();
        assert!(component_id < self.capacity, "Exceeded configured component capacity.");
        component_id as ComponentID
    }

    /// Registers data component `T` and returns its id.
    ///
    /// ## Panics
    /// - if the declared schema size differs from `size_of::<T>()`,
    /// - if `T` is zero-sized (use [`register_tag`](Self::register_tag)),
    /// - if `T` needs more than [`COLUMN_ALIGN`] alignment,
    /// - if the capacity is exceeded.

    pub fn register<T: Component>(&mut self) -> ComponentID {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return existing;
        }

        let schema = T::schema();
        assert!(
            size_of::<T>() > 0,
            "component `{}` is zero-sized; register it as a tag",
            type_name::<T>()
        );
        assert_eq!(
            schema.size(),
            size_of::<T>(),
            "schema of `{}` does not match its size",
            type_name::<T>()
        );
        assert!(
            align_of::<T>() <= COLUMN_ALIGN,
            "component `{}` requires alignment above {COLUMN_ALIGN}",
            type_name::<T>()
        );

        let id = self.alloc_id();
        self.by_type.insert(type_id, id);
        self.by_id.push(ComponentType {
            id,
            name: type_name::<T>(),
            type_id,
            size: size_of::<T>(),
            align: align_of::<T>(),
            schema,
        });
        id
    }

    /// Registers tag type `T` and returns its id.
    ///
    /// ## Panics
    /// Panics if `T` is not zero-sized.

    pub fn register_tag<T: 'static>(&mut self) -> ComponentID {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return existing;
        }
        assert_eq!(size_of::<T>(), 0, "tag `{}` must be zero-sized", type_name::<T>());

        let id = self.alloc_id();
        self.by_type.insert(type_id, id);
        self.by_id.push(ComponentType {
            id,
            name: type_name::<T>(),
            type_id,
            size: 0,
            align: 1,
            schema: Schema::empty(),
        });
        id
    }

    /// Returns the `ComponentID` for `T`, if registered.
    #[inline]
    pub fn id_of<T: 'static>(&self) -> Option<ComponentID> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Returns the `ComponentID` for `T` or a `SpawnError` if it is unknown.
    pub fn require_id_of<T: 'static>(&self) -> ECSResult<ComponentID> {
        self.id_of::<T>()
            .ok_or_else(|| SpawnError::UnregisteredComponent { name: type_name::<T>() }.into())
    }

    /// Returns the `ComponentID` associated with a runtime `TypeId`.
    #[inline]
    pub fn id_of_type_id(&self, type_id: TypeId) -> Option<ComponentID> {
        self.by_type.get(&type_id).copied()
    }

    /// Returns the descriptor for `component_id`, if registered.
    #[inline]
    pub fn get(&self, component_id: ComponentID) -> Option<&ComponentType> {
        self.by_id.get(component_id as usize)
    }

    /// Returns the descriptor for `component_id`.
    ///
    /// ## Panics
    /// Panics if the id was never issued by this registry.
    pub fn describe(&self, component_id: ComponentID) -> &ComponentType {
        match self.by_id.get(component_id as usize) {
            Some(desc) => desc,
            None => panic!("component id {component_id} is not registered"),
        }
    }

    /// Human-readable name of `component_id`, for diagnostics.
    pub fn name_of(&self, component_id: ComponentID) -> &'static str {
        self.get(component_id).map(|d| d.name).unwrap_or("<unregistered>")
    }

    /// Number of registered component types.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Iterates over all descriptors in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentType> {
        self.by_id.iter()
    }
}

/// One pending write held by a [`Bundle`].
#[derive(Clone, Debug)]
pub(crate) enum BundleEntry {
    /// Whole component value.
    Value { type_id: TypeId, name: &'static str, bytes: Vec<u8> },
    /// Single field of a component.
    Field {
        type_id: TypeId,
        name: &'static str,
        field: &'static str,
        field_type: TypeId,
        field_type_name: &'static str,
        bytes: Vec<u8>,
    },
    /// Tag presence; carries no data.
    Tag { type_id: TypeId, name: &'static str },
}

impl BundleEntry {
    pub(crate) fn type_id(&self) -> TypeId {
        match self {
            BundleEntry::Value { type_id, .. }
            | BundleEntry::Field { type_id, .. }
            | BundleEntry::Tag { type_id, .. } => *type_id,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            BundleEntry::Value { name, .. }
            | BundleEntry::Field { name, .. }
            | BundleEntry::Tag { name, .. } => name,
        }
    }
}

/// Unbound component values waiting to be written into a row.
///
/// ## Purpose
/// A `Bundle` is the value holder used before an entity exists (spawn) or
/// before it has moved (attach). Values are stored as plain bytes, so a
/// bundle can be built on a worker thread and applied later by the
/// deferred-command processor.
///
/// ## Example
/// ```ignore
/// let bundle = Bundle::new()
///     .with(Position { x: 1.0, y: 2.0 })
///     .with_field::<Health, f32>("current", 50.0)
///     .tag::<Player>();
/// ```

#[derive(Clone, Debug, Default)]
pub struct Bundle {
    entries: Vec<BundleEntry>,
}

impl Bundle {
    /// Creates an empty bundle.
    #[inline]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Adds a whole component value. A later value for the same type wins.
    pub fn with<T: Component>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    /// Adds a whole component value in place.
    pub fn insert<T: Component>(&mut self, value: T) {
        self.entries.push(BundleEntry::Value {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
            bytes: bytemuck::bytes_of(&value).to_vec(),
        });
    }

    /// Adds a single field value of component `T`; other fields stay zeroed.
    pub fn with_field<T: Component, F: Pod>(mut self, field: &'static str, value: F) -> Self {
        self.entries.push(BundleEntry::Field {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
            field,
            field_type: TypeId::of::<F>(),
            field_type_name: type_name::<F>(),
            bytes: bytemuck::bytes_of(&value).to_vec(),
        });
        self
    }

    /// Marks tag `T` as part of the entity type.
    pub fn tag<T: 'static>(mut self) -> Self {
        self.entries.push(BundleEntry::Tag { type_id: TypeId::of::<T>(), name: type_name::<T>() });
        self
    }

    /// Returns `true` if the bundle holds nothing.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves the set of component ids this bundle addresses.
    pub fn component_ids(&self, registry: &ComponentRegistry) -> ECSResult<Vec<ComponentID>> {
        let mut ids = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let id = registry
                .id_of_type_id(entry.type_id())
                .ok_or(SpawnError::UnregisteredComponent { name: entry.name() })?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    pub(crate) fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }
}
