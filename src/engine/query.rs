//! Persistent queries over archetypes.
//!
//! A query is an `all` / `some` / `none` component filter. Registering one
//! with the [`QueryRegistry`] resolves it once against every existing
//! archetype; afterwards the record is extended incrementally as new
//! archetypes appear, so a query never rescans storage.
//!
//! ## Matching
//! An archetype with signature `S` matches when
//! * `S ⊇ all`,
//! * `some` is empty or `S ∩ some ≠ ∅`,
//! * `S ∩ none = ∅`.
//!
//! ## Identity
//! Records are deduplicated by set equality of the three filters. The order
//! in which components were declared does not matter, and access modes are
//! not part of the key: a reader and a writer of the same filter share one
//! record. Access lives in [`SystemQuery`].

use std::any::type_name;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::archetype::Archetype;
use crate::engine::component::ComponentRegistry;
use crate::engine::types::{build_signature, normalize_access, Access, ArchetypeID, ComponentID, Signature};


/// Stable handle to a registered query record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(pub u32);

/// Declarative description of a query and of the access its users need.
///
/// ## Example
/// ```ignore
/// let descriptor = QueryDescriptor::new()
///     .read(velocity)
///     .write(position)
///     .without(frozen);
/// ```

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryDescriptor {
    all: Vec<ComponentID>,
    some: Vec<ComponentID>,
    none: Vec<ComponentID>,
    access: Vec<Access>,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `component` and declares read access to it.
    pub fn read(mut self, component: ComponentID) -> Self {
        self.all.push(component);
        self.access.push(Access::read(component));
        self
    }

    /// Requires `component` and declares write access to it.
    pub fn write(mut self, component: ComponentID) -> Self {
        self.all.push(component);
        self.access.push(Access::write(component));
        self
    }

    /// Requires `component` without accessing its data (typically a tag).
    pub fn with(mut self, component: ComponentID) -> Self {
        self.all.push(component);
        self
    }

    /// Adds `component` to the `some` filter with read access.
    pub fn some_read(mut self, component: ComponentID) -> Self {
        self.some.push(component);
        self.access.push(Access::read(component));
        self
    }

    /// Adds `component` to the `some` filter with write access.
    pub fn some_write(mut self, component: ComponentID) -> Self {
        self.some.push(component);
        self.access.push(Access::write(component));
        self
    }

    /// Adds `component` to the `some` filter without accessing it.
    pub fn some(mut self, component: ComponentID) -> Self {
        self.some.push(component);
        self
    }

    /// Excludes archetypes containing `component`.
    pub fn without(mut self, component: ComponentID) -> Self {
        self.none.push(component);
        self
    }

    pub fn all_filter(&self) -> &[ComponentID] { &self.all }
    pub fn some_filter(&self) -> &[ComponentID] { &self.some }
    pub fn none_filter(&self) -> &[ComponentID] { &self.none }

    /// Declared access, one entry per component, write superseding read.
    pub fn access(&self) -> Vec<Access> {
        normalize_access(&self.access)
    }

    fn key(&self) -> QueryKey {
        QueryKey {
            all: build_signature(&self.all),
            some: build_signature(&self.some),
            none: build_signature(&self.none),
        }
    }
}

/// Typed front end for [`QueryDescriptor`].
///
/// ## Panics
/// Every method panics if the named type was never registered.

pub struct QueryBuilder<'r> {
    registry: &'r ComponentRegistry,
    descriptor: QueryDescriptor,
}

impl<'r> QueryBuilder<'r> {
    pub fn new(registry: &'r ComponentRegistry) -> Self {
        Self { registry, descriptor: QueryDescriptor::new() }
    }

    fn id<T: 'static>(&self) -> ComponentID {
        match self.registry.id_of::<T>() {
            Some(id) => id,
            None => panic!("query names unregistered component `{}`", type_name::<T>()),
        }
    }

    pub fn read<T: 'static>(mut self) -> Self {
        let id = self.id::<T>();
        self.descriptor = self.descriptor.read(id);
        self
    }

    pub fn write<T: 'static>(mut self) -> Self {
        let id = self.id::<T>();
        self.descriptor = self.descriptor.write(id);
        self
    }

    pub fn with<T: 'static>(mut self) -> Self {
        let id = self.id::<T>();
        self.descriptor = self.descriptor.with(id);
        self
    }

    pub fn some_read<T: 'static>(mut self) -> Self {
        let id = self.id::<T>();
        self.descriptor = self.descriptor.some_read(id);
        self
    }

    pub fn some_write<T: 'static>(mut self) -> Self {
        let id = self.id::<T>();
        self.descriptor = self.descriptor.some_write(id);
        self
    }

    pub fn without<T: 'static>(mut self) -> Self {
        let id = self.id::<T>();
        self.descriptor = self.descriptor.without(id);
        self
    }

    pub fn build(self) -> QueryDescriptor {
        self.descriptor
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct QueryKey {
    all: Signature,
    some: Signature,
    none: Signature,
}

/// A resolved filter and the archetypes it matches.
#[derive(Clone, Debug)]
pub struct QueryRecord {
    id: QueryId,
    all: Signature,
    some: Signature,
    none: Signature,
    archetypes: Vec<ArchetypeID>,
}

impl QueryRecord {
    #[inline] pub fn id(&self) -> QueryId { self.id }

    /// Matching archetypes in creation order. Only ever grows.
    #[inline]
    pub fn archetypes(&self) -> &[ArchetypeID] {
        &self.archetypes
    }

    /// Returns `true` if an archetype with `signature` satisfies the filter.
    pub fn matches(&self, signature: &Signature) -> bool {
        signature.contains_all(&self.all)
            && (self.some.is_empty() || signature.intersects(&self.some))
            && !signature.intersects(&self.none)
    }
}

/// Owns all query records of a store.

#[derive(Debug, Default)]
pub struct QueryRegistry {
    records: Vec<QueryRecord>,
    by_key: HashMap<QueryKey, QueryId>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `descriptor`, creating and resolving it on first use.
    pub fn register(&mut self, descriptor: &QueryDescriptor, archetypes: &[Archetype]) -> QueryId {
        let key = descriptor.key();
        if let Some(&id) = self.by_key.get(&key) {
            return id;
        }

        let id = QueryId(self.records.len() as u32);
        let mut record = QueryRecord {
            id,
            all: key.all,
            some: key.some,
            none: key.none,
            archetypes: Vec::new(),
        };
        record.archetypes = archetypes
            .iter()
            .filter(|a| record.matches(a.signature()))
            .map(|a| a.id())
            .collect();

        tracing::debug!(query = id.0, matched = record.archetypes.len(), "registered query");
        self.records.push(record);
        self.by_key.insert(key, id);
        id
    }

    /// Appends a freshly created archetype to every record it matches.
    pub fn on_archetype_created(&mut self, archetype: &Archetype) {
        for record in &mut self.records {
            if record.matches(archetype.signature()) {
                record.archetypes.push(archetype.id());
            }
        }
    }

    /// ## Panics
    /// Panics if `id` was not issued by this registry.
    pub fn get(&self, id: QueryId) -> &QueryRecord {
        &self.records[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A query as used by one system: record identity plus declared access.
#[derive(Clone, Debug)]
pub struct SystemQuery {
    pub id: QueryId,
    pub access: Arc<[Access]>,
}
