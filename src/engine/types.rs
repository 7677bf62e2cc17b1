//! Identifiers, signatures and access declarations.
//!
//! Every subsystem speaks in these types: the entity table, archetypes,
//! the query registry, the planner and the job scheduler.
//!
//! ## Entity handles
//!
//! An [`EntityID`] packs a slot index and a version into 64 bits:
//!
//! ```text
//! | version (32) | index (32) |
//! ```
//!
//! Slots are recycled; the version is bumped on every destroy so a handle to
//! a previous occupant no longer resolves.
//!
//! ## Signatures
//!
//! A [`Signature`] is a fixed-size bitset over [`ComponentID`]s. It is the
//! identity of an archetype (its exact entity type) and the operand of query
//! matching (`all` / `some` / `none` filters).
//!
//! ## Access
//!
//! Jobs and system queries declare [`Access`] pairs. The scheduler derives
//! job dependencies from them and the planner infers system order from them.

/// Bit-width type used for compile-time layout calculations.
pub type Bits = u8;

/// Globally unique entity identifier encoded as a packed 64-bit value.
pub type EntityID = u64;
/// Index within the entity table.
pub type IndexID = u32;
/// Generation counter used to detect stale entities.
pub type VersionID = u32;

/// Unique identifier for a system.
pub type SystemID = u16;
/// Simulation step counter.
pub type Tick = u64;

/// Total number of bits in an [`EntityID`].
pub const ENTITY_BITS: Bits = 64;
/// Number of bits reserved for the entity index.
pub const INDEX_BITS: Bits = 32;
/// Number of bits reserved for entity versioning.
pub const VERSION_BITS: Bits = ENTITY_BITS - INDEX_BITS;

const _: [(); 1] = [(); (INDEX_BITS + VERSION_BITS == ENTITY_BITS) as usize];

/// Mask selecting the index portion of an [`EntityID`].
pub const INDEX_MASK: EntityID = (1 << INDEX_BITS) - 1;

/// Unique identifier for an archetype.
pub type ArchetypeID = u32;
/// Row index within a chunk.
pub type RowID = u32;
/// Chunk index within an archetype.
pub type ChunkID = u32;

/// Default byte budget of a single chunk.
pub const DEFAULT_CHUNK_BYTES: usize = 16 * 1024;

/// Column alignment guaranteed by chunk storage.
///
/// Component types with a stricter alignment are rejected at registration.
pub const COLUMN_ALIGN: usize = 16;

/// Unique identifier for a component type.
pub type ComponentID = u16;

/// Maximum number of registered component types.
pub const COMPONENT_CAP: usize = 256;
/// Number of `u64` words required to represent a full component signature.
pub const SIGNATURE_SIZE: usize = (COMPONENT_CAP + 63) / 64;

/// Identifier of a scheduled job.
pub type JobID = u64;
/// Identifier of a single worker-pool task.
pub type TaskID = u64;
/// Identifier of a registered worker entry point.
pub type TaskTag = u32;

/// Bitset representing a set of components.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Packed component bitset.
    pub components: [u64; SIGNATURE_SIZE],
}

impl Default for Signature {
    fn default() -> Self {
        Self { components: [0u64; SIGNATURE_SIZE] }
    }
}

impl Signature {
    /// Word index and bit mask of `component_id`.
    #[inline]
    fn locate(component_id: ComponentID) -> (usize, u64) {
        let id = component_id as usize;
        (id >> 6, 1u64 << (id & 63))
    }

    #[inline]
    pub fn set(&mut self, component_id: ComponentID) {
        let (word, mask) = Self::locate(component_id);
        self.components[word] |= mask;
    }

    #[inline]
    pub fn clear(&mut self, component_id: ComponentID) {
        let (word, mask) = Self::locate(component_id);
        self.components[word] &= !mask;
    }

    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        let (word, mask) = Self::locate(component_id);
        self.components[word] & mask != 0
    }

    /// Returns `true` if all components in `signature` are present.
    #[inline]
    pub fn contains_all(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .all(|(a, b)| (a & b) == *b)
    }

    /// Returns `true` if at least one component is shared with `signature`.
    #[inline]
    pub fn intersects(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .any(|(a, b)| (a & b) != 0)
    }

    /// Returns `true` if no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|&word| word == 0)
    }

    /// Number of components in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.components.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Set union.
    pub fn union(&self, other: &Signature) -> Signature {
        let mut out = *self;
        for (a, b) in out.components.iter_mut().zip(other.components.iter()) {
            *a |= *b;
        }
        out
    }

    /// Set difference (`self \ other`).
    pub fn difference(&self, other: &Signature) -> Signature {
        let mut out = *self;
        for (a, b) in out.components.iter_mut().zip(other.components.iter()) {
            *a &= !*b;
        }
        out
    }

    /// Component ids in the set, ascending.
    pub fn iterate_over_components(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.components.iter().enumerate().flat_map(|(word, &bits)| {
            let mut remaining = bits;
            std::iter::from_fn(move || {
                (remaining != 0).then(|| {
                    let bit = remaining.trailing_zeros() as usize;
                    remaining &= remaining - 1;
                    (word * 64 + bit) as ComponentID
                })
            })
        })
    }
}

/// Signature of a list of component ids. Duplicates collapse.
pub fn build_signature(component_ids: &[ComponentID]) -> Signature {
    component_ids.iter().fold(Signature::default(), |mut signature, &id| {
        signature.set(id);
        signature
    })
}

/// Access mode for a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessMode {
    /// Read-only access.
    Read,
    /// Exclusive write access.
    Write,
}

/// One declared `(component, mode)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Access {
    /// Component being accessed.
    pub component: ComponentID,
    /// How it is accessed.
    pub mode: AccessMode,
}

impl Access {
    /// Declares read access to `component`.
    #[inline]
    pub const fn read(component: ComponentID) -> Self {
        Self { component, mode: AccessMode::Read }
    }

    /// Declares write access to `component`.
    #[inline]
    pub const fn write(component: ComponentID) -> Self {
        Self { component, mode: AccessMode::Write }
    }
}

/// Collapses an access list so each component appears once.
///
/// Write supersedes read. First-declaration order is kept.
pub fn normalize_access(access: &[Access]) -> Vec<Access> {
    let mut out: Vec<Access> = Vec::with_capacity(access.len());
    for entry in access {
        match out.iter_mut().find(|a| a.component == entry.component) {
            Some(existing) => {
                if entry.mode == AccessMode::Write {
                    existing.mode = AccessMode::Write;
                }
            }
            None => out.push(*entry),
        }
    }
    out
}

/// Read and write sets of a system or group, used for order inference.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccessSets {
    /// Components read.
    pub read: Signature,
    /// Components written.
    pub write: Signature,
}

impl AccessSets {
    /// Adds one access declaration.
    pub fn insert(&mut self, access: Access) {
        match access.mode {
            AccessMode::Read => self.read.set(access.component),
            AccessMode::Write => self.write.set(access.component),
        }
    }

    /// Merges another access set into this one.
    pub fn merge(&mut self, other: &AccessSets) {
        self.read = self.read.union(&other.read);
        self.write = self.write.union(&other.write);
    }

    /// Returns `true` if `self` reads something `other` writes.
    #[inline]
    pub fn reads_what_is_written_by(&self, other: &AccessSets) -> bool {
        self.read.intersects(&other.write)
    }

    /// Returns `true` if both write a common component.
    #[inline]
    pub fn writes_overlap(&self, other: &AccessSets) -> bool {
        self.write.intersects(&other.write)
    }
}
