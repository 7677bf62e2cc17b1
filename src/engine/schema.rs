//! Explicit component field layouts.
//!
//! A [`Schema`] describes a component as an ordered list of named, fixed-size
//! fields. Offsets are assigned in declaration order using each field's
//! natural alignment, the same rule `#[repr(C)]` uses, so a schema declared
//! for a `#[repr(C)]` struct lines up byte-for-byte with the struct.
//!
//! Field access goes through a byte view bound to one row of a chunk column
//! ([`FieldView`] / [`FieldViewMut`]), or through an unbound value holder in a
//! [`crate::Bundle`] before the entity exists.
//!
//! ```ignore
//! impl Component for Position {
//!     fn schema() -> Schema {
//!         Schema::builder().field::<f32>("x").field::<f32>("y").build()
//!     }
//! }
//! ```

use std::any::{type_name, TypeId};
use std::mem::{align_of, size_of};

use bytemuck::Pod;


/// One named field of a component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    /// Field name.
    pub name: &'static str,
    /// Byte offset from the start of the component.
    pub offset: usize,
    /// Byte size of the field.
    pub size: usize,
    /// Rust type name of the field value.
    pub type_name: &'static str,
    type_id: TypeId,
}

impl Field {
    /// Returns `true` if values of type `F` can be read from or written to this field.
    #[inline]
    pub fn accepts<F: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<F>()
    }

    #[inline]
    fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.size
    }
}

/// Fixed layout of a component type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
    size: usize,
    align: usize,
}

impl Schema {
    /// Starts an explicit field declaration.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder { fields: Vec::new(), offset: 0, align: 1 }
    }

    /// A layout with a size but no named fields.
    ///
    /// This is the default for components that do not declare fields; they
    /// are still readable as a whole value.
    pub fn opaque<T: Pod>() -> Self {
        Self { fields: Vec::new(), size: size_of::<T>(), align: align_of::<T>() }
    }

    /// The layout of a tag.
    pub fn empty() -> Self {
        Self { fields: Vec::new(), size: 0, align: 1 }
    }

    /// Total byte size.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment of the whole component.
    #[inline]
    pub fn align(&self) -> usize {
        self.align
    }

    /// All declared fields in offset order.
    #[inline]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Binds a read-only view over one component value's bytes.
    ///
    /// ## Panics
    /// Panics if `bytes` is not exactly `size()` long.
    pub fn view<'a>(&'a self, bytes: &'a [u8]) -> FieldView<'a> {
        assert_eq!(bytes.len(), self.size, "field view bound to a buffer of the wrong size");
        FieldView { schema: self, bytes }
    }

    /// Binds a mutable view over one component value's bytes.
    ///
    /// ## Panics
    /// Panics if `bytes` is not exactly `size()` long.
    pub fn view_mut<'a>(&'a self, bytes: &'a mut [u8]) -> FieldViewMut<'a> {
        assert_eq!(bytes.len(), self.size, "field view bound to a buffer of the wrong size");
        FieldViewMut { schema: self, bytes }
    }
}

/// Accumulates fields for a [`Schema`].
pub struct SchemaBuilder {
    fields: Vec<Field>,
    offset: usize,
    align: usize,
}

impl SchemaBuilder {
    /// Appends a field of type `F` at the next naturally aligned offset.
    ///
    /// ## Panics
    /// Panics if `name` is already declared.
    pub fn field<F: Pod>(mut self, name: &'static str) -> Self {
        assert!(
            self.fields.iter().all(|f| f.name != name),
            "field `{name}` declared twice"
        );
        let align = align_of::<F>();
        let offset = align_up(self.offset, align);
        self.fields.push(Field {
            name,
            offset,
            size: size_of::<F>(),
            type_name: type_name::<F>(),
            type_id: TypeId::of::<F>(),
        });
        self.offset = offset + size_of::<F>();
        self.align = self.align.max(align);
        self
    }

    /// Finalizes the layout; total size is padded to the overall alignment.
    pub fn build(self) -> Schema {
        Schema { size: align_up(self.offset, self.align), align: self.align, fields: self.fields }
    }
}

#[inline]
fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

/// Read-only field access over bound bytes.
pub struct FieldView<'a> {
    schema: &'a Schema,
    bytes: &'a [u8],
}

impl<'a> FieldView<'a> {
    /// Reads field `name` as `F`.
    ///
    /// Returns `None` if the field does not exist or is not of type `F`.
    pub fn get<F: Pod>(&self, name: &str) -> Option<F> {
        let field = self.schema.field(name)?;
        if !field.accepts::<F>() {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(&self.bytes[field.range()]))
    }

    /// Raw bytes of the whole value.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }
}

/// Mutable field access over bound bytes.
pub struct FieldViewMut<'a> {
    schema: &'a Schema,
    bytes: &'a mut [u8],
}

impl<'a> FieldViewMut<'a> {
    /// Reads field `name` as `F`.
    pub fn get<F: Pod>(&self, name: &str) -> Option<F> {
        let field = self.schema.field(name)?;
        if !field.accepts::<F>() {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(&self.bytes[field.range()]))
    }

    /// Writes `value` into field `name`.
    ///
    /// Returns `false` (and writes nothing) if the field does not exist or is
    /// not of type `F`.
    pub fn set<F: Pod>(&mut self, name: &str, value: F) -> bool {
        let Some(field) = self.schema.field(name) else { return false; };
        if !field.accepts::<F>() {
            return false;
        }
        let range = field.range();
        self.bytes[range].copy_from_slice(bytemuck::bytes_of(&value));
        true
    }

    /// Writes type-erased bytes into field `name`; type and size must match.
    pub(crate) fn set_erased(&mut self, name: &str, type_id: TypeId, value: &[u8]) -> Option<()> {
        let field = self.schema.field(name)?;
        if field.type_id != type_id || field.size != value.len() {
            return None;
        }
        let range = field.range();
        self.bytes[range].copy_from_slice(value);
        Some(())
    }
}
