//! Resolved field layout descriptors.
//!
//! A schema compiler (outside this crate) resolves a schema language into a
//! [`Schema`]: one [`TableLayout`] per table shape, one [`StructLayout`] per
//! fixed-layout struct and one [`UnionLayout`] per tagged union. The runtime
//! never parses schema text; it only consumes these descriptors.
//!
//! Descriptors are validated once, when the [`Schema`] is built (or
//! deserialized). A built schema is immutable and can be shared freely.
//!
//! ```rust
//! use flatcode::layout::{ElementType, FieldLayout, Schema, TableLayout};
//! use flatcode::scalar::{Scalar, ScalarType};
//!
//! let schema = Schema::builder()
//!     .table(TableLayout::new("Monster", vec![
//!         FieldLayout::scalar("hp", 0, ScalarType::I16).with_default(Scalar::I16(100)),
//!         FieldLayout::string("name", 1),
//!         FieldLayout::vector("inventory", 2, ElementType::Scalar(ScalarType::U8)),
//!     ]))
//!     .build()?;
//! assert_eq!(schema.table("Monster")?.field_by_name("name").map(|f| f.index), Some(1));
//! # Ok::<(), flatcode::FlatcodeError>(())
//! ```

mod validate;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::constants::{FILE_IDENTIFIER_LEN, UOFFSET_SIZE};
use crate::error::{FlatcodeError, Result};
use crate::scalar::{Scalar, ScalarType};

/// The declared type of a table field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Inline scalar.
    Scalar(ScalarType),
    /// UTF-8 string, referenced by uoffset.
    String,
    /// Fixed-layout struct, stored inline in the table.
    Struct(String),
    /// Sub-table, referenced by uoffset.
    Table(String),
    /// Tagged union; occupies two slots (discriminator, value).
    Union(String),
    /// Repeated field, referenced by uoffset.
    Vector(ElementType),
}

/// The element type of a vector field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    /// Scalars at fixed stride. `[u8]` is a byte vector.
    Scalar(ScalarType),
    /// uoffsets to strings.
    String,
    /// Structs at fixed stride.
    Struct(String),
    /// uoffsets to tables.
    Table(String),
    /// Parallel discriminator and uoffset vectors; occupies two slots.
    Union(String),
}

impl FieldType {
    /// Number of vtable slots occupied by a field of this type.
    pub fn slot_count(&self) -> u16 {
        match self {
            Self::Union(_) | Self::Vector(ElementType::Union(_)) => 2,
            _ => 1,
        }
    }

    /// Returns true for types stored behind a uoffset.
    pub fn is_reference(&self) -> bool {
        !matches!(self, Self::Scalar(_) | Self::Struct(_))
    }
}

/// One field of a table shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldLayout {
    /// Field name, used for lookups and diagnostics.
    pub name: String,
    /// Logical index; the field occupies vtable slot `index` (and
    /// `index + 1` for unions).
    pub index: u16,
    /// Declared type.
    #[serde(rename = "type")]
    pub ty: FieldType,
    /// Schema-declared default for scalar fields. Absent means zero.
    #[serde(default)]
    pub default: Option<Scalar>,
    /// Never written; always read back as the type default.
    #[serde(default)]
    pub deprecated: bool,
    /// The sort key of the table, used by sorted vectors.
    #[serde(default)]
    pub key: bool,
    /// Writing without this field, or reading a buffer lacking it, is an error.
    #[serde(default)]
    pub required: bool,
    /// Strings (or string vector elements) go through the shared-string cache.
    #[serde(default)]
    pub shared_string: bool,
    /// Vector of tables kept sorted by the element table's key.
    #[serde(default)]
    pub sorted: bool,
    /// Write the scalar even when it equals its default.
    #[serde(default)]
    pub force_write: bool,
}

impl FieldLayout {
    /// A field of any type with every flag cleared.
    pub fn new(name: impl Into<String>, index: u16, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            index,
            ty,
            default: None,
            deprecated: false,
            key: false,
            required: false,
            shared_string: false,
            sorted: false,
            force_write: false,
        }
    }

    /// A scalar field.
    pub fn scalar(name: impl Into<String>, index: u16, ty: ScalarType) -> Self {
        Self::new(name, index, FieldType::Scalar(ty))
    }

    /// A string field.
    pub fn string(name: impl Into<String>, index: u16) -> Self {
        Self::new(name, index, FieldType::String)
    }

    /// An inline struct field.
    pub fn structure(name: impl Into<String>, index: u16, layout: impl Into<String>) -> Self {
        Self::new(name, index, FieldType::Struct(layout.into()))
    }

    /// A sub-table field.
    pub fn table(name: impl Into<String>, index: u16, layout: impl Into<String>) -> Self {
        Self::new(name, index, FieldType::Table(layout.into()))
    }

    /// A union field occupying slots `index` and `index + 1`.
    pub fn union(name: impl Into<String>, index: u16, layout: impl Into<String>) -> Self {
        Self::new(name, index, FieldType::Union(layout.into()))
    }

    /// A vector field.
    pub fn vector(name: impl Into<String>, index: u16, element: ElementType) -> Self {
        Self::new(name, index, FieldType::Vector(element))
    }

    /// Sets the schema default.
    pub fn with_default(mut self, value: Scalar) -> Self {
        self.default = Some(value);
        self
    }

    /// Marks the field deprecated.
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    /// Marks the field as the table key.
    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Marks the field required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Routes the field's strings through the shared-string cache.
    pub fn shared(mut self) -> Self {
        self.shared_string = true;
        self
    }

    /// Keeps a table vector sorted by key.
    pub fn sorted(mut self) -> Self {
        self.sorted = true;
        self
    }

    /// Always writes the scalar, even when equal to its default.
    pub fn force_write(mut self) -> Self {
        self.force_write = true;
        self
    }

    /// Number of vtable slots occupied.
    pub fn slot_count(&self) -> u16 {
        self.ty.slot_count()
    }

    /// The default value of a scalar field.
    pub fn default_scalar(&self) -> Option<Scalar> {
        match self.ty {
            FieldType::Scalar(ty) => Some(self.default.unwrap_or(Scalar::zero(ty))),
            _ => None,
        }
    }
}

/// The shape of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableLayout {
    /// Table name.
    pub name: String,
    /// Fields in any order.
    pub fields: Vec<FieldLayout>,
    /// Four-character identifier written after the root offset when this
    /// table is the root of a buffer.
    #[serde(default)]
    pub file_identifier: Option<String>,
    #[serde(skip)]
    by_index: Vec<Option<usize>>,
    #[serde(skip)]
    key_field: Option<usize>,
}

impl TableLayout {
    /// A table with the given fields.
    pub fn new(name: impl Into<String>, fields: Vec<FieldLayout>) -> Self {
        Self {
            name: name.into(),
            fields,
            file_identifier: None,
            by_index: Vec::new(),
            key_field: None,
        }
    }

    /// Sets the root file identifier (exactly four ASCII bytes).
    pub fn with_file_identifier(mut self, ident: impl Into<String>) -> Self {
        self.file_identifier = Some(ident.into());
        self
    }

    /// The field with logical index `index`.
    pub fn field(&self, index: u16) -> Option<&FieldLayout> {
        self.by_index
            .get(usize::from(index))
            .copied()
            .flatten()
            .and_then(|pos| self.fields.get(pos))
    }

    /// The field named `name`.
    pub fn field_by_name(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The key field, if the table declares one.
    pub fn key_field(&self) -> Option<&FieldLayout> {
        self.key_field.and_then(|pos| self.fields.get(pos))
    }

    /// The file identifier as raw bytes.
    pub fn identifier_bytes(&self) -> Option<[u8; FILE_IDENTIFIER_LEN]> {
        let ident = self.file_identifier.as_ref()?;
        let mut out = [0u8; FILE_IDENTIFIER_LEN];
        out.copy_from_slice(ident.as_bytes().get(..FILE_IDENTIFIER_LEN)?);
        Some(out)
    }
}

/// One member of a fixed-layout struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    /// Member name.
    pub name: String,
    /// Byte offset from the start of the struct.
    pub offset: usize,
    /// Member type: a scalar or a nested struct.
    #[serde(rename = "type")]
    pub ty: FieldType,
}

/// The shape of a fixed-layout struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructLayout {
    /// Struct name.
    pub name: String,
    /// Total size including trailing padding.
    pub size: usize,
    /// Alignment; a power of two.
    pub align: usize,
    /// Members in ascending offset order.
    pub fields: Vec<StructField>,
}

impl StructLayout {
    /// A struct with explicit offsets, size and alignment.
    pub fn new(name: impl Into<String>, size: usize, align: usize, fields: Vec<StructField>) -> Self {
        Self {
            name: name.into(),
            size,
            align,
            fields,
        }
    }

    /// Starts a struct whose offsets follow natural alignment.
    pub fn packed(name: impl Into<String>) -> StructLayoutBuilder {
        StructLayoutBuilder {
            layout: Self::new(name, 0, 1, Vec::new()),
        }
    }

    /// The member named `name`.
    pub fn field_by_name(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Computes natural-alignment offsets for a [`StructLayout`].
#[derive(Debug, Clone)]
pub struct StructLayoutBuilder {
    layout: StructLayout,
}

impl StructLayoutBuilder {
    fn push(mut self, name: impl Into<String>, ty: FieldType, size: usize, align: usize) -> Self {
        let offset = align_up(self.layout.size, align);
        self.layout.fields.push(StructField {
            name: name.into(),
            offset,
            ty,
        });
        self.layout.size = offset + size;
        self.layout.align = self.layout.align.max(align);
        self
    }

    /// Appends a scalar member.
    pub fn scalar(self, name: impl Into<String>, ty: ScalarType) -> Self {
        self.push(name, FieldType::Scalar(ty), ty.size(), ty.align())
    }

    /// Appends a nested struct member.
    pub fn structure(self, name: impl Into<String>, nested: &StructLayout) -> Self {
        self.push(
            name,
            FieldType::Struct(nested.name.clone()),
            nested.size,
            nested.align,
        )
    }

    /// Pads the size up to the alignment and returns the layout.
    pub fn finish(mut self) -> StructLayout {
        self.layout.size = align_up(self.layout.size, self.layout.align);
        self.layout
    }
}

/// One alternative of a union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionMember {
    /// Discriminator value; 0 is reserved for "absent".
    pub discriminator: u8,
    /// Member type: a table, a struct or a string.
    #[serde(rename = "type")]
    pub ty: FieldType,
}

/// The shape of a tagged union.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionLayout {
    /// Union name.
    pub name: String,
    /// Alternatives.
    pub members: Vec<UnionMember>,
}

impl UnionLayout {
    /// A union with the given members.
    pub fn new(name: impl Into<String>, members: Vec<UnionMember>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }

    /// The member tagged `discriminator`.
    pub fn member(&self, discriminator: u8) -> Option<&UnionMember> {
        self.members.iter().find(|m| m.discriminator == discriminator)
    }
}

/// The plain, unvalidated descriptor set handed over by a schema compiler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDef {
    /// Table shapes.
    #[serde(default)]
    pub tables: Vec<TableLayout>,
    /// Struct shapes.
    #[serde(default)]
    pub structs: Vec<StructLayout>,
    /// Union shapes.
    #[serde(default)]
    pub unions: Vec<UnionLayout>,
}

/// A validated set of layout descriptors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "SchemaDef", into = "SchemaDef")]
pub struct Schema {
    def: SchemaDef,
    tables: HashMap<String, usize>,
    structs: HashMap<String, usize>,
    unions: HashMap<String, usize>,
}

impl Schema {
    /// Starts an empty schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// The table named `name`.
    pub fn table(&self, name: &str) -> Result<&TableLayout> {
        self.tables
            .get(name)
            .and_then(|&i| self.def.tables.get(i))
            .ok_or_else(|| FlatcodeError::schema(format!("unknown table '{name}'")))
    }

    /// The struct named `name`.
    pub fn structure(&self, name: &str) -> Result<&StructLayout> {
        self.structs
            .get(name)
            .and_then(|&i| self.def.structs.get(i))
            .ok_or_else(|| FlatcodeError::schema(format!("unknown struct '{name}'")))
    }

    /// The union named `name`.
    pub fn union(&self, name: &str) -> Result<&UnionLayout> {
        self.unions
            .get(name)
            .and_then(|&i| self.def.unions.get(i))
            .ok_or_else(|| FlatcodeError::schema(format!("unknown union '{name}'")))
    }

    /// The underlying descriptors.
    pub fn definition(&self) -> &SchemaDef {
        &self.def
    }

    /// Inline `(size, align)` of a field stored in a table or struct slot.
    ///
    /// Reference types occupy a 4-byte uoffset; union fields report their
    /// value slot (the discriminator slot is a single byte).
    pub fn inline_size_align(&self, ty: &FieldType) -> Result<(usize, usize)> {
        Ok(match ty {
            FieldType::Scalar(s) => (s.size(), s.align()),
            FieldType::Struct(name) => {
                let layout = self.structure(name)?;
                (layout.size, layout.align)
            }
            _ => (UOFFSET_SIZE, UOFFSET_SIZE),
        })
    }

    /// `(stride, align)` of one element of a vector.
    pub fn element_size_align(&self, element: &ElementType) -> Result<(usize, usize)> {
        Ok(match element {
            ElementType::Scalar(s) => (s.size(), s.align()),
            ElementType::Struct(name) => {
                let layout = self.structure(name)?;
                (layout.size, layout.align)
            }
            ElementType::String | ElementType::Table(_) | ElementType::Union(_) => {
                (UOFFSET_SIZE, UOFFSET_SIZE)
            }
        })
    }

    /// Encodes the descriptors with bincode, for caching compiled schemas.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(&self.def, bincode::config::standard())
            .map_err(|e| FlatcodeError::Serialization(e.to_string()))
    }

    /// Decodes and re-validates descriptors produced by [`Schema::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (def, _): (SchemaDef, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| FlatcodeError::Serialization(e.to_string()))?;
        Self::try_from(def)
    }
}

impl TryFrom<SchemaDef> for Schema {
    type Error = FlatcodeError;

    fn try_from(def: SchemaDef) -> Result<Self> {
        validate::build(def)
    }
}

impl From<Schema> for SchemaDef {
    fn from(schema: Schema) -> Self {
        schema.def
    }
}

/// Collects descriptors and validates them into a [`Schema`].
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    def: SchemaDef,
}

impl SchemaBuilder {
    /// Adds a table shape.
    pub fn table(mut self, layout: TableLayout) -> Self {
        self.def.tables.push(layout);
        self
    }

    /// Adds a struct shape.
    pub fn structure(mut self, layout: StructLayout) -> Self {
        self.def.structs.push(layout);
        self
    }

    /// Adds a union shape.
    pub fn union(mut self, layout: UnionLayout) -> Self {
        self.def.unions.push(layout);
        self
    }

    /// Validates every descriptor.
    ///
    /// # Errors
    /// [`FlatcodeError::Schema`] describing the first illegal descriptor.
    pub fn build(self) -> Result<Schema> {
        Schema::try_from(self.def)
    }
}

pub(crate) fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}
