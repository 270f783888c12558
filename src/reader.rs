//! Zero-copy table views and the parse result.
//!
//! A [`TableView`] borrows the buffer and the schema for `'a` and decodes
//! fields straight from the bytes when asked. Whether a decoded field is
//! remembered depends on the [`DeserializationMode`] chosen at parse time:
//!
//! * **Lazy**: nothing is cached. Two reads of the same sub-table field
//!   return two distinct `Arc`s over the same bytes.
//! * **Progressive**: each field slot is decoded at most once. Later reads
//!   (from any thread) return the same `Arc`.
//!
//! Greedy modes use the same views internally to build an owned
//! [`TableValue`], then drop them.
//!
//! Malformed data is reported when the affected field is read, not at
//! parse time: a view over a buffer with a broken union vector opens fine,
//! and the access to that vector fails with [`FlatcodeError::InvalidData`].

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::{FlatcodeError, Result};
use crate::format::{VTable, read_string, read_uoffset};
use crate::layout::{ElementType, FieldLayout, FieldType, Schema, StructLayout, TableLayout, UnionLayout};
use crate::mode::{DeserializationMode, FieldSlot, Frozen};
use crate::scalar::Scalar;
use crate::shared_strings::SharedStringReadCache;
use crate::value::{StructValue, TableValue, UnionValue, Value};
use crate::vector::{KeyRef, VectorView};

/// State shared by every view produced by one parse.
pub struct ReadContext<'a, B: Buffer> {
    buffer: &'a B,
    schema: &'a Schema,
    mode: DeserializationMode,
    max_depth: usize,
    strings: Option<SharedStringReadCache>,
}

impl<'a, B: Buffer> ReadContext<'a, B> {
    /// A context over `buffer`. `read_cache_size == 0` disables the
    /// shared-string read cache.
    pub fn new(
        buffer: &'a B,
        schema: &'a Schema,
        mode: DeserializationMode,
        read_cache_size: usize,
        max_depth: usize,
    ) -> Self {
        Self {
            buffer,
            schema,
            mode,
            max_depth,
            strings: (read_cache_size > 0).then(|| SharedStringReadCache::new(read_cache_size)),
        }
    }

    /// The buffer being read.
    pub fn buffer(&self) -> &'a B {
        self.buffer
    }

    /// The schema the buffer was written with.
    pub fn schema(&self) -> &'a Schema {
        self.schema
    }

    /// The mode chosen at parse time.
    pub fn mode(&self) -> DeserializationMode {
        self.mode
    }

    /// Nesting budget for materialization.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Decodes the string at `pos`, through the read cache when `shared`.
    pub(crate) fn string_at(&self, pos: usize, shared: bool) -> Result<Arc<str>> {
        match (&self.strings, shared) {
            (Some(cache), true) => {
                cache.get_or_decode(pos, || Ok(Arc::from(read_string(self.buffer, pos)?)))
            }
            _ => Ok(Arc::from(read_string(self.buffer, pos)?)),
        }
    }
}

impl<B: Buffer> fmt::Debug for ReadContext<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadContext")
            .field("buffer_len", &self.buffer.len())
            .field("mode", &self.mode)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

/// A decoded field, vector element or union member.
///
/// Reference kinds are behind `Arc`, so cloning a `FieldValue` never copies
/// decoded data.
pub enum FieldValue<'a, B: Buffer> {
    /// A scalar.
    Scalar(Scalar),
    /// A string.
    String(Arc<str>),
    /// A struct, copied out of the buffer.
    Struct(StructValue),
    /// A sub-table view.
    Table(Arc<TableView<'a, B>>),
    /// A union member.
    Union {
        /// Non-zero discriminator.
        discriminator: u8,
        /// The member value.
        value: Box<FieldValue<'a, B>>,
    },
    /// A vector view.
    Vector(Arc<VectorView<'a, B>>),
}

impl<B: Buffer> Clone for FieldValue<'_, B> {
    fn clone(&self) -> Self {
        match self {
            Self::Scalar(s) => Self::Scalar(*s),
            Self::String(s) => Self::String(Arc::clone(s)),
            Self::Struct(s) => Self::Struct(s.clone()),
            Self::Table(t) => Self::Table(Arc::clone(t)),
            Self::Union {
                discriminator,
                value,
            } => Self::Union {
                discriminator: *discriminator,
                value: value.clone(),
            },
            Self::Vector(v) => Self::Vector(Arc::clone(v)),
        }
    }
}

impl<B: Buffer> fmt::Debug for FieldValue<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(s) => f.debug_tuple("Scalar").field(s).finish(),
            Self::String(s) => f.debug_tuple("String").field(s).finish(),
            Self::Struct(s) => f.debug_tuple("Struct").field(s).finish(),
            Self::Table(t) => f.debug_tuple("Table").field(t).finish(),
            Self::Union {
                discriminator,
                value,
            } => f
                .debug_struct("Union")
                .field("discriminator", discriminator)
                .field("value", value)
                .finish(),
            Self::Vector(v) => f.debug_tuple("Vector").field(v).finish(),
        }
    }
}

impl<'a, B: Buffer> FieldValue<'a, B> {
    /// The scalar held, if any.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Self::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    /// The string held, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The table view held, if any.
    pub fn as_table(&self) -> Option<&Arc<TableView<'a, B>>> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }

    /// The vector view held, if any.
    pub fn as_vector(&self) -> Option<&Arc<VectorView<'a, B>>> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Copies the value and everything it references out of the buffer.
    pub fn to_value(&self, max_depth: usize) -> Result<Value> {
        self.to_value_within(max_depth, &mut Budget::new(self.buffer_len()))
    }

    fn buffer_len(&self) -> usize {
        match self {
            Self::Table(t) => t.ctx.buffer().len(),
            Self::Vector(v) => v.buffer_len(),
            Self::Union { value, .. } => value.buffer_len(),
            Self::Scalar(_) | Self::String(_) | Self::Struct(_) => 0,
        }
    }

    pub(crate) fn to_value_within(&self, depth: usize, budget: &mut Budget) -> Result<Value> {
        Ok(match self {
            Self::Scalar(s) => Value::Scalar(*s),
            Self::String(s) => Value::String(Arc::clone(s)),
            Self::Struct(s) => Value::Struct(s.clone()),
            Self::Table(t) => Value::Table(t.to_value_within(depth, budget)?),
            Self::Union {
                discriminator,
                value,
            } => Value::Union(UnionValue {
                discriminator: *discriminator,
                value: Box::new(value.to_value_within(depth, budget)?),
            }),
            Self::Vector(v) => Value::Vector(v.to_values_within(depth, budget)?),
        })
    }
}

/// Work allowance of one materialization.
///
/// Every table costs one unit, every vector one unit plus its length. A
/// buffer produced by the writer never needs more units than it has bytes,
/// since each table owns its soffset and each vector its length prefix and
/// elements. Offsets shared between fields can make a small buffer describe
/// an exponentially large tree; those exhaust the budget instead.
#[derive(Debug)]
pub(crate) struct Budget {
    remaining: usize,
    limit: usize,
}

impl Budget {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            remaining: limit,
            limit,
        }
    }

    pub(crate) fn charge(&mut self, units: usize) -> Result<()> {
        self.remaining = self.remaining.checked_sub(units).ok_or_else(|| {
            FlatcodeError::invalid(format!(
                "buffer of {} bytes describes more values than it can hold; offsets are shared",
                self.limit
            ))
        })?;
        Ok(())
    }
}

/// A view of one table in a buffer.
pub struct TableView<'a, B: Buffer> {
    ctx: Arc<ReadContext<'a, B>>,
    layout: &'a TableLayout,
    position: usize,
    vtable: VTable,
    slots: Option<Box<[FieldSlot<FieldValue<'a, B>>]>>,
}

impl<'a, B: Buffer> TableView<'a, B> {
    /// Opens the table starting at `position`, validating its vtable.
    pub fn open(ctx: Arc<ReadContext<'a, B>>, layout: &'a TableLayout, position: usize) -> Result<Self> {
        let vtable = VTable::read(ctx.buffer(), position)
            .map_err(|e| e.context(format!("table '{}'", layout.name)))?;
        let slots = (ctx.mode() == DeserializationMode::Progressive).then(|| {
            let count = layout
                .fields
                .iter()
                .map(|f| usize::from(f.index) + 1)
                .max()
                .unwrap_or(0);
            (0..count).map(|_| FieldSlot::default()).collect()
        });
        Ok(Self {
            ctx,
            layout,
            position,
            vtable,
            slots,
        })
    }

    /// The table's layout.
    pub fn layout(&self) -> &'a TableLayout {
        self.layout
    }

    /// Absolute position of the table in the buffer.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The decoded vtable header.
    pub fn vtable(&self) -> &VTable {
        &self.vtable
    }

    /// The mode this view was parsed with.
    pub fn mode(&self) -> DeserializationMode {
        self.ctx.mode()
    }

    fn field(&self, index: u16) -> Result<&'a FieldLayout> {
        self.layout.field(index).ok_or_else(|| {
            FlatcodeError::schema(format!(
                "table '{}' has no field with index {index}",
                self.layout.name
            ))
        })
    }

    /// Reads field `index`.
    ///
    /// Scalars always yield a value (the default when absent). Other kinds
    /// yield `None` when absent.
    pub fn get(&self, index: u16) -> Result<Option<FieldValue<'a, B>>> {
        let field = self.field(index)?;
        match &self.slots {
            Some(slots) => slots[usize::from(index)].get_or_decode(|| self.decode(field)),
            None => self.decode(field),
        }
    }

    /// Reads the field named `name`.
    pub fn get_by_name(&self, name: &str) -> Result<Option<FieldValue<'a, B>>> {
        let field = self.layout.field_by_name(name).ok_or_else(|| {
            FlatcodeError::schema(format!("table '{}' has no field '{name}'", self.layout.name))
        })?;
        self.get(field.index)
    }

    /// Reads scalar field `index`, falling back to its default.
    pub fn scalar(&self, index: u16) -> Result<Scalar> {
        match self.get(index)? {
            Some(FieldValue::Scalar(s)) => Ok(s),
            _ => Err(self.kind_mismatch(index, "scalar")),
        }
    }

    /// Reads string field `index`.
    pub fn string(&self, index: u16) -> Result<Option<Arc<str>>> {
        match self.get(index)? {
            Some(FieldValue::String(s)) => Ok(Some(s)),
            None => Ok(None),
            Some(_) => Err(self.kind_mismatch(index, "string")),
        }
    }

    /// Reads sub-table field `index`.
    pub fn table(&self, index: u16) -> Result<Option<Arc<TableView<'a, B>>>> {
        match self.get(index)? {
            Some(FieldValue::Table(t)) => Ok(Some(t)),
            None => Ok(None),
            Some(_) => Err(self.kind_mismatch(index, "table")),
        }
    }

    /// Reads vector field `index`.
    pub fn vector(&self, index: u16) -> Result<Option<Arc<VectorView<'a, B>>>> {
        match self.get(index)? {
            Some(FieldValue::Vector(v)) => Ok(Some(v)),
            None => Ok(None),
            Some(_) => Err(self.kind_mismatch(index, "vector")),
        }
    }

    /// Reads struct field `index`.
    pub fn structure(&self, index: u16) -> Result<Option<StructValue>> {
        match self.get(index)? {
            Some(FieldValue::Struct(s)) => Ok(Some(s)),
            None => Ok(None),
            Some(_) => Err(self.kind_mismatch(index, "struct")),
        }
    }

    /// Reads union field `index` as `(discriminator, member)`.
    pub fn union(&self, index: u16) -> Result<Option<(u8, FieldValue<'a, B>)>> {
        match self.get(index)? {
            Some(FieldValue::Union {
                discriminator,
                value,
            }) => Ok(Some((discriminator, *value))),
            None => Ok(None),
            Some(_) => Err(self.kind_mismatch(index, "union")),
        }
    }

    fn kind_mismatch(&self, index: u16, wanted: &str) -> FlatcodeError {
        FlatcodeError::schema(format!(
            "field {index} of table '{}' is not a {wanted}",
            self.layout.name
        ))
    }

    /// Orders this table's key against `probe`.
    pub(crate) fn compare_key(&self, probe: &KeyRef<'_>) -> Result<Ordering> {
        let field = self.layout.key_field().ok_or_else(|| {
            FlatcodeError::schema(format!("table '{}' declares no key field", self.layout.name))
        })?;
        match field.ty {
            FieldType::String => {
                let key = self.string(field.index)?;
                KeyRef::Str(key.as_deref().unwrap_or("")).compare(probe)
            }
            _ => KeyRef::Scalar(self.scalar(field.index)?).compare(probe),
        }
    }

    /// Copies the table and everything it references out of the buffer.
    ///
    /// Every scalar field is present in the result; absent ones hold their
    /// default.
    ///
    /// # Errors
    /// [`FlatcodeError::InvalidData`] if the graph nests deeper than the
    /// configured maximum depth, or if it holds more tables and elements
    /// than the buffer has bytes (sub-tables reached through shared offsets).
    pub fn to_value(&self) -> Result<TableValue> {
        let mut budget = Budget::new(self.ctx.buffer().len());
        self.to_value_within(self.ctx.max_depth(), &mut budget)
    }

    pub(crate) fn to_value_within(&self, depth: usize, budget: &mut Budget) -> Result<TableValue> {
        if depth == 0 {
            return Err(FlatcodeError::invalid(format!(
                "value nesting exceeds the maximum depth of {}",
                self.ctx.max_depth()
            )));
        }
        budget.charge(1)?;
        let mut out = TableValue::new();
        for field in &self.layout.fields {
            if let Some(value) = self.get(field.index)? {
                out.set(field.index, value.to_value_within(depth - 1, budget)?);
            }
        }
        Ok(out)
    }

    fn slot_position(&self, slot: usize) -> Result<Option<usize>> {
        match self.vtable.slot(self.ctx.buffer(), slot)? {
            0 => Ok(None),
            rel => Ok(Some(self.position + usize::from(rel))),
        }
    }

    fn decode(&self, field: &'a FieldLayout) -> Result<Option<FieldValue<'a, B>>> {
        if field.deprecated {
            return Ok(field.default_scalar().map(FieldValue::Scalar));
        }
        let decoded = self
            .decode_present(field)
            .map_err(|e| e.context(format!("{}.{}", self.layout.name, field.name)))?;
        if decoded.is_none() && field.required {
            return Err(FlatcodeError::invalid(format!(
                "required field '{}.{}' is missing",
                self.layout.name, field.name
            )));
        }
        Ok(decoded)
    }

    fn decode_present(&self, field: &'a FieldLayout) -> Result<Option<FieldValue<'a, B>>> {
        let buffer = self.ctx.buffer();
        let schema = self.ctx.schema();
        let index = usize::from(field.index);

        if let FieldType::Union(name) = &field.ty {
            return self.decode_union(schema.union(name)?, index);
        }
        if let FieldType::Vector(element @ ElementType::Union(_)) = &field.ty {
            return self.decode_union_vector(element, index);
        }

        let Some(at) = self.slot_position(index)? else {
            return Ok(field.default_scalar().map(FieldValue::Scalar));
        };
        let value = match &field.ty {
            FieldType::Scalar(ty) => FieldValue::Scalar(buffer.read_scalar(at, *ty)?),
            FieldType::Struct(name) => {
                FieldValue::Struct(read_struct(buffer, schema, schema.structure(name)?, at)?)
            }
            FieldType::String => {
                let target = read_uoffset(buffer, at)?;
                FieldValue::String(self.ctx.string_at(target, field.shared_string)?)
            }
            FieldType::Table(name) => {
                let target = read_uoffset(buffer, at)?;
                let view = TableView::open(Arc::clone(&self.ctx), schema.table(name)?, target)?;
                FieldValue::Table(Arc::new(view))
            }
            FieldType::Vector(element) => {
                let target = read_uoffset(buffer, at)?;
                let view =
                    VectorView::open(Arc::clone(&self.ctx), element, field.shared_string, target)?;
                FieldValue::Vector(Arc::new(view))
            }
            FieldType::Union(_) => {
                return Err(FlatcodeError::Internal("union decoded as plain field".into()));
            }
        };
        Ok(Some(value))
    }

    fn decode_union(&self, layout: &'a UnionLayout, index: usize) -> Result<Option<FieldValue<'a, B>>> {
        let discriminator = match self.slot_position(index)? {
            Some(at) => self.ctx.buffer().read::<u8>(at)?,
            None => 0,
        };
        match (discriminator, self.slot_position(index + 1)?) {
            (0, None) => Ok(None),
            (0, Some(_)) => Err(FlatcodeError::invalid(format!(
                "union '{}' has a value but no discriminator",
                layout.name
            ))),
            (d, None) => Err(FlatcodeError::invalid(format!(
                "union '{}' has discriminator {d} but no value",
                layout.name
            ))),
            (d, Some(at)) => {
                let target = read_uoffset(self.ctx.buffer(), at)?;
                decode_union_member(&self.ctx, layout, d, target).map(Some)
            }
        }
    }

    fn decode_union_vector(
        &self,
        element: &'a ElementType,
        index: usize,
    ) -> Result<Option<FieldValue<'a, B>>> {
        match (self.slot_position(index)?, self.slot_position(index + 1)?) {
            (None, None) => Ok(None),
            (Some(types), Some(values)) => {
                let buffer = self.ctx.buffer();
                let types = read_uoffset(buffer, types)?;
                let values = read_uoffset(buffer, values)?;
                let view = VectorView::open_union(Arc::clone(&self.ctx), element, types, values)?;
                Ok(Some(FieldValue::Vector(Arc::new(view))))
            }
            (Some(_), None) => Err(FlatcodeError::invalid(
                "union vector has discriminators but no values",
            )),
            (None, Some(_)) => Err(FlatcodeError::invalid(
                "union vector has values but no discriminators",
            )),
        }
    }
}

impl<B: Buffer> fmt::Debug for TableView<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableView")
            .field("table", &self.layout.name)
            .field("position", &self.position)
            .field("vtable", &self.vtable)
            .field("mode", &self.ctx.mode())
            .finish()
    }
}

/// Decodes the member of `layout` tagged `discriminator` at `target`.
pub(crate) fn decode_union_member<'a, B: Buffer>(
    ctx: &Arc<ReadContext<'a, B>>,
    layout: &'a UnionLayout,
    discriminator: u8,
    target: usize,
) -> Result<FieldValue<'a, B>> {
    let member = layout.member(discriminator).ok_or_else(|| {
        FlatcodeError::invalid(format!(
            "unknown discriminator {discriminator} for union '{}'",
            layout.name
        ))
    })?;
    let schema = ctx.schema();
    let value = match &member.ty {
        FieldType::Table(name) => {
            FieldValue::Table(Arc::new(TableView::open(Arc::clone(ctx), schema.table(name)?, target)?))
        }
        FieldType::String => FieldValue::String(ctx.string_at(target, false)?),
        FieldType::Struct(name) => {
            FieldValue::Struct(read_struct(ctx.buffer(), schema, schema.structure(name)?, target)?)
        }
        other => {
            return Err(FlatcodeError::schema(format!(
                "union '{}' member {discriminator} has unsupported type {other:?}",
                layout.name
            )));
        }
    };
    Ok(FieldValue::Union {
        discriminator,
        value: Box::new(value),
    })
}

/// Copies the struct at `pos` out of the buffer.
pub(crate) fn read_struct<B: Buffer>(
    buffer: &B,
    schema: &Schema,
    layout: &StructLayout,
    pos: usize,
) -> Result<StructValue> {
    let fields = layout
        .fields
        .iter()
        .map(|member| match &member.ty {
            FieldType::Scalar(ty) => Ok(Value::Scalar(buffer.read_scalar(pos + member.offset, *ty)?)),
            FieldType::Struct(name) => Ok(Value::Struct(read_struct(
                buffer,
                schema,
                schema.structure(name)?,
                pos + member.offset,
            )?)),
            other => Err(FlatcodeError::schema(format!(
                "struct '{}' member '{}' has non-inline type {other:?}",
                layout.name, member.name
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(StructValue::new(fields))
}

/// The root of a parsed buffer, in the shape dictated by the mode.
pub enum Parsed<'a, B: Buffer> {
    /// Decode on every access.
    Lazy(TableView<'a, B>),
    /// Decode once per field, then cache.
    Progressive(TableView<'a, B>),
    /// Fully materialized and immutable.
    Greedy(Frozen<TableValue>),
    /// Fully materialized and mutable.
    GreedyMutable(TableValue),
}

impl<'a, B: Buffer> Parsed<'a, B> {
    /// The mode that produced this result.
    pub fn mode(&self) -> DeserializationMode {
        match self {
            Self::Lazy(_) => DeserializationMode::Lazy,
            Self::Progressive(_) => DeserializationMode::Progressive,
            Self::Greedy(_) => DeserializationMode::Greedy,
            Self::GreedyMutable(_) => DeserializationMode::GreedyMutable,
        }
    }

    /// The root view, for lazy and progressive results.
    pub fn view(&self) -> Option<&TableView<'a, B>> {
        match self {
            Self::Lazy(v) | Self::Progressive(v) => Some(v),
            _ => None,
        }
    }

    /// The root value, for greedy results.
    pub fn value(&self) -> Option<&TableValue> {
        match self {
            Self::Greedy(v) => Some(&**v),
            Self::GreedyMutable(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable access to the root value; only greedy-mutable results allow it.
    pub fn value_mut(&mut self) -> Option<&mut TableValue> {
        match self {
            Self::GreedyMutable(v) => Some(v),
            _ => None,
        }
    }

    /// Converts any result into an owned value, materializing views.
    pub fn into_value(self) -> Result<TableValue> {
        match self {
            Self::Lazy(v) | Self::Progressive(v) => v.to_value(),
            Self::Greedy(v) => Ok(v.thaw()),
            Self::GreedyMutable(v) => Ok(v),
        }
    }
}

impl<B: Buffer> fmt::Debug for Parsed<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lazy(v) => f.debug_tuple("Lazy").field(v).finish(),
            Self::Progressive(v) => f.debug_tuple("Progressive").field(v).finish(),
            Self::Greedy(v) => f.debug_tuple("Greedy").field(&**v).finish(),
            Self::GreedyMutable(v) => f.debug_tuple("GreedyMutable").field(v).finish(),
        }
    }
}
