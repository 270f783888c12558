//! Vector views and sort keys.
//!
//! A [`VectorView`] decodes elements on demand. Inline element types
//! (scalars, structs) are read at a fixed stride straight from the buffer;
//! reference element types (strings, tables, union members) follow one
//! uoffset per element. In progressive mode, decoded reference elements are
//! cached per index.
//!
//! Vectors of tables declared `sorted` are written in key order, so
//! [`VectorView::find_by_key`] can binary search them.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::constants::UOFFSET_SIZE;
use crate::error::{FlatcodeError, Result};
use crate::format::{read_uoffset, read_vector_len};
use crate::layout::{ElementType, TableLayout};
use crate::mode::{DeserializationMode, FieldSlot};
use crate::reader::{Budget, FieldValue, ReadContext, TableView, decode_union_member, read_struct};
use crate::scalar::{Scalar, ScalarType};
use crate::value::{TableValue, Value};

/// A borrowed sort key: a scalar or a string.
///
/// Absent keys compare as the field default (zero, or the empty string).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyRef<'k> {
    /// Scalar key.
    Scalar(Scalar),
    /// String key, ordered by UTF-8 bytes.
    Str(&'k str),
}

impl KeyRef<'_> {
    /// Orders two keys of the same kind.
    ///
    /// # Errors
    /// [`FlatcodeError::Schema`] when the kinds or scalar types differ.
    pub fn compare(&self, other: &KeyRef<'_>) -> Result<Ordering> {
        match (self, other) {
            (Self::Scalar(a), KeyRef::Scalar(b)) => a.cmp_same_type(b).ok_or_else(|| {
                FlatcodeError::schema(format!(
                    "cannot compare a {} key with a {} key",
                    a.scalar_type(),
                    b.scalar_type()
                ))
            }),
            (Self::Str(a), KeyRef::Str(b)) => Ok(a.as_bytes().cmp(b.as_bytes())),
            _ => Err(FlatcodeError::schema(
                "cannot compare a string key with a scalar key",
            )),
        }
    }
}

impl<'k> From<&'k str> for KeyRef<'k> {
    fn from(s: &'k str) -> Self {
        Self::Str(s)
    }
}

impl From<Scalar> for KeyRef<'_> {
    fn from(s: Scalar) -> Self {
        Self::Scalar(s)
    }
}

macro_rules! impl_key_from_scalar {
    ($($t:ty),*) => {
        $(
            impl From<$t> for KeyRef<'_> {
                fn from(v: $t) -> Self {
                    Self::Scalar(Scalar::from(v))
                }
            }
        )*
    };
}

impl_key_from_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// The key of a table value about to be written.
pub(crate) fn table_value_key<'v>(layout: &TableLayout, table: &'v TableValue) -> Result<KeyRef<'v>> {
    let field = layout.key_field().ok_or_else(|| {
        FlatcodeError::schema(format!("table '{}' declares no key field", layout.name))
    })?;
    match table.get(field.index) {
        Some(Value::Scalar(s)) => Ok(KeyRef::Scalar(*s)),
        Some(Value::String(s)) => Ok(KeyRef::Str(s)),
        Some(other) => Err(FlatcodeError::schema(format!(
            "key field '{}' holds a {}",
            field.name,
            other.kind()
        ))),
        None => match field.default_scalar() {
            Some(default) => Ok(KeyRef::Scalar(default)),
            None => Ok(KeyRef::Str("")),
        },
    }
}

/// A lazily decoded vector.
pub struct VectorView<'a, B: Buffer> {
    ctx: Arc<ReadContext<'a, B>>,
    element: &'a ElementType,
    shared: bool,
    position: usize,
    len: usize,
    stride: usize,
    union_types: Option<usize>,
    cache: Option<Box<[FieldSlot<FieldValue<'a, B>>]>>,
}

impl<'a, B: Buffer> VectorView<'a, B> {
    pub(crate) fn open(
        ctx: Arc<ReadContext<'a, B>>,
        element: &'a ElementType,
        shared: bool,
        position: usize,
    ) -> Result<Self> {
        let (stride, _) = ctx.schema().element_size_align(element)?;
        let len = read_vector_len(ctx.buffer(), position, stride)?;
        Ok(Self::with_len(ctx, element, shared, position, len, stride, None))
    }

    /// Opens a union vector from its discriminator and offset halves.
    pub(crate) fn open_union(
        ctx: Arc<ReadContext<'a, B>>,
        element: &'a ElementType,
        types: usize,
        values: usize,
    ) -> Result<Self> {
        let type_count = read_vector_len(ctx.buffer(), types, 1)?;
        let value_count = read_vector_len(ctx.buffer(), values, UOFFSET_SIZE)?;
        if type_count != value_count {
            return Err(FlatcodeError::invalid(format!(
                "union vector has {type_count} discriminators but {value_count} values"
            )));
        }
        Ok(Self::with_len(
            ctx,
            element,
            false,
            values,
            value_count,
            UOFFSET_SIZE,
            Some(types),
        ))
    }

    fn with_len(
        ctx: Arc<ReadContext<'a, B>>,
        element: &'a ElementType,
        shared: bool,
        position: usize,
        len: usize,
        stride: usize,
        union_types: Option<usize>,
    ) -> Self {
        let cacheable = !matches!(element, ElementType::Scalar(_) | ElementType::Struct(_));
        let cache = (ctx.mode() == DeserializationMode::Progressive && cacheable)
            .then(|| (0..len).map(|_| FieldSlot::default()).collect());
        Self {
            ctx,
            element,
            shared,
            position,
            len,
            stride,
            union_types,
            cache,
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the vector has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The declared element type.
    pub fn element_type(&self) -> &'a ElementType {
        self.element
    }

    /// Element `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Result<Option<FieldValue<'a, B>>> {
        if index >= self.len {
            return Ok(None);
        }
        match &self.cache {
            Some(cache) => cache[index].get_or_decode(|| self.decode(index).map(Some)),
            None => self.decode(index).map(Some),
        }
    }

    fn element(&self, index: usize) -> Result<FieldValue<'a, B>> {
        self.get(index)?.ok_or(FlatcodeError::OutOfBounds {
            offset: index,
            len: 1,
            buffer_len: self.len,
        })
    }

    /// Iterates over the elements, decoding each one.
    pub fn iter(&self) -> impl Iterator<Item = Result<FieldValue<'a, B>>> + '_ {
        (0..self.len).map(move |i| self.element(i))
    }

    /// The payload of a `[u8]` vector, borrowed straight from the buffer.
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        if *self.element != ElementType::Scalar(ScalarType::U8) {
            return None;
        }
        let buffer: &'a B = self.ctx.buffer();
        buffer
            .read_bytes(self.position + UOFFSET_SIZE, self.len)
            .ok()
    }

    /// Table element `index`.
    pub fn table(&self, index: usize) -> Result<Arc<TableView<'a, B>>> {
        match self.element(index)? {
            FieldValue::Table(t) => Ok(t),
            _ => Err(FlatcodeError::schema("vector elements are not tables")),
        }
    }

    /// Binary-searches a sorted vector of tables for the element whose key
    /// equals `key`.
    pub fn find_by_key<'k>(&self, key: impl Into<KeyRef<'k>>) -> Result<Option<Arc<TableView<'a, B>>>> {
        let ElementType::Table(name) = self.element else {
            return Err(FlatcodeError::schema("find_by_key needs a vector of tables"));
        };
        let layout = self.ctx.schema().table(name)?;
        if layout.key_field().is_none() {
            return Err(FlatcodeError::schema(format!(
                "table '{name}' declares no key field"
            )));
        }

        let probe = key.into();
        let (mut lo, mut hi) = (0, self.len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let candidate = self.table(mid)?;
            match candidate.compare_key(&probe)? {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(Some(candidate)),
            }
        }
        Ok(None)
    }

    /// Materializes every element.
    pub fn to_values(&self) -> Result<Vec<Value>> {
        let mut budget = Budget::new(self.buffer_len());
        self.to_values_within(self.ctx.max_depth(), &mut budget)
    }

    pub(crate) fn buffer_len(&self) -> usize {
        self.ctx.buffer().len()
    }

    pub(crate) fn to_values_within(&self, depth: usize, budget: &mut Budget) -> Result<Vec<Value>> {
        if depth == 0 {
            return Err(FlatcodeError::invalid(format!(
                "value nesting exceeds the maximum depth of {}",
                self.ctx.max_depth()
            )));
        }
        budget.charge(self.len.saturating_add(1))?;
        self.iter()
            .map(|v| v?.to_value_within(depth - 1, budget))
            .collect()
    }

    fn decode(&self, index: usize) -> Result<FieldValue<'a, B>> {
        let buffer = self.ctx.buffer();
        let schema = self.ctx.schema();
        let at = self.position + UOFFSET_SIZE + index * self.stride;
        match self.element {
            ElementType::Scalar(ty) => Ok(FieldValue::Scalar(buffer.read_scalar(at, *ty)?)),
            ElementType::Struct(name) => Ok(FieldValue::Struct(read_struct(
                buffer,
                schema,
                schema.structure(name)?,
                at,
            )?)),
            ElementType::String => {
                let target = read_uoffset(buffer, at)?;
                Ok(FieldValue::String(self.ctx.string_at(target, self.shared)?))
            }
            ElementType::Table(name) => {
                let target = read_uoffset(buffer, at)?;
                let view = TableView::open(Arc::clone(&self.ctx), schema.table(name)?, target)?;
                Ok(FieldValue::Table(Arc::new(view)))
            }
            ElementType::Union(name) => {
                let types = self.union_types.ok_or_else(|| {
                    FlatcodeError::Internal("union vector opened without discriminators".into())
                })?;
                let discriminator: u8 = buffer.read(types + UOFFSET_SIZE + index)?;
                if discriminator == 0 {
                    return Err(FlatcodeError::invalid(format!(
                        "union vector element {index} has no discriminator"
                    )));
                }
                let target = read_uoffset(buffer, at)?;
                decode_union_member(&self.ctx, schema.union(name)?, discriminator, target)
            }
        }
    }
}

impl<B: Buffer> fmt::Debug for VectorView<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorView")
            .field("element", self.element)
            .field("position", &self.position)
            .field("len", &self.len)
            .finish()
    }
}
