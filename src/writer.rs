//! Table and vector layout on the write side.
//!
//! Serialization runs in two passes over the value tree:
//!
//! 1. **Check** ([`Writer::max_size`]): validates every value against the
//!    schema and sums a conservative size bound. Nothing is written, so a
//!    type error never leaves a partially written destination.
//! 2. **Write** ([`Writer::write`]): lays out tables front to back. Each
//!    table emits its vtable (or reuses an identical one), then its inline
//!    area. Reference fields reserve a uoffset slot and are queued; the
//!    queue is drained in FIFO order and every slot is patched once its
//!    target is written.
//!
//! Both passes walk the tree with explicit work lists, so deeply nested
//! values do not consume native stack.

use std::cmp::{Ordering, Reverse};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::constants::{FILE_IDENTIFIER_LEN, MAX_BUFFER_SIZE, SOFFSET_SIZE, UOFFSET_SIZE};
use crate::context::SerializationContext;
use crate::error::{FlatcodeError, Result};
use crate::layout::{
    ElementType, FieldLayout, FieldType, Schema, StructLayout, TableLayout, UnionLayout, align_up,
};
use crate::scalar::{Scalar, ScalarType};
use crate::value::{StructValue, TableValue, UnionValue, Value};
use crate::vector::table_value_key;
use crate::vtable::VTableBuilder;

/// Conservative padding for a uoffset slot or a string/vector header.
const REF_BOUND: usize = UOFFSET_SIZE + UOFFSET_SIZE - 1;

/// Writes [`TableValue`] trees against one [`Schema`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Writer<'s> {
    schema: &'s Schema,
    force_defaults: bool,
}

/// A payload whose uoffset slot has been reserved.
enum Job<'s, 'v> {
    Table(&'s TableLayout, &'v TableValue),
    String(&'v str),
    Struct(&'s StructLayout, &'v StructValue),
    Vector(&'s FieldLayout, &'s ElementType, &'v [Value]),
    UnionTypes(&'v [Value]),
    UnionValues(&'s UnionLayout, &'v [Value]),
}

struct Pending<'s, 'v> {
    slot: usize,
    job: Job<'s, 'v>,
}

enum Inline<'s, 'v> {
    Scalar(Scalar),
    Struct(&'s StructLayout, &'v StructValue),
    Discriminator(u8),
    Ref(Job<'s, 'v>),
    Shared(&'v Arc<str>),
}

struct InlineField<'s, 'v> {
    slot: usize,
    size: usize,
    align: usize,
    value: Inline<'s, 'v>,
}

impl<'s> Writer<'s> {
    pub(crate) fn new(schema: &'s Schema, force_defaults: bool) -> Self {
        Self {
            schema,
            force_defaults,
        }
    }

    // ---------------------------------------------------------------------
    // Check pass
    // ---------------------------------------------------------------------

    /// Validates `value` against `root` and returns an upper bound of its
    /// serialized size.
    pub(crate) fn max_size(&self, root: &'s TableLayout, value: &TableValue) -> Result<usize> {
        let mut total = UOFFSET_SIZE;
        if root.file_identifier.is_some() {
            total += FILE_IDENTIFIER_LEN;
        }
        // Only the root's position is known, so only its padding is exact.
        let mut start = Some(total);
        let mut work = vec![(root, value)];
        while let Some((layout, table)) = work.pop() {
            let size = self
                .check_table(layout, table, start.take(), &mut work)
                .map_err(|e| e.context(format!("table '{}'", layout.name)))?;
            total = total
                .checked_add(size)
                .filter(|total| *total <= MAX_BUFFER_SIZE)
                .ok_or_else(overflow)?;
        }
        Ok(total)
    }

    fn check_table<'v>(
        &self,
        layout: &'s TableLayout,
        table: &'v TableValue,
        start: Option<usize>,
        work: &mut Vec<(&'s TableLayout, &'v TableValue)>,
    ) -> Result<usize> {
        for field in &layout.fields {
            if field.required && !field.deprecated && table.get(field.index).is_none() {
                return Err(FlatcodeError::schema(format!(
                    "required field '{}' is missing",
                    field.name
                )));
            }
        }

        let mut payload = 0usize;
        let mut fields = Vec::with_capacity(table.len());
        for (index, value) in table.iter() {
            let field = layout.field(index).ok_or_else(|| {
                FlatcodeError::schema(format!("no field with index {index}"))
            })?;
            if field.deprecated {
                continue;
            }
            let size = self
                .check_field(field, value, work)
                .map_err(|e| e.context(format!("field '{}'", field.name)))?;
            payload = payload.checked_add(size).ok_or_else(overflow)?;
            self.collect_inline(field, value, &mut fields)?;
        }

        // The same layout the write pass computes, so an oversized table
        // fails here, before any byte is written.
        let inline = InlineLayout::of(&mut fields)?;
        let vtable_len = inline.vtable(&fields)?.byte_len();
        let bytes = match start {
            Some(cursor) => {
                let vtable_pos = align_up(cursor, 2);
                align_up(vtable_pos + vtable_len, inline.align) + inline.len - cursor
            }
            None => vtable_len + 1 + inline.align - 1 + inline.len,
        };
        bytes.checked_add(payload).ok_or_else(overflow)
    }

    fn check_field<'v>(
        &self,
        field: &'s FieldLayout,
        value: &'v Value,
        work: &mut Vec<(&'s TableLayout, &'v TableValue)>,
    ) -> Result<usize> {
        match (&field.ty, value) {
            (FieldType::Scalar(ty), Value::Scalar(s)) => check_scalar(*ty, s).map(|()| 0),
            (FieldType::Struct(name), Value::Struct(s)) => {
                self.check_struct(self.schema.structure(name)?, s).map(|()| 0)
            }
            (FieldType::String, Value::String(s)) => Ok(string_bound(s)),
            (FieldType::Table(name), Value::Table(t)) => {
                work.push((self.schema.table(name)?, t));
                Ok(0)
            }
            (FieldType::Union(name), Value::Union(u)) => {
                self.check_union_member(self.schema.union(name)?, u, work)
            }
            (FieldType::Vector(element), Value::Vector(items)) => {
                self.check_vector(element, items, work)
            }
            (ty, other) => Err(FlatcodeError::schema(format!(
                "expected {ty:?}, found a {}",
                other.kind()
            ))),
        }
    }

    fn check_vector<'v>(
        &self,
        element: &'s ElementType,
        items: &'v [Value],
        work: &mut Vec<(&'s TableLayout, &'v TableValue)>,
    ) -> Result<usize> {
        let n = items.len();
        if u32::try_from(n).is_err() {
            return Err(FlatcodeError::schema(format!("vector of {n} elements is too long")));
        }
        let mismatch = |i: usize, v: &Value| {
            FlatcodeError::schema(format!(
                "vector element {i} is a {}, expected {element:?}",
                v.kind()
            ))
        };
        match element {
            ElementType::Scalar(ty) => {
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Scalar(s) => check_scalar(*ty, s)?,
                        other => return Err(mismatch(i, other)),
                    }
                }
                let area = n.checked_mul(ty.size()).ok_or_else(overflow)?;
                area.checked_add(REF_BOUND + ty.align().max(UOFFSET_SIZE) - UOFFSET_SIZE)
                    .ok_or_else(overflow)
            }
            ElementType::Struct(name) => {
                let layout = self.schema.structure(name)?;
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Struct(s) => self.check_struct(layout, s)?,
                        other => return Err(mismatch(i, other)),
                    }
                }
                let area = n.checked_mul(layout.size).ok_or_else(overflow)?;
                area.checked_add(REF_BOUND + layout.align.max(UOFFSET_SIZE) - UOFFSET_SIZE)
                    .ok_or_else(overflow)
            }
            ElementType::String => {
                let mut total = REF_BOUND + n * UOFFSET_SIZE;
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::String(s) => total += string_bound(s),
                        other => return Err(mismatch(i, other)),
                    }
                }
                Ok(total)
            }
            ElementType::Table(name) => {
                let layout = self.schema.table(name)?;
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Table(t) => work.push((layout, t)),
                        other => return Err(mismatch(i, other)),
                    }
                }
                Ok(REF_BOUND + n * UOFFSET_SIZE)
            }
            ElementType::Union(name) => {
                let layout = self.schema.union(name)?;
                let mut total = (REF_BOUND + n) + (REF_BOUND + n * UOFFSET_SIZE);
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Union(u) => total += self.check_union_member(layout, u, work)?,
                        other => return Err(mismatch(i, other)),
                    }
                }
                Ok(total)
            }
        }
    }

    fn check_union_member<'v>(
        &self,
        layout: &'s UnionLayout,
        union: &'v UnionValue,
        work: &mut Vec<(&'s TableLayout, &'v TableValue)>,
    ) -> Result<usize> {
        let member = layout.member(union.discriminator).ok_or_else(|| {
            FlatcodeError::schema(format!(
                "union '{}' has no member with discriminator {}",
                layout.name, union.discriminator
            ))
        })?;
        match (&member.ty, union.value.as_ref()) {
            (FieldType::Table(name), Value::Table(t)) => {
                work.push((self.schema.table(name)?, t));
                Ok(0)
            }
            (FieldType::String, Value::String(s)) => Ok(string_bound(s)),
            (FieldType::Struct(name), Value::Struct(s)) => {
                let nested = self.schema.structure(name)?;
                self.check_struct(nested, s)?;
                Ok(nested.size + nested.align - 1)
            }
            (ty, other) => Err(FlatcodeError::schema(format!(
                "union '{}' member {} expects {ty:?}, found a {}",
                layout.name,
                union.discriminator,
                other.kind()
            ))),
        }
    }

    fn check_struct(&self, layout: &'s StructLayout, value: &StructValue) -> Result<()> {
        if value.fields().len() != layout.fields.len() {
            return Err(FlatcodeError::schema(format!(
                "struct '{}' has {} members, value has {}",
                layout.name,
                layout.fields.len(),
                value.fields().len()
            )));
        }
        for (member, v) in layout.fields.iter().zip(value.fields()) {
            match (&member.ty, v) {
                (FieldType::Scalar(ty), Value::Scalar(s)) => check_scalar(*ty, s)?,
                (FieldType::Struct(name), Value::Struct(s)) => {
                    self.check_struct(self.schema.structure(name)?, s)?;
                }
                (_, other) => {
                    return Err(FlatcodeError::schema(format!(
                        "struct '{}' member '{}' cannot hold a {}",
                        layout.name,
                        member.name,
                        other.kind()
                    )));
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Write pass
    // ---------------------------------------------------------------------

    /// Writes `value` as the root of the buffer. The value must have passed
    /// [`Writer::max_size`].
    pub(crate) fn write(
        &self,
        root: &'s TableLayout,
        value: &TableValue,
        ctx: &mut SerializationContext<'_>,
    ) -> Result<()> {
        let ident = root.identifier_bytes();
        let header = UOFFSET_SIZE + ident.map_or(0, |_| FILE_IDENTIFIER_LEN);
        let root_slot = ctx.allocate(header, UOFFSET_SIZE)?;
        if let Some(ident) = ident {
            ctx.write_bytes(root_slot + UOFFSET_SIZE, &ident)?;
        }

        let mut queue = VecDeque::new();
        queue.push_back(Pending {
            slot: root_slot,
            job: Job::Table(root, value),
        });
        while let Some(Pending { slot, job }) = queue.pop_front() {
            let target = self.write_job(job, ctx, &mut queue)?;
            ctx.patch_uoffset(slot, target)?;
        }
        Ok(())
    }

    fn write_job<'v>(
        &self,
        job: Job<'s, 'v>,
        ctx: &mut SerializationContext<'_>,
        queue: &mut VecDeque<Pending<'s, 'v>>,
    ) -> Result<usize> {
        match job {
            Job::Table(layout, table) => self
                .write_table(layout, table, ctx, queue)
                .map_err(|e| e.context(format!("table '{}'", layout.name))),
            Job::String(s) => ctx.write_string(s),
            Job::Struct(layout, value) => {
                let pos = ctx.allocate(layout.size, layout.align)?;
                self.write_struct(layout, value, pos, ctx)?;
                Ok(pos)
            }
            Job::Vector(field, element, items) => {
                self.write_vector(field, element, items, ctx, queue)
            }
            Job::UnionTypes(items) => {
                let pos = ctx.allocate_vector(items.len(), 1, 1)?;
                ctx.write(pos, vector_len(items)?)?;
                for (i, item) in items.iter().enumerate() {
                    ctx.write(pos + UOFFSET_SIZE + i, as_union(item)?.discriminator)?;
                }
                Ok(pos)
            }
            Job::UnionValues(layout, items) => {
                let pos = ctx.allocate_vector(items.len(), UOFFSET_SIZE, UOFFSET_SIZE)?;
                ctx.write(pos, vector_len(items)?)?;
                for (i, item) in items.iter().enumerate() {
                    queue.push_back(Pending {
                        slot: pos + UOFFSET_SIZE + i * UOFFSET_SIZE,
                        job: self.union_job(layout, as_union(item)?)?,
                    });
                }
                Ok(pos)
            }
        }
    }

    fn write_table<'v>(
        &self,
        layout: &'s TableLayout,
        table: &'v TableValue,
        ctx: &mut SerializationContext<'_>,
        queue: &mut VecDeque<Pending<'s, 'v>>,
    ) -> Result<usize> {
        let mut fields = Vec::with_capacity(table.len());
        for (index, value) in table.iter() {
            let field = layout
                .field(index)
                .ok_or_else(|| FlatcodeError::schema(format!("no field with index {index}")))?;
            if !field.deprecated {
                self.collect_inline(field, value, &mut fields)?;
            }
        }

        let inline = InlineLayout::of(&mut fields)?;
        let vtable_pos = ctx.emit_vtable(&inline.vtable(&fields)?)?;
        let pos = ctx.allocate(inline.len, inline.align)?;
        ctx.write_soffset(pos, vtable_pos)?;

        for (f, offset) in fields.into_iter().zip(inline.offsets) {
            let at = pos + offset;
            match f.value {
                Inline::Scalar(s) => ctx.write_scalar(at, s)?,
                Inline::Struct(layout, value) => self.write_struct(layout, value, at, ctx)?,
                Inline::Discriminator(d) => ctx.write(at, d)?,
                Inline::Ref(job) => queue.push_back(Pending { slot: at, job }),
                Inline::Shared(s) => ctx.defer_shared(s, at)?,
            }
        }
        Ok(pos)
    }

    fn collect_inline<'v>(
        &self,
        field: &'s FieldLayout,
        value: &'v Value,
        out: &mut Vec<InlineField<'s, 'v>>,
    ) -> Result<()> {
        let slot = usize::from(field.index);
        let reference = |value| InlineField {
            slot,
            size: UOFFSET_SIZE,
            align: UOFFSET_SIZE,
            value,
        };
        match (&field.ty, value) {
            (FieldType::Scalar(ty), Value::Scalar(s)) => {
                let force = self.force_defaults || field.force_write;
                if force || Some(*s) != field.default_scalar() {
                    out.push(InlineField {
                        slot,
                        size: ty.size(),
                        align: ty.align(),
                        value: Inline::Scalar(*s),
                    });
                }
            }
            (FieldType::Struct(name), Value::Struct(s)) => {
                let layout = self.schema.structure(name)?;
                out.push(InlineField {
                    slot,
                    size: layout.size,
                    align: layout.align,
                    value: Inline::Struct(layout, s),
                });
            }
            (FieldType::String, Value::String(s)) if field.shared_string => {
                out.push(reference(Inline::Shared(s)));
            }
            (FieldType::String, Value::String(s)) => {
                out.push(reference(Inline::Ref(Job::String(s))));
            }
            (FieldType::Table(name), Value::Table(t)) => {
                out.push(reference(Inline::Ref(Job::Table(self.schema.table(name)?, t))));
            }
            (FieldType::Union(name), Value::Union(u)) => {
                let layout = self.schema.union(name)?;
                out.push(InlineField {
                    slot,
                    size: 1,
                    align: 1,
                    value: Inline::Discriminator(u.discriminator),
                });
                out.push(InlineField {
                    slot: slot + 1,
                    ..reference(Inline::Ref(self.union_job(layout, u)?))
                });
            }
            (FieldType::Vector(ElementType::Union(name)), Value::Vector(items)) => {
                let layout = self.schema.union(name)?;
                out.push(reference(Inline::Ref(Job::UnionTypes(items))));
                out.push(InlineField {
                    slot: slot + 1,
                    ..reference(Inline::Ref(Job::UnionValues(layout, items)))
                });
            }
            (FieldType::Vector(element), Value::Vector(items)) => {
                out.push(reference(Inline::Ref(Job::Vector(field, element, items))));
            }
            (ty, other) => {
                return Err(FlatcodeError::schema(format!(
                    "field '{}' expects {ty:?}, found a {}",
                    field.name,
                    other.kind()
                )));
            }
        }
        Ok(())
    }

    fn union_job<'v>(&self, layout: &'s UnionLayout, union: &'v UnionValue) -> Result<Job<'s, 'v>> {
        let member = layout.member(union.discriminator).ok_or_else(|| {
            FlatcodeError::schema(format!(
                "union '{}' has no member with discriminator {}",
                layout.name, union.discriminator
            ))
        })?;
        match (&member.ty, union.value.as_ref()) {
            (FieldType::Table(name), Value::Table(t)) => Ok(Job::Table(self.schema.table(name)?, t)),
            (FieldType::String, Value::String(s)) => Ok(Job::String(s)),
            (FieldType::Struct(name), Value::Struct(s)) => {
                Ok(Job::Struct(self.schema.structure(name)?, s))
            }
            (ty, other) => Err(FlatcodeError::schema(format!(
                "union '{}' member {} expects {ty:?}, found a {}",
                layout.name,
                union.discriminator,
                other.kind()
            ))),
        }
    }

    fn write_vector<'v>(
        &self,
        field: &'s FieldLayout,
        element: &'s ElementType,
        items: &'v [Value],
        ctx: &mut SerializationContext<'_>,
        queue: &mut VecDeque<Pending<'s, 'v>>,
    ) -> Result<usize> {
        let len = vector_len(items)?;
        let (stride, align) = self.schema.element_size_align(element)?;
        let pos = ctx.allocate_vector(items.len(), stride, align)?;
        ctx.write(pos, len)?;
        let slot = |i: usize| pos + UOFFSET_SIZE + i * stride;

        match element {
            ElementType::Scalar(_) => {
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Scalar(s) => ctx.write_scalar(slot(i), *s)?,
                        other => return Err(element_mismatch(i, other)),
                    }
                }
            }
            ElementType::Struct(name) => {
                let layout = self.schema.structure(name)?;
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::Struct(s) => self.write_struct(layout, s, slot(i), ctx)?,
                        other => return Err(element_mismatch(i, other)),
                    }
                }
            }
            ElementType::String => {
                for (i, item) in items.iter().enumerate() {
                    match item {
                        Value::String(s) if field.shared_string => ctx.defer_shared(s, slot(i))?,
                        Value::String(s) => queue.push_back(Pending {
                            slot: slot(i),
                            job: Job::String(s),
                        }),
                        other => return Err(element_mismatch(i, other)),
                    }
                }
            }
            ElementType::Table(name) => {
                let layout = self.schema.table(name)?;
                let tables = self.ordered_tables(field, layout, items)?;
                for (i, table) in tables.into_iter().enumerate() {
                    queue.push_back(Pending {
                        slot: slot(i),
                        job: Job::Table(layout, table),
                    });
                }
            }
            ElementType::Union(_) => {
                return Err(FlatcodeError::Internal(
                    "union vectors are written as two halves".into(),
                ));
            }
        }
        Ok(pos)
    }

    /// The table elements, sorted by key when the field asks for it.
    fn ordered_tables<'v>(
        &self,
        field: &FieldLayout,
        layout: &TableLayout,
        items: &'v [Value],
    ) -> Result<Vec<&'v TableValue>> {
        let tables = items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Table(t) => Ok(t),
                other => Err(element_mismatch(i, other)),
            })
            .collect::<Result<Vec<_>>>()?;
        if !field.sorted {
            return Ok(tables);
        }

        let mut keyed = tables
            .into_iter()
            .map(|t| Ok((table_value_key(layout, t)?, t)))
            .collect::<Result<Vec<_>>>()?;
        // Keys were type-checked by the check pass; a stable sort keeps equal keys in input order.
        keyed.sort_by(|(a, _), (b, _)| a.compare(b).unwrap_or(Ordering::Equal));
        Ok(keyed.into_iter().map(|(_, t)| t).collect())
    }

    fn write_struct(
        &self,
        layout: &StructLayout,
        value: &StructValue,
        pos: usize,
        ctx: &mut SerializationContext<'_>,
    ) -> Result<()> {
        for (member, v) in layout.fields.iter().zip(value.fields()) {
            let at = pos + member.offset;
            match (&member.ty, v) {
                (FieldType::Scalar(_), Value::Scalar(s)) => ctx.write_scalar(at, *s)?,
                (FieldType::Struct(name), Value::Struct(s)) => {
                    self.write_struct(self.schema.structure(name)?, s, at, ctx)?;
                }
                (_, other) => {
                    return Err(FlatcodeError::schema(format!(
                        "struct '{}' member '{}' cannot hold a {}",
                        layout.name,
                        member.name,
                        other.kind()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn check_scalar(expected: ScalarType, value: &Scalar) -> Result<()> {
    if value.scalar_type() != expected {
        return Err(FlatcodeError::schema(format!(
            "expected a {expected}, found a {}",
            value.scalar_type()
        )));
    }
    Ok(())
}

/// Upper bound of a string payload: header, bytes, NUL, alignment slack.
/// Placement of a table's inline fields.
struct InlineLayout {
    /// Offset of each field, in sorted order.
    offsets: Vec<usize>,
    /// Inline length including the soffset.
    len: usize,
    align: usize,
}

impl InlineLayout {
    /// Sorts `fields` widest first, then by slot, so no padding is needed
    /// between fields of equal alignment, and places them after the soffset.
    fn of(fields: &mut [InlineField<'_, '_>]) -> Result<Self> {
        fields.sort_by_key(|f| (Reverse(f.align), f.slot));
        let mut offsets = Vec::with_capacity(fields.len());
        let mut len = SOFFSET_SIZE;
        let mut align = UOFFSET_SIZE;
        for f in fields.iter() {
            let offset = align_up(len, f.align);
            offsets.push(offset);
            len = offset.checked_add(f.size).ok_or_else(overflow)?;
            align = align.max(f.align);
        }
        Ok(Self {
            offsets,
            len,
            align,
        })
    }

    /// The vtable describing this layout; fails if it does not fit in u16.
    fn vtable(&self, fields: &[InlineField<'_, '_>]) -> Result<VTableBuilder> {
        let mut vtable = VTableBuilder::new(self.len)?;
        for (f, offset) in fields.iter().zip(&self.offsets) {
            vtable.set(f.slot, *offset)?;
        }
        Ok(vtable)
    }
}

fn overflow() -> FlatcodeError {
    FlatcodeError::schema(format!("serialized value exceeds the {MAX_BUFFER_SIZE} byte limit"))
}

fn string_bound(s: &str) -> usize {
    UOFFSET_SIZE + s.len() + 1 + UOFFSET_SIZE - 1
}

fn vector_len(items: &[Value]) -> Result<u32> {
    u32::try_from(items.len())
        .map_err(|_| FlatcodeError::schema(format!("vector of {} elements is too long", items.len())))
}

fn as_union(value: &Value) -> Result<&UnionValue> {
    match value {
        Value::Union(u) => Ok(u),
        other => Err(FlatcodeError::schema(format!(
            "union vector element is a {}",
            other.kind()
        ))),
    }
}

fn element_mismatch(i: usize, value: &Value) -> FlatcodeError {
    FlatcodeError::schema(format!("vector element {i} is a {}", value.kind()))
}
