//! Tools for inspecting the physical structure of Flatcode buffers.
//! Useful for debugging layout, vtable sharing and default elision.

use serde::Serialize;
use std::path::Path;

use crate::buffer::{Buffer, MmapBuffer, ReadOnlyBuffer};
use crate::constants::{DEFAULT_MAX_DEPTH, FILE_IDENTIFIER_LEN, MIN_BUFFER_SIZE, UOFFSET_SIZE};
use crate::error::{FlatcodeError, Result};
use crate::format::{VTable, read_uoffset, read_vector_len};
use crate::layout::{ElementType, FieldType, Schema, TableLayout};

/// A structural report of a Flatcode buffer.
#[derive(Debug, Serialize)]
pub struct DebugReport {
    /// Total size of the buffer.
    pub buffer_len: usize,
    /// Offset where the root table starts.
    pub root_offset: usize,
    /// The four bytes after the root offset, when they look like an identifier.
    pub file_identifier: Option<String>,
    /// The root table.
    pub root: TableInfo,
}

/// Physical layout of one table.
#[derive(Debug, Serialize)]
pub struct TableInfo {
    /// Table name, when a schema was supplied.
    pub table: Option<String>,
    /// Absolute table position.
    pub position: usize,
    /// Absolute vtable position.
    pub vtable_position: usize,
    /// vtable byte length.
    pub vtable_len: u16,
    /// Inline table byte length.
    pub table_len: u16,
    /// Raw slot offsets; 0 marks an absent field.
    pub slots: Vec<u16>,
    /// Reference fields, when a schema was supplied.
    pub children: Vec<ChildInfo>,
}

/// A reference field of a table.
#[derive(Debug, Serialize)]
pub struct ChildInfo {
    /// Field name.
    pub field: String,
    /// Absolute position of the referenced payload.
    pub position: usize,
    /// Short description ("string, 5 bytes", "vector, 3 elements", ...).
    pub summary: String,
    /// The sub-table, for table fields.
    pub table: Option<Box<TableInfo>>,
}

/// The Flatcode Inspector tool.
#[derive(Debug)]
pub struct FlatInspector;

impl FlatInspector {
    /// Reports the root offset, identifier and root vtable of `bytes`
    /// without any schema.
    pub fn inspect(bytes: &[u8]) -> Result<DebugReport> {
        let buf = ReadOnlyBuffer::new(bytes);
        let (root_offset, file_identifier) = Self::header(&buf)?;
        let root = Self::inspect_table(&buf, None, root_offset, 0)?;
        Ok(DebugReport {
            buffer_len: buf.len(),
            root_offset,
            file_identifier,
            root,
        })
    }

    /// Walks the table tree of `bytes` using `schema`, starting at table `root`.
    pub fn inspect_with_schema(bytes: &[u8], schema: &Schema, root: &str) -> Result<DebugReport> {
        let buf = ReadOnlyBuffer::new(bytes);
        let (root_offset, file_identifier) = Self::header(&buf)?;
        let layout = schema.table(root)?;
        let root = Self::inspect_table(&buf, Some((schema, layout)), root_offset, DEFAULT_MAX_DEPTH)?;
        Ok(DebugReport {
            buffer_len: buf.len(),
            root_offset,
            file_identifier,
            root,
        })
    }

    /// Memory-maps `path` and inspects it with `schema`.
    pub fn inspect_file<P: AsRef<Path>>(path: P, schema: &Schema, root: &str) -> Result<DebugReport> {
        let mmap = MmapBuffer::open(path)?;
        Self::inspect_with_schema(mmap.as_slice(), schema, root)
    }

    fn header(buf: &ReadOnlyBuffer<'_>) -> Result<(usize, Option<String>)> {
        if buf.len() < MIN_BUFFER_SIZE {
            return Err(FlatcodeError::invalid(format!(
                "buffer of {} bytes cannot hold a root",
                buf.len()
            )));
        }
        let root_offset = read_uoffset(buf, 0)?;
        let identifier = if root_offset >= UOFFSET_SIZE + FILE_IDENTIFIER_LEN {
            buf.read_bytes(UOFFSET_SIZE, FILE_IDENTIFIER_LEN)
                .ok()
                .filter(|raw| raw.iter().all(|b| b.is_ascii_graphic()))
                .map(|raw| String::from_utf8_lossy(raw).into_owned())
        } else {
            None
        };
        Ok((root_offset, identifier))
    }

    fn inspect_table(
        buf: &ReadOnlyBuffer<'_>,
        schema: Option<(&Schema, &TableLayout)>,
        position: usize,
        depth: usize,
    ) -> Result<TableInfo> {
        let vtable = VTable::read(buf, position)?;
        let slots = (0..vtable.slot_count())
            .map(|slot| vtable.slot(buf, slot))
            .collect::<Result<Vec<_>>>()?;

        let mut children = Vec::new();
        if let Some((schema, layout)) = schema {
            for field in &layout.fields {
                if !field.ty.is_reference() || field.deprecated {
                    continue;
                }
                // A union's first slot is its inline discriminator.
                let slot = match field.ty {
                    FieldType::Union(_) => usize::from(field.index) + 1,
                    _ => usize::from(field.index),
                };
                let rel = slots.get(slot).copied().unwrap_or(0);
                if rel == 0 {
                    continue;
                }
                let target = read_uoffset(buf, position + usize::from(rel))?;
                children.push(Self::inspect_child(buf, schema, &field.name, &field.ty, target, depth)?);
            }
        }

        Ok(TableInfo {
            table: schema.map(|(_, layout)| layout.name.clone()),
            position,
            vtable_position: vtable.position,
            vtable_len: vtable.vtable_len,
            table_len: vtable.table_len,
            slots,
            children,
        })
    }

    fn inspect_child(
        buf: &ReadOnlyBuffer<'_>,
        schema: &Schema,
        name: &str,
        ty: &FieldType,
        target: usize,
        depth: usize,
    ) -> Result<ChildInfo> {
        let (summary, table) = match ty {
            FieldType::String => {
                let len = read_vector_len(buf, target, 1)?;
                (format!("string, {len} bytes"), None)
            }
            FieldType::Table(table) if depth > 0 => {
                let layout = schema.table(table)?;
                let info = Self::inspect_table(buf, Some((schema, layout)), target, depth - 1)?;
                (format!("table '{table}'"), Some(Box::new(info)))
            }
            FieldType::Table(table) => (format!("table '{table}' (depth limit)"), None),
            FieldType::Vector(ElementType::Union(_)) => {
                let len = read_vector_len(buf, target, 1)?;
                (format!("union vector, {len} discriminators"), None)
            }
            FieldType::Vector(element) => {
                let (stride, _) = schema.element_size_align(element)?;
                let len = read_vector_len(buf, target, stride)?;
                (format!("vector, {len} elements of {stride} bytes"), None)
            }
            FieldType::Union(union) => (format!("union '{union}' value"), None),
            FieldType::Scalar(_) | FieldType::Struct(_) => ("inline".to_string(), None),
        };
        Ok(ChildInfo {
            field: name.to_string(),
            position: target,
            summary,
            table,
        })
    }
}
