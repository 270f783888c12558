//! VTable construction and per-pass deduplication.

use std::collections::HashMap;

use crate::constants::VTABLE_HEADER_SIZE;
use crate::error::{FlatcodeError, Result};

/// Accumulates field offsets for one table and encodes its vtable.
///
/// Only slots `0..=max_slot` are emitted; slots in that range without a
/// value are written as zero.
#[derive(Debug, Clone, Default)]
pub struct VTableBuilder {
    slots: Vec<u16>,
    table_len: u16,
}

impl VTableBuilder {
    /// Starts a vtable for a table whose inline part is `table_len` bytes.
    pub fn new(table_len: usize) -> Result<Self> {
        let table_len = u16::try_from(table_len).map_err(|_| {
            FlatcodeError::schema(format!(
                "table inline size {table_len} exceeds the 65535-byte vtable limit"
            ))
        })?;
        Ok(Self {
            slots: Vec::new(),
            table_len,
        })
    }

    /// Records that `slot` lives `offset` bytes into the table.
    pub fn set(&mut self, slot: usize, offset: usize) -> Result<()> {
        let offset = u16::try_from(offset)
            .map_err(|_| FlatcodeError::schema(format!("field offset {offset} exceeds u16")))?;
        if self.slots.len() <= slot {
            self.slots.resize(slot + 1, 0);
        }
        self.slots[slot] = offset;
        Ok(())
    }

    /// Encoded byte length.
    pub fn byte_len(&self) -> usize {
        VTABLE_HEADER_SIZE + 2 * self.slots.len()
    }

    /// Encodes the vtable.
    pub fn to_bytes(&self) -> Vec<u8> {
        let len = self.byte_len();
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&(len as u16).to_le_bytes());
        out.extend_from_slice(&self.table_len.to_le_bytes());
        for slot in &self.slots {
            out.extend_from_slice(&slot.to_le_bytes());
        }
        out
    }
}

/// Positions of every vtable emitted in the current serialization pass,
/// keyed by their encoded bytes.
#[derive(Debug, Default)]
pub struct VTableIndex {
    seen: HashMap<Vec<u8>, usize>,
    reused: usize,
}

impl VTableIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of a byte-identical vtable emitted earlier in this pass.
    pub fn lookup(&mut self, bytes: &[u8]) -> Option<usize> {
        let hit = self.seen.get(bytes).copied();
        if hit.is_some() {
            self.reused += 1;
        }
        hit
    }

    /// Records a newly emitted vtable.
    pub fn insert(&mut self, bytes: Vec<u8>, position: usize) {
        self.seen.entry(bytes).or_insert(position);
    }

    /// Number of distinct vtables emitted.
    pub fn distinct(&self) -> usize {
        self.seen.len()
    }

    /// Number of tables that reused an earlier vtable.
    pub fn reused(&self) -> usize {
        self.reused
    }

    /// Forgets every vtable, for the next pass.
    pub fn clear(&mut self) {
        self.seen.clear();
        self.reused = 0;
    }
}
