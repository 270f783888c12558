//! The serialization context: a front-to-back bump allocator over the
//! destination slice.
//!
//! Every allocation zero-fills its padding, so the output is deterministic.
//! When an allocation would overflow the destination, the context switches
//! to *measuring* mode: the cursor keeps advancing but nothing is written.
//! [`SerializationContext::finish`] then reports the exact size the value
//! needs, so callers can reallocate once and retry.

use std::sync::Arc;

use crate::constants::{MAX_BUFFER_SIZE, UOFFSET_SIZE};
use crate::error::{FlatcodeError, Result};
use crate::layout::align_up;
use crate::scalar::{self, LeScalar, Scalar};
use crate::shared_strings::{PendingString, SharedStringWriter};
use crate::vtable::{VTableBuilder, VTableIndex};

/// Mutable state of one serialization pass.
#[derive(Debug)]
pub struct SerializationContext<'a> {
    out: &'a mut [u8],
    cursor: usize,
    measuring: bool,
    vtables: VTableIndex,
    strings: Box<dyn SharedStringWriter>,
    strings_written: usize,
}

impl<'a> SerializationContext<'a> {
    /// Starts a pass writing into `out` from offset 0.
    pub fn new(out: &'a mut [u8], strings: Box<dyn SharedStringWriter>) -> Self {
        Self {
            out,
            cursor: 0,
            measuring: false,
            vtables: VTableIndex::new(),
            strings,
            strings_written: 0,
        }
    }

    /// Bytes allocated so far.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Returns true once the destination has overflowed.
    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    /// Distinct vtables emitted so far.
    pub fn distinct_vtables(&self) -> usize {
        self.vtables.distinct()
    }

    /// Tables that reused an earlier vtable.
    pub fn reused_vtables(&self) -> usize {
        self.vtables.reused()
    }

    /// String payloads written so far.
    pub fn strings_written(&self) -> usize {
        self.strings_written
    }

    /// Reserves `size` bytes aligned to `align` and returns their position.
    pub fn allocate(&mut self, size: usize, align: usize) -> Result<usize> {
        let start = align_up(self.cursor, align);
        self.advance(start + size)?;
        Ok(start)
    }

    /// Reserves a vector of `len` elements and returns the position of its
    /// length prefix. The element area starts aligned to `max(4, align)`.
    pub fn allocate_vector(&mut self, len: usize, stride: usize, align: usize) -> Result<usize> {
        let payload = len
            .checked_mul(stride)
            .ok_or_else(|| FlatcodeError::schema(format!("vector of {len} elements overflows")))?;
        let start = align_up(self.cursor + UOFFSET_SIZE, align.max(UOFFSET_SIZE)) - UOFFSET_SIZE;
        self.advance(start + UOFFSET_SIZE + payload)?;
        Ok(start)
    }

    fn advance(&mut self, end: usize) -> Result<()> {
        if end > MAX_BUFFER_SIZE {
            return Err(FlatcodeError::schema(format!(
                "serialized value exceeds the {MAX_BUFFER_SIZE} byte limit"
            )));
        }
        if !self.measuring && end > self.out.len() {
            tracing::trace!(
                capacity = self.out.len(),
                at = end,
                "destination overflowed, measuring"
            );
            self.measuring = true;
        }
        if !self.measuring {
            self.out[self.cursor..end].fill(0);
        }
        self.cursor = end;
        Ok(())
    }

    /// Writes a fixed-width value at `pos`.
    pub fn write<T: LeScalar>(&mut self, pos: usize, value: T) -> Result<()> {
        if self.measuring {
            return Ok(());
        }
        scalar::write(self.out, pos, value)
    }

    /// Writes a runtime-typed scalar at `pos`.
    pub fn write_scalar(&mut self, pos: usize, value: Scalar) -> Result<()> {
        if self.measuring {
            return Ok(());
        }
        scalar::write_scalar(self.out, pos, value)
    }

    /// Copies raw bytes to `pos`.
    pub fn write_bytes(&mut self, pos: usize, bytes: &[u8]) -> Result<()> {
        if self.measuring {
            return Ok(());
        }
        let end = pos + bytes.len();
        let buffer_len = self.out.len();
        self.out
            .get_mut(pos..end)
            .ok_or(FlatcodeError::OutOfBounds {
                offset: pos,
                len: bytes.len(),
                buffer_len,
            })?
            .copy_from_slice(bytes);
        Ok(())
    }

    /// Points the uoffset at `slot` forward to `target`.
    pub fn patch_uoffset(&mut self, slot: usize, target: usize) -> Result<()> {
        let rel = target
            .checked_sub(slot)
            .filter(|rel| *rel >= UOFFSET_SIZE)
            .and_then(|rel| u32::try_from(rel).ok())
            .ok_or_else(|| {
                FlatcodeError::Internal(format!(
                    "uoffset at {slot} cannot point to {target}; targets must follow their slot"
                ))
            })?;
        self.write(slot, rel)
    }

    /// Emits `vtable`, or returns the position of an identical one already
    /// written during this pass.
    pub fn emit_vtable(&mut self, vtable: &VTableBuilder) -> Result<usize> {
        let bytes = vtable.to_bytes();
        if let Some(pos) = self.vtables.lookup(&bytes) {
            tracing::trace!(pos, len = bytes.len(), "vtable reused");
            return Ok(pos);
        }
        let pos = self.allocate(bytes.len(), 2)?;
        self.write_bytes(pos, &bytes)?;
        self.vtables.insert(bytes, pos);
        Ok(pos)
    }

    /// Writes the soffset at the start of the table at `table` so that it
    /// points back to the vtable at `vtable`.
    pub fn write_soffset(&mut self, table: usize, vtable: usize) -> Result<()> {
        let rel = i64::try_from(table)
            .ok()
            .zip(i64::try_from(vtable).ok())
            .and_then(|(t, v)| i32::try_from(t - v).ok())
            .ok_or_else(|| {
                FlatcodeError::Internal(format!("vtable at {vtable} is out of soffset range"))
            })?;
        self.write(table, rel)
    }

    /// Writes a string (length, bytes, NUL) and returns its position.
    pub fn write_string(&mut self, value: &str) -> Result<usize> {
        let len = u32::try_from(value.len())
            .map_err(|_| FlatcodeError::schema("string longer than u32::MAX bytes"))?;
        let pos = self.allocate(UOFFSET_SIZE + value.len() + 1, UOFFSET_SIZE)?;
        self.write(pos, len)?;
        self.write_bytes(pos + UOFFSET_SIZE, value.as_bytes())?;
        self.strings_written += 1;
        Ok(pos)
    }

    /// Hands a shared string to the cache; writes whatever it evicts.
    pub fn defer_shared(&mut self, value: &Arc<str>, slot: usize) -> Result<()> {
        match self.strings.defer(value, slot) {
            Some(evicted) => self.write_pending(evicted),
            None => Ok(()),
        }
    }

    fn write_pending(&mut self, pending: PendingString) -> Result<()> {
        let pos = self.write_string(&pending.value)?;
        for slot in pending.slots {
            self.patch_uoffset(slot, pos)?;
        }
        Ok(())
    }

    /// Writes every string still held by the shared-string cache.
    pub fn flush(&mut self) -> Result<()> {
        for pending in self.strings.drain() {
            self.write_pending(pending)?;
        }
        Ok(())
    }

    /// Flushes the shared-string cache and returns the bytes written.
    ///
    /// # Errors
    /// [`FlatcodeError::BufferTooSmall`] with the exact size when the
    /// destination overflowed.
    pub fn finish(mut self) -> Result<usize> {
        self.flush()?;
        if self.measuring {
            return Err(FlatcodeError::BufferTooSmall {
                required: self.cursor,
            });
        }
        Ok(self.cursor)
    }
}
