//! Defines the physical binary layout and the offset/vtable addressing protocol.
//!
//! # Layout
//! ```text
//! [u32 root uoffset] [file identifier (optional, 4 bytes)] [vtable] [table] ... [payloads]
//! ```
//!
//! * **uoffset** (`u32`): stored at position `p`, points forward to `p + value`.
//!   A value below 4 would point into the offset itself and is rejected.
//! * **soffset** (`i32`): stored at the start of every table, points to its
//!   vtable at `table - value`.
//! * **vtable**: `u16 vtable_len | u16 table_len | u16 slot[0] | u16 slot[1] | ...`.
//!   `slot[i] == 0` means field slot `i` is absent; otherwise it is the byte
//!   offset of the value relative to the table start.
//! * **vector**: `u32 len | element[0] | element[1] | ...`; strings append a NUL
//!   that is not counted in `len`.

use crate::buffer::Buffer;
use crate::constants::{SOFFSET_SIZE, UOFFSET_SIZE, VTABLE_HEADER_SIZE};
use crate::error::{FlatcodeError, Result};

/// Follows the uoffset stored at `pos` and returns the absolute target.
pub fn read_uoffset<B: Buffer>(buf: &B, pos: usize) -> Result<usize> {
    let rel: u32 = buf.read(pos)?;
    let rel = rel as usize;
    if rel < UOFFSET_SIZE {
        return Err(FlatcodeError::invalid(format!(
            "uoffset at {pos} has value {rel}, below the minimum of {UOFFSET_SIZE}"
        )));
    }
    pos.checked_add(rel)
        .filter(|target| *target < buf.len())
        .ok_or_else(|| {
            FlatcodeError::invalid(format!(
                "uoffset at {pos} points to {} past the end of a {}-byte buffer",
                pos.saturating_add(rel),
                buf.len()
            ))
        })
}

/// A decoded vtable header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VTable {
    /// Absolute position of the vtable.
    pub position: usize,
    /// Byte length of the vtable including its 4-byte header.
    pub vtable_len: u16,
    /// Inline byte length of the table including its soffset.
    pub table_len: u16,
}

impl VTable {
    /// Locates and validates the vtable of the table starting at `table_start`.
    pub fn read<B: Buffer>(buf: &B, table_start: usize) -> Result<Self> {
        let soffset: i32 = buf.read(table_start)?;
        let position = i64::try_from(table_start)
            .ok()
            .map(|start| start - i64::from(soffset))
            .and_then(|p| usize::try_from(p).ok())
            .ok_or_else(|| {
                FlatcodeError::invalid(format!(
                    "soffset {soffset} of table at {table_start} points before the buffer"
                ))
            })?;

        let vtable_len: u16 = buf.read(position)?;
        if usize::from(vtable_len) < VTABLE_HEADER_SIZE {
            return Err(FlatcodeError::invalid(format!(
                "vtable at {position} has length {vtable_len}, below the {VTABLE_HEADER_SIZE}-byte header"
            )));
        }
        if position + usize::from(vtable_len) > buf.len() {
            return Err(FlatcodeError::invalid(format!(
                "vtable at {position} of length {vtable_len} runs past the buffer"
            )));
        }
        let table_len: u16 = buf.read(position + 2)?;
        if usize::from(table_len) < SOFFSET_SIZE
            || table_start + usize::from(table_len) > buf.len()
        {
            return Err(FlatcodeError::invalid(format!(
                "table at {table_start} declares inline length {table_len} outside the buffer"
            )));
        }
        Ok(Self {
            position,
            vtable_len,
            table_len,
        })
    }

    /// Number of field slots described by the vtable.
    pub fn slot_count(&self) -> usize {
        (usize::from(self.vtable_len) - VTABLE_HEADER_SIZE) / 2
    }

    /// The relative offset of `slot`, or 0 when the slot is absent or lies
    /// beyond this vtable (written by an older schema).
    pub fn slot<B: Buffer>(&self, buf: &B, slot: usize) -> Result<u16> {
        if slot >= self.slot_count() {
            return Ok(0);
        }
        let rel: u16 = buf.read(self.position + VTABLE_HEADER_SIZE + 2 * slot)?;
        if rel != 0 && rel >= self.table_len {
            return Err(FlatcodeError::invalid(format!(
                "field slot {slot} offset {rel} lies outside the table length {}",
                self.table_len
            )));
        }
        Ok(rel)
    }
}

/// Absolute position of field slot `index` in the table at `table_start`,
/// or 0 when the field is absent.
pub fn field_offset<B: Buffer>(buf: &B, table_start: usize, index: usize) -> Result<usize> {
    let vtable = VTable::read(buf, table_start)?;
    match vtable.slot(buf, index)? {
        0 => Ok(0),
        rel => Ok(table_start + usize::from(rel)),
    }
}

/// Reads the length prefix of the vector at `pos`, checking that
/// `len * stride` payload bytes follow it.
pub fn read_vector_len<B: Buffer>(buf: &B, pos: usize, stride: usize) -> Result<usize> {
    let len: u32 = buf.read(pos)?;
    let len = len as usize;
    let end = len
        .checked_mul(stride)
        .and_then(|bytes| bytes.checked_add(pos + UOFFSET_SIZE));
    match end {
        Some(end) if end <= buf.len() => Ok(len),
        _ => Err(FlatcodeError::invalid(format!(
            "vector at {pos} declares {len} elements of {stride} bytes, past the end of the buffer"
        ))),
    }
}

/// Decodes the string whose length prefix is at `pos`.
///
/// The trailing NUL is not part of the returned value.
pub fn read_string<B: Buffer>(buf: &B, pos: usize) -> Result<&str> {
    let len = read_vector_len(buf, pos, 1)?;
    buf.read_str(pos + UOFFSET_SIZE, len)
}
