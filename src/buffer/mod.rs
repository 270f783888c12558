//! Uniform views over contiguous byte regions.
//!
//! A [`Buffer`] exposes scalar reads at absolute offsets plus raw slice access.
//! The set of backends is closed:
//!
//! | Backend            | Memory                         | Mutable | Pinned |
//! |--------------------|--------------------------------|---------|--------|
//! | [`ArrayBuffer`]    | owned `Vec<u8>`                | yes     | no     |
//! | [`SegmentBuffer`]  | window into a borrowed slice   | yes     | no     |
//! | [`MemoryBuffer`]   | borrowed contiguous memory     | yes     | no     |
//! | [`ReadOnlyBuffer`] | borrowed immutable memory      | no      | no     |
//! | [`PinnedBuffer`]   | external memory that never moves | opt-in | yes    |
//! | [`MmapBuffer`]     | read-only file mapping         | no      | yes    |
//!
//! Borrowing backends never take ownership of the memory they view.

mod pinned;

pub use pinned::{MmapBuffer, PinnedBuffer};

use crate::error::{FlatcodeError, Result};
use crate::scalar::{self, LeScalar, Scalar, ScalarType};

/// Read access (and optionally write access) to a flat byte region.
pub trait Buffer: Send + Sync {
    /// The whole region as a slice.
    fn as_slice(&self) -> &[u8];

    /// The whole region as a mutable slice.
    ///
    /// # Errors
    /// Read-only backends return [`FlatcodeError::Invariant`].
    fn as_mut_slice(&mut self) -> Result<&mut [u8]>;

    /// Byte length of the region.
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Returns true if the region holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the backing memory is guaranteed not to move for the
    /// lifetime of the buffer.
    fn is_pinned(&self) -> bool {
        false
    }

    /// Reads a little-endian scalar at `offset`.
    fn read<T: LeScalar>(&self, offset: usize) -> Result<T>
    where
        Self: Sized,
    {
        scalar::read(self.as_slice(), offset)
    }

    /// Reads a scalar whose type is known only at runtime.
    fn read_scalar(&self, offset: usize, ty: ScalarType) -> Result<Scalar> {
        scalar::read_scalar(self.as_slice(), offset, ty)
    }

    /// Borrows `len` bytes starting at `offset`.
    fn read_bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let bytes = self.as_slice();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or(FlatcodeError::OutOfBounds {
                offset,
                len,
                buffer_len: bytes.len(),
            })?;
        Ok(&bytes[offset..end])
    }

    /// Decodes `byte_len` bytes of UTF-8 starting at `offset`.
    fn read_str(&self, offset: usize, byte_len: usize) -> Result<&str> {
        let raw = self.read_bytes(offset, byte_len)?;
        Ok(std::str::from_utf8(raw)?)
    }
}

impl<B: Buffer + ?Sized> Buffer for &mut B {
    fn as_slice(&self) -> &[u8] {
        (**self).as_slice()
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        (**self).as_mut_slice()
    }

    fn is_pinned(&self) -> bool {
        (**self).is_pinned()
    }
}

/// A buffer over an owned byte vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArrayBuffer(Vec<u8>);

impl ArrayBuffer {
    /// Wraps `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// A zero-filled buffer of `len` bytes, ready to serialize into.
    pub fn zeroed(len: usize) -> Self {
        Self(vec![0; len])
    }

    /// Returns the underlying vector.
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for ArrayBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Buffer for ArrayBuffer {
    fn as_slice(&self) -> &[u8] {
        &self.0
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        Ok(&mut self.0)
    }
}

/// An `offset + len` window into a larger borrowed array.
///
/// All offsets passed to the buffer are relative to the start of the window.
#[derive(Debug)]
pub struct SegmentBuffer<'a> {
    data: &'a mut [u8],
    offset: usize,
    len: usize,
}

impl<'a> SegmentBuffer<'a> {
    /// Creates the window `data[offset..offset + len]`.
    pub fn new(data: &'a mut [u8], offset: usize, len: usize) -> Result<Self> {
        match offset.checked_add(len) {
            Some(end) if end <= data.len() => Ok(Self { data, offset, len }),
            _ => Err(FlatcodeError::OutOfBounds {
                offset,
                len,
                buffer_len: data.len(),
            }),
        }
    }

    /// Start of the window inside the underlying array.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Buffer for SegmentBuffer<'_> {
    fn as_slice(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        Ok(&mut self.data[self.offset..self.offset + self.len])
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// A buffer over borrowed, mutable contiguous memory.
#[derive(Debug)]
pub struct MemoryBuffer<'a>(&'a mut [u8]);

impl<'a> MemoryBuffer<'a> {
    /// Wraps `memory`.
    pub fn new(memory: &'a mut [u8]) -> Self {
        Self(memory)
    }
}

impl Buffer for MemoryBuffer<'_> {
    fn as_slice(&self) -> &[u8] {
        self.0
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        Ok(self.0)
    }
}

/// A buffer over borrowed memory that must never be written.
#[derive(Debug, Clone, Copy)]
pub struct ReadOnlyBuffer<'a>(&'a [u8]);

impl<'a> ReadOnlyBuffer<'a> {
    /// Wraps `memory`.
    pub fn new(memory: &'a [u8]) -> Self {
        Self(memory)
    }
}

impl Buffer for ReadOnlyBuffer<'_> {
    fn as_slice(&self) -> &[u8] {
        self.0
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        Err(FlatcodeError::Invariant(
            "ReadOnlyBuffer does not allow mutable access".into(),
        ))
    }
}
