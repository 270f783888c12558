//! Buffers whose backing memory is guaranteed not to move.
//!
//! Pinned buffers skip the alignment defense on every scalar read and go
//! straight to the bytes after a single range check. They are only valid
//! while the caller keeps the memory alive and in place.

use memmap2::Mmap;
use std::fs::File;
use std::marker::PhantomData;
use std::path::Path;
use std::ptr::NonNull;

use super::Buffer;
use crate::error::{FlatcodeError, Result};
use crate::scalar::LeScalar;

/// A buffer over externally owned memory that never moves.
#[derive(Debug)]
pub struct PinnedBuffer<'a> {
    ptr: NonNull<u8>,
    len: usize,
    writable: bool,
    _marker: PhantomData<&'a mut [u8]>,
}

// The pointee is plain bytes; sharing follows the rules of `&[u8]`/`&mut [u8]`.
#[allow(unsafe_code)]
unsafe impl Send for PinnedBuffer<'_> {}
#[allow(unsafe_code)]
unsafe impl Sync for PinnedBuffer<'_> {}

impl<'a> PinnedBuffer<'a> {
    /// Pins a borrowed slice. Borrowed memory cannot move while borrowed.
    pub fn from_slice(memory: &'a [u8]) -> Self {
        Self {
            ptr: NonNull::from(memory).cast(),
            len: memory.len(),
            writable: false,
            _marker: PhantomData,
        }
    }

    /// Pins a borrowed mutable slice.
    pub fn from_mut_slice(memory: &'a mut [u8]) -> Self {
        Self {
            ptr: NonNull::from(&mut *memory).cast(),
            len: memory.len(),
            writable: true,
            _marker: PhantomData,
        }
    }

    /// Views `len` bytes of external memory at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be valid for reads of `len` bytes for `'a`, the memory must
    /// not be relocated, freed or written through another alias while the
    /// buffer exists.
    #[allow(unsafe_code)]
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self {
            ptr,
            len,
            writable: false,
            _marker: PhantomData,
        }
    }
}

impl Buffer for PinnedBuffer<'_> {
    #[allow(unsafe_code)]
    fn as_slice(&self) -> &[u8] {
        // SAFETY: construction guarantees `ptr..ptr+len` is valid and stable for 'a.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[allow(unsafe_code)]
    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        if !self.writable {
            return Err(FlatcodeError::Invariant(
                "PinnedBuffer was created over read-only memory".into(),
            ));
        }
        // SAFETY: only `from_mut_slice` sets `writable`, which holds a unique borrow for 'a.
        Ok(unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }

    fn len(&self) -> usize {
        self.len
    }

    fn is_pinned(&self) -> bool {
        true
    }

    #[allow(unsafe_code)]
    #[inline]
    fn read<T: LeScalar>(&self, offset: usize) -> Result<T> {
        if offset > self.len.saturating_sub(T::WIDTH) || self.len < T::WIDTH {
            return Err(FlatcodeError::OutOfBounds {
                offset,
                len: T::WIDTH,
                buffer_len: self.len,
            });
        }
        // SAFETY: the range check above keeps `offset..offset+WIDTH` inside the region.
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), T::WIDTH) };
        Ok(T::from_le_slice(bytes))
    }
}

/// A read-only memory map of a file.
#[derive(Debug)]
pub struct MmapBuffer {
    mmap: Mmap,
}

impl MmapBuffer {
    /// Maps the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        // Safety: Mmap is fundamentally unsafe as external processes could modify the file.
        // Callers opting into mapped buffers accept that risk, as with any pinned buffer.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap })
    }
}

impl Buffer for MmapBuffer {
    fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        Err(FlatcodeError::Invariant(
            "MmapBuffer is a read-only mapping".into(),
        ))
    }

    fn is_pinned(&self) -> bool {
        true
    }
}
