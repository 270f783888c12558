//! # Flatcode
//!
//! A zero-copy, offset-addressed binary serialization runtime. Values are
//! laid out in a single flat buffer that can be read in place: no parsing
//! pass, no allocation per field, random access to any field through a
//! small per-table indirection table (the *vtable*).
//!
//! ## Overview
//!
//! Flatcode consumes resolved layout descriptors (a [`layout::Schema`])
//! produced by an external schema compiler. It does not parse schema text
//! and does not generate code; it serializes and reads [`TableValue`] trees
//! against those descriptors.
//!
//! ### Key Features
//!
//! *   **Zero-Copy Reads:** Scalars, strings and byte vectors are decoded
//!     straight from the buffer. `[u8]` vectors are exposed as borrowed slices.
//! *   **Schema Evolution:** Fields absent from a table read back as their
//!     declared default, so old buffers stay readable by newer schemas.
//! *   **Compact Output:** Scalars equal to their default are elided, and
//!     identical vtables are written once per buffer.
//! *   **String Deduplication:** Fields marked shared go through a pluggable
//!     write cache (`None`, direct-mapped or LRU) that collapses repeated
//!     values into one payload.
//! *   **Four Read Modes:** [`DeserializationMode`] chooses between decoding on
//!     every access, decoding once and caching, or materializing the whole
//!     graph up front (immutable or mutable).
//!
//! ## Architecture
//!
//! ### File Format
//!
//! ```text
//! [root uoffset] [file identifier?] [vtable] [table] ... [strings, vectors, sub-tables]
//! ```
//!
//! See [`format`] for the addressing rules. Everything is little-endian and
//! every scalar sits at an offset that is a multiple of its width.
//!
//! ### Write Path
//!
//! [`Flatcode::max_size`] validates a value and bounds its size;
//! [`Flatcode::serialize`] then lays it out front to back through a
//! [`context::SerializationContext`]. A destination that is too small yields
//! [`FlatcodeError::BufferTooSmall`] carrying the exact size.
//!
//! ### Read Path
//!
//! [`Flatcode::parse`] validates the root and returns a [`Parsed`] result:
//! a [`TableView`] for the lazy modes, an owned [`TableValue`] for the greedy
//! ones.
//!
//! ## Usage
//!
//! ```rust
//! use flatcode::{DeserializationMode, Flatcode, ReadOnlyBuffer, TableValue, Value};
//! use flatcode::layout::{ElementType, FieldLayout, Schema, TableLayout};
//! use flatcode::scalar::{Scalar, ScalarType};
//!
//! let schema = Schema::builder()
//!     .table(TableLayout::new("Monster", vec![
//!         FieldLayout::scalar("hp", 0, ScalarType::I16).with_default(Scalar::I16(100)),
//!         FieldLayout::string("name", 1).shared(),
//!         FieldLayout::vector("inventory", 2, ElementType::Scalar(ScalarType::U8)),
//!     ]))
//!     .build()?;
//! let codec = Flatcode::new(schema, "Monster")?;
//!
//! let orc = TableValue::new()
//!     .with(1, "orc")
//!     .with(2, Value::Vector(vec![1u8.into(), 2u8.into(), 3u8.into()]));
//! let bytes = codec.serialize_to_vec(&orc)?;
//!
//! let buffer = ReadOnlyBuffer::new(&bytes);
//! let parsed = codec.parse_with_mode(&buffer, DeserializationMode::Progressive)?;
//! let view = parsed.view().ok_or(flatcode::FlatcodeError::Internal("no view".into()))?;
//! assert_eq!(view.scalar(0)?, Scalar::I16(100));
//! assert_eq!(view.string(1)?.as_deref(), Some("orc"));
//! let inventory = view.vector(2)?.ok_or(flatcode::FlatcodeError::Internal("absent".into()))?;
//! assert_eq!(inventory.as_bytes(), Some(&[1u8, 2, 3][..]));
//! # Ok::<(), flatcode::FlatcodeError>(())
//! ```
//!
//! ### Safety and Error Handling
//!
//! * **Encapsulated Unsafe:** `unsafe` is denied crate-wide and allowed only
//!   in [`buffer::PinnedBuffer`] and the memory-map constructor.
//! * **No Panics:** No `unwrap()` or `panic!()` calls in the library (enforced by clippy lints).
//! * **Comprehensive Errors:** All failures correspond to a [`FlatcodeError`] variant.

#![deny(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

// --- PUBLIC API MODULES ---
pub mod api;
pub mod buffer;
pub mod context;
pub mod error;
pub mod format;
pub mod inspector;
pub mod layout;
pub mod mode;
pub mod reader;
pub mod scalar;
pub mod shared_strings;
pub mod value;
pub mod vector;
pub mod vtable;

// Private modules
mod writer;

// --- RE-EXPORTS ---

pub use api::{Flatcode, FlatcodeBuilder, FlatcodeOptions, WriteReport};
pub use buffer::{
    ArrayBuffer, Buffer, MemoryBuffer, MmapBuffer, PinnedBuffer, ReadOnlyBuffer, SegmentBuffer,
};
pub use error::{FlatcodeError, Result};
pub use inspector::FlatInspector;
pub use mode::{DeserializationMode, Frozen};
pub use reader::{FieldValue, Parsed, TableView};
pub use shared_strings::SharedStringPolicy;
pub use value::{StructValue, TableValue, UnionValue, Value};
pub use vector::{KeyRef, VectorView};

/// Constants used throughout the library.
pub mod constants {
    /// Largest buffer accepted at parse entry, and largest value written.
    pub const MAX_BUFFER_SIZE: usize = 1 << 30;

    /// Smallest buffer that can hold a root: a root uoffset and a table's soffset.
    pub const MIN_BUFFER_SIZE: usize = 8;

    /// Width of an unsigned forward offset.
    pub const UOFFSET_SIZE: usize = 4;

    /// Width of the signed table-to-vtable offset.
    pub const SOFFSET_SIZE: usize = 4;

    /// `vtable_len` and `table_len`, both `u16`.
    pub const VTABLE_HEADER_SIZE: usize = 4;

    /// Length of the optional root file identifier.
    pub const FILE_IDENTIFIER_LEN: usize = 4;

    /// Most field slots a vtable can describe.
    pub const MAX_FIELD_SLOTS: usize = (u16::MAX as usize - VTABLE_HEADER_SIZE) / 2;

    /// Default bucket count of the direct-mapped shared-string write cache.
    pub const DEFAULT_SHARED_STRING_CAPACITY: usize = 1021;

    /// Default bucket count of the shared-string read cache.
    pub const DEFAULT_READ_CACHE_SIZE: usize = 1021;

    /// Default nesting budget for greedy materialization.
    pub const DEFAULT_MAX_DEPTH: usize = 64;
}
