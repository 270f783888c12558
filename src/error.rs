//! Centralized error handling for Flatcode.
//!
//! Every failure in the library is reported through [`FlatcodeError`]; nothing
//! panics and nothing is silently clamped or retried.
//!
//! ## Error Categories
//!
//! - **Malformed buffers** ([`FlatcodeError::InvalidData`]): vtables that are too
//!   short, uoffsets below the minimum, union invariants, absent required fields.
//! - **Bounds** ([`FlatcodeError::OutOfBounds`]): a read or write that would run
//!   past the end of the buffer.
//! - **Invariants** ([`FlatcodeError::Invariant`]): misaligned scalar access in
//!   debug builds and mutable access to read-only buffers.
//! - **Schema violations** ([`FlatcodeError::Schema`]): illegal layout
//!   descriptors or values that do not match their declared field types. These
//!   are raised before any byte is committed to the destination.
//! - **Capacity** ([`FlatcodeError::BufferTooSmall`]): the destination could not
//!   hold the serialized value; carries the exact size needed.
//!
//! ## Usage
//!
//! ```rust
//! use flatcode::FlatcodeError;
//!
//! fn describe(err: &FlatcodeError) -> String {
//!     match err {
//!         FlatcodeError::BufferTooSmall { required } => format!("need {required} bytes"),
//!         FlatcodeError::InvalidData(msg) => format!("corrupt buffer: {msg}"),
//!         other => other.to_string(),
//!     }
//! }
//! # assert_eq!(describe(&FlatcodeError::BufferTooSmall { required: 12 }), "need 12 bytes");
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;

/// A specialized `Result` type for Flatcode operations.
pub type Result<T> = std::result::Result<T, FlatcodeError>;

/// The master error enum covering all failure domains in Flatcode.
///
/// This type is `Clone` so that errors can be cached alongside lazily decoded
/// values and shared across threads. I/O errors are wrapped in `Arc` to make
/// cloning cheap.
#[derive(Debug, Clone)]
pub enum FlatcodeError {
    /// Low-level I/O failure while opening, mapping or writing a file.
    Io(Arc<io::Error>),

    /// The buffer does not hold a well-formed value.
    ///
    /// ## Common Causes
    ///
    /// - vtable length below the 4-byte header
    /// - uoffset smaller than 4
    /// - root buffer smaller than 8 bytes or larger than 1 GiB
    /// - unknown union discriminator, or mismatched union vector halves
    /// - required field missing
    /// - invalid UTF-8 in a string
    InvalidData(String),

    /// An access at `offset` of `len` bytes does not fit in a buffer of
    /// `buffer_len` bytes.
    OutOfBounds {
        /// Absolute offset of the attempted access.
        offset: usize,
        /// Width of the attempted access.
        len: usize,
        /// Length of the buffer.
        buffer_len: usize,
    },

    /// A runtime invariant was violated by the caller.
    ///
    /// Raised for misaligned scalar access (debug builds only) and for
    /// attempts to take a mutable view of a read-only buffer.
    Invariant(String),

    /// The layout descriptor is illegal, or a value does not match the
    /// declared type of the field it is written to.
    Schema(String),

    /// The destination buffer is too small. `required` is the exact number of
    /// bytes the serialized value occupies.
    BufferTooSmall {
        /// Exact serialized size of the value.
        required: usize,
    },

    /// Unrecognised configuration value (deserialization mode, cache policy).
    Config(String),

    /// Failure encoding or decoding a persisted schema (bincode).
    Serialization(String),

    /// Logic error inside the library, such as a poisoned lock.
    Internal(String),
}

impl FlatcodeError {
    /// Prefixes the message of a message-carrying error with `context`.
    ///
    /// Used to record which table and field failed to decode without any
    /// ambient error state.
    pub fn context(self, context: impl fmt::Display) -> Self {
        match self {
            Self::InvalidData(s) => Self::InvalidData(format!("{context}: {s}")),
            Self::Schema(s) => Self::Schema(format!("{context}: {s}")),
            Self::Invariant(s) => Self::Invariant(format!("{context}: {s}")),
            other => other,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }
}

impl fmt::Display for FlatcodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O Error: {e}"),
            Self::InvalidData(s) => write!(f, "Invalid Data: {s}"),
            Self::OutOfBounds {
                offset,
                len,
                buffer_len,
            } => write!(
                f,
                "Out Of Bounds: access of {len} bytes at offset {offset} exceeds buffer of {buffer_len} bytes"
            ),
            Self::Invariant(s) => write!(f, "Invariant Violation: {s}"),
            Self::Schema(s) => write!(f, "Schema Error: {s}"),
            Self::BufferTooSmall { required } => {
                write!(f, "Buffer Too Small: {required} bytes required")
            }
            Self::Config(s) => write!(f, "Configuration Error: {s}"),
            Self::Serialization(s) => write!(f, "Serialization Error: {s}"),
            Self::Internal(s) => write!(f, "Internal Logic Error: {s}"),
        }
    }
}

impl std::error::Error for FlatcodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FlatcodeError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<std::str::Utf8Error> for FlatcodeError {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::InvalidData(format!("string is not valid UTF-8: {err}"))
    }
}
