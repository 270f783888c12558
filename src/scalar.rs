//! Little-endian codec for fixed-width primitives.
//!
//! Every multi-byte value is stored little-endian regardless of the host.
//! Floats travel as their raw bit patterns. Bounds are always checked;
//! alignment (`offset % width == 0`) is checked in debug builds only.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FlatcodeError, Result};

/// The primitive types a field, struct member or vector element may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    /// One byte, 0 or 1.
    Bool,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 64-bit integer.
    U64,
    /// Signed 64-bit integer.
    I64,
    /// IEEE-754 single precision.
    F32,
    /// IEEE-754 double precision.
    F64,
}

impl ScalarType {
    /// Encoded width in bytes.
    pub const fn size(self) -> usize {
        match self {
            Self::Bool | Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// Required alignment; always equal to the width.
    pub const fn align(self) -> usize {
        self.size()
    }

    /// Whether values of this type may serve as a sort key.
    pub const fn is_orderable(self) -> bool {
        !matches!(self, Self::Bool)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::U64 => "u64",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// A decoded scalar value tagged with its type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Scalar {
    #[allow(missing_docs)]
    Bool(bool),
    #[allow(missing_docs)]
    U8(u8),
    #[allow(missing_docs)]
    I8(i8),
    #[allow(missing_docs)]
    U16(u16),
    #[allow(missing_docs)]
    I16(i16),
    #[allow(missing_docs)]
    U32(u32),
    #[allow(missing_docs)]
    I32(i32),
    #[allow(missing_docs)]
    U64(u64),
    #[allow(missing_docs)]
    I64(i64),
    #[allow(missing_docs)]
    F32(f32),
    #[allow(missing_docs)]
    F64(f64),
}

impl Scalar {
    /// The all-zero value of `ty`, which is the default of any field that
    /// declares none.
    pub const fn zero(ty: ScalarType) -> Self {
        match ty {
            ScalarType::Bool => Self::Bool(false),
            ScalarType::U8 => Self::U8(0),
            ScalarType::I8 => Self::I8(0),
            ScalarType::U16 => Self::U16(0),
            ScalarType::I16 => Self::I16(0),
            ScalarType::U32 => Self::U32(0),
            ScalarType::I32 => Self::I32(0),
            ScalarType::U64 => Self::U64(0),
            ScalarType::I64 => Self::I64(0),
            ScalarType::F32 => Self::F32(0.0),
            ScalarType::F64 => Self::F64(0.0),
        }
    }

    /// The type tag of this value.
    pub const fn scalar_type(&self) -> ScalarType {
        match self {
            Self::Bool(_) => ScalarType::Bool,
            Self::U8(_) => ScalarType::U8,
            Self::I8(_) => ScalarType::I8,
            Self::U16(_) => ScalarType::U16,
            Self::I16(_) => ScalarType::I16,
            Self::U32(_) => ScalarType::U32,
            Self::I32(_) => ScalarType::I32,
            Self::U64(_) => ScalarType::U64,
            Self::I64(_) => ScalarType::I64,
            Self::F32(_) => ScalarType::F32,
            Self::F64(_) => ScalarType::F64,
        }
    }

    /// The little-endian bit pattern, zero-extended to 64 bits.
    ///
    /// Two scalars of the same type are bit-identical exactly when their raw
    /// bits are equal, which is the comparison used for default elision.
    pub fn raw_bits(&self) -> u64 {
        match *self {
            Self::Bool(v) => u64::from(v),
            Self::U8(v) => u64::from(v),
            Self::I8(v) => u64::from(v as u8),
            Self::U16(v) => u64::from(v),
            Self::I16(v) => u64::from(v as u16),
            Self::U32(v) => u64::from(v),
            Self::I32(v) => u64::from(v as u32),
            Self::U64(v) => v,
            Self::I64(v) => v as u64,
            Self::F32(v) => u64::from(v.to_bits()),
            Self::F64(v) => v.to_bits(),
        }
    }

    /// Returns the value as `i128` for integer and bool types.
    pub fn as_i128(&self) -> Option<i128> {
        match *self {
            Self::Bool(v) => Some(i128::from(v)),
            Self::U8(v) => Some(i128::from(v)),
            Self::I8(v) => Some(i128::from(v)),
            Self::U16(v) => Some(i128::from(v)),
            Self::I16(v) => Some(i128::from(v)),
            Self::U32(v) => Some(i128::from(v)),
            Self::I32(v) => Some(i128::from(v)),
            Self::U64(v) => Some(i128::from(v)),
            Self::I64(v) => Some(i128::from(v)),
            Self::F32(_) | Self::F64(_) => None,
        }
    }

    /// Returns the value as `f64` for float types.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::F32(v) => Some(f64::from(v)),
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Total order between two scalars of the same type; `None` across types.
    ///
    /// Floats use `total_cmp`, so NaNs sort after every number.
    pub fn cmp_same_type(&self, other: &Self) -> Option<std::cmp::Ordering> {
        if self.scalar_type() != other.scalar_type() {
            return None;
        }
        match (self.as_i128(), other.as_i128()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => Some(a.total_cmp(&b)),
                _ => None,
            },
        }
    }
}

/// Bit-level equality: `0.0` and `-0.0` differ, NaNs with equal payloads match.
impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.scalar_type() == other.scalar_type() && self.raw_bits() == other.raw_bits()
    }
}

macro_rules! impl_scalar_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Scalar {
                fn from(v: $t) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

impl_scalar_from!(
    bool => Bool, u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32,
    i32 => I32, u64 => U64, i64 => I64, f32 => F32, f64 => F64,
);

/// Rust primitives with a fixed little-endian encoding.
pub trait LeScalar: Copy + Sized + private::Sealed {
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Decodes from exactly `WIDTH` bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;

    /// Encodes into exactly `WIDTH` bytes.
    fn write_le(self, out: &mut [u8]);
}

mod private {
    pub trait Sealed {}
}

macro_rules! impl_le_scalar {
    ($($t:ty),*) => {
        $(
            impl private::Sealed for $t {}

            impl LeScalar for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                #[inline]
                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::WIDTH]);
                    <$t>::from_le_bytes(raw)
                }

                #[inline]
                fn write_le(self, out: &mut [u8]) {
                    out[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_le_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl private::Sealed for bool {}

impl LeScalar for bool {
    const WIDTH: usize = 1;

    #[inline]
    fn from_le_slice(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    #[inline]
    fn write_le(self, out: &mut [u8]) {
        out[0] = u8::from(self);
    }
}

#[inline]
pub(crate) fn check_access(len: usize, offset: usize, width: usize) -> Result<()> {
    match offset.checked_add(width) {
        Some(end) if end <= len => {}
        _ => {
            return Err(FlatcodeError::OutOfBounds {
                offset,
                len: width,
                buffer_len: len,
            });
        }
    }
    if cfg!(debug_assertions) && width > 1 && offset % width != 0 {
        return Err(FlatcodeError::Invariant(format!(
            "misaligned {width}-byte access at offset {offset}"
        )));
    }
    Ok(())
}

/// Reads a `T` at `offset`.
#[inline]
pub fn read<T: LeScalar>(bytes: &[u8], offset: usize) -> Result<T> {
    check_access(bytes.len(), offset, T::WIDTH)?;
    Ok(T::from_le_slice(&bytes[offset..]))
}

/// Writes `value` at `offset`.
#[inline]
pub fn write<T: LeScalar>(bytes: &mut [u8], offset: usize, value: T) -> Result<()> {
    check_access(bytes.len(), offset, T::WIDTH)?;
    value.write_le(&mut bytes[offset..]);
    Ok(())
}

/// Reads a scalar whose type is only known at runtime.
pub fn read_scalar(bytes: &[u8], offset: usize, ty: ScalarType) -> Result<Scalar> {
    Ok(match ty {
        ScalarType::Bool => Scalar::Bool(read(bytes, offset)?),
        ScalarType::U8 => Scalar::U8(read(bytes, offset)?),
        ScalarType::I8 => Scalar::I8(read(bytes, offset)?),
        ScalarType::U16 => Scalar::U16(read(bytes, offset)?),
        ScalarType::I16 => Scalar::I16(read(bytes, offset)?),
        ScalarType::U32 => Scalar::U32(read(bytes, offset)?),
        ScalarType::I32 => Scalar::I32(read(bytes, offset)?),
        ScalarType::U64 => Scalar::U64(read(bytes, offset)?),
        ScalarType::I64 => Scalar::I64(read(bytes, offset)?),
        ScalarType::F32 => Scalar::F32(read(bytes, offset)?),
        ScalarType::F64 => Scalar::F64(read(bytes, offset)?),
    })
}

/// Writes a runtime-typed scalar.
pub fn write_scalar(bytes: &mut [u8], offset: usize, value: Scalar) -> Result<()> {
    match value {
        Scalar::Bool(v) => write(bytes, offset, v),
        Scalar::U8(v) => write(bytes, offset, v),
        Scalar::I8(v) => write(bytes, offset, v),
        Scalar::U16(v) => write(bytes, offset, v),
        Scalar::I16(v) => write(bytes, offset, v),
        Scalar::U32(v) => write(bytes, offset, v),
        Scalar::I32(v) => write(bytes, offset, v),
        Scalar::U64(v) => write(bytes, offset, v),
        Scalar::I64(v) => write(bytes, offset, v),
        Scalar::F32(v) => write(bytes, offset, v),
        Scalar::F64(v) => write(bytes, offset, v),
    }
}
