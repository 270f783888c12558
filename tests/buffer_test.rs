#![allow(missing_docs)]

use flatcode::context::SerializationContext;
use flatcode::scalar::{self, Scalar, ScalarType};
use flatcode::shared_strings::NoSharing;
use flatcode::{
    ArrayBuffer, Buffer, FlatcodeError, MemoryBuffer, PinnedBuffer, ReadOnlyBuffer, SegmentBuffer,
};

fn boundary_values() -> Vec<Scalar> {
    vec![
        Scalar::Bool(true),
        Scalar::Bool(false),
        Scalar::U8(u8::MAX),
        Scalar::I8(i8::MIN),
        Scalar::U16(u16::MAX),
        Scalar::I16(i16::MIN),
        Scalar::U32(u32::MAX),
        Scalar::I32(i32::MIN),
        Scalar::U64(u64::MAX),
        Scalar::I64(i64::MIN),
        Scalar::F32(f32::MIN_POSITIVE),
        Scalar::F32(f32::NAN),
        Scalar::F64(-0.0),
        Scalar::F64(f64::INFINITY),
    ]
}

// --- TESTS ---

/// Extremes of every width survive a write and read, bit for bit.
#[test]
fn test_scalar_boundaries() -> flatcode::Result<()> {
    let mut bytes = [0u8; 16];
    for value in boundary_values() {
        let ty = value.scalar_type();
        scalar::write_scalar(&mut bytes, 8, value)?;
        let back = scalar::read_scalar(&bytes, 8, ty)?;
        assert_eq!(back, value, "{ty} did not round-trip");
        assert_eq!(ty.size(), ty.align());
    }
    Ok(())
}

/// Values are little-endian regardless of the host.
#[test]
fn test_little_endian_layout() -> flatcode::Result<()> {
    let mut bytes = [0u8; 8];
    scalar::write(&mut bytes, 0, 0x0102_0304u32)?;
    assert_eq!(&bytes[..4], &[4, 3, 2, 1]);
    scalar::write(&mut bytes, 0, -2i16)?;
    assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
    scalar::write(&mut bytes, 0, 1.0f64)?;
    assert_eq!(bytes, 1.0f64.to_bits().to_le_bytes());
    Ok(())
}

/// Reads past the end are rejected with the attempted range.
#[test]
fn test_out_of_bounds() {
    let bytes = [0u8; 6];
    match scalar::read::<u32>(&bytes, 4) {
        Err(FlatcodeError::OutOfBounds {
            offset,
            len,
            buffer_len,
        }) => assert_eq!((offset, len, buffer_len), (4, 4, 6)),
        other => panic!("expected OutOfBounds, got {other:?}"),
    }
    assert!(scalar::read::<u8>(&bytes, usize::MAX).is_err());
    assert!(ReadOnlyBuffer::new(&bytes).read_bytes(2, 8).is_err());
}

/// A misaligned multi-byte read is an invariant violation in debug builds.
#[test]
fn test_alignment_check() {
    let bytes = [0u8; 16];
    let misaligned = scalar::read::<u32>(&bytes, 2);
    if cfg!(debug_assertions) {
        assert!(matches!(misaligned, Err(FlatcodeError::Invariant(_))));
    } else {
        assert!(misaligned.is_ok());
    }
    // Single bytes have no alignment.
    assert!(scalar::read::<u8>(&bytes, 3).is_ok());
}

/// A pinned buffer skips the alignment check but keeps the range check.
#[test]
fn test_pinned_buffer() -> flatcode::Result<()> {
    let mut bytes = [0u8; 12];
    bytes[1..5].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());

    let pinned = PinnedBuffer::from_slice(&bytes);
    assert!(pinned.is_pinned());
    assert_eq!(pinned.len(), 12);
    assert_eq!(pinned.read::<u32>(1)?, 0xDEAD_BEEF);
    assert!(matches!(
        pinned.read::<u64>(8),
        Err(FlatcodeError::OutOfBounds { .. })
    ));

    let mut readonly = PinnedBuffer::from_slice(&bytes);
    assert!(matches!(
        readonly.as_mut_slice(),
        Err(FlatcodeError::Invariant(_))
    ));

    let mut storage = [0u8; 4];
    let mut writable = PinnedBuffer::from_mut_slice(&mut storage);
    writable.as_mut_slice()?[0] = 9;
    assert_eq!(writable.read::<u8>(0)?, 9);
    Ok(())
}

/// Read-only wrappers refuse mutable access; owned and borrowed ones grant it.
#[test]
fn test_buffer_mutability() -> flatcode::Result<()> {
    let bytes = [1u8, 2, 3, 4];
    let mut readonly = ReadOnlyBuffer::new(&bytes);
    assert!(matches!(
        readonly.as_mut_slice(),
        Err(FlatcodeError::Invariant(_))
    ));
    assert!(!readonly.is_pinned());

    let mut owned = ArrayBuffer::zeroed(4);
    owned.as_mut_slice()?.copy_from_slice(&bytes);
    assert_eq!(owned.read::<u32>(0)?, u32::from_le_bytes(bytes));
    assert_eq!(owned.into_inner(), bytes.to_vec());

    let mut memory = [0u8; 4];
    let mut borrowed = MemoryBuffer::new(&mut memory);
    borrowed.as_mut_slice()?[3] = 7;
    assert_eq!(borrowed.read_scalar(3, ScalarType::U8)?, Scalar::U8(7));
    Ok(())
}

/// A segment exposes a window of a larger region.
#[test]
fn test_segment_buffer() -> flatcode::Result<()> {
    let mut region = [0u8; 32];
    {
        let mut segment = SegmentBuffer::new(&mut region, 8, 8)?;
        assert_eq!(segment.offset(), 8);
        assert_eq!(segment.len(), 8);
        segment.as_mut_slice()?[0] = 0xAB;
        assert!(segment.read::<u8>(8).is_err());
    }
    assert_eq!(region[8], 0xAB);
    assert!(SegmentBuffer::new(&mut region, 30, 4).is_err());
    Ok(())
}

/// Strings decode as UTF-8 and reject anything else.
#[test]
fn test_read_str() -> flatcode::Result<()> {
    let bytes = [b'o', b'k', 0xFF, 0xFE];
    let buffer = ReadOnlyBuffer::new(&bytes);
    assert_eq!(buffer.read_str(0, 2)?, "ok");
    assert!(matches!(
        buffer.read_str(0, 4),
        Err(FlatcodeError::InvalidData(_))
    ));
    Ok(())
}

/// Padding inserted for alignment is zeroed, and bytes past the cursor
/// are left alone.
#[test]
fn test_context_zero_fills_padding() -> flatcode::Result<()> {
    let mut out = [0xAAu8; 16];
    let mut ctx = SerializationContext::new(&mut out, Box::new(NoSharing));
    assert_eq!(ctx.allocate(1, 1)?, 0);
    assert_eq!(ctx.allocate(4, 4)?, 4);
    assert_eq!(ctx.finish()?, 8);
    assert_eq!(&out[..8], &[0u8; 8]);
    assert_eq!(out[8], 0xAA);
    Ok(())
}

/// Vector elements start on their own alignment; the length prefix sits
/// right before them.
#[test]
fn test_context_vector_alignment() -> flatcode::Result<()> {
    let mut out = [0u8; 64];
    let mut ctx = SerializationContext::new(&mut out, Box::new(NoSharing));
    ctx.allocate(4, 4)?;
    let pos = ctx.allocate_vector(2, 8, 8)?;
    assert_eq!((pos + 4) % 8, 0);
    assert_eq!(ctx.position(), pos + 4 + 16);
    Ok(())
}

/// Overflowing the destination switches to measuring and reports the
/// exact size at the end.
#[test]
fn test_context_measures_on_overflow() -> flatcode::Result<()> {
    let mut out = [0u8; 4];
    let mut ctx = SerializationContext::new(&mut out, Box::new(NoSharing));
    ctx.allocate(4, 4)?;
    assert!(!ctx.is_measuring());
    ctx.write_string("hello")?;
    assert!(ctx.is_measuring());
    assert_eq!(ctx.strings_written(), 1);
    match ctx.finish() {
        Err(FlatcodeError::BufferTooSmall { required }) => assert_eq!(required, 4 + 4 + 6),
        other => panic!("expected BufferTooSmall, got {other:?}"),
    }
    Ok(())
}

/// A uoffset can only point forward, past its own slot.
#[test]
fn test_context_rejects_backward_offsets() -> flatcode::Result<()> {
    let mut out = [0u8; 16];
    let mut ctx = SerializationContext::new(&mut out, Box::new(NoSharing));
    ctx.allocate(16, 4)?;
    assert!(matches!(
        ctx.patch_uoffset(8, 4),
        Err(FlatcodeError::Internal(_))
    ));
    assert!(matches!(
        ctx.patch_uoffset(8, 8),
        Err(FlatcodeError::Internal(_))
    ));
    ctx.patch_uoffset(0, 12)?;
    assert_eq!(ctx.finish()?, 16);
    assert_eq!(&out[..4], &12u32.to_le_bytes());
    Ok(())
}
