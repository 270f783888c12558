#![allow(missing_docs)]

use flatcode::layout::{
    ElementType, FieldLayout, FieldType, Schema, StructField, StructLayout, TableLayout,
};
use flatcode::scalar::{Scalar, ScalarType};
use flatcode::{
    DeserializationMode, FlatInspector, Flatcode, FlatcodeError, ReadOnlyBuffer, StructValue,
    TableValue, Value,
};

fn codec(table: TableLayout) -> flatcode::Result<Flatcode> {
    let name = table.name.clone();
    Flatcode::new(Schema::builder().table(table).build()?, name)
}

fn empty_table_bytes() -> Vec<u8> {
    vec![8, 0, 0, 0, 4, 0, 4, 0, 4, 0, 0, 0]
}

// --- TESTS ---

/// A table with no present fields: root uoffset, a 4-byte vtable, and the
/// table's soffset pointing back at it.
#[test]
fn test_empty_table_layout() -> flatcode::Result<()> {
    let codec = codec(TableLayout::new(
        "Empty",
        vec![FieldLayout::scalar("hp", 0, ScalarType::I16).with_default(Scalar::I16(100))],
    ))?;
    let bytes = codec.serialize_to_vec(&TableValue::new())?;
    assert_eq!(bytes, empty_table_bytes());
    assert_eq!(codec.max_size(&TableValue::new())?, 12);

    // Explicitly setting the default changes nothing.
    let bytes = codec.serialize_to_vec(&TableValue::new().with(0, 100i16))?;
    assert_eq!(bytes, empty_table_bytes());
    Ok(())
}

/// Greedy materialization fills in defaults; writing that value back
/// elides them again and reproduces the original bytes.
#[test]
fn test_empty_table_greedy_round_trip() -> flatcode::Result<()> {
    let codec = codec(TableLayout::new(
        "Empty",
        vec![
            FieldLayout::scalar("hp", 0, ScalarType::I16).with_default(Scalar::I16(100)),
            FieldLayout::scalar("mana", 1, ScalarType::U32),
        ],
    ))?;
    let original = empty_table_bytes();
    let buffer = ReadOnlyBuffer::new(&original);
    let value = codec
        .parse_with_mode(&buffer, DeserializationMode::Greedy)?
        .into_value()?;

    assert_eq!(value.scalar(0), Some(Scalar::I16(100)));
    assert_eq!(value.scalar(1), Some(Scalar::U32(0)));
    assert_eq!(codec.serialize_to_vec(&value)?, original);
    Ok(())
}

/// Exact bytes of a one-field table holding the u16 vector [1, 2, 3].
#[test]
fn test_vector_layout() -> flatcode::Result<()> {
    let codec = codec(TableLayout::new(
        "Holder",
        vec![FieldLayout::vector(
            "values",
            0,
            ElementType::Scalar(ScalarType::U16),
        )],
    ))?;
    let value = TableValue::new().with(0, Value::Vector(vec![1u16.into(), 2u16.into(), 3u16.into()]));
    let bytes = codec.serialize_to_vec(&value)?;

    #[rustfmt::skip]
    let expected: Vec<u8> = vec![
        12, 0, 0, 0,        // root uoffset
        6, 0, 8, 0, 4, 0,   // vtable: len 6, table 8, slot 0 at +4
        0, 0,               // padding
        8, 0, 0, 0,         // soffset back to the vtable
        4, 0, 0, 0,         // uoffset to the vector
        3, 0, 0, 0,         // vector length
        1, 0, 2, 0, 3, 0,   // elements
    ];
    assert_eq!(bytes, expected);

    let buffer = ReadOnlyBuffer::new(&bytes);
    let parsed = codec.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    let values = view.vector(0)?.ok_or(FlatcodeError::Internal("absent".into()))?;
    let read: Vec<Scalar> = values
        .iter()
        .map(|v| v.map(|v| v.as_scalar()))
        .collect::<flatcode::Result<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(read, vec![Scalar::U16(1), Scalar::U16(2), Scalar::U16(3)]);
    assert!(values.get(3)?.is_none());
    Ok(())
}

/// Inline fields are placed widest first, and every scalar lands on a
/// multiple of its own width.
#[test]
fn test_inline_fields_sorted_by_alignment() -> flatcode::Result<()> {
    let codec = codec(TableLayout::new(
        "Mixed",
        vec![
            FieldLayout::scalar("flag", 0, ScalarType::U8),
            FieldLayout::scalar("big", 1, ScalarType::U64),
            FieldLayout::scalar("mid", 2, ScalarType::U16),
        ],
    ))?;
    let value = TableValue::new().with(0, 7u8).with(1, u64::MAX).with(2, 513u16);
    let bytes = codec.serialize_to_vec(&value)?;
    assert_eq!(bytes.len(), 35);

    let report = FlatInspector::inspect(&bytes)?;
    assert_eq!(report.root_offset, 16);
    assert_eq!(report.root.vtable_position, 4);
    assert_eq!(report.root.table_len, 19);
    assert_eq!(report.root.slots, vec![18, 8, 16]);

    let buffer = ReadOnlyBuffer::new(&bytes);
    let parsed = codec.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    assert_eq!(view.scalar(0)?, Scalar::U8(7));
    assert_eq!(view.scalar(1)?, Scalar::U64(u64::MAX));
    assert_eq!(view.scalar(2)?, Scalar::U16(513));
    Ok(())
}

/// A scalar equal to its default is elided unless the field or the handle
/// forces it, and both ways of forcing produce the same bytes.
#[test]
fn test_default_elision_and_forcing() -> flatcode::Result<()> {
    let schema = |force: bool| {
        let mut field = FieldLayout::scalar("level", 0, ScalarType::I32).with_default(Scalar::I32(5));
        if force {
            field = field.force_write();
        }
        Schema::builder().table(TableLayout::new("Stats", vec![field])).build()
    };
    let value = TableValue::new().with(0, 5i32);

    let plain = Flatcode::new(schema(false)?, "Stats")?;
    assert_eq!(plain.serialize_to_vec(&value)?, empty_table_bytes());

    #[rustfmt::skip]
    let forced_bytes: Vec<u8> = vec![
        12, 0, 0, 0,
        6, 0, 8, 0, 4, 0,
        0, 0,
        8, 0, 0, 0,
        5, 0, 0, 0,
    ];
    let per_field = Flatcode::new(schema(true)?, "Stats")?;
    assert_eq!(per_field.serialize_to_vec(&value)?, forced_bytes);

    let global = Flatcode::builder(schema(false)?, "Stats")
        .force_defaults(true)
        .build()?;
    assert_eq!(global.serialize_to_vec(&value)?, forced_bytes);

    // A non-default value is always written.
    let other = plain.serialize_to_vec(&TableValue::new().with(0, 6i32))?;
    assert_eq!(other.len(), 20);
    Ok(())
}

/// Defaults compare by bit pattern, so -0.0 is not elided against 0.0.
#[test]
fn test_float_default_compared_bitwise() -> flatcode::Result<()> {
    let codec = codec(TableLayout::new(
        "Float",
        vec![FieldLayout::scalar("x", 0, ScalarType::F32).with_default(Scalar::F32(0.0))],
    ))?;
    assert_eq!(
        codec.serialize_to_vec(&TableValue::new().with(0, 0.0f32))?,
        empty_table_bytes()
    );
    let negative_zero = codec.serialize_to_vec(&TableValue::new().with(0, -0.0f32))?;
    assert_eq!(negative_zero.len(), 20);

    let buffer = ReadOnlyBuffer::new(&negative_zero);
    let parsed = codec.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    match view.scalar(0)? {
        Scalar::F32(x) => assert!(x.is_sign_negative()),
        other => panic!("unexpected scalar {other:?}"),
    }
    Ok(())
}

/// Tables with identical vtables share one; the report counts both.
#[test]
fn test_vtable_deduplication() -> flatcode::Result<()> {
    let schema = Schema::builder()
        .table(TableLayout::new(
            "Item",
            vec![
                FieldLayout::scalar("a", 0, ScalarType::U64),
                FieldLayout::scalar("b", 1, ScalarType::U64),
            ],
        ))
        .table(TableLayout::new(
            "List",
            vec![FieldLayout::vector("items", 0, ElementType::Table("Item".into()))],
        ))
        .build()?;
    let codec = Flatcode::new(schema, "List")?;

    let uniform: Vec<Value> = (1..=5u64)
        .map(|i| TableValue::new().with(0, i).into())
        .collect();
    let value = TableValue::new().with(0, Value::Vector(uniform));
    let mut out = vec![0; codec.max_size(&value)?];
    let report = codec.serialize_with_report(&value, &mut out)?;
    assert_eq!(report.vtables, 2);
    assert_eq!(report.vtables_reused, 4);

    // Alternating field sets need one vtable each.
    let mixed: Vec<Value> = (1..=4u64)
        .map(|i| {
            let item = if i % 2 == 0 {
                TableValue::new().with(0, i)
            } else {
                TableValue::new().with(1, i)
            };
            item.into()
        })
        .collect();
    let value = TableValue::new().with(0, Value::Vector(mixed));
    let mut out = vec![0; codec.max_size(&value)?];
    let report = codec.serialize_with_report(&value, &mut out)?;
    assert_eq!(report.vtables, 3);
    assert_eq!(report.vtables_reused, 2);
    Ok(())
}

/// A short destination yields the exact size needed, and leaves no
/// partial state that would affect a retry.
#[test]
fn test_buffer_too_small_reports_exact_size() -> flatcode::Result<()> {
    let codec = codec(TableLayout::new(
        "Note",
        vec![
            FieldLayout::string("title", 0),
            FieldLayout::vector("tags", 1, ElementType::String),
            FieldLayout::scalar("id", 2, ScalarType::U64),
        ],
    ))?;
    let value = TableValue::new()
        .with(0, "groceries")
        .with(1, Value::Vector(vec!["milk".into(), "eggs".into()]))
        .with(2, 99u64);
    let expected = codec.serialize_to_vec(&value)?;
    assert!(codec.max_size(&value)? >= expected.len());

    let mut small = [0u8; 4];
    match codec.serialize(&value, &mut small) {
        Err(FlatcodeError::BufferTooSmall { required }) => assert_eq!(required, expected.len()),
        other => panic!("expected BufferTooSmall, got {other:?}"),
    }

    let mut exact = vec![0u8; expected.len()];
    assert_eq!(codec.serialize(&value, &mut exact)?, expected.len());
    assert_eq!(exact, expected);
    Ok(())
}

/// A value that does not match the schema is rejected before a single
/// byte of the destination is touched.
#[test]
fn test_type_mismatch_leaves_destination_untouched() -> flatcode::Result<()> {
    let codec = codec(TableLayout::new(
        "Point",
        vec![
            FieldLayout::scalar("x", 0, ScalarType::U32),
            FieldLayout::string("label", 1),
        ],
    ))?;
    let mut out = vec![0xAA; 64];
    let bad = TableValue::new().with(1, "ok").with(0, "not a number");
    assert!(matches!(
        codec.serialize(&bad, &mut out),
        Err(FlatcodeError::Schema(_))
    ));
    assert!(out.iter().all(|b| *b == 0xAA));

    let wrong_width = TableValue::new().with(0, 1u16);
    assert!(matches!(codec.max_size(&wrong_width), Err(FlatcodeError::Schema(_))));

    let unknown = TableValue::new().with(9, 1u32);
    assert!(matches!(codec.max_size(&unknown), Err(FlatcodeError::Schema(_))));

    // A struct wider than a vtable can address: valid as a struct, but no
    // table can hold it inline.
    let schema = Schema::builder()
        .structure(StructLayout::new(
            "Blob",
            70_000,
            4,
            vec![StructField {
                name: "head".into(),
                offset: 0,
                ty: FieldType::Scalar(ScalarType::U32),
            }],
        ))
        .table(TableLayout::new("Holder", vec![FieldLayout::structure("blob", 0, "Blob")]))
        .build()?;
    let holder = Flatcode::new(schema, "Holder")?;
    let oversize = TableValue::new().with(0, StructValue::new(vec![7u32.into()]));
    assert!(matches!(holder.max_size(&oversize), Err(FlatcodeError::Schema(_))));
    let mut out = vec![0xAA; 70_064];
    assert!(matches!(
        holder.serialize(&oversize, &mut out),
        Err(FlatcodeError::Schema(_))
    ));
    assert!(out.iter().all(|b| *b == 0xAA));
    Ok(())
}

/// The root table's file identifier is written after the root offset and
/// checked at parse time.
#[test]
fn test_file_identifier() -> flatcode::Result<()> {
    let monster = codec(
        TableLayout::new("Monster", vec![FieldLayout::scalar("hp", 0, ScalarType::I16)])
            .with_file_identifier("MONS"),
    )?;
    let bytes = monster.serialize_to_vec(&TableValue::new().with(0, 10i16))?;
    assert_eq!(&bytes[4..8], b"MONS");
    assert_eq!(bytes[0] % 4, 0);

    let buffer = ReadOnlyBuffer::new(&bytes);
    let parsed = monster.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    assert_eq!(view.scalar(0)?, Scalar::I16(10));

    let report = FlatInspector::inspect(&bytes)?;
    assert_eq!(report.file_identifier.as_deref(), Some("MONS"));

    let weapon = codec(
        TableLayout::new("Weapon", vec![FieldLayout::scalar("hp", 0, ScalarType::I16)])
            .with_file_identifier("WEAP"),
    )?;
    assert!(matches!(
        weapon.parse_with_mode(&buffer, DeserializationMode::Lazy),
        Err(FlatcodeError::InvalidData(_))
    ));
    Ok(())
}

/// Malformed roots are rejected at parse entry.
#[test]
fn test_parse_entry_errors() -> flatcode::Result<()> {
    let codec = codec(TableLayout::new(
        "Empty",
        vec![FieldLayout::scalar("x", 0, ScalarType::U8)],
    ))?;
    let invalid = |bytes: &[u8]| {
        let buffer = ReadOnlyBuffer::new(bytes);
        matches!(
            codec.parse_with_mode(&buffer, DeserializationMode::Lazy),
            Err(FlatcodeError::InvalidData(_))
        )
    };

    // Too short to hold a root.
    assert!(invalid(&[8, 0, 0, 0]));
    // Root uoffset below 4.
    assert!(invalid(&[2, 0, 0, 0, 4, 0, 4, 0, 4, 0, 0, 0]));
    // vtable shorter than its own header.
    assert!(invalid(&[8, 0, 0, 0, 2, 0, 4, 0, 4, 0, 0, 0]));
    // Root offset past the end.
    let buffer = ReadOnlyBuffer::new(&[64, 0, 0, 0, 0, 0, 0, 0]);
    assert!(codec.parse_with_mode(&buffer, DeserializationMode::Lazy).is_err());
    Ok(())
}

/// A field marked deprecated is never written and reads as its default,
/// even when an older buffer still carries it.
#[test]
fn test_deprecated_field() -> flatcode::Result<()> {
    let live = codec(TableLayout::new(
        "Legacy",
        vec![FieldLayout::scalar("old", 0, ScalarType::U32)],
    ))?;
    let retired = codec(TableLayout::new(
        "Legacy",
        vec![FieldLayout::scalar("old", 0, ScalarType::U32).deprecated()],
    ))?;

    let old_bytes = live.serialize_to_vec(&TableValue::new().with(0, 99u32))?;
    #[rustfmt::skip]
    let expected: Vec<u8> = vec![
        12, 0, 0, 0,
        6, 0, 8, 0, 4, 0,
        0, 0,
        8, 0, 0, 0,
        99, 0, 0, 0,
    ];
    assert_eq!(old_bytes, expected);

    let buffer = ReadOnlyBuffer::new(&old_bytes);
    let parsed = retired.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    assert_eq!(view.scalar(0)?, Scalar::U32(0));

    let parsed = live.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    assert_eq!(view.scalar(0)?, Scalar::U32(99));

    assert_eq!(
        retired.serialize_to_vec(&TableValue::new().with(0, 99u32))?,
        empty_table_bytes()
    );
    Ok(())
}

/// Required reference fields must be present on write and on read.
#[test]
fn test_required_fields() -> flatcode::Result<()> {
    let optional = codec(TableLayout::new(
        "User",
        vec![
            FieldLayout::string("name", 0),
            FieldLayout::scalar("age", 1, ScalarType::U8),
        ],
    ))?;
    let strict = codec(TableLayout::new(
        "User",
        vec![
            FieldLayout::string("name", 0).required(),
            FieldLayout::scalar("age", 1, ScalarType::U8),
        ],
    ))?;

    let nameless = TableValue::new().with(1, 30u8);
    assert!(matches!(
        strict.serialize_to_vec(&nameless),
        Err(FlatcodeError::Schema(_))
    ));

    let bytes = optional.serialize_to_vec(&nameless)?;
    let buffer = ReadOnlyBuffer::new(&bytes);
    let parsed = strict.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    assert_eq!(view.scalar(1)?, Scalar::U8(30));
    assert!(matches!(view.string(0), Err(FlatcodeError::InvalidData(_))));

    assert!(matches!(
        strict.parse_with_mode(&buffer, DeserializationMode::Greedy),
        Err(FlatcodeError::InvalidData(_))
    ));
    Ok(())
}

/// `max_size` bounds the output for a range of shapes.
#[test]
fn test_max_size_is_an_upper_bound() -> flatcode::Result<()> {
    let schema = Schema::builder()
        .table(TableLayout::new(
            "Leaf",
            vec![
                FieldLayout::scalar("v", 0, ScalarType::F64),
                FieldLayout::string("s", 1),
            ],
        ))
        .table(TableLayout::new(
            "Tree",
            vec![
                FieldLayout::scalar("flag", 0, ScalarType::Bool),
                FieldLayout::table("leaf", 1, "Leaf"),
                FieldLayout::vector("leaves", 2, ElementType::Table("Leaf".into())),
                FieldLayout::vector("raw", 3, ElementType::Scalar(ScalarType::U8)),
                FieldLayout::vector("wide", 4, ElementType::Scalar(ScalarType::I64)),
            ],
        ))
        .build()?;
    let codec = Flatcode::new(schema, "Tree")?;

    let leaf = |i: u8| TableValue::new().with(0, f64::from(i)).with(1, "x".repeat(usize::from(i)));
    let values = vec![
        TableValue::new(),
        TableValue::new().with(0, true),
        TableValue::new().with(1, leaf(3)),
        TableValue::new()
            .with(0, true)
            .with(1, leaf(1))
            .with(2, Value::Vector((0..7).map(|i| leaf(i).into()).collect()))
            .with(3, Value::Vector((0..13u8).map(Value::from).collect()))
            .with(4, Value::Vector(vec![(-1i64).into(), i64::MAX.into()])),
        TableValue::new().with(4, Value::Vector(Vec::new())),
    ];
    for value in &values {
        let bound = codec.max_size(value)?;
        let written = codec.serialize_to_vec(value)?.len();
        assert!(written <= bound, "wrote {written} bytes past bound {bound}");
    }
    Ok(())
}
