#![allow(missing_docs)]

use flatcode::layout::{
    ElementType, FieldLayout, FieldType, Schema, StructLayout, TableLayout, UnionLayout, UnionMember,
};
use flatcode::scalar::{Scalar, ScalarType};
use flatcode::{
    DeserializationMode, FieldValue, Flatcode, FlatcodeError, ReadOnlyBuffer, StructValue,
    TableValue, UnionValue, Value,
};

fn equip_schema() -> flatcode::Result<Schema> {
    let vec2 = StructLayout::packed("Vec2")
        .scalar("x", ScalarType::F32)
        .scalar("y", ScalarType::F32)
        .finish();
    Schema::builder()
        .table(TableLayout::new(
            "Sword",
            vec![FieldLayout::scalar("damage", 0, ScalarType::U16)],
        ))
        .table(TableLayout::new(
            "Shield",
            vec![FieldLayout::scalar("armor", 0, ScalarType::U16)],
        ))
        .structure(vec2)
        .union(UnionLayout::new(
            "Equip",
            vec![
                UnionMember {
                    discriminator: 1,
                    ty: FieldType::Table("Sword".into()),
                },
                UnionMember {
                    discriminator: 2,
                    ty: FieldType::Table("Shield".into()),
                },
                UnionMember {
                    discriminator: 3,
                    ty: FieldType::String,
                },
                UnionMember {
                    discriminator: 4,
                    ty: FieldType::Struct("Vec2".into()),
                },
            ],
        ))
        .table(TableLayout::new(
            "Hero",
            vec![
                FieldLayout::union("equipped", 0, "Equip"),
                FieldLayout::vector("bag", 2, ElementType::Union("Equip".into())),
                FieldLayout::string("name", 4),
                FieldLayout::structure("pos", 5, "Vec2"),
            ],
        ))
        .table(TableLayout::new(
            "Bag",
            vec![FieldLayout::vector("items", 0, ElementType::Union("Equip".into()))],
        ))
        .build()
}

fn vec2(x: f32, y: f32) -> StructValue {
    StructValue::new(vec![x.into(), y.into()])
}

fn sword(damage: u16) -> UnionValue {
    UnionValue::new(1, TableValue::new().with(0, damage))
}

fn read_u32(bytes: &[u8], at: usize) -> usize {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize
}

/// Absolute position of the first slot of the root table's field at `offset`
/// inside the table, and the uoffset target it points to.
fn follow(bytes: &[u8], field_offset: usize) -> (usize, usize) {
    let slot = read_u32(bytes, 0) + field_offset;
    (slot, slot + read_u32(bytes, slot))
}

// --- TESTS ---

/// A union field stores its discriminator inline and its member out of line.
#[test]
fn test_union_field_round_trip() -> flatcode::Result<()> {
    let codec = Flatcode::new(equip_schema()?, "Hero")?;
    let hero = TableValue::new()
        .with(0, UnionValue::new(2, TableValue::new().with(0, 40u16)))
        .with(4, "Ayla")
        .with(5, vec2(1.5, -2.0));
    let bytes = codec.serialize_to_vec(&hero)?;
    let buffer = ReadOnlyBuffer::new(&bytes);

    for mode in [DeserializationMode::Lazy, DeserializationMode::Progressive] {
        let parsed = codec.parse_with_mode(&buffer, mode)?;
        let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
        let (discriminator, member) = view
            .union(0)?
            .ok_or(FlatcodeError::Internal("union absent".into()))?;
        assert_eq!(discriminator, 2);
        let shield = member
            .as_table()
            .ok_or(FlatcodeError::Internal("not a table".into()))?;
        assert_eq!(shield.layout().name, "Shield");
        assert_eq!(shield.scalar(0)?, Scalar::U16(40));

        assert_eq!(view.string(4)?.as_deref(), Some("Ayla"));
        assert_eq!(view.structure(5)?, Some(vec2(1.5, -2.0)));
        assert!(view.vector(2)?.is_none());
    }
    Ok(())
}

/// An absent union reads as `None` and costs nothing.
#[test]
fn test_absent_union() -> flatcode::Result<()> {
    let codec = Flatcode::new(equip_schema()?, "Hero")?;
    let bytes = codec.serialize_to_vec(&TableValue::new().with(4, "Nobody"))?;
    let buffer = ReadOnlyBuffer::new(&bytes);
    let parsed = codec.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    assert!(view.union(0)?.is_none());
    Ok(())
}

/// Every member kind survives a trip through a union vector, and greedy
/// materialization reproduces the value.
#[test]
fn test_union_vector_round_trip() -> flatcode::Result<()> {
    let codec = Flatcode::new(equip_schema()?, "Hero")?;
    let bag = vec![
        Value::from(sword(12)),
        UnionValue::new(3, "relic").into(),
        UnionValue::new(4, vec2(3.0, 4.0)).into(),
        UnionValue::new(2, TableValue::new().with(0, 7u16)).into(),
    ];
    let hero = TableValue::new().with(2, Value::Vector(bag.clone()));
    let bytes = codec.serialize_to_vec(&hero)?;
    let buffer = ReadOnlyBuffer::new(&bytes);

    let parsed = codec.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    let items = view.vector(2)?.ok_or(FlatcodeError::Internal("absent".into()))?;
    assert_eq!(items.len(), 4);

    match items.get(1)? {
        Some(FieldValue::Union {
            discriminator: 3,
            value,
        }) => assert_eq!(value.as_str(), Some("relic")),
        other => panic!("unexpected element {other:?}"),
    }
    match items.get(2)? {
        Some(FieldValue::Union {
            discriminator: 4,
            value,
        }) => match *value {
            FieldValue::Struct(s) => assert_eq!(s, vec2(3.0, 4.0)),
            other => panic!("unexpected member {other:?}"),
        },
        other => panic!("unexpected element {other:?}"),
    }

    // Member tables carry every scalar after greedy materialization, which
    // matches the input because each one was set explicitly.
    let value = codec
        .parse_with_mode(&buffer, DeserializationMode::Greedy)?
        .into_value()?;
    assert_eq!(value.get(2), Some(&Value::Vector(bag)));
    Ok(())
}

/// A union vector whose two halves disagree on length is rejected when
/// the field is read.
#[test]
fn test_union_vector_length_mismatch() -> flatcode::Result<()> {
    let codec = Flatcode::new(equip_schema()?, "Bag")?;
    let value = TableValue::new().with(
        0,
        Value::Vector(vec![
            UnionValue::new(3, "a").into(),
            UnionValue::new(3, "b").into(),
        ]),
    );
    let mut bytes = codec.serialize_to_vec(&value)?;

    // The discriminator vector is the first inline field, right after the soffset.
    let (_, types) = follow(&bytes, 4);
    assert_eq!(read_u32(&bytes, types), 2);
    bytes[types..types + 4].copy_from_slice(&1u32.to_le_bytes());

    let buffer = ReadOnlyBuffer::new(&bytes);
    let parsed = codec.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    assert!(matches!(view.vector(0), Err(FlatcodeError::InvalidData(_))));

    assert!(matches!(
        codec.parse_with_mode(&buffer, DeserializationMode::Greedy),
        Err(FlatcodeError::InvalidData(_))
    ));
    Ok(())
}

/// Discriminators outside the union, and the reserved 0 inside a union
/// vector, are rejected per element.
#[test]
fn test_union_vector_bad_discriminators() -> flatcode::Result<()> {
    let codec = Flatcode::new(equip_schema()?, "Bag")?;
    let value = TableValue::new().with(
        0,
        Value::Vector(vec![
            UnionValue::new(3, "a").into(),
            UnionValue::new(3, "b").into(),
        ]),
    );
    let mut bytes = codec.serialize_to_vec(&value)?;
    let (_, types) = follow(&bytes, 4);
    bytes[types + 4] = 9;
    bytes[types + 5] = 0;

    let buffer = ReadOnlyBuffer::new(&bytes);
    let parsed = codec.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    let items = view.vector(0)?.ok_or(FlatcodeError::Internal("absent".into()))?;
    assert_eq!(items.len(), 2);
    assert!(matches!(items.get(0), Err(FlatcodeError::InvalidData(_))));
    assert!(matches!(items.get(1), Err(FlatcodeError::InvalidData(_))));
    Ok(())
}

/// Only one half of a union vector present in the vtable.
#[test]
fn test_union_vector_half_present() -> flatcode::Result<()> {
    let codec = Flatcode::new(equip_schema()?, "Bag")?;
    let value = TableValue::new().with(0, Value::Vector(vec![sword(1).into()]));
    let mut bytes = codec.serialize_to_vec(&value)?;

    let table = read_u32(&bytes, 0);
    let vtable = table - read_u32(&bytes, table);
    // Clear the values slot (second slot of the field).
    bytes[vtable + 6] = 0;
    bytes[vtable + 7] = 0;

    let buffer = ReadOnlyBuffer::new(&bytes);
    let parsed = codec.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    assert!(matches!(view.vector(0), Err(FlatcodeError::InvalidData(_))));
    Ok(())
}

/// Writing rejects discriminators the union does not declare, and members
/// of the wrong kind.
#[test]
fn test_union_write_errors() -> flatcode::Result<()> {
    let codec = Flatcode::new(equip_schema()?, "Hero")?;
    let unknown = TableValue::new().with(0, UnionValue::new(42, "x"));
    assert!(matches!(
        codec.serialize_to_vec(&unknown),
        Err(FlatcodeError::Schema(_))
    ));
    let wrong_kind = TableValue::new().with(0, UnionValue::new(1, "not a sword"));
    assert!(matches!(
        codec.serialize_to_vec(&wrong_kind),
        Err(FlatcodeError::Schema(_))
    ));
    Ok(())
}

/// Structs nest inside structs and vectors, written inline.
#[test]
fn test_struct_vectors() -> flatcode::Result<()> {
    let vec2 = StructLayout::packed("Vec2")
        .scalar("x", ScalarType::F32)
        .scalar("y", ScalarType::F32)
        .finish();
    let segment = StructLayout::packed("Segment")
        .scalar("id", ScalarType::U8)
        .structure("from", &vec2)
        .structure("to", &vec2)
        .scalar("weight", ScalarType::F64)
        .finish();
    assert_eq!(segment.fields[1].offset, 4);
    assert_eq!(segment.fields[3].offset, 24);
    assert_eq!((segment.size, segment.align), (32, 8));

    let schema = Schema::builder()
        .structure(vec2)
        .structure(segment)
        .table(TableLayout::new(
            "Path",
            vec![FieldLayout::vector("segments", 0, ElementType::Struct("Segment".into()))],
        ))
        .build()?;
    let codec = Flatcode::new(schema, "Path")?;

    let seg = |id: u8| {
        StructValue::new(vec![
            id.into(),
            StructValue::new(vec![0.0f32.into(), f32::from(id).into()]).into(),
            StructValue::new(vec![1.0f32.into(), 2.0f32.into()]).into(),
            f64::from(id).into(),
        ])
    };
    let segments: Vec<Value> = (0..3).map(|i| seg(i).into()).collect();
    let bytes = codec.serialize_to_vec(&TableValue::new().with(0, Value::Vector(segments.clone())))?;

    let buffer = ReadOnlyBuffer::new(&bytes);
    let parsed = codec.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
    let view = parsed.view().ok_or(FlatcodeError::Internal("no view".into()))?;
    let items = view.vector(0)?.ok_or(FlatcodeError::Internal("absent".into()))?;
    assert_eq!(items.to_values()?, segments);
    Ok(())
}
