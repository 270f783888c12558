//! Load-time legality checks for layout descriptors.
//!
//! Each rule is checked against the resolved descriptor; nothing here needs
//! reflection because the schema compiler has already resolved every name.

use std::collections::{HashMap, HashSet};

use super::{
    ElementType, FieldLayout, FieldType, Schema, SchemaDef, StructLayout, TableLayout,
    UnionLayout,
};
use crate::constants::{FILE_IDENTIFIER_LEN, MAX_BUFFER_SIZE, MAX_FIELD_SLOTS};
use crate::error::{FlatcodeError, Result};

pub(super) fn build(mut def: SchemaDef) -> Result<Schema> {
    let mut names = HashSet::new();
    let mut tables = HashMap::new();
    let mut structs = HashMap::new();
    let mut unions = HashMap::new();

    for (i, t) in def.tables.iter().enumerate() {
        claim_name(&mut names, &t.name)?;
        tables.insert(t.name.clone(), i);
    }
    for (i, s) in def.structs.iter().enumerate() {
        claim_name(&mut names, &s.name)?;
        structs.insert(s.name.clone(), i);
    }
    for (i, u) in def.unions.iter().enumerate() {
        claim_name(&mut names, &u.name)?;
        unions.insert(u.name.clone(), i);
    }

    let mut schema = Schema {
        def: SchemaDef::default(),
        tables,
        structs,
        unions,
    };

    for s in &def.structs {
        check_struct(&schema, &def, s)?;
    }
    check_struct_cycles(&def)?;
    for u in &def.unions {
        check_union(&schema, u)?;
    }

    // Key fields must be known before sorted vectors can be checked.
    for t in &mut def.tables {
        index_table(t)?;
    }
    schema.def = def;
    for t in &schema.def.tables {
        for f in &t.fields {
            check_field(&schema, f).map_err(|e| e.context(format!("{}.{}", t.name, f.name)))?;
        }
    }
    Ok(schema)
}

fn claim_name(names: &mut HashSet<String>, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FlatcodeError::schema("type names must not be empty"));
    }
    if !names.insert(name.to_owned()) {
        return Err(FlatcodeError::schema(format!("type '{name}' is declared twice")));
    }
    Ok(())
}

fn index_table(table: &mut TableLayout) -> Result<()> {
    let mut slots: Vec<Option<&str>> = Vec::new();
    let mut by_index: Vec<Option<usize>> = Vec::new();
    let mut key_field = None;
    let mut field_names = HashSet::new();

    if let Some(ident) = &table.file_identifier
        && (ident.len() != FILE_IDENTIFIER_LEN || !ident.is_ascii())
    {
        return Err(FlatcodeError::schema(format!(
            "{}: file identifier must be exactly {FILE_IDENTIFIER_LEN} ASCII bytes",
            table.name
        )));
    }

    for (pos, field) in table.fields.iter().enumerate() {
        if !field_names.insert(field.name.as_str()) {
            return Err(FlatcodeError::schema(format!(
                "{}: field name '{}' is used twice",
                table.name, field.name
            )));
        }
        let first = usize::from(field.index);
        let last = first + usize::from(field.slot_count()) - 1;
        if last >= MAX_FIELD_SLOTS {
            return Err(FlatcodeError::schema(format!(
                "{}.{}: index {} exceeds the vtable capacity",
                table.name, field.name, field.index
            )));
        }
        if slots.len() <= last {
            slots.resize(last + 1, None);
        }
        for slot in first..=last {
            if let Some(other) = slots[slot] {
                return Err(FlatcodeError::schema(format!(
                    "{}: duplicate field index {slot} used by '{other}' and '{}'",
                    table.name, field.name
                )));
            }
            slots[slot] = Some(field.name.as_str());
        }
        if by_index.len() <= first {
            by_index.resize(first + 1, None);
        }
        by_index[first] = Some(pos);

        if field.key {
            if key_field.is_some() {
                return Err(FlatcodeError::schema(format!(
                    "{}: more than one key field",
                    table.name
                )));
            }
            key_field = Some(pos);
        }
    }

    table.by_index = by_index;
    table.key_field = key_field;
    Ok(())
}

fn check_field(schema: &Schema, f: &FieldLayout) -> Result<()> {
    match &f.ty {
        FieldType::Scalar(_) => {}
        FieldType::String => {}
        FieldType::Struct(name) => {
            schema.structure(name)?;
        }
        FieldType::Table(name) => {
            schema.table(name)?;
        }
        FieldType::Union(name) => {
            schema.union(name)?;
        }
        FieldType::Vector(element) => check_element(schema, element)?,
    }

    if let Some(default) = f.default {
        match f.ty {
            FieldType::Scalar(ty) if default.scalar_type() == ty => {}
            FieldType::Scalar(ty) => {
                return Err(FlatcodeError::schema(format!(
                    "default of type {} does not match field type {ty}",
                    default.scalar_type()
                )));
            }
            _ => return Err(FlatcodeError::schema("only scalar fields may declare a default")),
        }
    }
    if f.deprecated && f.required {
        return Err(FlatcodeError::schema("a field cannot be both deprecated and required"));
    }
    if f.required && !f.ty.is_reference() && !matches!(f.ty, FieldType::Struct(_)) {
        return Err(FlatcodeError::schema("scalar fields cannot be required"));
    }
    if f.force_write && !matches!(f.ty, FieldType::Scalar(_)) {
        return Err(FlatcodeError::schema("force-write applies to scalar fields only"));
    }
    if f.key {
        if f.deprecated {
            return Err(FlatcodeError::schema("a key field cannot be deprecated"));
        }
        match &f.ty {
            FieldType::Scalar(ty) if ty.is_orderable() => {}
            FieldType::String => {}
            _ => {
                return Err(FlatcodeError::schema(
                    "key fields must be a non-bool scalar or a string",
                ));
            }
        }
    }
    if f.shared_string
        && !matches!(f.ty, FieldType::String | FieldType::Vector(ElementType::String))
    {
        return Err(FlatcodeError::schema(
            "shared strings apply to string or string-vector fields only",
        ));
    }
    if f.sorted {
        let FieldType::Vector(ElementType::Table(name)) = &f.ty else {
            return Err(FlatcodeError::schema("only vectors of tables can be sorted"));
        };
        if schema.table(name)?.key_field().is_none() {
            return Err(FlatcodeError::schema(format!(
                "sorted vector of '{name}' requires a key field on '{name}'"
            )));
        }
    }
    Ok(())
}

fn check_element(schema: &Schema, element: &ElementType) -> Result<()> {
    match element {
        ElementType::Scalar(_) | ElementType::String => Ok(()),
        ElementType::Struct(name) => schema.structure(name).map(|_| ()),
        ElementType::Table(name) => schema.table(name).map(|_| ()),
        ElementType::Union(name) => schema.union(name).map(|_| ()),
    }
}

fn check_struct(schema: &Schema, def: &SchemaDef, s: &StructLayout) -> Result<()> {
    let fail = |msg: String| Err(FlatcodeError::schema(format!("struct {}: {msg}", s.name)));

    if s.fields.is_empty() {
        return fail("structs must have at least one field".into());
    }
    if !s.align.is_power_of_two() {
        return fail(format!("alignment {} is not a power of two", s.align));
    }
    if s.size == 0 || s.size % s.align != 0 {
        return fail(format!("size {} is not a multiple of alignment {}", s.size, s.align));
    }
    if s.size > MAX_BUFFER_SIZE {
        return fail(format!("size {} exceeds the {MAX_BUFFER_SIZE}-byte buffer limit", s.size));
    }

    let mut names = HashSet::new();
    let mut cursor = 0usize;
    for field in &s.fields {
        if !names.insert(field.name.as_str()) {
            return fail(format!("member '{}' is declared twice", field.name));
        }
        let (size, align) = match &field.ty {
            FieldType::Scalar(ty) => (ty.size(), ty.align()),
            FieldType::Struct(name) => {
                let nested_idx = schema
                    .structs
                    .get(name)
                    .copied()
                    .ok_or_else(|| FlatcodeError::schema(format!("unknown struct '{name}'")))?;
                let nested = &def.structs[nested_idx];
                (nested.size, nested.align)
            }
            other => {
                return fail(format!(
                    "member '{}' has type {other:?}; only scalars and structs may live inside a struct",
                    field.name
                ));
            }
        };
        if align > s.align {
            return fail(format!(
                "member '{}' needs alignment {align}, struct declares {}",
                field.name, s.align
            ));
        }
        if field.offset % align != 0 {
            return fail(format!(
                "member '{}' at offset {} is misaligned for alignment {align}",
                field.name, field.offset
            ));
        }
        if field.offset < cursor {
            return fail(format!(
                "member '{}' at offset {} overlaps or is out of order",
                field.name, field.offset
            ));
        }
        cursor = match field.offset.checked_add(size) {
            Some(end) => end,
            None => return fail(format!("member '{}' offset {} overflows", field.name, field.offset)),
        };
        if cursor > s.size {
            return fail(format!(
                "member '{}' ends at {cursor}, past the struct size {}",
                field.name, s.size
            ));
        }
    }
    Ok(())
}

fn check_struct_cycles(def: &SchemaDef) -> Result<()> {
    let by_name: HashMap<&str, &StructLayout> =
        def.structs.iter().map(|s| (s.name.as_str(), s)).collect();

    for start in &def.structs {
        let mut stack: Vec<&str> = vec![start.name.as_str()];
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(name) = stack.pop() {
            let Some(layout) = by_name.get(name) else {
                continue;
            };
            for field in &layout.fields {
                if let FieldType::Struct(nested) = &field.ty {
                    if nested == &start.name {
                        return Err(FlatcodeError::schema(format!(
                            "struct {} contains itself",
                            start.name
                        )));
                    }
                    if seen.insert(nested.as_str()) {
                        stack.push(nested.as_str());
                    }
                }
            }
        }
    }
    Ok(())
}

fn check_union(schema: &Schema, u: &UnionLayout) -> Result<()> {
    if u.members.is_empty() {
        return Err(FlatcodeError::schema(format!("union {} has no members", u.name)));
    }
    let mut seen = HashSet::new();
    for member in &u.members {
        if member.discriminator == 0 {
            return Err(FlatcodeError::schema(format!(
                "union {}: discriminator 0 is reserved for NONE",
                u.name
            )));
        }
        if !seen.insert(member.discriminator) {
            return Err(FlatcodeError::schema(format!(
                "union {}: discriminator {} is used twice",
                u.name, member.discriminator
            )));
        }
        match &member.ty {
            FieldType::Table(name) => {
                if !schema.tables.contains_key(name) {
                    return Err(FlatcodeError::schema(format!("unknown table '{name}'")));
                }
            }
            FieldType::Struct(name) => {
                if !schema.structs.contains_key(name) {
                    return Err(FlatcodeError::schema(format!("unknown struct '{name}'")));
                }
            }
            FieldType::String => {}
            other => {
                return Err(FlatcodeError::schema(format!(
                    "union {}: member type {other:?} must be a table, struct or string",
                    u.name
                )));
            }
        }
    }
    Ok(())
}
