//! Plain in-memory values.
//!
//! [`Value`] trees are the input of serialization and the output of the
//! greedy deserialization modes. They hold no reference to any buffer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::scalar::Scalar;

/// Any value a field, vector element or union member can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// A scalar.
    Scalar(Scalar),
    /// A UTF-8 string.
    String(Arc<str>),
    /// A fixed-layout struct.
    Struct(StructValue),
    /// A table.
    Table(TableValue),
    /// A tagged union member.
    Union(UnionValue),
    /// A vector of elements of one type.
    Vector(Vec<Value>),
}

impl Value {
    /// The scalar held, if any.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Self::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    /// The string held, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The table held, if any.
    pub fn as_table(&self) -> Option<&TableValue> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }

    /// The elements held, if any.
    pub fn as_vector(&self) -> Option<&[Value]> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// A short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::String(_) => "string",
            Self::Struct(_) => "struct",
            Self::Table(_) => "table",
            Self::Union(_) => "union",
            Self::Vector(_) => "vector",
        }
    }
}

macro_rules! impl_value_from_scalar {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::Scalar(Scalar::from(v))
                }
            }
        )*
    };
}

impl_value_from_scalar!(bool, u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl From<Scalar> for Value {
    fn from(v: Scalar) -> Self {
        Self::Scalar(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(Arc::from(v))
    }
}

impl From<Arc<str>> for Value {
    fn from(v: Arc<str>) -> Self {
        Self::String(v)
    }
}

impl From<TableValue> for Value {
    fn from(v: TableValue) -> Self {
        Self::Table(v)
    }
}

impl From<StructValue> for Value {
    fn from(v: StructValue) -> Self {
        Self::Struct(v)
    }
}

impl From<UnionValue> for Value {
    fn from(v: UnionValue) -> Self {
        Self::Union(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Vector(v)
    }
}

/// A table value: fields keyed by their logical index.
///
/// Absent fields are simply missing from the map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableValue {
    fields: BTreeMap<u16, Value>,
}

impl TableValue {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, index: u16, value: impl Into<Value>) -> Self {
        self.fields.insert(index, value.into());
        self
    }

    /// Sets field `index`, returning the previous value.
    pub fn set(&mut self, index: u16, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(index, value.into())
    }

    /// Clears field `index`, returning the previous value.
    pub fn remove(&mut self, index: u16) -> Option<Value> {
        self.fields.remove(&index)
    }

    /// Field `index`.
    pub fn get(&self, index: u16) -> Option<&Value> {
        self.fields.get(&index)
    }

    /// Mutable access to field `index`.
    pub fn get_mut(&mut self, index: u16) -> Option<&mut Value> {
        self.fields.get_mut(&index)
    }

    /// The scalar in field `index`.
    pub fn scalar(&self, index: u16) -> Option<Scalar> {
        self.get(index).and_then(Value::as_scalar)
    }

    /// The string in field `index`.
    pub fn string(&self, index: u16) -> Option<&str> {
        self.get(index).and_then(Value::as_str)
    }

    /// Present fields in index order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &Value)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    /// Number of present fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no field is present.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A struct value: members in layout order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructValue {
    fields: Vec<Value>,
}

impl StructValue {
    /// A struct with the given members, in layout order.
    pub fn new(fields: Vec<Value>) -> Self {
        Self { fields }
    }

    /// Member `i`.
    pub fn get(&self, i: usize) -> Option<&Value> {
        self.fields.get(i)
    }

    /// All members.
    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    /// Mutable access to member `i`.
    pub fn get_mut(&mut self, i: usize) -> Option<&mut Value> {
        self.fields.get_mut(i)
    }
}

/// A union member tagged with its discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnionValue {
    /// Non-zero discriminator selecting the member type.
    pub discriminator: u8,
    /// The member value.
    pub value: Box<Value>,
}

impl UnionValue {
    /// Tags `value` with `discriminator`.
    pub fn new(discriminator: u8, value: impl Into<Value>) -> Self {
        Self {
            discriminator,
            value: Box::new(value.into()),
        }
    }
}
