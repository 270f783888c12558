//! Deserialization modes and the per-field slot state machine.
//!
//! The mode is chosen once per parse and never changes for the resulting
//! object graph:
//!
//! * [`DeserializationMode::Lazy`]: every access decodes again from the buffer.
//! * [`DeserializationMode::Progressive`]: each field is decoded at most once and
//!   cached; repeated reads return the same `Arc`.
//! * [`DeserializationMode::Greedy`]: the whole graph is materialized at parse
//!   time into an immutable [`Frozen`] value.
//! * [`DeserializationMode::GreedyMutable`]: as `Greedy`, but the value is
//!   handed out mutable.
//!
//! Lazy and progressive views borrow the buffer, so it cannot be mutated or
//! dropped while they are alive. Greedy values own everything they hold.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::{FlatcodeError, Result};

/// How much of a buffer is materialized at parse time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeserializationMode {
    /// Decode on every access.
    Lazy,
    /// Decode on first access, then cache.
    #[default]
    Progressive,
    /// Materialize everything up front; immutable.
    Greedy,
    /// Materialize everything up front; mutable.
    GreedyMutable,
}

impl DeserializationMode {
    /// Returns true for the modes that decode the entire graph at parse time.
    pub fn is_greedy(self) -> bool {
        matches!(self, Self::Greedy | Self::GreedyMutable)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Lazy => "lazy",
            Self::Progressive => "progressive",
            Self::Greedy => "greedy",
            Self::GreedyMutable => "greedy_mutable",
        }
    }
}

impl fmt::Display for DeserializationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeserializationMode {
    type Err = FlatcodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lazy" => Ok(Self::Lazy),
            "progressive" => Ok(Self::Progressive),
            "greedy" => Ok(Self::Greedy),
            "greedy_mutable" | "greedymutable" => Ok(Self::GreedyMutable),
            other => Err(FlatcodeError::Config(format!(
                "unknown deserialization mode '{other}'"
            ))),
        }
    }
}

impl TryFrom<u8> for DeserializationMode {
    type Error = FlatcodeError;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(Self::Lazy),
            1 => Ok(Self::Progressive),
            2 => Ok(Self::Greedy),
            3 => Ok(Self::GreedyMutable),
            other => Err(FlatcodeError::Config(format!(
                "deserialization mode {other} is out of range"
            ))),
        }
    }
}

impl TryFrom<String> for DeserializationMode {
    type Error = FlatcodeError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DeserializationMode> for String {
    fn from(mode: DeserializationMode) -> Self {
        mode.as_str().to_owned()
    }
}

/// An immutable, fully materialized value produced by greedy parsing.
///
/// Dereferences to the inner value; there is no mutable access. Use
/// [`Frozen::thaw`] to take ownership of a mutable copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Frozen<T>(T);

impl<T> Frozen<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(value)
    }

    /// Gives up immutability and returns the inner value.
    pub fn thaw(self) -> T {
        self.0
    }
}

impl<T> Deref for Frozen<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// A lazily decoded field.
///
/// Three states: not yet read (empty cell), cached present value
/// (`Some`), cached absence (`None`). A failed decode leaves the slot unread
/// so the error is reported again on the next access.
#[derive(Debug)]
pub(crate) struct FieldSlot<T> {
    cell: OnceLock<Option<T>>,
}

impl<T> Default for FieldSlot<T> {
    fn default() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }
}

impl<T: Clone> FieldSlot<T> {
    pub(crate) fn get_or_decode(
        &self,
        decode: impl FnOnce() -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        if let Some(cached) = self.cell.get() {
            return Ok(cached.clone());
        }
        let decoded = decode()?;
        // A racing reader may have filled the slot first; its value wins so
        // every caller observes the same instance.
        Ok(self.cell.get_or_init(|| decoded).clone())
    }
}
