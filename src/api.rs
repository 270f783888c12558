//! Entry points: serialize, size, parse, save and open.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::buffer::{Buffer, MmapBuffer};
use crate::constants::{
    DEFAULT_MAX_DEPTH, DEFAULT_READ_CACHE_SIZE, FILE_IDENTIFIER_LEN, MAX_BUFFER_SIZE,
    MIN_BUFFER_SIZE, UOFFSET_SIZE,
};
use crate::context::SerializationContext;
use crate::error::{FlatcodeError, Result};
use crate::format::read_uoffset;
use crate::layout::{Schema, TableLayout};
use crate::mode::{DeserializationMode, Frozen};
use crate::reader::{Parsed, ReadContext, TableView};
use crate::shared_strings::SharedStringPolicy;
use crate::value::TableValue;
use crate::writer::Writer;

/// Tunables for one [`Flatcode`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatcodeOptions {
    /// Mode used by [`Flatcode::parse`].
    pub mode: DeserializationMode,
    /// Write-side deduplication of shared-string fields.
    pub shared_strings: SharedStringPolicy,
    /// Buckets in the read-side shared-string cache; 0 disables it.
    pub read_cache_size: usize,
    /// Write every scalar, even when it equals its default.
    pub force_defaults: bool,
    /// Nesting budget when materializing greedily.
    pub max_depth: usize,
}

impl Default for FlatcodeOptions {
    fn default() -> Self {
        Self {
            mode: DeserializationMode::default(),
            shared_strings: SharedStringPolicy::default(),
            read_cache_size: DEFAULT_READ_CACHE_SIZE,
            force_defaults: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Counters describing one serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct WriteReport {
    /// Bytes written.
    pub bytes: usize,
    /// Distinct vtables emitted.
    pub vtables: usize,
    /// Tables that pointed at an earlier, identical vtable.
    pub vtables_reused: usize,
    /// String payloads written.
    pub strings: usize,
}

/// A schema bound to its root table, plus options.
///
/// Cheap to clone; the schema is shared.
///
/// ```rust
/// use flatcode::{DeserializationMode, Flatcode, ReadOnlyBuffer, TableValue};
/// use flatcode::layout::{FieldLayout, Schema, TableLayout};
/// use flatcode::scalar::ScalarType;
///
/// let schema = Schema::builder()
///     .table(TableLayout::new("Point", vec![
///         FieldLayout::scalar("x", 0, ScalarType::I32),
///         FieldLayout::string("label", 1),
///     ]))
///     .build()?;
/// let codec = Flatcode::new(schema, "Point")?;
///
/// let bytes = codec.serialize_to_vec(&TableValue::new().with(0, 7i32).with(1, "origin"))?;
/// let buffer = ReadOnlyBuffer::new(&bytes);
/// let parsed = codec.parse_with_mode(&buffer, DeserializationMode::Lazy)?;
/// let view = parsed.view().ok_or(flatcode::FlatcodeError::Internal("no view".into()))?;
/// assert_eq!(view.scalar(0)?.as_i128(), Some(7));
/// assert_eq!(view.string(1)?.as_deref(), Some("origin"));
/// # Ok::<(), flatcode::FlatcodeError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Flatcode {
    schema: Arc<Schema>,
    root: String,
    options: FlatcodeOptions,
}

impl Flatcode {
    /// Binds `schema` to its root table `root`, with default options.
    pub fn new(schema: impl Into<Arc<Schema>>, root: impl Into<String>) -> Result<Self> {
        Self::builder(schema, root).build()
    }

    /// Starts configuring a handle.
    pub fn builder(schema: impl Into<Arc<Schema>>, root: impl Into<String>) -> FlatcodeBuilder {
        FlatcodeBuilder {
            schema: schema.into(),
            root: root.into(),
            options: FlatcodeOptions::default(),
        }
    }

    /// The schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The options.
    pub fn options(&self) -> &FlatcodeOptions {
        &self.options
    }

    /// The root table layout.
    pub fn root_layout(&self) -> Result<&TableLayout> {
        self.schema.table(&self.root)
    }

    /// An upper bound of the serialized size of `value`. Exact for a root
    /// table without payloads.
    ///
    /// Also validates `value` against the schema, including the 65535-byte
    /// inline limit of every table; a value this accepts will not fail to
    /// serialize for type or layout reasons.
    pub fn max_size(&self, value: &TableValue) -> Result<usize> {
        Writer::new(&self.schema, self.options.force_defaults).max_size(self.root_layout()?, value)
    }

    /// Serializes `value` into `out` and returns the number of bytes written.
    ///
    /// # Errors
    /// * [`FlatcodeError::Schema`] if `value` does not match the schema;
    ///   nothing is written in that case.
    /// * [`FlatcodeError::BufferTooSmall`] with the exact size needed.
    pub fn serialize(&self, value: &TableValue, out: &mut [u8]) -> Result<usize> {
        self.serialize_with_report(value, out).map(|r| r.bytes)
    }

    /// Serializes into a writable [`Buffer`].
    pub fn serialize_into<B: Buffer>(&self, value: &TableValue, buffer: &mut B) -> Result<usize> {
        self.serialize(value, buffer.as_mut_slice()?)
    }

    /// Serializes into a freshly allocated, exactly sized vector.
    pub fn serialize_to_vec(&self, value: &TableValue) -> Result<Vec<u8>> {
        let mut out = vec![0; self.max_size(value)?];
        let written = self.serialize(value, &mut out)?;
        out.truncate(written);
        Ok(out)
    }

    /// Serializes `value` into `out` and reports layout counters.
    pub fn serialize_with_report(&self, value: &TableValue, out: &mut [u8]) -> Result<WriteReport> {
        let root = self.root_layout()?;
        let writer = Writer::new(&self.schema, self.options.force_defaults);
        let bound = writer.max_size(root, value)?;
        tracing::debug!(
            table = %root.name,
            fields = value.len(),
            bound,
            capacity = out.len(),
            "serializing"
        );

        let mut ctx = SerializationContext::new(out, self.options.shared_strings.writer()?);
        writer.write(root, value, &mut ctx)?;
        ctx.flush()?;
        let vtables = ctx.distinct_vtables();
        let vtables_reused = ctx.reused_vtables();
        let strings = ctx.strings_written();
        let bytes = ctx.finish()?;
        let report = WriteReport {
            bytes,
            vtables,
            vtables_reused,
            strings,
        };
        tracing::debug!(bytes, vtables, vtables_reused, strings, "serialized");
        Ok(report)
    }

    /// Parses `buffer` with the configured mode.
    pub fn parse<'a, B: Buffer>(&'a self, buffer: &'a B) -> Result<Parsed<'a, B>> {
        self.parse_with_mode(buffer, self.options.mode)
    }

    /// Parses `buffer` with an explicit mode.
    ///
    /// # Errors
    /// [`FlatcodeError::InvalidData`] if the buffer is too small or too large
    /// to hold a root, if its file identifier does not match, or if the root
    /// table is malformed. Greedy modes also report any malformed field.
    pub fn parse_with_mode<'a, B: Buffer>(
        &'a self,
        buffer: &'a B,
        mode: DeserializationMode,
    ) -> Result<Parsed<'a, B>> {
        let root = self.root_layout()?;
        let len = buffer.len();
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&len) {
            return Err(FlatcodeError::invalid(format!(
                "buffer of {len} bytes is outside the valid root range {MIN_BUFFER_SIZE}..={MAX_BUFFER_SIZE}"
            )));
        }
        if let Some(expected) = root.identifier_bytes() {
            let found = buffer.read_bytes(UOFFSET_SIZE, FILE_IDENTIFIER_LEN)?;
            if found != expected {
                return Err(FlatcodeError::invalid(format!(
                    "file identifier {:?} does not match '{}'",
                    String::from_utf8_lossy(found),
                    String::from_utf8_lossy(&expected)
                )));
            }
        }
        let root_pos = read_uoffset(buffer, 0)?;
        tracing::debug!(table = %root.name, len, root_pos, %mode, "parsing");

        let ctx = Arc::new(ReadContext::new(
            buffer,
            &self.schema,
            mode,
            self.options.read_cache_size,
            self.options.max_depth,
        ));
        let view = TableView::open(ctx, root, root_pos)?;
        Ok(match mode {
            DeserializationMode::Lazy => Parsed::Lazy(view),
            DeserializationMode::Progressive => Parsed::Progressive(view),
            DeserializationMode::Greedy => Parsed::Greedy(Frozen::new(view.to_value()?)),
            DeserializationMode::GreedyMutable => Parsed::GreedyMutable(view.to_value()?),
        })
    }

    /// Serializes `value` to the file at `path`, truncating it.
    pub fn save<P: AsRef<Path>>(&self, path: P, value: &TableValue) -> Result<()> {
        let bytes = self.serialize_to_vec(value)?;
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        writer.write_all(&bytes)?;
        writer.flush()?;
        tracing::debug!(path = %path.as_ref().display(), bytes = bytes.len(), "saved");
        Ok(())
    }

    /// Memory-maps a file written by [`Flatcode::save`], ready to parse.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<MmapBuffer> {
        MmapBuffer::open(path)
    }
}

/// Fluent configuration of a [`Flatcode`] handle.
#[derive(Debug, Clone)]
pub struct FlatcodeBuilder {
    schema: Arc<Schema>,
    root: String,
    options: FlatcodeOptions,
}

impl FlatcodeBuilder {
    /// Default parse mode.
    pub fn mode(mut self, mode: DeserializationMode) -> Self {
        self.options.mode = mode;
        self
    }

    /// Write-side shared-string policy.
    pub fn shared_strings(mut self, policy: SharedStringPolicy) -> Self {
        self.options.shared_strings = policy;
        self
    }

    /// Read-side shared-string cache size; 0 disables it.
    pub fn read_cache_size(mut self, buckets: usize) -> Self {
        self.options.read_cache_size = buckets;
        self
    }

    /// Write scalars even when they equal their default.
    pub fn force_defaults(mut self, force: bool) -> Self {
        self.options.force_defaults = force;
        self
    }

    /// Nesting budget for greedy materialization.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.options.max_depth = depth;
        self
    }

    /// Replaces every option at once.
    pub fn options(mut self, options: FlatcodeOptions) -> Self {
        self.options = options;
        self
    }

    /// Checks the root table and options.
    pub fn build(self) -> Result<Flatcode> {
        self.schema.table(&self.root)?;
        if self.options.max_depth == 0 {
            return Err(FlatcodeError::Config("max_depth must be at least 1".into()));
        }
        // Surface an unusable cache policy now rather than on first write.
        self.options.shared_strings.writer()?;
        Ok(Flatcode {
            schema: self.schema,
            root: self.root,
            options: self.options,
        })
    }
}
