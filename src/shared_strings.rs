//! String deduplication caches.
//!
//! ## Write side
//!
//! A [`SharedStringWriter`] intercepts every shared-string field while a
//! buffer is being written. Instead of encoding the string immediately, the
//! writer remembers the uoffset slot that must point at it. When an entry
//! leaves the cache (eviction, or the final flush) the string is written
//! once and every remembered slot is patched to that single copy.
//!
//! | Policy         | Lookup                         | Eviction                       |
//! |----------------|--------------------------------|--------------------------------|
//! | `None`         | none; every string is fresh    | immediate                      |
//! | `DirectMapped` | `xxhash(s) % capacity` bucket  | any collision evicts occupant  |
//! | `Lru`          | hash map                       | least recently used when full  |
//!
//! Direct-mapped buckets never chain. A collision always evicts, so two
//! alternating colliding strings are each written more than once.
//!
//! ## Read side
//!
//! [`SharedStringReadCache`] memoizes decoded strings by absolute buffer
//! offset in a direct-mapped array behind one coarse lock.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hasher;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use twox_hash::XxHash64;

use crate::constants::DEFAULT_SHARED_STRING_CAPACITY;
use crate::error::{FlatcodeError, Result};

/// Which write-side cache to use for shared-string fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SharedStringPolicy {
    /// No sharing; every occurrence is written.
    None,
    /// Fixed bucket array, evict on collision.
    DirectMapped {
        /// Number of buckets.
        capacity: usize,
    },
    /// True least-recently-used cache.
    Lru {
        /// Maximum number of cached strings.
        capacity: usize,
    },
}

impl Default for SharedStringPolicy {
    fn default() -> Self {
        Self::DirectMapped {
            capacity: DEFAULT_SHARED_STRING_CAPACITY,
        }
    }
}

impl SharedStringPolicy {
    /// Instantiates a fresh writer for one serialization pass.
    pub fn writer(self) -> Result<Box<dyn SharedStringWriter>> {
        match self {
            Self::None => Ok(Box::new(NoSharing)),
            Self::DirectMapped { capacity } => {
                Ok(Box::new(DirectMappedWriter::new(check_capacity(capacity)?)))
            }
            Self::Lru { capacity } => Ok(Box::new(LruWriter::new(check_capacity(capacity)?))),
        }
    }
}

fn check_capacity(capacity: usize) -> Result<usize> {
    if capacity == 0 {
        return Err(FlatcodeError::Config(
            "shared-string cache capacity must be at least 1".into(),
        ));
    }
    Ok(capacity)
}

/// Parses `none`, `direct_mapped[:N]` or `lru[:N]`.
impl FromStr for SharedStringPolicy {
    type Err = FlatcodeError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, capacity) = match s.split_once(':') {
            Some((kind, n)) => {
                let n = n.trim().parse::<usize>().map_err(|_| {
                    FlatcodeError::Config(format!("invalid shared-string capacity '{n}'"))
                })?;
                (kind, n)
            }
            None => (s, DEFAULT_SHARED_STRING_CAPACITY),
        };
        match kind.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "direct_mapped" | "directmapped" => Ok(Self::DirectMapped {
                capacity: check_capacity(capacity)?,
            }),
            "lru" => Ok(Self::Lru {
                capacity: check_capacity(capacity)?,
            }),
            other => Err(FlatcodeError::Config(format!(
                "unknown shared-string policy '{other}'"
            ))),
        }
    }
}

/// A string that must now be written, and the uoffset slots to patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingString {
    /// The string value.
    pub value: Arc<str>,
    /// Absolute positions of uoffsets that must point at it.
    pub slots: Vec<usize>,
}

/// Write-side string deduplication policy.
pub trait SharedStringWriter: Send + fmt::Debug {
    /// Records that the uoffset at `slot` must point at `value`.
    ///
    /// Returns an entry that left the cache and must be written now.
    fn defer(&mut self, value: &Arc<str>, slot: usize) -> Option<PendingString>;

    /// Removes and returns every entry still cached, for the final flush.
    fn drain(&mut self) -> Vec<PendingString>;
}

/// The baseline: nothing is shared.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSharing;

impl SharedStringWriter for NoSharing {
    fn defer(&mut self, value: &Arc<str>, slot: usize) -> Option<PendingString> {
        Some(PendingString {
            value: Arc::clone(value),
            slots: vec![slot],
        })
    }

    fn drain(&mut self) -> Vec<PendingString> {
        Vec::new()
    }
}

pub(crate) fn hash_str(value: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(value.as_bytes());
    hasher.finish()
}

/// Pseudo-LRU: one entry per `hash % capacity` bucket.
#[derive(Debug)]
pub struct DirectMappedWriter {
    buckets: Vec<Option<PendingString>>,
}

impl DirectMappedWriter {
    /// A cache with `capacity` buckets.
    pub fn new(capacity: usize) -> Self {
        Self {
            buckets: vec![None; capacity.max(1)],
        }
    }
}

impl SharedStringWriter for DirectMappedWriter {
    fn defer(&mut self, value: &Arc<str>, slot: usize) -> Option<PendingString> {
        let idx = (hash_str(value) % self.buckets.len() as u64) as usize;
        let bucket = &mut self.buckets[idx];
        if let Some(entry) = bucket
            && *entry.value == **value
        {
            entry.slots.push(slot);
            return None;
        }
        bucket.replace(PendingString {
            value: Arc::clone(value),
            slots: vec![slot],
        })
    }

    fn drain(&mut self) -> Vec<PendingString> {
        self.buckets.iter_mut().filter_map(Option::take).collect()
    }
}

#[derive(Debug)]
struct LruEntry {
    slots: Vec<usize>,
    tick: u64,
}

/// True LRU capped at `capacity` strings.
#[derive(Debug)]
pub struct LruWriter {
    capacity: usize,
    entries: HashMap<Arc<str>, LruEntry>,
    recency: BTreeMap<u64, Arc<str>>,
    tick: u64,
}

impl LruWriter {
    /// A cache holding at most `capacity` strings.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
        }
    }

    fn evict_oldest(&mut self) -> Option<PendingString> {
        let (_, value) = self.recency.pop_first()?;
        let entry = self.entries.remove(&value)?;
        tracing::trace!(len = value.len(), slots = entry.slots.len(), "lru shared string evicted");
        Some(PendingString {
            value,
            slots: entry.slots,
        })
    }
}

impl SharedStringWriter for LruWriter {
    fn defer(&mut self, value: &Arc<str>, slot: usize) -> Option<PendingString> {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(value) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            entry.slots.push(slot);
            self.recency.insert(tick, Arc::clone(value));
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };
        self.entries.insert(
            Arc::clone(value),
            LruEntry {
                slots: vec![slot],
                tick,
            },
        );
        self.recency.insert(tick, Arc::clone(value));
        evicted
    }

    fn drain(&mut self) -> Vec<PendingString> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(pending) = self.evict_oldest() {
            out.push(pending);
        }
        out
    }
}

/// Direct-mapped memo of decoded strings keyed by absolute buffer offset.
///
/// Safe to share between threads; one lock guards the whole bucket array.
#[derive(Debug)]
pub struct SharedStringReadCache {
    buckets: Mutex<Vec<Option<(usize, Arc<str>)>>>,
    size: usize,
}

impl SharedStringReadCache {
    /// A cache with `size` buckets.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            buckets: Mutex::new(vec![None; size]),
            size,
        }
    }

    fn bucket(&self, offset: usize) -> usize {
        (offset >> 2) % self.size
    }

    /// Returns the cached string at `offset`, decoding and caching it on a miss.
    ///
    /// The lock is not held while decoding.
    pub fn get_or_decode(
        &self,
        offset: usize,
        decode: impl FnOnce() -> Result<Arc<str>>,
    ) -> Result<Arc<str>> {
        let idx = self.bucket(offset);
        {
            let guard = self.buckets.lock().map_err(|_| {
                FlatcodeError::Internal("SharedStringReadCache Mutex poisoned".into())
            })?;
            if let Some((cached_at, value)) = &guard[idx]
                && *cached_at == offset
            {
                return Ok(Arc::clone(value));
            }
        }

        let value = decode()?;
        let mut guard = self
            .buckets
            .lock()
            .map_err(|_| FlatcodeError::Internal("SharedStringReadCache Mutex poisoned".into()))?;
        match &guard[idx] {
            // Another reader decoded the same offset meanwhile; share its instance.
            Some((cached_at, existing)) if *cached_at == offset => Ok(Arc::clone(existing)),
            _ => {
                guard[idx] = Some((offset, Arc::clone(&value)));
                Ok(value)
            }
        }
    }
}
