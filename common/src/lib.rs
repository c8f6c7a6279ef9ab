//! Shared building blocks for submitting and tracking MapReduce jobs.
//!
//! Applications are packaged as named classes (drivers, mappers, reducers,
//! input and output formats) that a [`class::ClassLoader`] hands out by name.
//! Job data and shared runtime environments live on a distributed filesystem,
//! either a local directory tree or an S3-compatible object store.

use std::fmt;
use std::fmt::Formatter;
use std::hash::Hasher;

use bytes::Bytes;

pub mod class;
pub mod fs;
pub mod minio;
pub mod process;
pub mod utils;

/////////////////////////////////////////////////////////////////////////////
// Application function signatures
/////////////////////////////////////////////////////////////////////////////

/// What a mapper returns for one input record.
///
/// Building the iterator may fail (outer result) and so may producing any
/// single record (inner result), which lets mappers emit eagerly or lazily.
pub type MapOutput = anyhow::Result<Box<dyn Iterator<Item = anyhow::Result<KeyValue>>>>;

/// Mapper entry point: one input record plus the job's auxiliary bytes.
pub type MapFn = fn(kv: KeyValue, aux: Bytes) -> MapOutput;

/// Reducer entry point: folds every value of one key into a single value.
///
/// Combiners run with the same signature on map-side partial groups.
pub type ReduceFn = fn(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    aux: Bytes,
) -> anyhow::Result<Bytes>;

/////////////////////////////////////////////////////////////////////////////
// Records
/////////////////////////////////////////////////////////////////////////////

/// One record flowing between input formats, mappers and reducers.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            String::from_utf8_lossy(&self.key),
            String::from_utf8_lossy(&self.value)
        )
    }
}

impl KeyValue {
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    /// Shared copy of the key.
    #[inline]
    pub fn key(&self) -> Bytes {
        self.key.clone()
    }

    #[inline]
    pub fn into_key(self) -> Bytes {
        self.key
    }

    #[inline]
    pub fn into_value(self) -> Bytes {
        self.value
    }
}

/// Partitioning hash of an intermediate key; a record goes to reduce task
/// `ihash(key) % num_reduce_tasks`.
pub fn ihash(key: &[u8]) -> u32 {
    let mut hasher = fnv::FnvHasher::with_key(0);
    hasher.write(key);
    // 31 bits, so the cast is lossless.
    (hasher.finish() & 0x7fffffff) as u32
}
