//! Legacy variable set produced by one checkpoint read

use drumscribe_common::DType;
use std::fmt;
use std::path::PathBuf;

/// One named tensor read from a legacy checkpoint. Immutable once read.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyVariable {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
    /// Row-major little-endian payload
    pub data: Vec<u8>,
}

/// Why a single variable could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadErrorReason {
    /// Index entry could not be decoded
    UndecodableEntry(String),
    /// Variable-width, complex or quantized dtype code
    UnsupportedDtype(i32),
    /// Unknown rank or negative dimension
    InvalidShape(String),
    /// Variable was saved as partitioned slices
    Partitioned,
    ShardOutOfRange { shard_id: i32, num_shards: usize },
    /// Byte range outside the shard file
    OutOfBounds { offset: i64, size: i64, shard_len: usize },
    /// Stored size disagrees with shape × dtype
    SizeMismatch { expected: usize, actual: usize },
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl fmt::Display for ReadErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndecodableEntry(e) => write!(f, "undecodable index entry: {e}"),
            Self::UnsupportedDtype(code) => write!(f, "unsupported dtype code {code}"),
            Self::InvalidShape(s) => write!(f, "invalid shape: {s}"),
            Self::Partitioned => f.write_str("partitioned variables are not supported"),
            Self::ShardOutOfRange { shard_id, num_shards } => {
                write!(f, "shard {shard_id} out of range (bundle has {num_shards})")
            }
            Self::OutOfBounds { offset, size, shard_len } => {
                write!(f, "bytes {offset}+{size} outside shard of {shard_len} bytes")
            }
            Self::SizeMismatch { expected, actual } => {
                write!(f, "payload is {actual} bytes, shape needs {expected}")
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "crc32c mismatch (stored {expected:#010x}, computed {actual:#010x})")
            }
        }
    }
}

/// A variable excluded from matching because its entry or payload was unreadable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableReadError {
    pub name: String,
    pub reason: ReadErrorReason,
}

/// Everything read from one checkpoint, in index key order.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    pub prefix: PathBuf,
    pub variables: Vec<LegacyVariable>,
    pub read_errors: Vec<VariableReadError>,
}

impl Checkpoint {
    pub fn get(&self, name: &str) -> Option<&LegacyVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.name.as_str())
    }

    /// Total number of index entries seen, readable or not.
    pub fn entry_count(&self) -> usize {
        self.variables.len() + self.read_errors.len()
    }
}
