//! Protocol buffer messages stored in a bundle index.
//!
//! Only the fields the reader needs are declared; unknown fields are skipped
//! by the decoder. Tags follow `tensor_bundle.proto`, `tensor_shape.proto`
//! and `versions.proto`.

use drumscribe_common::DType;

/// Header stored under the empty key.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BundleHeaderProto {
    #[prost(int32, tag = "1")]
    pub num_shards: i32,
    /// 0 = little endian, 1 = big endian
    #[prost(int32, tag = "2")]
    pub endianness: i32,
    #[prost(message, optional, tag = "3")]
    pub version: Option<VersionDef>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct VersionDef {
    #[prost(int32, tag = "1")]
    pub producer: i32,
    #[prost(int32, tag = "2")]
    pub min_consumer: i32,
    #[prost(int32, repeated, tag = "3")]
    pub bad_consumers: Vec<i32>,
}

/// Descriptor of one stored tensor.
#[derive(Clone, PartialEq, prost::Message)]
pub struct BundleEntryProto {
    #[prost(int32, tag = "1")]
    pub dtype: i32,
    #[prost(message, optional, tag = "2")]
    pub shape: Option<TensorShapeProto>,
    #[prost(int32, tag = "3")]
    pub shard_id: i32,
    #[prost(int64, tag = "4")]
    pub offset: i64,
    #[prost(int64, tag = "5")]
    pub size: i64,
    /// Masked CRC32C of the payload bytes
    #[prost(fixed32, tag = "6")]
    pub crc32c: u32,
    /// Non-empty for partitioned variables
    #[prost(message, repeated, tag = "7")]
    pub slices: Vec<TensorSliceProto>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct TensorShapeProto {
    #[prost(message, repeated, tag = "2")]
    pub dim: Vec<Dim>,
    #[prost(bool, tag = "3")]
    pub unknown_rank: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Dim {
    #[prost(int64, tag = "1")]
    pub size: i64,
    #[prost(string, tag = "2")]
    pub name: String,
}

/// Slice extents are not interpreted; presence alone marks a partitioned variable.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TensorSliceProto {}

/// Bundle format version written by [`crate::BundleWriter`].
pub const BUNDLE_VERSION: i32 = 1;

// `DataType` enum values from `types.proto`
pub const DT_FLOAT: i32 = 1;
pub const DT_DOUBLE: i32 = 2;
pub const DT_INT32: i32 = 3;
pub const DT_UINT8: i32 = 4;
pub const DT_INT16: i32 = 5;
pub const DT_INT8: i32 = 6;
pub const DT_STRING: i32 = 7;
pub const DT_INT64: i32 = 9;
pub const DT_BOOL: i32 = 10;
pub const DT_BFLOAT16: i32 = 14;
pub const DT_UINT16: i32 = 17;
pub const DT_HALF: i32 = 19;
pub const DT_RESOURCE: i32 = 20;

/// Map a stored `DataType` code to a fixed-width dtype.
///
/// Strings, resources, complex and quantized types return `None`.
pub fn dtype_from_code(code: i32) -> Option<DType> {
    match code {
        DT_FLOAT => Some(DType::F32),
        DT_DOUBLE => Some(DType::F64),
        DT_INT32 => Some(DType::I32),
        DT_UINT8 => Some(DType::U8),
        DT_INT16 => Some(DType::I16),
        DT_INT8 => Some(DType::I8),
        DT_INT64 => Some(DType::I64),
        DT_BOOL => Some(DType::Bool),
        DT_BFLOAT16 => Some(DType::BF16),
        DT_UINT16 => Some(DType::U16),
        DT_HALF => Some(DType::F16),
        _ => None,
    }
}

pub fn dtype_to_code(dtype: DType) -> i32 {
    match dtype {
        DType::F32 => DT_FLOAT,
        DType::F64 => DT_DOUBLE,
        DType::I32 => DT_INT32,
        DType::U8 => DT_UINT8,
        DType::I16 => DT_INT16,
        DType::I8 => DT_INT8,
        DType::I64 => DT_INT64,
        DType::Bool => DT_BOOL,
        DType::BF16 => DT_BFLOAT16,
        DType::U16 => DT_UINT16,
        DType::F16 => DT_HALF,
    }
}

impl TensorShapeProto {
    pub fn from_dims(dims: &[usize]) -> Self {
        Self {
            dim: dims.iter().map(|&d| Dim { size: d as i64, name: String::new() }).collect(),
            unknown_rank: false,
        }
    }
}
