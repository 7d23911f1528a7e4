//! Tensor element types and shape helpers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a stored tensor.
///
/// Covers the fixed-width numeric types a legacy checkpoint can hold and the
/// target format can store. Variable-width types (strings, resources) are not
/// representable and are rejected by the checkpoint reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    F32,
    F64,
    F16,
    BF16,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    Bool,
}

impl DType {
    /// Size in bytes of one element.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DType::F64 | DType::I64 => 8,
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::BF16 | DType::I16 | DType::U16 => 2,
            DType::I8 | DType::U8 | DType::Bool => 1,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::I8 => "int8",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of elements described by `shape`. A scalar (empty shape) has one.
pub fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Expected byte length of a dense row-major buffer.
///
/// Returns `None` on overflow, which callers treat as an inconsistent entry.
pub fn byte_len(shape: &[usize], dtype: DType) -> Option<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .and_then(|n| n.checked_mul(dtype.size_in_bytes()))
}

/// Render a shape as `[a, b, c]`.
pub fn format_shape(shape: &[usize]) -> String {
    format!("{shape:?}")
}
