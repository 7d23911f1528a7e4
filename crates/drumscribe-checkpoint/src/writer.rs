//! Single-shard tensor bundle writer.
//!
//! Produces `<prefix>.index` and `<prefix>.data-00000-of-00001` in the layout
//! [`crate::CheckpointReader`] reads. Used to build fixtures and to re-export
//! variable subsets of a legacy checkpoint.

use crate::proto::{self, BundleEntryProto, BundleHeaderProto, TensorShapeProto, VersionDef};
use crate::reader::CheckpointReader;
use crate::table::{TableBuilder, mask_crc};
use drumscribe_common::{DType, DrumscribeError, Result};
use prost::Message;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
struct PendingTensor {
    dtype_code: i32,
    shape: Vec<usize>,
    data: Vec<u8>,
}

/// Collects named tensors and writes them as one bundle.
#[derive(Debug, Clone)]
pub struct BundleWriter {
    prefix: PathBuf,
    tensors: BTreeMap<String, PendingTensor>,
}

fn write_error(path: &Path, reason: impl Into<String>) -> DrumscribeError {
    DrumscribeError::Write { path: path.display().to_string(), reason: reason.into() }
}

impl BundleWriter {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self { prefix: prefix.into(), tensors: BTreeMap::new() }
    }

    /// Add a tensor whose payload length must match `shape` × `dtype`.
    pub fn add(&mut self, name: &str, dtype: DType, shape: &[usize], data: &[u8]) -> Result<()> {
        let expected = drumscribe_common::byte_len(shape, dtype)
            .ok_or_else(|| {
                write_error(&self.prefix, format!("{name}: shape {shape:?} overflows"))
            })?;
        if expected != data.len() {
            return Err(write_error(
                &self.prefix,
                format!("{name}: payload is {} bytes, shape needs {expected}", data.len()),
            ));
        }
        self.add_raw(name, proto::dtype_to_code(dtype), shape, data)
    }

    /// Add an `f32` tensor.
    pub fn add_f32(&mut self, name: &str, shape: &[usize], values: &[f32]) -> Result<()> {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.add(name, DType::F32, shape, &data)
    }

    /// Add an entry with an arbitrary `DataType` code and unchecked payload.
    pub fn add_raw(
        &mut self,
        name: &str,
        dtype_code: i32,
        shape: &[usize],
        data: &[u8],
    ) -> Result<()> {
        if name.is_empty() {
            return Err(write_error(&self.prefix, "variable name must not be empty"));
        }
        if self.tensors.contains_key(name) {
            return Err(write_error(&self.prefix, format!("duplicate variable `{name}`")));
        }
        self.tensors.insert(
            name.to_string(),
            PendingTensor { dtype_code, shape: shape.to_vec(), data: data.to_vec() },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Write the index and data shard, creating parent directories.
    pub fn finish(self) -> Result<()> {
        let paths = CheckpointReader::new(&self.prefix);
        let index_path = paths.index_path();
        let data_path = paths.shard_path(0, 1);

        if let Some(parent) = index_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| write_error(parent, e.to_string()))?;
        }

        let header = BundleHeaderProto {
            num_shards: 1,
            endianness: 0,
            version: Some(VersionDef {
                producer: proto::BUNDLE_VERSION,
                min_consumer: 0,
                bad_consumers: Vec::new(),
            }),
        };

        let mut table = TableBuilder::new();
        table
            .add(b"", &header.encode_to_vec())
            .map_err(|e| write_error(&index_path, e.to_string()))?;

        let mut data = Vec::new();
        for (name, tensor) in &self.tensors {
            let entry = BundleEntryProto {
                dtype: tensor.dtype_code,
                shape: Some(TensorShapeProto::from_dims(&tensor.shape)),
                shard_id: 0,
                offset: data.len() as i64,
                size: tensor.data.len() as i64,
                crc32c: mask_crc(crc32c::crc32c(&tensor.data)),
                slices: Vec::new(),
            };
            data.extend_from_slice(&tensor.data);
            table
                .add(name.as_bytes(), &entry.encode_to_vec())
                .map_err(|e| write_error(&index_path, e.to_string()))?;
        }

        fs::write(&data_path, &data).map_err(|e| write_error(&data_path, e.to_string()))?;
        fs::write(&index_path, table.finish())
            .map_err(|e| write_error(&index_path, e.to_string()))?;

        tracing::debug!(
            "Wrote bundle with {} variables to {}",
            self.tensors.len(),
            self.prefix.display()
        );
        Ok(())
    }
}
