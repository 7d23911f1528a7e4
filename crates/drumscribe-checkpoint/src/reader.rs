//! Tensor bundle reader

use crate::proto::{self, BundleEntryProto, BundleHeaderProto};
use crate::table::{self, unmask_crc};
use crate::variable::{Checkpoint, LegacyVariable, ReadErrorReason, VariableReadError};
use drumscribe_common::{CheckpointError, DType, Result};
use memmap2::Mmap;
use prost::Message;
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the checkpoint state file written next to saved checkpoints
const STATE_FILE: &str = "checkpoint";

/// Index metadata for one variable, available without reading payloads
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub name: String,
    pub dtype_code: i32,
    pub dtype: Option<DType>,
    pub shape: Vec<i64>,
    pub size: i64,
}

/// Reads a legacy checkpoint addressed by its prefix (`.../model.ckpt-569400`).
#[derive(Debug, Clone)]
pub struct CheckpointReader {
    prefix: PathBuf,
}

/// Resolve a user-supplied path to a checkpoint prefix.
///
/// Accepts the prefix itself, the `.index` file, or a directory holding a
/// `checkpoint` state file or exactly one `*.index` file.
pub fn resolve_prefix(path: &Path) -> Result<PathBuf> {
    if path.is_dir() {
        return resolve_directory(path);
    }
    if path.extension().is_some_and(|ext| ext == "index") {
        return Ok(path.with_extension(""));
    }
    Ok(path.to_path_buf())
}

fn resolve_directory(dir: &Path) -> Result<PathBuf> {
    let state = dir.join(STATE_FILE);
    if let Ok(content) = fs::read_to_string(&state)
        && let Some(prefix) = parse_state_file(&content)
    {
        let prefix = Path::new(&prefix);
        let resolved = if prefix.is_absolute() { prefix.to_path_buf() } else { dir.join(prefix) };
        debug!("Resolved checkpoint prefix from state file: {}", resolved.display());
        return Ok(resolved);
    }

    let mut indexes = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "index") {
            indexes.push(path);
        }
    }
    indexes.sort();

    match indexes.as_slice() {
        [only] => Ok(only.with_extension("")),
        [] => Err(CheckpointError::not_found(dir.join("*.index")).into()),
        many => Err(CheckpointError::corrupt(
            dir,
            format!("{} checkpoints in directory and no state file selects one", many.len()),
        )
        .into()),
    }
}

/// Extract `model_checkpoint_path` from a checkpoint state file.
fn parse_state_file(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let value = line.trim().strip_prefix("model_checkpoint_path:")?;
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = prefix.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Payload bytes of one data shard.
enum ShardBytes {
    Mapped(Mmap),
    Empty,
}

impl ShardBytes {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self::Empty);
        }
        // SAFETY: the mapping is read-only and dropped before the read returns.
        let mmap = unsafe { Mmap::map(&file) }?;
        Ok(Self::Mapped(mmap))
    }

    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(m) => &m[..],
            Self::Empty => &[],
        }
    }
}

impl CheckpointReader {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn index_path(&self) -> PathBuf {
        with_suffix(&self.prefix, ".index")
    }

    pub fn shard_path(&self, shard: usize, num_shards: usize) -> PathBuf {
        with_suffix(&self.prefix, &format!(".data-{shard:05}-of-{num_shards:05}"))
    }

    /// Decode the index into the bundle header and the raw variable entries.
    fn read_index(&self) -> Result<(BundleHeaderProto, Vec<(Vec<u8>, Vec<u8>)>)> {
        let index_path = self.index_path();
        if !index_path.is_file() {
            return Err(CheckpointError::not_found(&index_path).into());
        }

        let bytes = fs::read(&index_path)?;
        let mut entries = table::read_table(&bytes)
            .map_err(|e| CheckpointError::corrupt(&index_path, e.to_string()))?;

        if entries.first().is_none_or(|(key, _)| !key.is_empty()) {
            return Err(CheckpointError::corrupt(&index_path, "missing bundle header").into());
        }
        let (_, header_bytes) = entries.remove(0);
        let header = BundleHeaderProto::decode(header_bytes.as_slice())
            .map_err(|e| CheckpointError::corrupt(&index_path, format!("bad header: {e}")))?;

        if header.endianness != 0 {
            return Err(CheckpointError::corrupt(&index_path, "big-endian bundles are not supported")
                .into());
        }
        if header.num_shards < 1 {
            return Err(CheckpointError::corrupt(
                &index_path,
                format!("invalid shard count {}", header.num_shards),
            )
            .into());
        }

        Ok((header, entries))
    }

    /// List index entries without touching the data shards.
    pub fn list_variables(&self) -> Result<Vec<VariableInfo>> {
        let (_, entries) = self.read_index()?;
        let mut infos = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let name = String::from_utf8_lossy(&key).into_owned();
            let Ok(entry) = BundleEntryProto::decode(value.as_slice()) else {
                warn!("Skipping undecodable index entry {name}");
                continue;
            };
            infos.push(VariableInfo {
                name,
                dtype_code: entry.dtype,
                dtype: proto::dtype_from_code(entry.dtype),
                shape: entry
                    .shape
                    .map(|s| s.dim.iter().map(|d| d.size).collect())
                    .unwrap_or_default(),
                size: entry.size,
            });
        }
        Ok(infos)
    }

    /// Read every variable of the checkpoint.
    ///
    /// Fails only when the index or a data shard is missing, or the index
    /// itself cannot be decoded. Individual unreadable variables are
    /// collected in [`Checkpoint::read_errors`].
    pub fn read(&self) -> Result<Checkpoint> {
        info!("Loading legacy checkpoint from: {}", self.prefix.display());
        let (header, entries) = self.read_index()?;
        let num_shards = header.num_shards as usize;

        let mut shards = Vec::with_capacity(num_shards);
        for shard in 0..num_shards {
            let path = self.shard_path(shard, num_shards);
            if !path.is_file() {
                return Err(CheckpointError::not_found(&path).into());
            }
            shards.push(ShardBytes::open(&path)?);
        }

        let mut checkpoint = Checkpoint { prefix: self.prefix.clone(), ..Default::default() };
        for (key, value) in entries {
            let name = String::from_utf8_lossy(&key).into_owned();
            match decode_variable(&name, &value, &shards) {
                Ok(variable) => {
                    debug!(
                        "  {}: shape={:?} dtype={}",
                        variable.name, variable.shape, variable.dtype
                    );
                    checkpoint.variables.push(variable);
                }
                Err(reason) => {
                    warn!("Could not load {name}: {reason}");
                    checkpoint.read_errors.push(VariableReadError { name, reason });
                }
            }
        }

        info!(
            "Successfully loaded {}/{} variables",
            checkpoint.variables.len(),
            checkpoint.entry_count()
        );
        Ok(checkpoint)
    }
}

fn decode_variable(
    name: &str,
    value: &[u8],
    shards: &[ShardBytes],
) -> std::result::Result<LegacyVariable, ReadErrorReason> {
    let entry = BundleEntryProto::decode(value)
        .map_err(|e| ReadErrorReason::UndecodableEntry(e.to_string()))?;

    let dtype = proto::dtype_from_code(entry.dtype)
        .ok_or(ReadErrorReason::UnsupportedDtype(entry.dtype))?;

    if !entry.slices.is_empty() {
        return Err(ReadErrorReason::Partitioned);
    }

    let shape_proto = entry.shape.unwrap_or_default();
    if shape_proto.unknown_rank {
        return Err(ReadErrorReason::InvalidShape("unknown rank".to_string()));
    }
    let shape = shape_proto
        .dim
        .iter()
        .map(|d| usize::try_from(d.size))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| ReadErrorReason::InvalidShape(format!("negative dimension in {name}")))?;

    let shard = usize::try_from(entry.shard_id)
        .ok()
        .and_then(|id| shards.get(id))
        .ok_or(ReadErrorReason::ShardOutOfRange {
            shard_id: entry.shard_id,
            num_shards: shards.len(),
        })?
        .as_bytes();

    let out_of_bounds = ReadErrorReason::OutOfBounds {
        offset: entry.offset,
        size: entry.size,
        shard_len: shard.len(),
    };
    let (Ok(offset), Ok(size)) = (usize::try_from(entry.offset), usize::try_from(entry.size)) else {
        return Err(out_of_bounds);
    };
    let payload = offset
        .checked_add(size)
        .and_then(|end| shard.get(offset..end))
        .ok_or(out_of_bounds)?;

    let expected = drumscribe_common::byte_len(&shape, dtype)
        .ok_or_else(|| ReadErrorReason::InvalidShape(format!("{shape:?} overflows")))?;
    if expected != payload.len() {
        return Err(ReadErrorReason::SizeMismatch { expected, actual: payload.len() });
    }

    let actual = crc32c::crc32c(payload);
    let stored = unmask_crc(entry.crc32c);
    if actual != stored {
        return Err(ReadErrorReason::ChecksumMismatch { expected: stored, actual });
    }

    Ok(LegacyVariable { name: name.to_string(), shape, dtype, data: payload.to_vec() })
}
