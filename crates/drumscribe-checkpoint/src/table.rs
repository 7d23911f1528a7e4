//! Sorted string table codec for bundle index files.
//!
//! The index of a tensor bundle uses the LevelDB table layout:
//!
//! ```text
//! [data block][trailer] ... [metaindex block][trailer][index block][trailer][footer]
//! ```
//!
//! - each block holds prefix-compressed entries followed by a restart array
//! - each trailer is one compression byte plus a masked CRC32C of block + byte
//! - the 48-byte footer holds the metaindex and index block handles, zero
//!   padding, and the table magic
//!
//! Only uncompressed blocks are supported; bundle writers never compress.

use std::fmt;

/// Magic number closing every table footer.
pub const TABLE_MAGIC: u64 = 0xdb47_7524_8b80_fb57;
/// Encoded footer length: two max-size block handles plus the magic.
pub const FOOTER_LEN: usize = 48;
/// Compression byte plus masked CRC32C.
pub const BLOCK_TRAILER_LEN: usize = 5;

const MASK_DELTA: u32 = 0xa282_ead8;
const NO_COMPRESSION: u8 = 0;
const RESTART_INTERVAL: usize = 16;
const TARGET_BLOCK_SIZE: usize = 4096;

/// Structural problem found while decoding a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableError(pub String);

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TableError {}

type TableResult<T> = std::result::Result<T, TableError>;

fn corrupt<T>(msg: impl Into<String>) -> TableResult<T> {
    Err(TableError(msg.into()))
}

// ---------------------------------------------------------------------------
// Checksums and varints
// ---------------------------------------------------------------------------

/// Mask a CRC32C the way bundle and table writers store it.
pub fn mask_crc(crc: u32) -> u32 {
    crc.rotate_right(15).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask_crc`].
pub fn unmask_crc(masked: u32) -> u32 {
    masked.wrapping_sub(MASK_DELTA).rotate_left(15)
}

pub(crate) fn put_varint64(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

/// Decode a varint starting at `*pos`, advancing `*pos` past it.
pub(crate) fn get_varint64(buf: &[u8], pos: &mut usize) -> TableResult<u64> {
    let mut result = 0u64;
    for shift in (0..64).step_by(7) {
        let Some(&byte) = buf.get(*pos) else {
            return corrupt("truncated varint");
        };
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    corrupt("varint longer than 10 bytes")
}

fn get_varint_usize(buf: &[u8], pos: &mut usize) -> TableResult<usize> {
    let v = get_varint64(buf, pos)?;
    usize::try_from(v).or_else(|_| corrupt(format!("length {v} does not fit in memory")))
}

fn read_u32_le(buf: &[u8], at: usize) -> TableResult<u32> {
    match buf.get(at..at + 4) {
        Some(b) => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => corrupt("truncated fixed32"),
    }
}

// ---------------------------------------------------------------------------
// Block handles and footer
// ---------------------------------------------------------------------------

/// Location of a block inside the table file (trailer excluded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    fn encode_to(&self, out: &mut Vec<u8>) {
        put_varint64(out, self.offset);
        put_varint64(out, self.size);
    }

    fn decode_from(buf: &[u8], pos: &mut usize) -> TableResult<Self> {
        let offset = get_varint64(buf, pos)?;
        let size = get_varint64(buf, pos)?;
        Ok(Self { offset, size })
    }
}

/// Read the checksummed, uncompressed block referenced by `handle`.
fn read_block(file: &[u8], handle: BlockHandle) -> TableResult<&[u8]> {
    let start = usize::try_from(handle.offset).or_else(|_| corrupt("block offset overflow"))?;
    let size = usize::try_from(handle.size).or_else(|_| corrupt("block size overflow"))?;
    let end = start
        .checked_add(size)
        .filter(|end| end.saturating_add(BLOCK_TRAILER_LEN) <= file.len())
        .ok_or_else(|| {
            TableError(format!("block at {start}+{size} extends past end of file ({})", file.len()))
        })?;

    let contents = &file[start..end];
    let compression = file[end];
    let stored = read_u32_le(file, end + 1)?;
    let actual = crc32c::crc32c_append(crc32c::crc32c(contents), &[compression]);
    if unmask_crc(stored) != actual {
        return corrupt(format!("block checksum mismatch at offset {start}"));
    }
    if compression != NO_COMPRESSION {
        return corrupt(format!("unsupported block compression type {compression}"));
    }
    Ok(contents)
}

/// Decode all entries of one block, expanding shared key prefixes.
fn parse_block(block: &[u8]) -> TableResult<Vec<(Vec<u8>, Vec<u8>)>> {
    if block.len() < 4 {
        return corrupt("block too small for restart count");
    }
    let num_restarts = read_u32_le(block, block.len() - 4)? as usize;
    let restarts_len = num_restarts
        .checked_add(1)
        .and_then(|n| n.checked_mul(4))
        .filter(|&n| n <= block.len())
        .ok_or_else(|| TableError(format!("bad restart count {num_restarts}")))?;
    let limit = block.len() - restarts_len;

    let mut entries = Vec::new();
    let mut key: Vec<u8> = Vec::new();
    let mut pos = 0;
    while pos < limit {
        let shared = get_varint_usize(block, &mut pos)?;
        let non_shared = get_varint_usize(block, &mut pos)?;
        let value_len = get_varint_usize(block, &mut pos)?;
        if shared > key.len() {
            return corrupt("entry shares more key bytes than the previous key has");
        }
        let key_end = pos.checked_add(non_shared).filter(|&e| e <= limit);
        let value_end = key_end.and_then(|k| k.checked_add(value_len)).filter(|&e| e <= limit);
        let (Some(key_end), Some(value_end)) = (key_end, value_end) else {
            return corrupt("entry extends into restart array");
        };

        key.truncate(shared);
        key.extend_from_slice(&block[pos..key_end]);
        entries.push((key.clone(), block[key_end..value_end].to_vec()));
        pos = value_end;
    }
    Ok(entries)
}

/// Decode every key/value pair of a table in key order.
///
/// Fails on any structural damage: bad magic, checksum mismatch, compressed
/// blocks, truncated entries or keys that are not strictly increasing.
pub fn read_table(file: &[u8]) -> TableResult<Vec<(Vec<u8>, Vec<u8>)>> {
    if file.len() < FOOTER_LEN {
        return corrupt(format!("file too small for a table footer ({} bytes)", file.len()));
    }
    let footer = &file[file.len() - FOOTER_LEN..];
    let magic_bytes = footer[40..48].try_into().map_err(|_| TableError("footer".into()))?;
    let magic = u64::from_le_bytes(magic_bytes);
    if magic != TABLE_MAGIC {
        return corrupt(format!("bad table magic {magic:#018x}"));
    }

    let mut pos = 0;
    let _metaindex = BlockHandle::decode_from(footer, &mut pos)?;
    let index_handle = BlockHandle::decode_from(footer, &mut pos)?;
    let index = parse_block(read_block(file, index_handle)?)?;

    let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    for (_, handle_bytes) in index {
        let mut hpos = 0;
        let handle = BlockHandle::decode_from(&handle_bytes, &mut hpos)?;
        for (key, value) in parse_block(read_block(file, handle)?)? {
            if let Some((prev, _)) = entries.last()
                && *prev >= key
            {
                return corrupt("table keys are not strictly increasing");
            }
            entries.push((key, value));
        }
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct BlockBuilder {
    buffer: Vec<u8>,
    restarts: Vec<u32>,
    counter: usize,
    last_key: Vec<u8>,
    entries: usize,
}

impl BlockBuilder {
    fn new() -> Self {
        Self { buffer: Vec::new(), restarts: vec![0], counter: 0, last_key: Vec::new(), entries: 0 }
    }

    fn add(&mut self, key: &[u8], value: &[u8]) {
        let shared = if self.counter < RESTART_INTERVAL {
            self.last_key.iter().zip(key).take_while(|(a, b)| a == b).count()
        } else {
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
            0
        };
        put_varint64(&mut self.buffer, shared as u64);
        put_varint64(&mut self.buffer, (key.len() - shared) as u64);
        put_varint64(&mut self.buffer, value.len() as u64);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);
        self.last_key = key.to_vec();
        self.counter += 1;
        self.entries += 1;
    }

    fn size_estimate(&self) -> usize {
        self.buffer.len() + 4 * (self.restarts.len() + 1)
    }

    fn finish(mut self) -> Vec<u8> {
        for restart in &self.restarts {
            self.buffer.extend_from_slice(&restart.to_le_bytes());
        }
        self.buffer.extend_from_slice(&(self.restarts.len() as u32).to_le_bytes());
        self.buffer
    }
}

/// Builds a table in memory. Keys must be added in strictly increasing order.
#[derive(Debug)]
pub struct TableBuilder {
    file: Vec<u8>,
    data: BlockBuilder,
    index: BlockBuilder,
    last_key: Option<Vec<u8>>,
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableBuilder {
    pub fn new() -> Self {
        Self {
            file: Vec::new(),
            data: BlockBuilder::new(),
            index: BlockBuilder::new(),
            last_key: None,
        }
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> TableResult<()> {
        if let Some(last) = &self.last_key
            && last.as_slice() >= key
        {
            return corrupt(format!(
                "key {:?} added out of order",
                String::from_utf8_lossy(key)
            ));
        }
        self.data.add(key, value);
        self.last_key = Some(key.to_vec());
        if self.data.size_estimate() >= TARGET_BLOCK_SIZE {
            self.flush_data_block();
        }
        Ok(())
    }

    fn write_block(&mut self, contents: Vec<u8>) -> BlockHandle {
        let handle = BlockHandle { offset: self.file.len() as u64, size: contents.len() as u64 };
        let crc = crc32c::crc32c_append(crc32c::crc32c(&contents), &[NO_COMPRESSION]);
        self.file.extend_from_slice(&contents);
        self.file.push(NO_COMPRESSION);
        self.file.extend_from_slice(&mask_crc(crc).to_le_bytes());
        handle
    }

    fn flush_data_block(&mut self) {
        if self.data.entries == 0 {
            return;
        }
        let block = std::mem::replace(&mut self.data, BlockBuilder::new());
        let separator = block.last_key.clone();
        let handle = self.write_block(block.finish());
        let mut encoded = Vec::new();
        handle.encode_to(&mut encoded);
        self.index.add(&separator, &encoded);
    }

    /// Flush pending blocks and return the complete table bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.flush_data_block();
        let metaindex = self.write_block(BlockBuilder::new().finish());
        let index = std::mem::replace(&mut self.index, BlockBuilder::new());
        let index_handle = self.write_block(index.finish());

        let mut footer = Vec::with_capacity(FOOTER_LEN);
        metaindex.encode_to(&mut footer);
        index_handle.encode_to(&mut footer);
        footer.resize(FOOTER_LEN - 8, 0);
        footer.extend_from_slice(&TABLE_MAGIC.to_le_bytes());
        self.file.extend_from_slice(&footer);
        self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = TableBuilder::new();
        for (k, v) in entries {
            builder.add(k.as_bytes(), v.as_bytes()).unwrap();
        }
        builder.finish()
    }

    #[test]
    fn mask_roundtrip_known_value() {
        let crc = crc32c::crc32c(b"drum");
        assert_ne!(mask_crc(crc), crc);
        assert_eq!(unmask_crc(mask_crc(crc)), crc);
    }

    #[test]
    fn varint_multi_byte() {
        let mut buf = Vec::new();
        put_varint64(&mut buf, 300);
        assert_eq!(buf, vec![0xac, 0x02]);
        let mut pos = 0;
        assert_eq!(get_varint64(&buf, &mut pos).unwrap(), 300);
        assert_eq!(pos, 2);
    }

    #[test]
    fn truncated_varint_is_error() {
        let mut pos = 0;
        assert!(get_varint64(&[0x80, 0x80], &mut pos).is_err());
    }

    #[test]
    fn empty_table_reads_back_empty() {
        let file = build(&[]);
        assert_eq!(file.len(), 2 * (8 + BLOCK_TRAILER_LEN) + FOOTER_LEN);
        assert!(read_table(&file).unwrap().is_empty());
    }

    #[test]
    fn shared_prefixes_are_expanded() {
        let file = build(&[("", "header"), ("conv1/bias", "b"), ("conv1/weights", "w")]);
        let entries = read_table(&file).unwrap();
        let keys: Vec<String> =
            entries.iter().map(|(k, _)| String::from_utf8(k.clone()).unwrap()).collect();
        assert_eq!(keys, vec!["", "conv1/bias", "conv1/weights"]);
        assert_eq!(entries[2].1, b"w");
    }

    #[test]
    fn many_entries_span_blocks_and_restarts() {
        let names: Vec<String> = (0..600).map(|i| format!("layer_{i:04}/weights")).collect();
        let mut builder = TableBuilder::new();
        for name in &names {
            builder.add(name.as_bytes(), &[7u8; 16]).unwrap();
        }
        let entries = read_table(&builder.finish()).unwrap();
        assert_eq!(entries.len(), 600);
        assert_eq!(entries[599].0, names[599].as_bytes());
    }

    #[test]
    fn out_of_order_keys_rejected() {
        let mut builder = TableBuilder::new();
        builder.add(b"b", b"1").unwrap();
        assert!(builder.add(b"a", b"2").is_err());
        assert!(builder.add(b"b", b"2").is_err());
    }

    #[test]
    fn bad_magic_rejected() {
        let mut file = build(&[("a", "1")]);
        let n = file.len();
        file[n - 1] ^= 0xff;
        let err = read_table(&file).unwrap_err();
        assert!(err.0.contains("magic"), "{err}");
    }

    #[test]
    fn flipped_block_byte_fails_checksum() {
        let mut file = build(&[("conv1/weights", "payload")]);
        file[5] ^= 0x01;
        let err = read_table(&file).unwrap_err();
        assert!(err.0.contains("checksum"), "{err}");
    }

    #[test]
    fn too_small_file_rejected() {
        assert!(read_table(&[0u8; 10]).is_err());
    }

    proptest::proptest! {
        #[test]
        fn read_table_never_panics(data in proptest::collection::vec(0u8..=255, 0..256)) {
            let _ = read_table(&data);
        }

        #[test]
        fn parse_block_never_panics(data in proptest::collection::vec(0u8..=255, 0..128)) {
            let _ = parse_block(&data);
        }
    }
}
