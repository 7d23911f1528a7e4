//! Legacy checkpoint access for drumscribe
//!
//! Legacy drum transcription checkpoints are TensorFlow v1 "tensor bundles":
//!
//! - `<prefix>.index`: a sorted string table mapping variable names to
//!   serialized entry descriptors (dtype, shape, shard, byte range, checksum)
//! - `<prefix>.data-NNNNN-of-NNNNN`: raw little-endian tensor payloads
//!
//! [`CheckpointReader`] turns a bundle into a flat set of [`LegacyVariable`]s
//! without interpreting names. A variable whose payload cannot be decoded is
//! reported in [`Checkpoint::read_errors`] instead of failing the whole read.
//! [`BundleWriter`] produces bundles in the same layout.

pub mod proto;
pub mod reader;
pub mod table;
pub mod variable;
pub mod writer;

pub use reader::{CheckpointReader, VariableInfo, resolve_prefix};
pub use variable::{Checkpoint, LegacyVariable, ReadErrorReason, VariableReadError};
pub use writer::BundleWriter;
