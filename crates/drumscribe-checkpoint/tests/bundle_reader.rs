//! Integration tests for reading legacy tensor bundles.

use drumscribe_checkpoint::proto::DT_STRING;
use drumscribe_checkpoint::{BundleWriter, CheckpointReader, ReadErrorReason};
use drumscribe_common::{CheckpointError, DType, DrumscribeError};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn ramp(n: usize) -> Vec<f32> {
    (0..n).map(|i| i as f32 * 0.5).collect()
}

/// Writes the small drum checkpoint used throughout these tests.
fn write_fixture(dir: &Path) -> PathBuf {
    let prefix = dir.join("model.ckpt-569400");
    let mut writer = BundleWriter::new(&prefix);
    writer.add_f32("conv1/weights", &[3, 3, 1, 16], &ramp(144)).unwrap();
    writer.add_f32("conv1/bias", &[16], &ramp(16)).unwrap();
    writer.add_f32("dense_out/kernel", &[9, 64], &ramp(576)).unwrap();
    writer.add_f32("dense_out/bias", &[9], &ramp(9)).unwrap();
    writer.add("global_step", DType::I64, &[], &569_400i64.to_le_bytes()).unwrap();
    writer.finish().unwrap();
    prefix
}

fn assert_not_found(err: DrumscribeError, suffix: &str) {
    match err {
        DrumscribeError::Checkpoint(CheckpointError::NotFound { path }) => {
            assert!(path.ends_with(suffix), "unexpected path {path}")
        }
        other => panic!("expected CheckpointNotFound, got {other:?}"),
    }
}

#[test]
fn reads_all_variables_in_key_order() {
    let dir = TempDir::new().unwrap();
    let prefix = write_fixture(dir.path());

    let checkpoint = CheckpointReader::new(&prefix).read().unwrap();

    assert!(checkpoint.read_errors.is_empty());
    let names: Vec<&str> = checkpoint.names().collect();
    assert_eq!(
        names,
        vec!["conv1/bias", "conv1/weights", "dense_out/bias", "dense_out/kernel", "global_step"]
    );

    let kernel = checkpoint.get("dense_out/kernel").unwrap();
    assert_eq!(kernel.shape, vec![9, 64]);
    assert_eq!(kernel.dtype, DType::F32);
    assert_eq!(kernel.data.len(), 576 * 4);
    assert_eq!(&kernel.data[4..8], &0.5f32.to_le_bytes());

    let step = checkpoint.get("global_step").unwrap();
    assert!(step.shape.is_empty());
    assert_eq!(step.data, 569_400i64.to_le_bytes());
}

#[test]
fn missing_index_is_not_found() {
    let dir = TempDir::new().unwrap();
    let err = CheckpointReader::new(dir.path().join("model.ckpt-1")).read().unwrap_err();
    assert_not_found(err, "model.ckpt-1.index");
}

#[test]
fn missing_data_shard_is_not_found() {
    let dir = TempDir::new().unwrap();
    let prefix = write_fixture(dir.path());
    fs::remove_file(CheckpointReader::new(&prefix).shard_path(0, 1)).unwrap();

    let err = CheckpointReader::new(&prefix).read().unwrap_err();
    assert_not_found(err, ".data-00000-of-00001");
}

#[test]
fn garbage_index_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let prefix = write_fixture(dir.path());
    let reader = CheckpointReader::new(&prefix);
    fs::write(reader.index_path(), b"definitely not a table").unwrap();

    let err = reader.read().unwrap_err();
    assert!(
        matches!(err, DrumscribeError::Checkpoint(CheckpointError::Corrupt { .. })),
        "{err:?}"
    );
}

#[test]
fn corrupted_payload_is_a_per_variable_error() {
    let dir = TempDir::new().unwrap();
    let prefix = write_fixture(dir.path());
    let reader = CheckpointReader::new(&prefix);

    // conv1/bias is stored first in the shard; flip one of its bytes.
    let shard = reader.shard_path(0, 1);
    let mut bytes = fs::read(&shard).unwrap();
    bytes[4] ^= 0xff;
    fs::write(&shard, bytes).unwrap();

    let checkpoint = reader.read().unwrap();
    assert_eq!(checkpoint.variables.len(), 4);
    assert_eq!(checkpoint.read_errors.len(), 1);
    assert_eq!(checkpoint.read_errors[0].name, "conv1/bias");
    assert!(matches!(checkpoint.read_errors[0].reason, ReadErrorReason::ChecksumMismatch { .. }));
    assert!(checkpoint.get("conv1/weights").is_some());
}

#[test]
fn truncated_shard_reports_out_of_bounds() {
    let dir = TempDir::new().unwrap();
    let prefix = write_fixture(dir.path());
    let reader = CheckpointReader::new(&prefix);

    let shard = reader.shard_path(0, 1);
    let bytes = fs::read(&shard).unwrap();
    fs::write(&shard, &bytes[..bytes.len() - 8]).unwrap();

    let checkpoint = reader.read().unwrap();
    let failed: Vec<&str> = checkpoint.read_errors.iter().map(|e| e.name.as_str()).collect();
    // global_step is the last payload in the shard
    assert_eq!(failed, vec!["global_step"]);
    assert!(matches!(checkpoint.read_errors[0].reason, ReadErrorReason::OutOfBounds { .. }));
}

#[test]
fn string_variables_are_unsupported() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("model.ckpt-2");
    let mut writer = BundleWriter::new(&prefix);
    writer.add_f32("fc/weights", &[2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
    writer.add_raw("_CHECKPOINTABLE_OBJECT_GRAPH", DT_STRING, &[], b"\x03abc").unwrap();
    writer.finish().unwrap();

    let checkpoint = CheckpointReader::new(&prefix).read().unwrap();
    assert_eq!(checkpoint.variables.len(), 1);
    assert_eq!(
        checkpoint.read_errors[0].reason,
        ReadErrorReason::UnsupportedDtype(DT_STRING)
    );
    assert_eq!(checkpoint.entry_count(), 2);
}

#[test]
fn size_mismatch_is_detected() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("model.ckpt-3");
    let mut writer = BundleWriter::new(&prefix);
    // Declares 4 floats but stores 3.
    writer.add_raw("fc/bias", 1, &[4], &[0u8; 12]).unwrap();
    writer.finish().unwrap();

    let checkpoint = CheckpointReader::new(&prefix).read().unwrap();
    assert_eq!(
        checkpoint.read_errors[0].reason,
        ReadErrorReason::SizeMismatch { expected: 16, actual: 12 }
    );
}

#[test]
fn list_variables_does_not_need_shards() {
    let dir = TempDir::new().unwrap();
    let prefix = write_fixture(dir.path());
    let reader = CheckpointReader::new(&prefix);
    fs::remove_file(reader.shard_path(0, 1)).unwrap();

    let infos = reader.list_variables().unwrap();
    assert_eq!(infos.len(), 5);
    let kernel = infos.iter().find(|i| i.name == "conv1/weights").unwrap();
    assert_eq!(kernel.shape, vec![3, 3, 1, 16]);
    assert_eq!(kernel.dtype, Some(DType::F32));
    assert_eq!(kernel.size, 144 * 4);
}

#[test]
fn writer_rejects_bad_payloads_and_duplicates() {
    let dir = TempDir::new().unwrap();
    let mut writer = BundleWriter::new(dir.path().join("x"));
    assert!(writer.add_f32("a", &[3], &[1.0, 2.0]).is_err());
    writer.add_f32("a", &[2], &[1.0, 2.0]).unwrap();
    assert!(writer.add_f32("a", &[2], &[1.0, 2.0]).is_err());
    assert!(writer.add_f32("", &[1], &[1.0]).is_err());
    assert_eq!(writer.len(), 1);
}
