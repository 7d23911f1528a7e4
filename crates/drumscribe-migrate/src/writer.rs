//! Persistence of migrated models
//!
//! The converted model is a safetensors file with one tensor per slot, keyed
//! `<layer>/<kernel|bias>`. A sidecar `<output>.meta.json` carries the full
//! migration report and the smoke-pass outcome.

use crate::model::TargetModel;
use crate::report::MigrationReport;
use crate::smoke::SmokeOutcome;
use drumscribe_common::{DType, DrumscribeError, Result};
use safetensors::Dtype;
use safetensors::tensor::TensorView;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Single `__metadata__` key written into every converted file
pub const METADATA_KEY: &str = "drumscribe";

fn write_error(path: &Path, reason: impl Into<String>) -> DrumscribeError {
    DrumscribeError::Write { path: path.display().to_string(), reason: reason.into() }
}

fn safetensors_dtype(dtype: DType) -> Dtype {
    match dtype {
        DType::F32 => Dtype::F32,
        DType::F64 => Dtype::F64,
        DType::F16 => Dtype::F16,
        DType::BF16 => Dtype::BF16,
        DType::I8 => Dtype::I8,
        DType::I16 => Dtype::I16,
        DType::I32 => Dtype::I32,
        DType::I64 => Dtype::I64,
        DType::U8 => Dtype::U8,
        DType::U16 => Dtype::U16,
        DType::Bool => Dtype::BOOL,
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| write_error(parent, e.to_string()))?;
    }
    Ok(())
}

/// Serialize `model` to bytes. Output depends only on the model contents.
pub fn serialize_model(model: &TargetModel) -> Result<Vec<u8>> {
    let schema = model.schema();
    let mut views = Vec::with_capacity(model.params().len());
    for param in model.params() {
        let view = TensorView::new(
            safetensors_dtype(param.slot.dtype),
            param.slot.expected_shape.clone(),
            &param.data,
        )
        .map_err(|e| DrumscribeError::Write {
            path: param.slot.key(),
            reason: format!("invalid tensor: {e}"),
        })?;
        views.push((param.slot.key(), view));
    }

    let metadata = json!({
        "schema": schema.name,
        "schema_version": schema.version,
        "assigned": model.migrated_count(),
        "total_slots": model.params().len(),
    });
    let info = HashMap::from([(METADATA_KEY.to_string(), metadata.to_string())]);

    safetensors::serialize(views.iter().map(|(k, v)| (k.as_str(), v)), &Some(info)).map_err(|e| {
        DrumscribeError::Write {
            path: schema.label(),
            reason: format!("serialization failed: {e}"),
        }
    })
}

/// Write the converted model to `path`, creating intermediate directories
pub fn write_model(model: &TargetModel, path: &Path) -> Result<()> {
    let bytes = serialize_model(model)?;
    create_parent(path)?;
    fs::write(path, &bytes).map_err(|e| write_error(path, e.to_string()))?;
    info!("Wrote {} tensors ({} bytes) to {}", model.params().len(), bytes.len(), path.display());
    Ok(())
}

/// `<output>.meta.json`
pub fn sidecar_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

#[derive(Serialize)]
struct Sidecar<'a> {
    output: String,
    report: &'a MigrationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    smoke: Option<&'a SmokeOutcome>,
}

/// Write the report and smoke outcome next to `output`; returns the sidecar path
pub fn write_sidecar(
    output: &Path,
    report: &MigrationReport,
    smoke: Option<&SmokeOutcome>,
) -> Result<PathBuf> {
    let path = sidecar_path(output);
    let sidecar = Sidecar {
        output: output.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        report,
        smoke,
    };
    let json = serde_json::to_string_pretty(&sidecar)
        .map_err(|e| write_error(&path, format!("failed to encode report: {e}")))?;

    create_parent(&path)?;
    fs::write(&path, json).map_err(|e| write_error(&path, e.to_string()))?;
    info!("Wrote sidecar metadata to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sidecar_sits_next_to_output() {
        assert_eq!(
            sidecar_path(Path::new("out/model.safetensors")),
            PathBuf::from("out/model.safetensors.meta.json")
        );
    }

    #[test]
    fn dtype_mapping_covers_all_fixed_width_types() {
        assert_eq!(safetensors_dtype(DType::F32), Dtype::F32);
        assert_eq!(safetensors_dtype(DType::Bool), Dtype::BOOL);
        assert_eq!(safetensors_dtype(DType::BF16), Dtype::BF16);
    }
}
