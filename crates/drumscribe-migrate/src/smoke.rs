//! Diagnostic forward pass
//!
//! Runs a deterministic dummy input through the populated model on the CPU
//! to confirm that every slot shape fits its neighbours. Values are not
//! checked. A failure is reported, never raised: the converted file is
//! written either way.

use crate::model::TargetModel;
use crate::schema::{Activation, LayerOp, SlotKind, TargetLayer};
use candle_core::{Device, Tensor};
use drumscribe_common::num_elements;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SmokeError {
    #[error("tensor op failed: {0}")]
    Tensor(#[from] candle_core::Error),

    #[error("layer `{layer}`: {reason}")]
    Graph { layer: String, reason: String },
}

fn graph_error(layer: &str, reason: impl Into<String>) -> SmokeError {
    SmokeError::Graph { layer: layer.to_string(), reason: reason.into() }
}

/// Shape of one model output, NHWC for spatial outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmokeOutput {
    pub layer: String,
    pub shape: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SmokeOutcome {
    Passed { input_shape: Vec<usize>, outputs: Vec<SmokeOutput> },
    Failed { input_shape: Vec<usize>, reason: String },
}

impl SmokeOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, SmokeOutcome::Passed { .. })
    }
}

/// Intermediate activation
#[derive(Debug, Clone)]
enum Value {
    /// `[batch, channels, height, width]`
    Spatial(Tensor),
    /// `[..., features]`
    Features(Tensor),
}

impl Value {
    fn output_shape(&self) -> Vec<usize> {
        match self {
            Value::Spatial(t) => match t.dims() {
                &[b, c, h, w] => vec![b, h, w, c],
                dims => dims.to_vec(),
            },
            Value::Features(t) => t.dims().to_vec(),
        }
    }
}

/// Forward a seeded dummy input of `input_shape` (NHWC; the schema's own when `None`).
pub fn run_smoke_check(
    model: &TargetModel,
    input_shape: Option<&[usize]>,
    seed: u64,
) -> SmokeOutcome {
    let input_shape = input_shape.unwrap_or(&model.schema().input_shape).to_vec();

    match forward(model, &input_shape, seed) {
        Ok(outputs) => {
            for output in &outputs {
                info!("Smoke output {}: {:?}", output.layer, output.shape);
            }
            SmokeOutcome::Passed { input_shape, outputs }
        }
        Err(e) => {
            warn!("Smoke forward pass failed: {e}");
            SmokeOutcome::Failed { input_shape, reason: e.to_string() }
        }
    }
}

fn forward(
    model: &TargetModel,
    input_shape: &[usize],
    seed: u64,
) -> Result<Vec<SmokeOutput>, SmokeError> {
    if input_shape.len() != 4 || input_shape.contains(&0) {
        return Err(graph_error("input", format!("expected a 4-D NHWC shape, got {input_shape:?}")));
    }

    let device = Device::Cpu;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let data: Vec<f32> =
        (0..num_elements(input_shape)).map(|_| rng.random_range(0.0..1.0)).collect();
    let input = Tensor::from_vec(data, input_shape.to_vec(), &device)?
        .permute((0, 3, 1, 2))?
        .contiguous()?;

    let schema = model.schema();
    let mut values: HashMap<&str, Value> = HashMap::new();
    for layer in schema.layers() {
        let x = match &layer.input {
            None => Value::Spatial(input.clone()),
            Some(name) => values
                .get(name.as_str())
                .cloned()
                .ok_or_else(|| {
                    graph_error(&layer.name, format!("input `{name}` was not computed"))
                })?,
        };
        let y = apply_layer(model, layer, x, &device)?;
        values.insert(layer.name.as_str(), y);
    }

    schema
        .output_layers()
        .into_iter()
        .map(|layer| {
            let value = values
                .get(layer.name.as_str())
                .ok_or_else(|| graph_error(&layer.name, "output was not computed"))?;
            Ok(SmokeOutput { layer: layer.name.clone(), shape: value.output_shape() })
        })
        .collect()
}

fn param(
    model: &TargetModel,
    layer: &TargetLayer,
    kind: SlotKind,
    device: &Device,
) -> Result<Option<Tensor>, SmokeError> {
    match model.layer_param(&layer.name, kind) {
        Some(p) => {
            Ok(Some(Tensor::from_vec(p.to_f32_vec(), p.slot.expected_shape.clone(), device)?))
        }
        None => Ok(None),
    }
}

fn apply_layer(
    model: &TargetModel,
    layer: &TargetLayer,
    x: Value,
    device: &Device,
) -> Result<Value, SmokeError> {
    let name = layer.name.as_str();

    let y = match layer.op {
        LayerOp::Conv2d { kernel_size: [kh, kw], in_channels, filters, .. } => {
            let Value::Spatial(x) = x else {
                return Err(graph_error(name, "convolution needs a spatial input"));
            };
            let channels = x.dim(1)?;
            if channels != in_channels {
                return Err(graph_error(
                    name,
                    format!("expects {in_channels} input channels, got {channels}"),
                ));
            }

            // [kh, kw, in, out] -> [out, in, kh, kw]
            let kernel = param(model, layer, SlotKind::Kernel, device)?
                .ok_or_else(|| graph_error(name, "missing kernel"))?
                .permute((3, 2, 0, 1))?
                .contiguous()?;

            // `same` padding, extra row/column at the bottom/right
            let (top, left) = ((kh - 1) / 2, (kw - 1) / 2);
            let x = x.pad_with_zeros(2, top, kh - 1 - top)?.pad_with_zeros(3, left, kw - 1 - left)?;
            let mut y = x.conv2d(&kernel, 0, 1, 1, 1)?;
            if let Some(bias) = param(model, layer, SlotKind::Bias, device)? {
                y = y.broadcast_add(&bias.reshape((1, filters, 1, 1))?)?;
            }
            Value::Spatial(y)
        }
        LayerOp::Dense { in_features, units, .. } => {
            let x = match x {
                Value::Spatial(t) => t.permute((0, 2, 3, 1))?.contiguous()?,
                Value::Features(t) => t,
            };
            let mut dims = x.dims().to_vec();
            let features = dims.last().copied().unwrap_or(0);
            if features != in_features {
                return Err(graph_error(
                    name,
                    format!("expects {in_features} input features, got {features}"),
                ));
            }

            let kernel = param(model, layer, SlotKind::Kernel, device)?
                .ok_or_else(|| graph_error(name, "missing kernel"))?;
            let rows = x.elem_count() / in_features;
            let mut y = x.reshape((rows, in_features))?.matmul(&kernel)?;
            if let Some(bias) = param(model, layer, SlotKind::Bias, device)? {
                y = y.broadcast_add(&bias)?;
            }
            if let Some(last) = dims.last_mut() {
                *last = units;
            }
            Value::Features(y.reshape(dims)?)
        }
        LayerOp::MaxPool2d { pool_size: [ph, pw] } => {
            let Value::Spatial(x) = x else {
                return Err(graph_error(name, "pooling needs a spatial input"));
            };
            let (_, _, h, w) = x.dims4()?;
            if h < ph || w < pw {
                return Err(graph_error(name, format!("pool {ph}x{pw} larger than input {h}x{w}")));
            }
            Value::Spatial(x.max_pool2d((ph, pw))?)
        }
        LayerOp::Flatten => match x {
            Value::Spatial(t) => {
                let (b, c, h, w) = t.dims4()?;
                Value::Features(t.permute((0, 2, 3, 1))?.contiguous()?.reshape((b, h, w * c))?)
            }
            features => features,
        },
    };

    Ok(match (layer.activation, y) {
        (Activation::Linear, y) => y,
        (Activation::Relu, Value::Spatial(t)) => Value::Spatial(t.relu()?),
        (Activation::Relu, Value::Features(t)) => Value::Features(t.relu()?),
        (Activation::Sigmoid, Value::Spatial(t)) => Value::Spatial(candle_nn::ops::sigmoid(&t)?),
        (Activation::Sigmoid, Value::Features(t)) => Value::Features(candle_nn::ops::sigmoid(&t)?),
    })
}
