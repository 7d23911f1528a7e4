//! Target architecture description
//!
//! A [`TargetSchema`] is the destination side of a migration: an ordered
//! layer list where every parameterised layer exposes a kernel slot and
//! (optionally) a bias slot with a fixed expected shape. It is built from a
//! TOML or JSON architecture file and is read-only afterwards. It carries no
//! knowledge of legacy variable names; pairing names with slots is the job of
//! [`crate::matcher`].

use drumscribe_common::{DType, DrumscribeError, Result, format_shape};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Built-in drum transcription architecture
const E_GMD_DRUMS: &str = include_str!("../schemas/e-gmd-drums.toml");

/// Which parameter of a layer a slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Kernel,
    Bias,
}

impl SlotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotKind::Kernel => "kernel",
            SlotKind::Bias => "bias",
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layer type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Conv2d,
    Dense,
    MaxPool2d,
    Flatten,
}

/// Layer operation and its structural hyperparameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerOp {
    /// Stride-1 convolution with `same` padding; kernel stored `[kh, kw, in, filters]`
    Conv2d {
        kernel_size: [usize; 2],
        in_channels: usize,
        filters: usize,
        #[serde(default = "default_true")]
        use_bias: bool,
    },
    /// Fully-connected layer over the last axis; kernel stored `[in, units]`
    Dense {
        in_features: usize,
        units: usize,
        #[serde(default = "default_true")]
        use_bias: bool,
    },
    /// Non-overlapping max pool (stride equals window)
    MaxPool2d { pool_size: [usize; 2] },
    /// Merges the width and channel axes of every row
    Flatten,
}

fn default_true() -> bool {
    true
}

impl LayerOp {
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerOp::Conv2d { .. } => LayerKind::Conv2d,
            LayerOp::Dense { .. } => LayerKind::Dense,
            LayerOp::MaxPool2d { .. } => LayerKind::MaxPool2d,
            LayerOp::Flatten => LayerKind::Flatten,
        }
    }

    /// Expected `(kind, shape)` of every parameter, kernel first
    fn slot_shapes(&self) -> Vec<(SlotKind, Vec<usize>)> {
        let (kernel, bias, use_bias) = match *self {
            LayerOp::Conv2d { kernel_size: [kh, kw], in_channels, filters, use_bias } => {
                (vec![kh, kw, in_channels, filters], filters, use_bias)
            }
            LayerOp::Dense { in_features, units, use_bias } => {
                (vec![in_features, units], units, use_bias)
            }
            LayerOp::MaxPool2d { .. } | LayerOp::Flatten => return Vec::new(),
        };

        let mut slots = vec![(SlotKind::Kernel, kernel)];
        if use_bias {
            slots.push((SlotKind::Bias, vec![bias]));
        }
        slots
    }

    fn dims(&self) -> Vec<usize> {
        match *self {
            LayerOp::Conv2d { kernel_size: [kh, kw], in_channels, filters, .. } => {
                vec![kh, kw, in_channels, filters]
            }
            LayerOp::Dense { in_features, units, .. } => vec![in_features, units],
            LayerOp::MaxPool2d { pool_size: [ph, pw] } => vec![ph, pw],
            LayerOp::Flatten => Vec::new(),
        }
    }
}

/// Activation applied after a layer's operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
}

/// One layer as written in an architecture file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    pub op: LayerOp,
    /// Producing layer; the previous layer when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default)]
    pub output: bool,
}

/// Architecture file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub name: String,
    pub version: u32,
    /// NHWC shape of the diagnostic dummy input
    pub input_shape: Vec<usize>,
    pub layers: Vec<LayerConfig>,
}

/// One shape-typed parameter location
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSlot {
    pub owning_layer: String,
    pub layer_kind: LayerKind,
    pub slot_kind: SlotKind,
    pub expected_shape: Vec<usize>,
    pub dtype: DType,
}

impl TargetSlot {
    /// Tensor name in the converted file, `<layer>/<kind>`
    pub fn key(&self) -> String {
        format!("{}/{}", self.owning_layer, self.slot_kind)
    }

    pub fn is_dense_kernel(&self) -> bool {
        self.layer_kind == LayerKind::Dense && self.slot_kind == SlotKind::Kernel
    }
}

impl fmt::Display for TargetSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key(), format_shape(&self.expected_shape))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetLayer {
    pub name: String,
    pub op: LayerOp,
    /// Resolved producing layer; `None` for the first layer (model input)
    pub input: Option<String>,
    pub activation: Activation,
    pub output: bool,
    pub slots: Vec<TargetSlot>,
}

impl TargetLayer {
    pub fn kind(&self) -> LayerKind {
        self.op.kind()
    }

    pub fn slot(&self, kind: SlotKind) -> Option<&TargetSlot> {
        self.slots.iter().find(|s| s.slot_kind == kind)
    }
}

/// Read-only destination architecture
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSchema {
    pub name: String,
    pub version: u32,
    pub input_shape: Vec<usize>,
    layers: Vec<TargetLayer>,
}

fn schema_error(msg: impl Into<String>) -> DrumscribeError {
    DrumscribeError::Schema(msg.into())
}

impl TargetSchema {
    /// The embedded `e-gmd-drums` architecture
    pub fn drum_default() -> Result<Self> {
        Self::from_toml_str(E_GMD_DRUMS)
    }

    /// Load an architecture file, TOML or JSON by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            schema_error(format!("failed to read {}: {e}", path.display()))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SchemaConfig =
            toml::from_str(content).map_err(|e| schema_error(format!("invalid TOML: {e}")))?;
        Self::from_config(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: SchemaConfig =
            serde_json::from_str(content).map_err(|e| schema_error(format!("invalid JSON: {e}")))?;
        Self::from_config(config)
    }

    /// Resolve layer inputs and derive slots.
    ///
    /// Rejects empty layer lists, duplicate names, forward or unknown `input`
    /// references and zero-sized dimensions.
    pub fn from_config(config: SchemaConfig) -> Result<Self> {
        if config.layers.is_empty() {
            return Err(schema_error(format!("schema `{}` has no layers", config.name)));
        }
        if config.input_shape.len() != 4 || config.input_shape.contains(&0) {
            return Err(schema_error(format!(
                "input_shape must be 4-D NHWC with non-zero dims, got {}",
                format_shape(&config.input_shape)
            )));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut layers = Vec::with_capacity(config.layers.len());
        let mut previous: Option<&str> = None;

        for layer in &config.layers {
            if layer.name.is_empty() || layer.name.contains('/') {
                return Err(schema_error(format!("invalid layer name `{}`", layer.name)));
            }
            if !seen.insert(layer.name.as_str()) {
                return Err(schema_error(format!("duplicate layer `{}`", layer.name)));
            }
            if layer.op.dims().contains(&0) {
                return Err(schema_error(format!(
                    "layer `{}` has a zero-sized dimension",
                    layer.name
                )));
            }

            let input = match &layer.input {
                Some(name) if name == &layer.name || !seen.contains(name.as_str()) => {
                    return Err(schema_error(format!(
                        "layer `{}` reads from `{name}`, which is not an earlier layer",
                        layer.name
                    )));
                }
                Some(name) => Some(name.clone()),
                None => previous.map(str::to_string),
            };

            let slots = layer
                .op
                .slot_shapes()
                .into_iter()
                .map(|(slot_kind, expected_shape)| TargetSlot {
                    owning_layer: layer.name.clone(),
                    layer_kind: layer.op.kind(),
                    slot_kind,
                    expected_shape,
                    dtype: DType::F32,
                })
                .collect();

            layers.push(TargetLayer {
                name: layer.name.clone(),
                op: layer.op.clone(),
                input,
                activation: layer.activation,
                output: layer.output,
                slots,
            });
            previous = Some(layer.name.as_str());
        }

        Ok(Self {
            name: config.name,
            version: config.version,
            input_shape: config.input_shape,
            layers,
        })
    }

    pub fn layers(&self) -> &[TargetLayer] {
        &self.layers
    }

    pub fn layer(&self, name: &str) -> Option<&TargetLayer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Every slot, in layer order, kernel before bias
    pub fn slots(&self) -> impl Iterator<Item = &TargetSlot> {
        self.layers.iter().flat_map(|l| l.slots.iter())
    }

    pub fn slot_count(&self) -> usize {
        self.layers.iter().map(|l| l.slots.len()).sum()
    }

    /// Layers whose activations are model outputs; the last layer when none is flagged
    pub fn output_layers(&self) -> Vec<&TargetLayer> {
        let flagged: Vec<&TargetLayer> = self.layers.iter().filter(|l| l.output).collect();
        if flagged.is_empty() { self.layers.last().into_iter().collect() } else { flagged }
    }

    /// `name@vN`
    pub fn label(&self) -> String {
        format!("{}@v{}", self.name, self.version)
    }
}
