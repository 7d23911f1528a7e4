//! In-memory target model
//!
//! Holds one tensor per schema slot. Construction fills every slot with the
//! architecture's default initialization (Glorot-uniform kernels, zero
//! biases) from a seeded generator; the orchestrator then overwrites the
//! slots it can migrate.

use crate::schema::{LayerKind, SlotKind, TargetSchema, TargetSlot};
use drumscribe_common::{DType, num_elements};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::Arc;

/// Where a slot's values came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamSource {
    Default,
    Legacy { variable: String, transposed: bool },
}

/// One populated slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotTensor {
    pub slot: TargetSlot,
    /// Row-major little-endian payload in the slot's expected shape
    pub data: Vec<u8>,
    pub source: ParamSource,
}

impl SlotTensor {
    pub fn to_f32_vec(&self) -> Vec<f32> {
        bytemuck::pod_collect_to_vec(&self.data)
    }

    pub fn is_migrated(&self) -> bool {
        matches!(self.source, ParamSource::Legacy { .. })
    }
}

/// Fan-in and fan-out of a kernel shape
fn fans(layer_kind: LayerKind, shape: &[usize]) -> (usize, usize) {
    match (layer_kind, shape) {
        (LayerKind::Conv2d, [kh, kw, cin, cout]) => (kh * kw * cin, kh * kw * cout),
        (_, [fan_in, fan_out]) => (*fan_in, *fan_out),
        _ => {
            let n = num_elements(shape);
            (n, n)
        }
    }
}

fn default_values(slot: &TargetSlot, rng: &mut ChaCha8Rng) -> Vec<f32> {
    let n = num_elements(&slot.expected_shape);
    match slot.slot_kind {
        SlotKind::Bias => vec![0.0; n],
        SlotKind::Kernel => {
            let (fan_in, fan_out) = fans(slot.layer_kind, &slot.expected_shape);
            let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
            (0..n).map(|_| rng.random_range(-limit..limit)).collect()
        }
    }
}

/// Parameter tree of one target architecture instance
#[derive(Debug, Clone)]
pub struct TargetModel {
    schema: Arc<TargetSchema>,
    params: Vec<SlotTensor>,
}

impl TargetModel {
    /// Default-initialize every slot; identical seeds give identical models
    pub fn initialize(schema: Arc<TargetSchema>, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let params = schema
            .slots()
            .map(|slot| {
                debug_assert_eq!(slot.dtype, DType::F32);
                let values = default_values(slot, &mut rng);
                SlotTensor {
                    slot: slot.clone(),
                    data: bytemuck::cast_slice(&values).to_vec(),
                    source: ParamSource::Default,
                }
            })
            .collect();

        Self { schema, params }
    }

    pub fn schema(&self) -> &TargetSchema {
        &self.schema
    }

    /// Slots in schema order
    pub fn params(&self) -> &[SlotTensor] {
        &self.params
    }

    /// Look up a slot by `<layer>/<kind>`
    pub fn param(&self, key: &str) -> Option<&SlotTensor> {
        self.params.iter().find(|p| p.slot.key() == key)
    }

    pub fn layer_param(&self, layer: &str, kind: SlotKind) -> Option<&SlotTensor> {
        self.params.iter().find(|p| p.slot.owning_layer == layer && p.slot.slot_kind == kind)
    }

    pub fn migrated_count(&self) -> usize {
        self.params.iter().filter(|p| p.is_migrated()).count()
    }

    /// Overwrite slot `index` with a reconciled payload.
    ///
    /// Returns `false` and leaves the slot untouched if the payload length
    /// disagrees with the slot's shape.
    pub(crate) fn assign(&mut self, index: usize, data: Vec<u8>, source: ParamSource) -> bool {
        let Some(param) = self.params.get_mut(index) else {
            return false;
        };
        let expected = drumscribe_common::byte_len(&param.slot.expected_shape, param.slot.dtype);
        if expected != Some(data.len()) {
            return false;
        }
        param.data = data;
        param.source = source;
        true
    }
}
