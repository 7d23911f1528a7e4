//! Shape reconciliation
//!
//! Pure decision of whether a legacy tensor may populate a slot. No I/O.

use crate::matcher::{MatchCandidate, Transform};
use drumscribe_checkpoint::LegacyVariable;
use drumscribe_common::{DType, format_shape};
use std::fmt;

/// Why a candidate was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    Dtype { expected: DType, actual: DType },
    Shape { expected: Vec<usize>, actual: Vec<usize> },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::Dtype { expected, actual } => {
                write!(f, "dtype {actual} != {expected}")
            }
            Mismatch::Shape { expected, actual } => {
                write!(f, "shape {} != {}", format_shape(actual), format_shape(expected))
            }
        }
    }
}

/// Reconciler verdict for one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Shape equals the expected shape
    Identity,
    /// 2-D dense kernel stored with its axes swapped
    Transposed,
    Mismatch(Mismatch),
}

impl Reconciliation {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Reconciliation::Mismatch(_))
    }
}

/// Decide how `variable` may fill `candidate.slot`.
///
/// Dtype must match exactly. Identity is checked before transpose, so a
/// square dense kernel is always taken as stored.
pub fn reconcile(candidate: &MatchCandidate<'_>, variable: &LegacyVariable) -> Reconciliation {
    let slot = candidate.slot;

    if variable.dtype != slot.dtype {
        return Reconciliation::Mismatch(Mismatch::Dtype {
            expected: slot.dtype,
            actual: variable.dtype,
        });
    }

    if variable.shape == slot.expected_shape {
        return Reconciliation::Identity;
    }

    if candidate.transform == Transform::Transpose
        && slot.is_dense_kernel()
        && variable.shape.len() == 2
        && slot.expected_shape.len() == 2
        && variable.shape[0] == slot.expected_shape[1]
        && variable.shape[1] == slot.expected_shape[0]
    {
        return Reconciliation::Transposed;
    }

    Reconciliation::Mismatch(Mismatch::Shape {
        expected: slot.expected_shape.clone(),
        actual: variable.shape.clone(),
    })
}

/// Transpose a row-major `[rows, cols]` buffer of `elem_size`-byte elements.
///
/// Returns `None` when `data` is not exactly `rows * cols * elem_size` bytes.
pub fn transpose_2d(data: &[u8], rows: usize, cols: usize, elem_size: usize) -> Option<Vec<u8>> {
    let expected = rows.checked_mul(cols)?.checked_mul(elem_size)?;
    if data.len() != expected {
        return None;
    }

    let mut out = vec![0u8; data.len()];
    for r in 0..rows {
        for c in 0..cols {
            let src = (r * cols + c) * elem_size;
            let dst = (c * rows + r) * elem_size;
            out[dst..dst + elem_size].copy_from_slice(&data[src..src + elem_size]);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchTier;
    use crate::schema::{LayerKind, SlotKind, TargetSlot};
    use proptest::prelude::*;

    fn slot(layer_kind: LayerKind, slot_kind: SlotKind, shape: &[usize]) -> TargetSlot {
        TargetSlot {
            owning_layer: "layer".into(),
            layer_kind,
            slot_kind,
            expected_shape: shape.to_vec(),
            dtype: DType::F32,
        }
    }

    fn variable(shape: &[usize], dtype: DType) -> LegacyVariable {
        let len = drumscribe_common::byte_len(shape, dtype).unwrap();
        LegacyVariable {
            name: "layer/kernel".into(),
            shape: shape.to_vec(),
            dtype,
            data: vec![0; len],
        }
    }

    fn candidate(slot: &TargetSlot) -> MatchCandidate<'_> {
        MatchCandidate {
            variable_name: "layer/kernel",
            variable_index: 0,
            slot,
            tier: MatchTier::ExactScope,
            transform: if slot.is_dense_kernel() {
                Transform::Transpose
            } else {
                Transform::Identity
            },
        }
    }

    #[test]
    fn dense_kernel_with_swapped_axes_is_transposed() {
        let slot = slot(LayerKind::Dense, SlotKind::Kernel, &[64, 9]);
        let verdict = reconcile(&candidate(&slot), &variable(&[9, 64], DType::F32));
        assert_eq!(verdict, Reconciliation::Transposed);
    }

    #[test]
    fn wrong_width_is_a_shape_mismatch() {
        let slot = slot(LayerKind::Dense, SlotKind::Kernel, &[64, 9]);
        let verdict = reconcile(&candidate(&slot), &variable(&[64, 10], DType::F32));
        assert_eq!(
            verdict,
            Reconciliation::Mismatch(Mismatch::Shape {
                expected: vec![64, 9],
                actual: vec![64, 10],
            })
        );
        assert_eq!(
            match verdict {
                Reconciliation::Mismatch(m) => m.to_string(),
                _ => unreachable!(),
            },
            "shape [64, 10] != [64, 9]"
        );
    }

    #[test]
    fn conv_kernels_are_never_transposed() {
        let slot = slot(LayerKind::Conv2d, SlotKind::Kernel, &[3, 16]);
        let mut candidate = candidate(&slot);
        candidate.transform = Transform::Transpose;
        let verdict = reconcile(&candidate, &variable(&[16, 3], DType::F32));
        assert!(!verdict.is_accepted());
    }

    #[test]
    fn dense_bias_is_never_transposed() {
        let slot = slot(LayerKind::Dense, SlotKind::Bias, &[9]);
        let verdict = reconcile(&candidate(&slot), &variable(&[9], DType::F32));
        assert_eq!(verdict, Reconciliation::Identity);
        assert!(!reconcile(&candidate(&slot), &variable(&[1, 9], DType::F32)).is_accepted());
    }

    #[test]
    fn dtype_mismatch_rejects_even_with_equal_shape() {
        let slot = slot(LayerKind::Conv2d, SlotKind::Bias, &[16]);
        let verdict = reconcile(&candidate(&slot), &variable(&[16], DType::F16));
        assert_eq!(
            verdict,
            Reconciliation::Mismatch(Mismatch::Dtype { expected: DType::F32, actual: DType::F16 })
        );
    }

    #[test]
    fn square_dense_kernel_is_taken_as_stored() {
        let slot = slot(LayerKind::Dense, SlotKind::Kernel, &[8, 8]);
        let verdict = reconcile(&candidate(&slot), &variable(&[8, 8], DType::F32));
        assert_eq!(verdict, Reconciliation::Identity);
    }

    #[test]
    fn transpose_moves_elements() {
        // [[1, 2, 3], [4, 5, 6]] -> [[1, 4], [2, 5], [3, 6]]
        let data: Vec<u8> = [1u16, 2, 3, 4, 5, 6].iter().flat_map(|v| v.to_le_bytes()).collect();
        let out = transpose_2d(&data, 2, 3, 2).unwrap();
        let values: Vec<u16> =
            out.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
        assert_eq!(values, [1, 4, 2, 5, 3, 6]);
        assert!(transpose_2d(&data, 3, 3, 2).is_none());
    }

    proptest! {
        #[test]
        fn accepted_verdicts_respect_shape_rules(
            expected in prop::collection::vec(1usize..6, 1..4),
            actual in prop::collection::vec(1usize..6, 1..4),
            dense in any::<bool>(),
            kernel in any::<bool>(),
        ) {
            let layer_kind = if dense { LayerKind::Dense } else { LayerKind::Conv2d };
            let slot_kind = if kernel { SlotKind::Kernel } else { SlotKind::Bias };
            let slot = slot(layer_kind, slot_kind, &expected);
            let verdict = reconcile(&candidate(&slot), &variable(&actual, DType::F32));

            match verdict {
                Reconciliation::Identity => prop_assert_eq!(&actual, &expected),
                Reconciliation::Transposed => {
                    prop_assert!(slot.is_dense_kernel());
                    prop_assert_ne!(&actual, &expected);
                    let reversed: Vec<usize> = actual.iter().rev().copied().collect();
                    prop_assert_eq!(reversed, expected);
                }
                Reconciliation::Mismatch(_) => {
                    prop_assert_ne!(&actual, &expected);
                }
            }
        }

        #[test]
        fn transposing_twice_restores_the_buffer(
            rows in 1usize..8,
            cols in 1usize..8,
            seed in any::<u8>(),
        ) {
            let data: Vec<u8> =
                (0..rows * cols * 4).map(|i| (i as u8).wrapping_mul(31) ^ seed).collect();
            let once = transpose_2d(&data, rows, cols, 4).unwrap();
            let twice = transpose_2d(&once, cols, rows, 4).unwrap();
            prop_assert_eq!(twice, data);
        }
    }
}
