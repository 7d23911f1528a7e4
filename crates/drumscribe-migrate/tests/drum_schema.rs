//! Partial migration into the built-in drum transcription architecture.

use drumscribe_checkpoint::BundleWriter;
use drumscribe_common::{DType, MigrationConfig};
use drumscribe_migrate::{Migrator, SlotOutcome, SmokeOutcome, TargetSchema, run_smoke_check};
use std::sync::Arc;
use tempfile::TempDir;

fn zeros(shape: &[usize]) -> Vec<f32> {
    vec![0.0; shape.iter().product()]
}

#[test]
fn partial_checkpoint_fills_matching_slots_and_keeps_shapes_consistent() {
    let dir = TempDir::new().unwrap();
    let prefix = dir.path().join("model.ckpt-100");
    let mut writer = BundleWriter::new(&prefix);
    for (name, shape) in [
        ("conv1/weights", vec![3, 3, 1, 32]),
        ("conv1/biases", vec![32]),
        ("conv1/weights/Adam", vec![3, 3, 1, 32]),
        ("conv2/weights", vec![3, 3, 32, 32]),
        ("conv3/weights", vec![3, 3, 32, 64]),
        ("onset_probs/kernel", vec![512, 9]),
        ("velocity_values/kernel", vec![9, 512]),
    ] {
        writer.add_f32(name, &shape, &zeros(&shape)).unwrap();
    }
    writer.add("global_step", DType::I64, &[], &100i64.to_le_bytes()).unwrap();
    writer.finish().unwrap();

    let schema = Arc::new(TargetSchema::drum_default().unwrap());
    let migration = Migrator::new(schema, &MigrationConfig::default()).submit(&prefix).unwrap();
    let report = &migration.report;

    let labels: Vec<(&str, &str)> =
        report.per_slot_results.iter().map(|r| (r.slot.as_str(), r.outcome.label())).collect();
    assert_eq!(
        labels,
        [
            ("conv1/kernel", "assigned"),
            ("conv1/bias", "assigned"),
            ("conv2/kernel", "assigned"),
            // conv1/biases belongs to conv1 and is not offered to other layers
            ("conv2/bias", "no_candidate"),
            ("conv3/kernel", "assigned"),
            ("conv3/bias", "no_candidate"),
            ("fc/kernel", "no_candidate"),
            ("fc/bias", "no_candidate"),
            ("onset_probs/kernel", "assigned"),
            ("onset_probs/bias", "no_candidate"),
            ("velocity_values/kernel", "assigned_transposed"),
            ("velocity_values/bias", "no_candidate"),
        ]
    );
    assert_eq!(report.summary(), "6/12 slots assigned");
    assert_eq!(
        report.result("conv1/bias").unwrap().outcome,
        SlotOutcome::Assigned { variable: "conv1/biases".into() }
    );
    assert_eq!(report.unused_variables, ["conv1/weights/Adam", "global_step"]);

    // short window: time axis is free, the mel axis is fixed by the fc layer
    match run_smoke_check(&migration.model, Some(&[1, 4, 229, 1]), 0) {
        SmokeOutcome::Passed { outputs, .. } => {
            let shapes: Vec<(&str, &[usize])> =
                outputs.iter().map(|o| (o.layer.as_str(), o.shape.as_slice())).collect();
            assert_eq!(
                shapes,
                [("onset_probs", &[1, 4, 9][..]), ("velocity_values", &[1, 4, 9][..])]
            );
        }
        other => panic!("smoke pass failed: {other:?}"),
    }
}
