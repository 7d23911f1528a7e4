//! Migration driver
//!
//! For every slot in schema order: ask the matcher for candidates, run the
//! reconciler over them in priority order, and assign the first accepted
//! tensor. Slot-level problems become [`SlotOutcome`] values; only opening the
//! checkpoint can fail.

use crate::matcher::{MatchTier, NameMatcher};
use crate::model::{ParamSource, TargetModel};
use crate::reconcile::{Reconciliation, reconcile, transpose_2d};
use crate::report::{AssignmentResult, MigrationReport, Rejection, SlotOutcome, UnreadableVariable};
use crate::schema::{TargetSchema, TargetSlot};
use drumscribe_checkpoint::{Checkpoint, CheckpointReader, resolve_prefix};
use drumscribe_common::{MigrationConfig, Result};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of one run: the populated model and what happened to each slot
#[derive(Debug, Clone)]
pub struct Migration {
    pub model: TargetModel,
    pub report: MigrationReport,
}

/// Runs migrations against one target schema. Holds no per-run state.
#[derive(Debug, Clone)]
pub struct Migrator {
    schema: Arc<TargetSchema>,
    matcher: NameMatcher,
    seed: u64,
}

impl Migrator {
    pub fn new(schema: Arc<TargetSchema>, config: &MigrationConfig) -> Self {
        let matcher = NameMatcher::for_schema(&config.matching, &schema);
        Self { schema, matcher, seed: config.init.seed }
    }

    pub fn schema(&self) -> &TargetSchema {
        &self.schema
    }

    /// Read the checkpoint at `path` (prefix, `.index` file or directory) and migrate it.
    ///
    /// Fails only when the checkpoint cannot be opened.
    pub fn submit(&self, path: &Path) -> Result<Migration> {
        let prefix = resolve_prefix(path)?;
        let checkpoint = CheckpointReader::new(&prefix).read()?;
        Ok(self.migrate(&checkpoint))
    }

    /// Visit every slot once. Never fails.
    pub fn migrate(&self, checkpoint: &Checkpoint) -> Migration {
        info!(
            "Migrating {} variables from {} into {} ({} slots)",
            checkpoint.variables.len(),
            checkpoint.prefix.display(),
            self.schema.label(),
            self.schema.slot_count()
        );

        let readable: Vec<&str> = checkpoint.names().collect();
        let unreadable: Vec<&str> =
            checkpoint.read_errors.iter().map(|e| e.name.as_str()).collect();

        let mut model = TargetModel::initialize(Arc::clone(&self.schema), self.seed);
        let mut results = Vec::with_capacity(self.schema.slot_count());
        let mut consumed: BTreeSet<usize> = BTreeSet::new();

        for (index, slot) in self.schema.slots().enumerate() {
            let outcome =
                self.migrate_slot(index, slot, checkpoint, &readable, &unreadable, &mut model);
            if let Some(variable) = outcome.source_variable()
                && let Some(position) = readable.iter().position(|n| *n == variable)
            {
                consumed.insert(position);
            }
            debug!("{} -> {}", slot.key(), outcome.label());

            results.push(AssignmentResult {
                slot: slot.key(),
                layer: slot.owning_layer.clone(),
                kind: slot.slot_kind,
                expected_shape: slot.expected_shape.clone(),
                outcome,
            });
        }

        let assigned_count = results.iter().filter(|r| r.outcome.is_assigned()).count();
        let report = MigrationReport {
            schema: self.schema.name.clone(),
            schema_version: self.schema.version,
            total_variables_read: checkpoint.variables.len(),
            total_slots: results.len(),
            assigned_count,
            per_slot_results: results,
            read_errors: checkpoint
                .read_errors
                .iter()
                .map(|e| UnreadableVariable { name: e.name.clone(), reason: e.reason.to_string() })
                .collect(),
            unused_variables: readable
                .iter()
                .enumerate()
                .filter(|(i, _)| !consumed.contains(i))
                .map(|(_, n)| n.to_string())
                .collect(),
        };

        Migration { model, report }
    }

    fn migrate_slot(
        &self,
        index: usize,
        slot: &TargetSlot,
        checkpoint: &Checkpoint,
        readable: &[&str],
        unreadable: &[&str],
        model: &mut TargetModel,
    ) -> SlotOutcome {
        let candidates = self.matcher.candidates(slot, readable);
        let mut rejected = Vec::new();
        let mut best_rejected_tier: Option<MatchTier> = None;

        for candidate in &candidates {
            let variable = &checkpoint.variables[candidate.variable_index];

            let (data, transposed) = match reconcile(candidate, variable) {
                Reconciliation::Identity => (variable.data.clone(), false),
                Reconciliation::Transposed => {
                    let (rows, cols) = (variable.shape[0], variable.shape[1]);
                    match transpose_2d(&variable.data, rows, cols, variable.dtype.size_in_bytes()) {
                        Some(data) => (data, true),
                        None => {
                            best_rejected_tier.get_or_insert(candidate.tier);
                            rejected.push(Rejection {
                                variable: variable.name.clone(),
                                reason: "payload does not fill its shape".to_string(),
                            });
                            continue;
                        }
                    }
                }
                Reconciliation::Mismatch(mismatch) => {
                    debug!("{}: rejected {} ({mismatch})", slot.key(), variable.name);
                    best_rejected_tier.get_or_insert(candidate.tier);
                    rejected.push(Rejection {
                        variable: variable.name.clone(),
                        reason: mismatch.to_string(),
                    });
                    continue;
                }
            };

            let source = ParamSource::Legacy { variable: variable.name.clone(), transposed };
            if !model.assign(index, data, source) {
                best_rejected_tier.get_or_insert(candidate.tier);
                rejected.push(Rejection {
                    variable: variable.name.clone(),
                    reason: "payload length disagrees with slot shape".to_string(),
                });
                continue;
            }

            let variable = variable.name.clone();
            return if transposed {
                SlotOutcome::AssignedTransposed { variable }
            } else {
                SlotOutcome::Assigned { variable }
            };
        }

        // unreadable variables win when they rank no lower than the first rejection
        let unreadable_match = self
            .matcher
            .candidates(slot, unreadable)
            .into_iter()
            .next()
            .filter(|c| best_rejected_tier.is_none_or(|tier| c.tier <= tier));

        if let Some(candidate) = unreadable_match {
            let reason = checkpoint
                .read_errors
                .iter()
                .find(|e| e.name == candidate.variable_name)
                .map(|e| e.reason.to_string())
                .unwrap_or_default();
            return SlotOutcome::ReadError { variable: candidate.variable_name.to_string(), reason };
        }

        if rejected.is_empty() {
            SlotOutcome::NoCandidate
        } else {
            SlotOutcome::ShapeMismatch { rejected }
        }
    }
}
