//! Migration coverage report

use crate::schema::SlotKind;
use drumscribe_common::format_shape;
use serde::Serialize;
use std::fmt;

/// A candidate the reconciler turned down
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub variable: String,
    pub reason: String,
}

/// What happened to one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SlotOutcome {
    Assigned { variable: String },
    AssignedTransposed { variable: String },
    /// Every offered candidate was rejected
    ShapeMismatch { rejected: Vec<Rejection> },
    NoCandidate,
    /// The only matching variables were unreadable
    ReadError { variable: String, reason: String },
}

impl SlotOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SlotOutcome::Assigned { .. } => "assigned",
            SlotOutcome::AssignedTransposed { .. } => "assigned_transposed",
            SlotOutcome::ShapeMismatch { .. } => "shape_mismatch",
            SlotOutcome::NoCandidate => "no_candidate",
            SlotOutcome::ReadError { .. } => "read_error",
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, SlotOutcome::Assigned { .. } | SlotOutcome::AssignedTransposed { .. })
    }

    /// Legacy variable that now populates the slot
    pub fn source_variable(&self) -> Option<&str> {
        match self {
            SlotOutcome::Assigned { variable } | SlotOutcome::AssignedTransposed { variable } => {
                Some(variable)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentResult {
    /// `<layer>/<kind>`
    pub slot: String,
    pub layer: String,
    pub kind: SlotKind,
    pub expected_shape: Vec<usize>,
    #[serde(flatten)]
    pub outcome: SlotOutcome,
}

impl fmt::Display for AssignmentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = format_shape(&self.expected_shape);
        write!(f, "{} {shape}: {}", self.slot, self.outcome.label())?;
        match &self.outcome {
            SlotOutcome::Assigned { variable } | SlotOutcome::AssignedTransposed { variable } => {
                write!(f, " <- {variable}")
            }
            SlotOutcome::ShapeMismatch { rejected } => {
                let reasons: Vec<String> =
                    rejected.iter().map(|r| format!("{}: {}", r.variable, r.reason)).collect();
                write!(f, " ({})", reasons.join("; "))
            }
            SlotOutcome::ReadError { variable, reason } => write!(f, " ({variable}: {reason})"),
            SlotOutcome::NoCandidate => Ok(()),
        }
    }
}

/// A checkpoint entry excluded from matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnreadableVariable {
    pub name: String,
    pub reason: String,
}

/// Outcome of one migration run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationReport {
    pub schema: String,
    pub schema_version: u32,
    pub total_variables_read: usize,
    pub total_slots: usize,
    pub assigned_count: usize,
    /// One entry per slot, in schema order
    pub per_slot_results: Vec<AssignmentResult>,
    pub read_errors: Vec<UnreadableVariable>,
    /// Readable variables no slot took
    pub unused_variables: Vec<String>,
}

impl MigrationReport {
    /// Fraction of slots populated from the checkpoint
    pub fn coverage(&self) -> f64 {
        if self.total_slots == 0 {
            return 1.0;
        }
        self.assigned_count as f64 / self.total_slots as f64
    }

    pub fn is_complete(&self) -> bool {
        self.assigned_count == self.total_slots
    }

    pub fn summary(&self) -> String {
        format!("{}/{} slots assigned", self.assigned_count, self.total_slots)
    }

    pub fn result(&self, slot: &str) -> Option<&AssignmentResult> {
        self.per_slot_results.iter().find(|r| r.slot == slot)
    }

    /// One line per slot followed by the summary line
    pub fn lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.per_slot_results.iter().map(|r| r.to_string()).collect();
        lines.push(self.summary());
        lines
    }

    /// Emit the report through `tracing`: assigned slots at info, the rest at warn
    pub fn log(&self) {
        for result in &self.per_slot_results {
            if result.outcome.is_assigned() {
                tracing::info!("{result}");
            } else {
                tracing::warn!("{result}");
            }
        }
        for unreadable in &self.read_errors {
            tracing::warn!("unreadable variable {}: {}", unreadable.name, unreadable.reason);
        }
        if !self.unused_variables.is_empty() {
            tracing::debug!("unused variables: {}", self.unused_variables.join(", "));
        }
        tracing::info!("{}", self.summary());
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
