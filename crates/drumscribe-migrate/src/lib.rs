//! Checkpoint migration for drumscribe
//!
//! Moves parameters from a flat legacy checkpoint (variable name to tensor)
//! into a layered [`TargetModel`] described by a [`TargetSchema`]:
//!
//! 1. [`matcher`] pairs each slot with candidate variable names
//! 2. [`reconcile`] accepts a candidate as-is or transposed, or rejects it
//! 3. [`Migrator`] drives both over every slot and builds a [`MigrationReport`]
//! 4. [`writer`] persists the model as safetensors; [`smoke`] checks its shapes
//!
//! Migration is best-effort. Slots that cannot be filled keep their default
//! initialization and are listed in the report.

pub mod matcher;
pub mod model;
pub mod names;
pub mod orchestrator;
pub mod reconcile;
pub mod report;
pub mod schema;
pub mod smoke;
pub mod writer;

pub use matcher::{
    MatchCandidate, MatchTier, NameMatcher, SlotCandidates, Transform, describe_candidates,
};
pub use model::{ParamSource, SlotTensor, TargetModel};
pub use orchestrator::{Migration, Migrator};
pub use reconcile::{Mismatch, Reconciliation, reconcile};
pub use report::{AssignmentResult, MigrationReport, SlotOutcome};
pub use schema::{LayerKind, SlotKind, TargetLayer, TargetSchema, TargetSlot};
pub use smoke::{SmokeOutcome, run_smoke_check};
pub use writer::{write_model, write_sidecar};
