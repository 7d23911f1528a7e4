//! Name-matching heuristic
//!
//! Pairs target slots with legacy variable names. For one slot,
//! [`NameMatcher::candidates`] returns every admissible variable ordered by
//! [`MatchTier`], most specific first; within a tier the checkpoint read
//! order is kept, so results are reproducible for a given checkpoint.
//!
//! A variable is admissible for a slot only when:
//! - it is not excluded (optimizer state, step counters),
//! - its kernel/bias token agrees with the slot kind,
//! - its family token (convolution or dense), if any, agrees with the layer kind,
//! - below the exact-scope tier, its scope does not name another known layer.

use crate::names::{NameRules, variable_scope};
use crate::schema::{TargetSchema, TargetSlot};
use drumscribe_common::MatchRules;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Match confidence, most specific first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Normalized scope segment equals the normalized layer name
    ExactScope,
    /// Normalized variable name contains the normalized layer name
    LayerName,
    /// Variable and layer carry the same family token
    LayerFamily,
}

impl MatchTier {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchTier::ExactScope => "exact_scope",
            MatchTier::LayerName => "layer_name",
            MatchTier::LayerFamily => "layer_family",
        }
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layout change the reconciler may apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Identity,
    /// Swap the two axes of a 2-D dense kernel
    Transpose,
}

/// Transient pairing of a legacy variable with a target slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCandidate<'a> {
    pub variable_name: &'a str,
    /// Position in the name list the candidate was drawn from
    pub variable_index: usize,
    pub slot: &'a TargetSlot,
    pub tier: MatchTier,
    pub transform: Transform,
}

#[derive(Debug, Clone)]
pub struct NameMatcher {
    rules: NameRules,
    /// Normalized names of every layer in the target schema
    known_layers: HashSet<String>,
}

impl NameMatcher {
    pub fn new(rules: &MatchRules) -> Self {
        Self { rules: NameRules::new(rules), known_layers: HashSet::new() }
    }

    /// Matcher that keeps variables scoped to one schema layer away from the others
    pub fn for_schema(rules: &MatchRules, schema: &TargetSchema) -> Self {
        let mut matcher = Self::new(rules);
        matcher.known_layers =
            schema.layers().iter().map(|l| matcher.rules.normalize(&l.name)).collect();
        matcher
    }

    /// Best tier at which `name` may fill `slot`, if any
    pub fn tier(&self, slot: &TargetSlot, name: &str) -> Option<MatchTier> {
        let rules = &self.rules;
        if rules.is_excluded(name) || rules.slot_kind(name) != Some(slot.slot_kind) {
            return None;
        }

        let family = rules.family(name);
        if family.is_some_and(|f| f != slot.layer_kind) {
            return None;
        }

        let layer = rules.normalize(&slot.owning_layer);
        let scope = rules.normalize(variable_scope(name));
        if scope == layer {
            Some(MatchTier::ExactScope)
        } else if self.known_layers.contains(&scope) {
            None
        } else if rules.normalize(name).contains(&layer) {
            Some(MatchTier::LayerName)
        } else if family.is_some() && rules.family(&slot.owning_layer) == family {
            Some(MatchTier::LayerFamily)
        } else {
            None
        }
    }

    /// All admissible variables for `slot`, ordered by tier then by position in `names`
    pub fn candidates<'a, S: AsRef<str>>(
        &self,
        slot: &'a TargetSlot,
        names: &'a [S],
    ) -> Vec<MatchCandidate<'a>> {
        let transform =
            if slot.is_dense_kernel() { Transform::Transpose } else { Transform::Identity };

        let mut candidates: Vec<MatchCandidate<'a>> = names
            .iter()
            .enumerate()
            .filter_map(|(variable_index, name)| {
                let variable_name = name.as_ref();
                self.tier(slot, variable_name).map(|tier| MatchCandidate {
                    variable_name,
                    variable_index,
                    slot,
                    tier,
                    transform,
                })
            })
            .collect();

        // stable: read order survives within a tier
        candidates.sort_by_key(|c| c.tier);
        candidates
    }
}

/// One admissible variable in a dry-run listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedCandidate {
    pub variable: String,
    pub tier: MatchTier,
    pub transform: Transform,
}

/// Dry-run view of one slot's candidates
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotCandidates {
    pub slot: String,
    pub expected_shape: Vec<usize>,
    pub candidates: Vec<ListedCandidate>,
}

/// Candidate lists for every slot without reading any payloads
pub fn describe_candidates<S: AsRef<str>>(
    matcher: &NameMatcher,
    schema: &TargetSchema,
    names: &[S],
) -> Vec<SlotCandidates> {
    schema
        .slots()
        .map(|slot| SlotCandidates {
            slot: slot.key(),
            expected_shape: slot.expected_shape.clone(),
            candidates: matcher
                .candidates(slot, names)
                .into_iter()
                .map(|c| ListedCandidate {
                    variable: c.variable_name.to_string(),
                    tier: c.tier,
                    transform: c.transform,
                })
                .collect(),
        })
        .collect()
}
