//! Legacy variable name predicates
//!
//! Small string helpers shared by the matcher. Rules arrive as a
//! [`MatchRules`] value; [`NameRules`] lowercases the token lists once so
//! every comparison is case-insensitive.

use crate::schema::{LayerKind, SlotKind};
use drumscribe_common::MatchRules;

/// Lowercased copy of the configured token lists
#[derive(Debug, Clone)]
pub struct NameRules {
    separators: Vec<char>,
    conv_tokens: Vec<String>,
    dense_tokens: Vec<String>,
    kernel_tokens: Vec<String>,
    bias_tokens: Vec<String>,
    exclude: Vec<String>,
}

fn lowered(tokens: &[String]) -> Vec<String> {
    tokens.iter().map(|t| t.to_lowercase()).filter(|t| !t.is_empty()).collect()
}

fn contains_any(haystack: &str, tokens: &[String]) -> bool {
    tokens.iter().any(|t| haystack.contains(t.as_str()))
}

impl NameRules {
    pub fn new(rules: &MatchRules) -> Self {
        Self {
            separators: rules.separators.chars().collect(),
            conv_tokens: lowered(&rules.conv_tokens),
            dense_tokens: lowered(&rules.dense_tokens),
            kernel_tokens: lowered(&rules.kernel_tokens),
            bias_tokens: lowered(&rules.bias_tokens),
            exclude: lowered(&rules.exclude),
        }
    }

    /// Lowercase and drop separator characters: `Dense_Out` -> `denseout`
    pub fn normalize(&self, name: &str) -> String {
        name.to_lowercase().chars().filter(|c| !self.separators.contains(c)).collect()
    }

    /// Optimizer slots and bookkeeping counters are never candidates
    pub fn is_excluded(&self, name: &str) -> bool {
        contains_any(&name.to_lowercase(), &self.exclude)
    }

    /// Which slot kind a variable may fill. Kernel tokens take precedence.
    pub fn slot_kind(&self, name: &str) -> Option<SlotKind> {
        let lower = name.to_lowercase();
        if contains_any(&lower, &self.kernel_tokens) {
            Some(SlotKind::Kernel)
        } else if contains_any(&lower, &self.bias_tokens) {
            Some(SlotKind::Bias)
        } else {
            None
        }
    }

    /// Layer family a name carries: convolution tokens win over dense tokens
    pub fn family(&self, name: &str) -> Option<LayerKind> {
        let lower = name.to_lowercase();
        if contains_any(&lower, &self.conv_tokens) {
            Some(LayerKind::Conv2d)
        } else if contains_any(&lower, &self.dense_tokens) {
            Some(LayerKind::Dense)
        } else {
            None
        }
    }
}

/// The scope segment directly above the leaf: `model/conv1/weights` -> `conv1`.
///
/// A name without `/` is its own scope.
pub fn variable_scope(name: &str) -> &str {
    let mut parts = name.rsplit('/');
    let leaf = parts.next().unwrap_or(name);
    parts.next().unwrap_or(leaf)
}
