//! Configuration types and utilities

use crate::{DrumscribeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[cfg(test)]
mod tests;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "DRUMSCRIBE_";

/// Main migration configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub matching: MatchRules,
    pub init: InitConfig,
    pub smoke: SmokeConfig,
    pub output: OutputConfig,
}

/// Token rules used to pair legacy variable names with target slots.
///
/// The defaults come from the naming used by the drum transcription
/// checkpoints; other legacy naming schemes need their own token lists.
/// All comparisons are case-insensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchRules {
    /// Characters removed before comparing a variable scope with a layer name
    pub separators: String,
    /// Tokens marking a convolution-family variable or layer
    pub conv_tokens: Vec<String>,
    /// Tokens marking a dense / fully-connected variable or layer
    pub dense_tokens: Vec<String>,
    /// Tokens marking a kernel (weight matrix) variable
    pub kernel_tokens: Vec<String>,
    /// Tokens marking a bias variable
    pub bias_tokens: Vec<String>,
    /// Substrings of variables that are never candidates (optimizer state, counters)
    pub exclude: Vec<String>,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            separators: "_-".to_string(),
            conv_tokens: strings(&["conv"]),
            dense_tokens: strings(&["dense", "fc", "fully_connected", "logits", "probs", "values"]),
            kernel_tokens: strings(&["kernel", "weights"]),
            bias_tokens: strings(&["bias", "biases"]),
            exclude: strings(&[
                "/adam",
                "/momentum",
                "/rmsprop",
                "/exponentialmovingaverage",
                "global_step",
                "beta1_power",
                "beta2_power",
            ]),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Default-initialization settings for slots that receive no legacy tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    pub seed: u64,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self { seed: 42 }
    }
}

/// Diagnostic forward pass settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokeConfig {
    pub enabled: bool,
    /// NHWC dummy input shape; the schema's own input shape is used when unset
    pub input_shape: Option<Vec<usize>>,
}

impl Default for SmokeConfig {
    fn default() -> Self {
        Self { enabled: true, input_shape: None }
    }
}

/// Output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write `<output>.meta.json` next to the converted weights
    pub write_sidecar: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { write_sidecar: true }
    }
}

impl MigrationConfig {
    /// Load configuration from a TOML or JSON file, chosen by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DrumscribeError::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content).map_err(|e| {
                DrumscribeError::Config(format!("invalid JSON in {}: {e}", path.display()))
            })?,
            Some("toml") | None => toml::from_str(&content).map_err(|e| {
                DrumscribeError::Config(format!("invalid TOML in {}: {e}", path.display()))
            })?,
            Some(other) => {
                return Err(DrumscribeError::Config(format!(
                    "unsupported config extension `.{other}` (expected .toml or .json)"
                )));
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DRUMSCRIBE_*` environment overrides in place
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(seed) = env_var("SEED") {
            self.init.seed = seed
                .parse()
                .map_err(|_| DrumscribeError::Config(format!("invalid DRUMSCRIBE_SEED: {seed}")))?;
        }

        if let Some(flag) = env_var("SMOKE") {
            self.smoke.enabled = parse_bool(&flag).ok_or_else(|| {
                DrumscribeError::Config(format!("invalid DRUMSCRIBE_SMOKE: {flag}"))
            })?;
        }

        if let Some(shape) = env_var("SMOKE_INPUT") {
            self.smoke.input_shape = Some(parse_shape(&shape)?);
        }

        if let Some(list) = env_var("EXCLUDE") {
            for pattern in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let pattern = pattern.to_lowercase();
                if !self.matching.exclude.contains(&pattern) {
                    self.matching.exclude.push(pattern);
                }
            }
        }

        Ok(())
    }

    /// Merge another configuration into this one.
    ///
    /// Sections of `other` that differ from their defaults take precedence.
    pub fn merge_with(&mut self, other: MigrationConfig) {
        if other.matching != MatchRules::default() {
            self.matching = other.matching;
        }
        if other.init != InitConfig::default() {
            self.init = other.init;
        }
        if other.smoke.enabled != SmokeConfig::default().enabled {
            self.smoke.enabled = other.smoke.enabled;
        }
        if other.smoke.input_shape.is_some() {
            self.smoke.input_shape = other.smoke.input_shape;
        }
        if other.output != OutputConfig::default() {
            self.output = other.output;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let rules = &self.matching;
        let required =
            [("kernel_tokens", &rules.kernel_tokens), ("bias_tokens", &rules.bias_tokens)];
        for (label, tokens) in required {
            if tokens.is_empty() {
                return Err(DrumscribeError::Config(format!("matching.{label} must not be empty")));
            }
        }

        let all_tokens = rules
            .conv_tokens
            .iter()
            .chain(&rules.dense_tokens)
            .chain(&rules.kernel_tokens)
            .chain(&rules.bias_tokens)
            .chain(&rules.exclude);
        for token in all_tokens {
            if token.trim().is_empty() {
                return Err(DrumscribeError::Config(
                    "matching tokens must not be blank".to_string(),
                ));
            }
        }

        if let Some(shape) = &self.smoke.input_shape {
            validate_input_shape(shape)?;
        }

        Ok(())
    }
}

/// Loads configuration with precedence: defaults < file < environment
#[derive(Debug, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: Option<&Path>) -> Result<MigrationConfig> {
        let mut config = match path {
            Some(path) => {
                tracing::debug!("Loading migration config from {}", path.display());
                MigrationConfig::from_file(path)?
            }
            None => MigrationConfig::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{suffix}")).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a shape written as `1x100x229x1` or `1,100,229,1`
pub fn parse_shape(value: &str) -> Result<Vec<usize>> {
    let shape = value
        .split(|c| c == 'x' || c == ',')
        .map(|d| d.trim().parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| DrumscribeError::Config(format!("invalid shape: {value}")))?;
    validate_input_shape(&shape)?;
    Ok(shape)
}

fn validate_input_shape(shape: &[usize]) -> Result<()> {
    if shape.len() != 4 || shape.contains(&0) {
        return Err(DrumscribeError::Config(format!(
            "smoke input shape must be 4-D NHWC with non-zero dims, got {shape:?}"
        )));
    }
    Ok(())
}
