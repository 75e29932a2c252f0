//! Engine and propagation tuning knobs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for the decayed breadth-first event propagation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Per-hop decay applied on top of edge weights, in (0, 1].
    pub default_decay: f32,

    /// Scores below this are dropped from the result set and not expanded.
    pub min_score: f32,

    /// Maximum depth for area-scoped propagation.
    pub scope_depth: u32,

    /// Maximum depth for global propagation.
    pub global_depth: u32,

    /// Activation strength an emitted event starts with.
    pub initial_strength: f32,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            default_decay: 0.5,
            min_score: 0.05,
            scope_depth: 2,
            global_depth: 4,
            initial_strength: 1.0,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cascaded completions beyond this depth are deferred to the next
    /// explicit tick instead of processed inline.
    pub max_cascade_depth: u32,

    pub propagation: PropagationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 4,
            propagation: PropagationConfig::default(),
        }
    }
}

/// Failure to parse a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse engine config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl EngineConfig {
    /// Load from TOML; missing keys fall back to defaults so partial files
    /// are valid.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_cascade_depth, 4);
        assert_eq!(config.propagation.default_decay, 0.5);
        assert_eq!(config.propagation.scope_depth, 2);
        assert!(config.propagation.global_depth > config.propagation.scope_depth);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            max_cascade_depth = 2

            [propagation]
            default_decay = 0.25
            "#,
        )
        .unwrap();

        assert_eq!(config.max_cascade_depth, 2);
        assert_eq!(config.propagation.default_decay, 0.25);
        // Unspecified keys keep their defaults.
        assert_eq!(config.propagation.min_score, 0.05);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
