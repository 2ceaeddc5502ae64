//! Generator configuration.
//!
//! Loaded from JSON by the driver; every field has a default so a config
//! file only needs to name what it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What to do with a construct that cannot be translated or lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Fail the call site; the caller keeps the CPU path.
    #[default]
    Strict,
    /// Drop the statement (or emit an undefined value) and record a warning.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// SPIR-V version as (major, minor).
    pub version: (u8, u8),
    /// Workgroup size of the compute entry point.
    pub local_size: [u32; 3],
    /// Name of the compute entry point.
    pub entry_point: String,
    pub failure_mode: FailureMode,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            version: (1, 3),
            local_size: [256, 1, 1],
            entry_point: "main".to_string(),
            failure_mode: FailureMode::Strict,
        }
    }
}

impl GeneratorConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Switch to skip-and-warn handling of untranslatable constructs.
    pub fn best_effort(mut self) -> Self {
        self.failure_mode = FailureMode::BestEffort;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.failure_mode == FailureMode::Strict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::default();
        assert_eq!(config.version, (1, 3));
        assert_eq!(config.local_size, [256, 1, 1]);
        assert_eq!(config.entry_point, "main");
        assert!(config.is_strict());
        assert!(!config.best_effort().is_strict());
    }

    #[test]
    fn test_partial_json() {
        let config = GeneratorConfig::from_json(r#"{ "local_size": [64, 1, 1], "failure_mode": "best_effort" }"#)
            .unwrap();
        assert_eq!(config.local_size, [64, 1, 1]);
        assert_eq!(config.failure_mode, FailureMode::BestEffort);
        assert_eq!(config.entry_point, "main");
    }

    #[test]
    fn test_rejects_malformed_json() {
        assert!(GeneratorConfig::from_json("{ \"local_size\": 3 }").is_err());
    }
}
