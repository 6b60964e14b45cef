//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load a YAML file, apply `overrides`, then validate the result.
    ///
    /// Command-line overrides may supply fields the file leaves out, so
    /// validation runs only after they are applied.
    pub fn load_with<P, F>(path: P, overrides: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut Config),
    {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Keep only the named tables, preserving their configured order.
    pub fn retain_tables(&mut self, names: &[String]) {
        self.tables.retain(|t| names.iter().any(|n| n == &t.name));
    }
}
