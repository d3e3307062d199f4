//! Engine configuration
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! quantum = 100
//! stack_size = 1024
//! program_capacity = 4096
//! gc_threshold = 4096
//! ```

use crate::program::PROGRAM_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Instructions executed before a macro yields to the host
    pub quantum: usize,
    /// Value-stack capacity in slots, frames included
    pub stack_size: usize,
    /// Maximum instruction words per program
    pub program_capacity: usize,
    /// Allocations since the last sweep that trigger `maybe_collect`
    pub gc_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            quantum: 100,
            stack_size: 1024,
            program_capacity: PROGRAM_SIZE,
            gc_threshold: 4096,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.quantum == 0 {
            return Err(ConfigError::Invalid("quantum must be at least 1".to_string()));
        }
        if self.stack_size == 0 {
            return Err(ConfigError::Invalid("stack_size must be at least 1".to_string()));
        }
        if self.program_capacity == 0 {
            return Err(ConfigError::Invalid(
                "program_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
