//! World configuration.
//!
//! Loaded from TOML or built in code. Every field is optional in the file;
//! missing fields take their defaults and unknown fields are rejected.
//!
//! ```toml
//! threads = 4
//! chunk_byte_budget = 16384
//! max_entities = 1048576
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::error::{BuildError, ConfigError};
use crate::engine::types::{COMPONENT_CAP, DEFAULT_CHUNK_BYTES};


/// Sizing of a world's storage and worker pool.

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorldConfig {
    /// Worker threads. `0` runs every job inline on the stepping thread.
    pub threads: usize,

    /// Target bytes per chunk; chunk capacity is derived from it per archetype.
    pub chunk_byte_budget: usize,

    /// Upper bound on simultaneously live entities.
    pub max_entities: u64,

    /// Maximum number of registered component types.
    pub component_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(0);
        Self {
            threads,
            chunk_byte_budget: DEFAULT_CHUNK_BYTES,
            max_entities: 1 << 24,
            component_capacity: COMPONENT_CAP,
        }
    }
}

impl WorldConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks value ranges.

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.chunk_byte_budget == 0 {
            return Err(BuildError::InvalidConfig("chunk_byte_budget must be positive".into()));
        }
        if self.max_entities == 0 {
            return Err(BuildError::InvalidConfig("max_entities must be positive".into()));
        }
        if self.max_entities > u32::MAX as u64 + 1 {
            return Err(BuildError::InvalidConfig(format!(
                "max_entities {} exceeds the 32-bit index space",
                self.max_entities
            )));
        }
        if self.component_capacity == 0 || self.component_capacity > COMPONENT_CAP {
            return Err(BuildError::InvalidConfig(format!(
                "component_capacity must be in 1..={COMPONENT_CAP}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = WorldConfig::from_toml_str("threads = 2\nmax_entities = 100\n").unwrap();
        assert_eq!(config.threads, 2);
        assert_eq!(config.max_entities, 100);
        assert_eq!(config.chunk_byte_budget, DEFAULT_CHUNK_BYTES);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            WorldConfig::from_toml_str("thread = 2"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn zero_budget_is_invalid() {
        let config = WorldConfig { chunk_byte_budget: 0, ..WorldConfig::default() };
        assert!(matches!(config.validate(), Err(BuildError::InvalidConfig(_))));
    }
}
