//! Runtime configuration
//!
//! Configuration is read from TOML and can be overridden from environment
//! variables prefixed with `ORE_` (see [`env`]).

pub mod env;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use env::{EnvOverrides, ENV_PREFIX};

/// Error types for configuration operations
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Parsing error
    #[error("Parsing error: {0}")]
    ParseError(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration of a [`crate::Runtime`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Validate the slab graph of every touched account after each commit
    pub slab_validation_enabled: bool,
    /// Maximum depth of nested function invocations
    pub stack_depth_limit: usize,
    /// Stack size in bytes of the thread evaluating a program
    pub execution_stack_size: usize,
    /// Maximum number of elements per slab page
    pub slab_page_capacity: usize,
    /// Soft limit on the number of entries in the shared program cache
    pub program_cache_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            slab_validation_enabled: false,
            stack_depth_limit: 400,
            execution_stack_size: 64 * 1024 * 1024,
            slab_page_capacity: ore_storage::DEFAULT_PAGE_CAPACITY,
            program_cache_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Parse configuration from TOML text; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.as_ref().display(), "Loaded runtime configuration");
        Ok(config)
    }

    /// Serialize configuration to TOML text
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {}", e)))
    }

    /// Apply `ORE_*` environment overrides
    pub fn with_env_overrides(self) -> Self {
        EnvOverrides::new(self).apply()
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.stack_depth_limit == 0 {
            return Err(ConfigError::InvalidConfig("stack_depth_limit must be positive".to_string()));
        }
        if self.slab_page_capacity < 2 {
            return Err(ConfigError::InvalidConfig("slab_page_capacity must be at least 2".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("slab_validation_enabled = true\nstack_depth_limit = 10\n").unwrap();
        assert!(config.slab_validation_enabled);
        assert_eq!(config.stack_depth_limit, 10);
        assert_eq!(config.slab_page_capacity, RuntimeConfig::default().slab_page_capacity);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("slab_page_capacity = 1"),
            Err(ConfigError::InvalidConfig(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("stack_depth_limit = \"deep\""),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let config = RuntimeConfig {
            program_cache_capacity: 8,
            ..RuntimeConfig::default()
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes()).unwrap();
        assert_eq!(RuntimeConfig::from_file(file.path()).unwrap(), config);
    }
}
