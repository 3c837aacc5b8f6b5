//! Environment variable overrides for the runtime configuration

use std::env;
use std::str::FromStr;

use tracing::warn;

use super::RuntimeConfig;

/// Environment variable prefix for ORE configuration
pub const ENV_PREFIX: &str = "ORE_";

/// Reads `ORE_*` variables on top of a base configuration
pub struct EnvOverrides {
    base_config: RuntimeConfig,
    lookup: Box<dyn Fn(&str) -> Option<String>>,
}

impl EnvOverrides {
    /// Create a new provider reading the process environment
    pub fn new(base_config: RuntimeConfig) -> Self {
        Self {
            base_config,
            lookup: Box::new(|key| env::var(key).ok()),
        }
    }

    /// Create a provider with a custom variable source
    pub fn with_lookup<F>(base_config: RuntimeConfig, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + 'static,
    {
        Self {
            base_config,
            lookup: Box::new(lookup),
        }
    }

    /// Parse an environment variable with the ORE prefix
    fn parse_env<T: FromStr>(&self, key: &str, default: T) -> T
    where
        T::Err: std::fmt::Display,
    {
        let env_key = format!("{}{}", ENV_PREFIX, key);
        match (self.lookup)(&env_key) {
            Some(value) => match value.trim().parse::<T>() {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(key = %env_key, error = %e, "Ignoring unparseable environment variable");
                    default
                }
            },
            None => default,
        }
    }

    /// Parse a boolean environment variable
    fn parse_bool_env(&self, key: &str, default: bool) -> bool {
        let env_key = format!("{}{}", ENV_PREFIX, key);
        match (self.lookup)(&env_key) {
            Some(value) => match value.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "y" | "on" => true,
                "false" | "0" | "no" | "n" | "off" => false,
                _ => {
                    warn!(key = %env_key, "Ignoring unparseable boolean environment variable");
                    default
                }
            },
            None => default,
        }
    }

    /// Build the configuration
    pub fn apply(self) -> RuntimeConfig {
        let base = &self.base_config;
        RuntimeConfig {
            slab_validation_enabled: self.parse_bool_env("SLAB_VALIDATION", base.slab_validation_enabled),
            stack_depth_limit: self.parse_env("STACK_DEPTH_LIMIT", base.stack_depth_limit),
            execution_stack_size: self.parse_env("EXECUTION_STACK_SIZE", base.execution_stack_size),
            slab_page_capacity: self.parse_env("SLAB_PAGE_CAPACITY", base.slab_page_capacity).max(2),
            program_cache_capacity: self.parse_env("PROGRAM_CACHE_CAPACITY", base.program_cache_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn overrides(vars: &[(&str, &str)]) -> RuntimeConfig {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        EnvOverrides::with_lookup(RuntimeConfig::default(), move |key| vars.get(key).cloned()).apply()
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = overrides(&[("ORE_SLAB_VALIDATION", "yes"), ("ORE_STACK_DEPTH_LIMIT", "12")]);
        assert!(config.slab_validation_enabled);
        assert_eq!(config.stack_depth_limit, 12);
    }

    #[test_log::test]
    fn test_bad_values_keep_base() {
        let config = overrides(&[("ORE_STACK_DEPTH_LIMIT", "many"), ("ORE_SLAB_VALIDATION", "perhaps")]);
        assert_eq!(config, RuntimeConfig::default());
    }
}
