//! Configuration file loading for Sandcell
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError};

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "pool_size must be at least 1".to_string(),
            ));
        }
        if self.interpreter.is_empty() {
            return Err(ConfigError::Invalid(
                "interpreter command must not be empty".to_string(),
            ));
        }
        // Every execution needs a watchdog deadline; without one a hung
        // interpreter would pin its slot forever.
        if self.default_limits.wall_time.is_none() {
            return Err(ConfigError::Invalid(
                "default_limits.wall_time must be set".to_string(),
            ));
        }
        if let Some(ref cache) = self.package_cache
            && cache.writable
        {
            return Err(ConfigError::Invalid(
                "package_cache must be read-only".to_string(),
            ));
        }

        Ok(())
    }
}
