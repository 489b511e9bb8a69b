//! Configuration file loading for codeguard
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;
use std::time::Duration;

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
        if !is_timeout_secs(self.timeout_secs) {
            return Err(ConfigError::Invalid(format!(
                "timeout_secs must be a positive number of seconds, got {}",
                self.timeout_secs
            )));
        }

        let container = &self.container;
        if container.image.trim().is_empty() {
            return Err(ConfigError::Invalid("container image is empty".to_string()));
        }
        if container.interpreter.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "container interpreter is empty".to_string(),
            ));
        }
        if container.memory_mb == 0 {
            return Err(ConfigError::Invalid(
                "container memory_mb must be non-zero".to_string(),
            ));
        }
        if container.cpu_quota <= 0 || container.cpu_period <= 0 {
            return Err(ConfigError::Invalid(
                "container cpu_quota and cpu_period must be positive".to_string(),
            ));
        }
        if container.pids_limit <= 0 {
            return Err(ConfigError::Invalid(
                "container pids_limit must be positive".to_string(),
            ));
        }

        if self.subprocess.interpreter.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "subprocess interpreter is empty".to_string(),
            ));
        }

        for module in &self.filter.denied_modules {
            if !is_module_name(module) {
                return Err(ConfigError::Invalid(format!(
                    "denied module '{module}' is not a valid module name"
                )));
            }
        }

        Ok(())
    }
}

/// Positive and representable as a [`Duration`]
pub fn is_timeout_secs(secs: f64) -> bool {
    Duration::try_from_secs_f64(secs).is_ok_and(|timeout| !timeout.is_zero())
}

/// Dotted Python identifier, e.g. `os` or `xml.etree`
fn is_module_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
