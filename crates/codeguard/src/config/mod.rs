use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::filter::{DEFAULT_DENIED_MODULES, SafetyFilter};

mod loader;

pub use loader::is_timeout_secs;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../codeguard.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for codeguard
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Default wall clock budget per analysis, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// Retry in a subprocess when the container run times out
    #[serde(default)]
    pub container_timeout_fallback: bool,

    #[serde(default)]
    pub container: ContainerSettings,

    #[serde(default)]
    pub subprocess: SubprocessSettings,

    #[serde(default)]
    pub filter: FilterSettings,
}

/// Container backend settings
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSettings {
    /// Try to connect to a container runtime at startup
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interpreter image, pinned to a version
    #[serde(default = "default_image")]
    pub image: String,

    /// Interpreter command inside the image
    #[serde(default = "default_container_interpreter")]
    pub interpreter: String,

    /// Memory ceiling in megabytes (swap is capped at the same value)
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    /// CPU quota per period, in microseconds
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,

    /// CPU period in microseconds
    #[serde(default = "default_cpu_period")]
    pub cpu_period: i64,

    /// Maximum number of processes in the container
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,

    /// Host directory for staged scripts. Must be shareable with the
    /// container runtime. Uses the system temp dir if not specified.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// Subprocess backend settings
#[derive(Debug, Clone, Deserialize)]
pub struct SubprocessSettings {
    /// Allow the subprocess fallback at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interpreter used to run the wrapper (resolved via PATH)
    #[serde(default = "default_subprocess_interpreter")]
    pub interpreter: PathBuf,

    /// Host directory for staged scripts. Uses the system temp dir if not specified.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// Safety pre-filter settings
#[derive(Debug, Clone, Deserialize)]
pub struct FilterSettings {
    /// Modules whose import keeps code out of the subprocess backend
    #[serde(default = "default_denied_modules")]
    pub denied_modules: Vec<String>,
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Default per-analysis timeout
    ///
    /// Falls back to the built-in default when `timeout_secs` has been set to
    /// a value no [`Duration`] can hold.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_timeout_secs()))
    }

    /// Build the safety filter described by this config
    pub fn safety_filter(&self) -> SafetyFilter {
        SafetyFilter::new(self.filter.denied_modules.iter().cloned())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

impl ContainerSettings {
    /// Memory ceiling in bytes
    pub fn memory_bytes(&self) -> i64 {
        i64::try_from(self.memory_mb.saturating_mul(1024 * 1024)).unwrap_or(i64::MAX)
    }
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            image: default_image(),
            interpreter: default_container_interpreter(),
            memory_mb: default_memory_mb(),
            cpu_quota: default_cpu_quota(),
            cpu_period: default_cpu_period(),
            pids_limit: default_pids_limit(),
            scratch_dir: None,
        }
    }
}

impl Default for SubprocessSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interpreter: default_subprocess_interpreter(),
            scratch_dir: None,
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            denied_modules: default_denied_modules(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> f64 {
    5.0
}

fn default_image() -> String {
    "python:3.10-slim".to_string()
}

fn default_container_interpreter() -> String {
    "python".to_string()
}

fn default_memory_mb() -> u64 {
    128
}

fn default_cpu_quota() -> i64 {
    50_000
}

fn default_cpu_period() -> i64 {
    100_000
}

fn default_pids_limit() -> i64 {
    64
}

fn default_subprocess_interpreter() -> PathBuf {
    PathBuf::from("python3")
}

fn default_denied_modules() -> Vec<String> {
    DEFAULT_DENIED_MODULES
        .iter()
        .map(ToString::to_string)
        .collect()
}
