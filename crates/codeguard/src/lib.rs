//! A library for fail-safe dynamic analysis of untrusted Python snippets.
//!
//! Codeguard runs a snippet once, classifies how it failed into a fixed bug
//! taxonomy, and never lets a broken environment turn into an error for the
//! caller. Execution is tiered: an isolated container is preferred, a plain
//! subprocess is used when the container runtime is unavailable and the code
//! passes a lexical import filter, and otherwise the analysis is skipped with
//! an explanatory note.
//!
//! # Features
//!
//! - **Tiered execution**: container first, guarded subprocess second, documented skip last.
//! - **Container isolation**: no network, read-only code mount, memory, CPU and process limits.
//! - **Bug taxonomy**: runtime faults map to five categories with structured findings.
//! - **TOML configuration**: images, interpreters, limits and the import deny-list.
//!
//! ```no_run
//! # async fn demo() {
//! use std::time::Duration;
//! use codeguard::{Analyzer, Category, Config};
//!
//! let analyzer = Analyzer::connect(&Config::default()).await;
//! let classification = analyzer.analyze("1 / 0", Duration::from_secs(5)).await;
//! assert!(classification.is_found(Category::MissingCornerCase));
//! # }
//! ```

pub use backend::{Backend, BackendError, ContainerBackend, SubprocessBackend};
pub use classifier::classify;
pub use config::{Config, ConfigError, EXAMPLE_CONFIG};
pub use executor::{Analyzer, Outcome};
pub use filter::{FilterVerdict, SafetyFilter};
pub use types::{
    BackendKind, Category, Classification, ExecutionRequest, FaultKind, Finding,
    RawExecutionResult,
};
pub use wrapper::WrapperScript;

pub mod backend;
pub mod classifier;
pub mod config;
pub mod executor;
pub mod filter;
pub mod record;
pub mod types;
pub mod wrapper;
