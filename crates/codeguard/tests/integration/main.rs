//! Integration tests for codeguard
//!
//! These tests run real Python code and need a `python3` interpreter on PATH.
//! Run with: cargo test -p codeguard --features integration-tests
//!
//! Tests that need a Docker daemon and the `python:3.10-slim` image are marked
//! `#[ignore]`. To include them:
//!    cargo test -p codeguard --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::time::Duration;

use codeguard::config::Config;

mod analyzer;
mod config_loading;
mod container_execution;
mod subprocess_execution;

/// Budget for snippets expected to finish quickly
pub(crate) const QUICK: Duration = Duration::from_secs(10);

/// Config that never tries the container runtime
pub(crate) fn subprocess_only_config() -> Config {
    let mut config = Config::default();
    config.container.enabled = false;
    config
}
