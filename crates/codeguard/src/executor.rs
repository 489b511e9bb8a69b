//! Tiered executor
//!
//! Tries the container backend, then the subprocess backend behind the
//! safety pre-filter, then gives up with a documented skip. Whatever happens,
//! [`Analyzer::analyze`] returns a [`Classification`].

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::backend::{Backend, BackendError, ContainerBackend, SubprocessBackend};
use crate::classifier;
use crate::config::Config;
use crate::filter::{FilterVerdict, SafetyFilter};
use crate::types::{BackendKind, Classification, ExecutionRequest, RawExecutionResult};
use crate::wrapper::WrapperScript;

/// Explanation attached to skipped analyses
pub const SKIPPED_NOTE: &str =
    "Dynamic analysis skipped (container unavailable and code not eligible for subprocess execution)";

/// How a request ended before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// One backend produced a raw result
    Completed {
        backend: BackendKind,
        result: RawExecutionResult,
    },
    /// No backend ran the code
    Skipped { reason: String },
}

impl Outcome {
    /// Classify this outcome
    pub fn classify(&self) -> Classification {
        match self {
            Outcome::Completed { backend, result } => {
                classifier::classify(result).with_backend(*backend)
            }
            Outcome::Skipped { reason } => {
                Classification::skipped(format!("{SKIPPED_NOTE}: {reason}"))
            }
        }
    }
}

/// Runs code through the backend tiers
///
/// The container backend is optional: it is `None` when no runtime handle
/// could be acquired at startup, and the analyzer then starts at the
/// subprocess tier.
#[derive(Debug, Clone)]
pub struct Analyzer<C = ContainerBackend, S = SubprocessBackend> {
    container: Option<C>,
    subprocess: Option<S>,
    filter: SafetyFilter,
    container_timeout_fallback: bool,
}

impl Analyzer {
    /// Build an analyzer from config, acquiring the container runtime handle
    ///
    /// Never fails: an unreachable runtime only disables the container tier.
    pub async fn connect(config: &Config) -> Self {
        let container = if config.container.enabled {
            match ContainerBackend::connect(config.container.clone()).await {
                Ok(backend) => Some(backend),
                Err(e) => {
                    warn!(error = %e, "container runtime unavailable, container tier disabled");
                    None
                }
            }
        } else {
            debug!("container tier disabled by configuration");
            None
        };

        let subprocess = config
            .subprocess
            .enabled
            .then(|| SubprocessBackend::from_settings(&config.subprocess));

        Self::new(container, subprocess, config.safety_filter())
            .with_container_timeout_fallback(config.container_timeout_fallback)
    }
}

impl<C: Backend, S: Backend> Analyzer<C, S> {
    /// Create an analyzer from explicit backends
    pub fn new(container: Option<C>, subprocess: Option<S>, filter: SafetyFilter) -> Self {
        Self {
            container,
            subprocess,
            filter,
            container_timeout_fallback: false,
        }
    }

    /// Treat a container timeout as a container failure and fall through to
    /// the subprocess tier
    pub fn with_container_timeout_fallback(mut self, enable: bool) -> Self {
        self.container_timeout_fallback = enable;
        self
    }

    /// Whether a container runtime handle is available
    pub fn has_container(&self) -> bool {
        self.container.is_some()
    }

    /// The safety filter gating the subprocess tier
    pub fn filter(&self) -> &SafetyFilter {
        &self.filter
    }

    /// Run `code` and classify the outcome
    pub async fn analyze(&self, code: &str, timeout: Duration) -> Classification {
        let request = ExecutionRequest::new(code, timeout);
        let classification = self.execute(&request).await.classify();
        debug!(
            execution_success = classification.execution_success,
            skipped = classification.skipped,
            found = ?classification.found().collect::<Vec<_>>(),
            "analysis complete"
        );
        classification
    }

    /// Run a request through the tiers without classifying
    #[instrument(skip(self, request), fields(timeout = ?request.timeout, len = request.code.len()))]
    pub async fn execute(&self, request: &ExecutionRequest) -> Outcome {
        let script = WrapperScript::build(&request.code);
        let mut failures = Vec::new();

        if let Some(container) = &self.container {
            match container.run(&script, request.timeout).await {
                Ok(result) if result.is_timeout() && self.container_timeout_fallback => {
                    warn!("container timed out, falling back to subprocess");
                    failures.push("container: execution timed out".to_string());
                }
                Ok(result) => {
                    return Outcome::Completed {
                        backend: container.kind(),
                        result,
                    };
                }
                Err(e) => {
                    warn!(kind = e.label(), error = %e, "container execution failed, falling back");
                    failures.push(describe("container", &e));
                }
            }
        } else {
            failures.push("container: runtime unavailable".to_string());
        }

        let Some(subprocess) = &self.subprocess else {
            failures.push("subprocess: disabled".to_string());
            return skipped(failures);
        };

        if let FilterVerdict::Denied(module) = self.filter.check(&request.code) {
            failures.push(format!("subprocess: code imports '{module}'"));
            return skipped(failures);
        }

        info!("running in subprocess");
        match subprocess.run(&script, request.timeout).await {
            Ok(result) => Outcome::Completed {
                backend: subprocess.kind(),
                result,
            },
            Err(e) => {
                warn!(kind = e.label(), error = %e, "subprocess execution failed");
                failures.push(describe("subprocess", &e));
                skipped(failures)
            }
        }
    }
}

fn describe(tier: &str, err: &BackendError) -> String {
    format!("{tier}: {} ({err})", err.label())
}

fn skipped(failures: Vec<String>) -> Outcome {
    let reason = failures.join("; ");
    info!(%reason, "analysis skipped");
    Outcome::Skipped { reason }
}
