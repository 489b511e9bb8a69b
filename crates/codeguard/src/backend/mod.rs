//! Execution backends
//!
//! Each backend runs a [`WrapperScript`] once under a wall clock limit and
//! reports a [`RawExecutionResult`]. A backend returns `Err` only when it
//! could not attempt the execution at all; faults raised by the target code,
//! timeouts and unreadable output are all `Ok` results.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;

pub use crate::backend::container::{ContainerBackend, ContainerSpec, MANAGED_LABEL};
pub use crate::backend::mount::HostPlatform;
pub use crate::backend::subprocess::SubprocessBackend;
use crate::types::{BackendKind, RawExecutionResult};
use crate::wrapper::WrapperScript;

mod container;
mod mount;
mod subprocess;

/// File name of the staged wrapper script
pub const SCRIPT_NAME: &str = "wrapper.py";

/// Errors that keep a backend from attempting an execution
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("container runtime unreachable: {0}")]
    RuntimeUnreachable(String),

    #[error("image '{0}' not found, pull it first")]
    ImageNotFound(String),

    #[error("failed to launch container: {0}")]
    Launch(String),

    #[error("failed to spawn interpreter: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed waiting for execution: {0}")]
    Wait(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Diagnostic label for logs and fallback notes
    pub fn label(&self) -> &'static str {
        match self {
            BackendError::RuntimeUnreachable(_) => "RuntimeUnreachable",
            BackendError::ImageNotFound(_) => "ImageNotFound",
            BackendError::Launch(_) => "ContainerError",
            BackendError::Spawn(_) => "SpawnError",
            BackendError::Wait(_) | BackendError::Io(_) => "ExecutionError",
        }
    }
}

/// A way of running wrapper scripts
pub trait Backend: Send + Sync {
    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// Run the script once, bounded by `timeout`
    fn run(
        &self,
        script: &WrapperScript,
        timeout: Duration,
    ) -> impl Future<Output = Result<RawExecutionResult, BackendError>> + Send;
}

/// A wrapper script written to a private temporary directory
///
/// The directory and the script are removed when this is dropped, on every
/// exit path of the backend that staged it.
#[derive(Debug)]
pub struct StagedScript {
    dir: TempDir,
    path: PathBuf,
}

impl StagedScript {
    /// Write `script` into a fresh directory under `scratch_dir` (or the
    /// system temp dir)
    pub async fn write(
        script: &WrapperScript,
        scratch_dir: Option<&Path>,
    ) -> Result<Self, BackendError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("codeguard-");
        let dir = match scratch_dir {
            Some(parent) => {
                tokio::fs::create_dir_all(parent).await?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };

        let path = dir.path().join(SCRIPT_NAME);
        tokio::fs::write(&path, script.as_bytes()).await?;
        // Containers run without CAP_DAC_OVERRIDE and may use another uid
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o755)).await?;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).await?;
        }
        debug!(?path, len = script.as_bytes().len(), "staged wrapper script");

        Ok(Self { dir, path })
    }

    /// Directory holding the script
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Host path of the script
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Most backend output kept per stream, in bytes
pub const MAX_BACKEND_OUTPUT: usize = 4 * 1024 * 1024;

/// Bounded buffer keeping the last bytes of a stream
///
/// The result record is written last, so the tail is what matters.
#[derive(Debug)]
pub(crate) struct OutputTail {
    buf: Vec<u8>,
    limit: usize,
    dropped: usize,
}

impl OutputTail {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
        // Trim in batches so the front is only shifted once per `limit` bytes
        if self.buf.len() > self.limit.saturating_mul(2) {
            self.trim();
        }
    }

    /// Number of bytes discarded from the front so far
    pub(crate) fn dropped(&self) -> usize {
        self.dropped + self.buf.len().saturating_sub(self.limit)
    }

    pub(crate) fn into_bytes(mut self) -> Vec<u8> {
        self.trim();
        self.buf
    }

    fn trim(&mut self) {
        let excess = self.buf.len().saturating_sub(self.limit);
        if excess > 0 {
            self.buf.drain(..excess);
            self.dropped += excess;
        }
    }
}

impl Default for OutputTail {
    fn default() -> Self {
        Self::new(MAX_BACKEND_OUTPUT)
    }
}

/// Pick the output to parse: stdout, or stderr when stdout is empty
pub(crate) fn primary_output(stdout: &[u8], stderr: &[u8]) -> String {
    let stdout = String::from_utf8_lossy(stdout);
    let stdout = stdout.trim();
    if stdout.is_empty() {
        String::from_utf8_lossy(stderr).trim().to_string()
    } else {
        stdout.to_string()
    }
}
