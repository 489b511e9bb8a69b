//! Subprocess backend
//!
//! Runs the wrapper script as a plain child process. There is no isolation
//! beyond the OS process boundary, so the executor only routes code here
//! after the safety pre-filter has let it through.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::backend::{Backend, BackendError, OutputTail, StagedScript, primary_output};
use crate::config::SubprocessSettings;
use crate::record;
use crate::types::{BackendKind, RawExecutionResult};
use crate::wrapper::WrapperScript;

/// How long output pipes are still read after the process group is gone
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// Backend running scripts as child processes
#[derive(Debug, Clone)]
pub struct SubprocessBackend {
    interpreter: PathBuf,
    scratch_dir: Option<PathBuf>,
}

impl SubprocessBackend {
    /// Create a backend using the given interpreter
    pub fn new(interpreter: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            scratch_dir: None,
        }
    }

    /// Create a backend from settings
    pub fn from_settings(settings: &SubprocessSettings) -> Self {
        Self {
            interpreter: settings.interpreter.clone(),
            scratch_dir: settings.scratch_dir.clone(),
        }
    }

    /// Stage scripts under this directory instead of the system temp dir
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Interpreter used to run scripts
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    /// Run the interpreter on a staged script
    ///
    /// The interpreter leads its own process group. Once it exits or the
    /// timeout expires the whole group is killed, so nothing the target
    /// started outlives the call.
    async fn run_staged(
        &self,
        staged: &StagedScript,
        timeout: Duration,
    ) -> Result<RawExecutionResult, BackendError> {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(staged.path())
            .current_dir(staged.dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(BackendError::Spawn)?;
        let pid = child.id();
        debug!(?pid, "spawned interpreter");

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let mut stdout = OutputTail::default();
        let mut stderr = OutputTail::default();

        let (waited, pipes_closed) = {
            let reading = async {
                tokio::join!(
                    drain(stdout_pipe.as_mut(), &mut stdout),
                    drain(stderr_pipe.as_mut(), &mut stderr)
                );
            };
            tokio::pin!(reading);
            let mut pipes_closed = false;

            // Pipes may stay open in processes the target spawned, so the
            // interpreter's exit ends the run, not EOF
            let waited = tokio::time::timeout(timeout, async {
                loop {
                    tokio::select! {
                        status = child.wait() => return status,
                        () = &mut reading, if !pipes_closed => pipes_closed = true,
                    }
                }
            })
            .await;

            kill_group(pid);
            if waited.is_err() {
                warn!(?timeout, "interpreter timed out, killing");
                // kill() also reaps the child
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill interpreter");
                }
            }

            if !pipes_closed {
                pipes_closed = tokio::time::timeout(PIPE_GRACE, &mut reading)
                    .await
                    .is_ok();
            }
            (waited, pipes_closed)
        };

        if !pipes_closed {
            warn!("output pipes still open after the process group was killed");
        }
        if stdout.dropped() > 0 || stderr.dropped() > 0 {
            warn!(
                stdout_dropped = stdout.dropped(),
                stderr_dropped = stderr.dropped(),
                "interpreter output exceeded the capture limit"
            );
        }

        match waited {
            Ok(Ok(status)) => {
                debug!(?status, "interpreter exited");
                let (stdout, stderr) = (stdout.into_bytes(), stderr.into_bytes());
                Ok(record::parse_or_diagnose(&primary_output(&stdout, &stderr)))
            }
            Ok(Err(e)) => Err(BackendError::Wait(e.to_string())),
            Err(_) => Ok(RawExecutionResult::timed_out(timeout)),
        }
    }
}

impl Default for SubprocessBackend {
    fn default() -> Self {
        Self::from_settings(&SubprocessSettings::default())
    }
}

impl Backend for SubprocessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Subprocess
    }

    #[instrument(skip(self, script), fields(interpreter = %self.interpreter.display()))]
    async fn run(
        &self,
        script: &WrapperScript,
        timeout: Duration,
    ) -> Result<RawExecutionResult, BackendError> {
        let staged = StagedScript::write(script, self.scratch_dir.as_deref()).await?;
        let result = self.run_staged(&staged, timeout).await;
        drop(staged);

        if let Ok(ref outcome) = result {
            debug!(
                success = outcome.success,
                fault = ?outcome.fault,
                "subprocess execution complete"
            );
        }
        result
    }
}

/// Read a child pipe to the end, keeping only its tail
async fn drain<R: AsyncRead + Unpin>(pipe: Option<&mut R>, tail: &mut OutputTail) {
    let Some(pipe) = pipe else {
        return;
    };
    let mut chunk = vec![0; 8192];
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => tail.push(&chunk[..n]),
            Err(e) => {
                debug!(error = %e, "stopped reading interpreter output");
                break;
            }
        }
    }
}

/// Kill every process in the interpreter's group
#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pgid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // Group already empty
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}
