//! Container backend
//!
//! Runs each wrapper script in a fresh, single-use container with the
//! network disabled, memory, CPU and process count capped, and the staged
//! script mounted read-only. The container is removed on every exit path.

use std::collections::HashMap;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::HostConfig;
use futures_util::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::backend::mount::HostPlatform;
use crate::backend::{Backend, BackendError, OutputTail, SCRIPT_NAME, StagedScript};
use crate::config::ContainerSettings;
use crate::record;
use crate::types::{BackendKind, RawExecutionResult};
use crate::wrapper::WrapperScript;

/// Label carried by every container this backend creates
pub const MANAGED_LABEL: &str = "codeguard.managed";

/// Mount point of the staged script directory inside the container
const CODE_DIR: &str = "/code";

/// Upper bound for runtime calls outside the execution itself
/// (create, start, log collection, removal)
const RUNTIME_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Builder for a container configuration
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    image: String,
    command: Vec<String>,
    working_dir: Option<String>,
    binds: Vec<String>,
    memory_bytes: Option<i64>,
    cpu_quota: Option<i64>,
    cpu_period: Option<i64>,
    pids_limit: Option<i64>,
    labels: HashMap<String, String>,
    network: bool,
}

impl ContainerSpec {
    /// Create a spec for `image` with networking disabled
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: Vec::new(),
            working_dir: None,
            binds: Vec::new(),
            memory_bytes: None,
            cpu_quota: None,
            cpu_period: None,
            pids_limit: None,
            labels: HashMap::new(),
            network: false,
        }
    }

    /// Set the command to run
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory inside the container
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add a bind mount (`source:target[:opts]`)
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.binds.push(bind.into());
        self
    }

    /// Set the memory ceiling in bytes (swap is capped at the same value)
    pub fn memory(mut self, bytes: i64) -> Self {
        self.memory_bytes = Some(bytes);
        self
    }

    /// Set the CPU quota per period, both in microseconds
    pub fn cpu(mut self, quota: i64, period: i64) -> Self {
        self.cpu_quota = Some(quota);
        self.cpu_period = Some(period);
        self
    }

    /// Set the maximum number of processes
    pub fn pids_limit(mut self, limit: i64) -> Self {
        self.pids_limit = Some(limit);
        self
    }

    /// Add a label
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Enable or disable networking
    pub fn network(mut self, enable: bool) -> Self {
        self.network = enable;
        self
    }

    /// Build the runtime configuration
    pub fn build(self) -> Config<String> {
        let host_config = HostConfig {
            binds: Some(self.binds),
            memory: self.memory_bytes,
            memory_swap: self.memory_bytes,
            cpu_quota: self.cpu_quota,
            cpu_period: self.cpu_period,
            pids_limit: self.pids_limit,
            network_mode: (!self.network).then(|| "none".to_string()),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            privileged: Some(false),
            ..Default::default()
        };

        Config {
            image: Some(self.image),
            cmd: Some(self.command),
            working_dir: self.working_dir,
            network_disabled: Some(!self.network),
            labels: Some(self.labels),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

/// Backend running scripts in throwaway containers
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    docker: Docker,
    settings: ContainerSettings,
    platform: HostPlatform,
}

impl ContainerBackend {
    /// Connect to the local container runtime and verify it responds
    #[instrument(skip(settings), fields(image = %settings.image))]
    pub async fn connect(settings: ContainerSettings) -> Result<Self, BackendError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BackendError::RuntimeUnreachable(e.to_string()))?;

        match tokio::time::timeout(RUNTIME_CALL_TIMEOUT, docker.ping()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(BackendError::RuntimeUnreachable(e.to_string())),
            Err(_) => {
                return Err(BackendError::RuntimeUnreachable(
                    "ping timed out".to_string(),
                ));
            }
        }

        info!("connected to container runtime");
        Ok(Self::with_client(docker, settings))
    }

    /// Create a backend around an existing runtime client
    pub fn with_client(docker: Docker, settings: ContainerSettings) -> Self {
        Self {
            docker,
            settings,
            platform: HostPlatform::current(),
        }
    }

    /// Settings this backend launches containers with
    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    /// Container configuration for a staged script
    pub fn spec_for(&self, staged: &StagedScript) -> ContainerSpec {
        ContainerSpec::new(&self.settings.image)
            .command([
                self.settings.interpreter.clone(),
                format!("{CODE_DIR}/{SCRIPT_NAME}"),
            ])
            .working_dir(CODE_DIR)
            .bind(self.platform.read_only_bind(staged.dir(), CODE_DIR))
            .memory(self.settings.memory_bytes())
            .cpu(self.settings.cpu_quota, self.settings.cpu_period)
            .pids_limit(self.settings.pids_limit)
            .label(MANAGED_LABEL, "true")
            .network(false)
    }

    /// IDs of containers created by this backend that still exist
    pub async fn list_managed(&self) -> Result<Vec<String>, BackendError> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters: HashMap::from([(
                "label".to_string(),
                vec![format!("{MANAGED_LABEL}=true")],
            )]),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| BackendError::RuntimeUnreachable(e.to_string()))?;

        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    /// Create the container, mapping failures to launch errors
    async fn create(&self, spec: ContainerSpec) -> Result<String, BackendError> {
        let name = format!("codeguard-{}", nanoid::nanoid!(12, &nanoid::alphabet::SAFE));
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };
        let config = spec.build();
        debug!(%name, ?config, "creating container");

        let response = tokio::time::timeout(
            RUNTIME_CALL_TIMEOUT,
            self.docker.create_container(Some(options), config),
        )
        .await
        .map_err(|_| BackendError::Launch("create timed out".to_string()))?
        .map_err(|e| launch_error(e, &self.settings.image))?;

        for warning in &response.warnings {
            warn!(%name, %warning, "container runtime warning");
        }

        Ok(response.id)
    }

    /// Start the container, wait for it and read its output
    async fn start_and_collect(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<RawExecutionResult, BackendError> {
        tokio::time::timeout(
            RUNTIME_CALL_TIMEOUT,
            self.docker
                .start_container(id, None::<StartContainerOptions<String>>),
        )
        .await
        .map_err(|_| BackendError::Launch("start timed out".to_string()))?
        .map_err(|e| launch_error(e, &self.settings.image))?;

        match tokio::time::timeout(timeout, self.wait(id)).await {
            Ok(status) => {
                let status = status?;
                debug!(id, status, "container exited");
            }
            Err(_) => {
                warn!(id, ?timeout, "container timed out");
                return Ok(RawExecutionResult::timed_out(timeout));
            }
        }

        let output = tokio::time::timeout(RUNTIME_CALL_TIMEOUT, self.logs(id))
            .await
            .map_err(|_| BackendError::Wait("log collection timed out".to_string()))??;

        Ok(record::parse_or_diagnose(output.trim()))
    }

    /// Wait for the container to stop and return its exit status
    async fn wait(&self, id: &str) -> Result<i64, BackendError> {
        let mut stream = std::pin::pin!(
            self.docker
                .wait_container(id, None::<WaitContainerOptions<String>>)
        );

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits are reported as errors by the client
            Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(BackendError::Wait(e.to_string())),
            None => Err(BackendError::Wait(
                "wait stream ended without a status".to_string(),
            )),
        }
    }

    /// Combined stdout and stderr of a stopped container
    async fn logs(&self, id: &str) -> Result<String, BackendError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let mut stream = std::pin::pin!(self.docker.logs(id, Some(options)));

        let mut output = OutputTail::default();
        while let Some(chunk) = stream.next().await {
            match chunk.map_err(|e| BackendError::Wait(e.to_string()))? {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => output.push(&message),
                LogOutput::StdIn { .. } => {}
            }
        }
        if output.dropped() > 0 {
            warn!(id, dropped = output.dropped(), "container output exceeded the capture limit");
        }

        Ok(String::from_utf8_lossy(&output.into_bytes()).into_owned())
    }

    /// Kill and remove a container, logging failures
    async fn discard(&self, id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        let result = tokio::time::timeout(
            RUNTIME_CALL_TIMEOUT,
            self.docker.remove_container(id, Some(options)),
        )
        .await;

        match result {
            Ok(Ok(())) => debug!(id, "container removed"),
            Ok(Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            })) => debug!(id, "container already removed"),
            Ok(Err(e)) => warn!(id, error = %e, "failed to remove container"),
            Err(_) => warn!(id, "timed out removing container"),
        }
    }
}

impl Backend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    #[instrument(skip(self, script), fields(image = %self.settings.image))]
    async fn run(
        &self,
        script: &WrapperScript,
        timeout: Duration,
    ) -> Result<RawExecutionResult, BackendError> {
        let staged = StagedScript::write(script, self.settings.scratch_dir.as_deref()).await?;
        let id = self.create(self.spec_for(&staged)).await?;

        let result = self.start_and_collect(&id, timeout).await;
        self.discard(&id).await;
        drop(staged);

        if let Ok(ref outcome) = result {
            debug!(
                success = outcome.success,
                fault = ?outcome.fault,
                "container execution complete"
            );
        }
        result
    }
}

/// Map a create/start failure to the launch error taxonomy
fn launch_error(err: BollardError, image: &str) -> BackendError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => BackendError::ImageNotFound(image.to_string()),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => BackendError::Launch(format!("{status_code}: {message}")),
        other => BackendError::RuntimeUnreachable(other.to_string()),
    }
}
