//! Docker Engine runtime.
//!
//! Works against Docker and against Podman's Docker-compatible API socket.

use crate::{
    error::{ContainerError, ContainerResult},
    frame::{encode_frame, StreamKind},
    ContainerRuntime, ContainerState, ExecSession, ExecSpec,
};
use async_trait::async_trait;
use bollard::{
    container::{InspectContainerOptions, LogOutput},
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    models::ContainerStateStatusEnum,
    Docker, API_DEFAULT_VERSION,
};
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};

/// Connection timeout for explicit engine endpoints, in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Container runtime backed by the Docker Engine API.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the engine and verify it answers.
    ///
    /// `host` accepts `unix://`, `tcp://` and `http://` endpoints (the same
    /// forms as `DOCKER_HOST`). `None` uses the platform's local socket.
    pub async fn connect(host: Option<&str>) -> ContainerResult<Self> {
        let docker = match host {
            Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => {
                Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            #[cfg(unix)]
            Some(host) => {
                Docker::connect_with_unix(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            _ => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| ContainerError::connection_failed(e.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|e| ContainerError::connection_failed(format!("engine ping failed: {e}")))?;

        info!(host = host.unwrap_or("local"), "Connected to container engine");

        Ok(Self { docker })
    }

    /// Wrap an existing bollard client without pinging it.
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn state(&self, container: &str) -> ContainerResult<ContainerState> {
        let info = match self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info,
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container = %container, "Container not found");
                return Ok(ContainerState::Missing);
            }
            Err(e) => return Err(ContainerError::inspect_failed(container, e.to_string())),
        };

        let state = info
            .state
            .map(|s| map_state(s.status, s.running))
            .unwrap_or(ContainerState::Unknown);

        debug!(container = %container, state = %state, "Inspected container");
        Ok(state)
    }

    async fn exec_attached(
        &self,
        container: &str,
        spec: &ExecSpec,
    ) -> ContainerResult<ExecSession> {
        let options = CreateExecOptions::<String> {
            cmd: Some(spec.command.clone()),
            working_dir: spec.working_dir.clone(),
            env: (!spec.env.is_empty()).then(|| spec.env.clone()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(|e| ContainerError::exec_failed(container, e.to_string()))?;

        let start_options = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let started = self
            .docker
            .start_exec(&exec.id, Some(start_options))
            .await
            .map_err(|e| ContainerError::exec_failed(container, e.to_string()))?;

        match started {
            StartExecResults::Attached { output, input } => {
                info!(
                    container = %container,
                    exec_id = %exec.id,
                    command = ?spec.command,
                    "Exec session attached"
                );

                let name = container.to_string();
                let output = output
                    .map(move |chunk| match chunk {
                        Ok(log) => reframe(log),
                        Err(e) => Err(ContainerError::exec_failed(name.clone(), e.to_string())),
                    })
                    .boxed();

                Ok(ExecSession { output, input })
            }
            StartExecResults::Detached => Err(ContainerError::exec_failed(
                container,
                "unexpected detached exec",
            )),
        }
    }
}

/// bollard strips the multiplexing headers; put them back so consumers see
/// the engine's wire format.
fn reframe(log: LogOutput) -> ContainerResult<Bytes> {
    let (kind, message) = match log {
        LogOutput::StdOut { message } | LogOutput::Console { message } => {
            (StreamKind::Stdout, message)
        }
        LogOutput::StdErr { message } => (StreamKind::Stderr, message),
        LogOutput::StdIn { message } => (StreamKind::Stdin, message),
    };
    Ok(encode_frame(kind, &message)?)
}

fn map_state(status: Option<ContainerStateStatusEnum>, running: Option<bool>) -> ContainerState {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerState::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerState::Removing,
        Some(ContainerStateStatusEnum::EXITED) => ContainerState::Exited,
        Some(ContainerStateStatusEnum::DEAD) => ContainerState::Dead,
        _ if running == Some(true) => ContainerState::Running,
        _ => ContainerState::Unknown,
    }
}
