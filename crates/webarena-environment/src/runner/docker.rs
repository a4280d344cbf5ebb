// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Docker workload runtime.
//!
//! Talks to the Docker Engine API over its unix socket. Pure runtime access:
//! no registry bookkeeping, no retries. Callers decide policy.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::runner::{ExecOutput, LaunchSpec, Result, RuntimeError, WorkloadRuntime, WorkloadSummary};

/// Seconds bollard waits on a single Docker API request.
const DOCKER_REQUEST_TIMEOUT_SECS: u64 = 120;

/// User that post-launch commands run as.
const EXEC_USER: &str = "root";

/// Whether a Docker error means "nothing to do" for stop/remove.
///
/// 404: the container is gone. 304: it is already stopped.
fn is_absent_or_stopped(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404 | 304,
            ..
        }
    )
}

/// Docker-backed workload runtime.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Wrap an existing Docker connection.
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect to the Docker daemon listening on `socket`.
    pub fn connect(socket: &Path) -> Result<Self> {
        let docker = Docker::connect_with_unix(
            &socket.to_string_lossy(),
            DOCKER_REQUEST_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )?;
        Ok(Self::new(docker))
    }

    fn container_config(spec: &LaunchSpec) -> Config<String> {
        let port_key = format!("{}/tcp", spec.internal_port);

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(spec.host_port.to_string()),
            }]),
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key, HashMap::new());

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            memory: spec.memory_limit_bytes,
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone(),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

#[async_trait]
impl WorkloadRuntime for DockerRuntime {
    fn runtime_type(&self) -> &'static str {
        "docker"
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), Self::container_config(spec))
            .await
            .map_err(|e| RuntimeError::LaunchFailed(e.to_string()))?;

        for warning in &response.warnings {
            warn!(container = %spec.name, warning = %warning, "Docker create warning");
        }

        if let Err(e) = self
            .docker
            .start_container::<String>(&response.id, None)
            .await
        {
            // Don't leave a created-but-never-started container holding the name.
            if let Err(cleanup) = self.remove(&response.id).await {
                warn!(container_id = %response.id, error = %cleanup, "Failed to remove unstarted container");
            }
            return Err(RuntimeError::LaunchFailed(format!(
                "failed to start container: {}",
                e
            )));
        }

        info!(
            container_id = %response.id,
            name = %spec.name,
            image = %spec.image,
            host_port = spec.host_port,
            "Container started"
        );

        Ok(response.id)
    }

    async fn stop(&self, workload_id: &str, timeout: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        match self.docker.stop_container(workload_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_absent_or_stopped(&e) => {
                debug!(container_id = %workload_id, "Container already stopped or gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, workload_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(workload_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_absent_or_stopped(&e) => {
                debug!(container_id = %workload_id, "Container already removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exec(&self, workload_id: &str, command: &[String]) -> Result<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                workload_id,
                CreateExecOptions {
                    cmd: Some(command.to_vec()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    user: Some(EXEC_USER.to_string()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 404, ..
                } => RuntimeError::NotFound(workload_id.to_string()),
                other => RuntimeError::Exec(other.to_string()),
            })?;

        let mut output = String::new();
        match self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| RuntimeError::Exec(e.to_string()))?
        {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| RuntimeError::Exec(e.to_string()))?;
                    output.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
                }
            }
            StartExecResults::Detached => {
                return Err(RuntimeError::Exec(
                    "exec started detached, output unavailable".to_string(),
                ));
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| RuntimeError::Exec(e.to_string()))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            output,
        })
    }

    async fn list(&self, label: &str, value: &str) -> Result<Vec<WorkloadSummary>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![format!("{}={}", label, value)]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;

        let summaries = containers
            .into_iter()
            .filter_map(|c| {
                let workload_id = c.id?;
                let mut published_ports: Vec<u16> = Vec::new();
                // Docker reports one entry per address family for the same binding.
                for port in c.ports.unwrap_or_default() {
                    if let Some(public) = port.public_port
                        && !published_ports.contains(&public)
                    {
                        published_ports.push(public);
                    }
                }
                Some(WorkloadSummary {
                    workload_id,
                    labels: c.labels.unwrap_or_default(),
                    published_ports,
                })
            })
            .collect();

        Ok(summaries)
    }
}
