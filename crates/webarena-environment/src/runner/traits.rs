// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workload runtime trait definitions.
//!
//! Defines the narrow capability set the orchestrator consumes from the
//! container runtime.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors from workload runtime operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// The workload does not exist (already removed, never created).
    #[error("Workload not found: {0}")]
    NotFound(String),

    /// The runtime refused to create or start the workload.
    #[error("Workload launch failed: {0}")]
    LaunchFailed(String),

    /// An exec session could not be created or read.
    #[error("Exec failed: {0}")]
    Exec(String),

    /// Docker Engine API error.
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

impl RuntimeError {
    /// Whether this error means the workload is already gone.
    pub fn is_not_found(&self) -> bool {
        match self {
            RuntimeError::NotFound(_) => true,
            RuntimeError::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code,
                ..
            }) => *status_code == 404,
            _ => false,
        }
    }
}

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Everything needed to launch one workload.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Workload name (`<env_id>-<environment_name>`).
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Port published on the host.
    pub host_port: u16,
    /// TCP port the workload listens on.
    pub internal_port: u16,
    /// Entrypoint command override.
    pub command: Option<Vec<String>>,
    /// Management labels attached at launch.
    pub labels: HashMap<String, String>,
    /// Memory limit in bytes.
    pub memory_limit_bytes: Option<i64>,
}

/// Output of a command executed inside a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code of the command.
    pub exit_code: i64,
    /// Combined stdout and stderr.
    pub output: String,
}

impl ExecOutput {
    /// Create a successful result with the given output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }

    /// Create a failed result.
    pub fn failed(exit_code: i64, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    /// Whether the command exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A workload as reported by the runtime's listing.
#[derive(Debug, Clone, Default)]
pub struct WorkloadSummary {
    /// Runtime identifier of the workload.
    pub workload_id: String,
    /// Labels read back verbatim.
    pub labels: HashMap<String, String>,
    /// Host ports published by the workload, in runtime order.
    pub published_ports: Vec<u16>,
}

/// Trait for workload runtimes.
///
/// Implementations own the workloads; callers only hold their identifiers.
/// `stop` and `remove` treat an absent workload as success.
#[async_trait]
pub trait WorkloadRuntime: Send + Sync {
    /// Runtime type identifier (e.g., "docker", "mock").
    fn runtime_type(&self) -> &'static str;

    /// Create and start a workload, returning its identifier.
    async fn launch(&self, spec: &LaunchSpec) -> Result<String>;

    /// Stop a workload, giving it `timeout` to exit gracefully.
    async fn stop(&self, workload_id: &str, timeout: Duration) -> Result<()>;

    /// Forcibly remove a workload.
    async fn remove(&self, workload_id: &str) -> Result<()>;

    /// Run a command inside a workload and collect its output.
    async fn exec(&self, workload_id: &str, command: &[String]) -> Result<ExecOutput>;

    /// List all workloads (running or not) carrying `label=value`.
    async fn list(&self, label: &str, value: &str) -> Result<Vec<WorkloadSummary>>;
}
