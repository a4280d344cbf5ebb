// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment lifecycle orchestration.
//!
//! The orchestrator is the only component with cross-cutting policy. It owns
//! the registry and composes the port allocator, the workload runtime, the
//! configuration applier and the health probe.
//!
//! # Instance state machine
//!
//! ```text
//!   create / reconcile          probe ok
//!  ───────────────────► STARTING ────────► RUNNING
//!                          ▲  ▲               │
//!                          │  └── probe fail ─┤
//!                          └────── reset ─────┘
//! ```
//!
//! Instances leave the registry only at shutdown reap, or through the
//! optional age-out worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::configurator::{ConfigurationApplier, ConfigurationPolicy};
use crate::error::{Error, Result};
use crate::health::HealthProbe;
use crate::instance_registry::{
    EnvironmentInstance, InstanceRegistry, InstanceStatus, base_url_for,
};
use crate::labels::{ManagedLabels, management_selector};
use crate::port_allocator::PortAllocator;
use crate::runner::{LaunchSpec, RuntimeError, WorkloadRuntime};
use crate::templates::{EnvironmentTemplate, TemplateCatalog, WORKLOAD_MEMORY_LIMIT_BYTES};

/// Grace period when stopping a workload for reset.
pub const RESET_STOP_TIMEOUT: Duration = Duration::from_secs(60);
/// Grace period when stopping workloads at shutdown or expiry.
pub const REAP_STOP_TIMEOUT: Duration = Duration::from_secs(30);

const ENV_ID_PREFIX: &str = "env_";
const ENV_ID_HEX_LEN: usize = 8;

/// Generate a random instance id (`env_` + 8 lowercase hex chars).
pub fn generate_env_id() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ENV_ID_HEX_LEN)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect();
    format!("{}{}", ENV_ID_PREFIX, suffix)
}

/// Workload name for an instance.
pub fn workload_name(env_id: &str, environment_name: &str) -> String {
    format!("{}-{}", env_id, environment_name)
}

/// A launch time strictly after `previous`.
fn next_launch_time(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Instance id.
    pub env_id: String,
    /// Status after the probe.
    pub status: InstanceStatus,
    /// Whole seconds since the most recent (re)launch.
    pub started_seconds_ago: i64,
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Workloads adopted into the registry.
    pub adopted: usize,
    /// Workloads whose id was already registered.
    pub already_known: usize,
    /// Workloads left alone (bad labels or no published port).
    pub skipped: usize,
}

/// Outcome of a shutdown reap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapSummary {
    /// Workloads stopped and removed.
    pub removed: usize,
    /// Workloads that could not be removed.
    pub failed: usize,
}

/// Composes allocation, launch, configuration and probing into the
/// environment lifecycle.
pub struct LifecycleOrchestrator {
    catalog: Arc<TemplateCatalog>,
    runtime: Arc<dyn WorkloadRuntime>,
    registry: Arc<InstanceRegistry>,
    ports: Arc<PortAllocator>,
    probe: Arc<dyn HealthProbe>,
    applier: Arc<ConfigurationApplier>,
    public_host: String,
    configuration_tasks: Mutex<JoinSet<()>>,
}

impl LifecycleOrchestrator {
    /// Create an orchestrator with the default configuration policy.
    pub fn new(
        catalog: Arc<TemplateCatalog>,
        runtime: Arc<dyn WorkloadRuntime>,
        probe: Arc<dyn HealthProbe>,
        ports: Arc<PortAllocator>,
        public_host: impl Into<String>,
    ) -> Self {
        let applier = Arc::new(ConfigurationApplier::new(
            runtime.clone(),
            ConfigurationPolicy::default(),
        ));
        Self {
            catalog,
            runtime,
            registry: Arc::new(InstanceRegistry::new()),
            ports,
            probe,
            applier,
            public_host: public_host.into(),
            configuration_tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Replace the post-launch configuration policy.
    pub fn with_configuration_policy(mut self, policy: ConfigurationPolicy) -> Self {
        self.applier = Arc::new(ConfigurationApplier::new(self.runtime.clone(), policy));
        self
    }

    /// The instance registry.
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// The template catalog.
    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// The port allocator.
    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    /// Environment type names clients may request.
    pub fn environment_types(&self) -> Vec<String> {
        self.catalog.names()
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Provision a new environment.
    ///
    /// Returns as soon as the workload is launched; configuration runs in a
    /// detached task.
    pub async fn create(&self, requested: &str) -> Result<EnvironmentInstance> {
        let template = self.catalog.resolve(requested)?.clone();
        let env_id = self.new_env_id().await;
        let host_port = self.ports.allocate_off_thread().await?;
        let base_url = base_url_for(&self.public_host, host_port);
        let created_at = Utc::now();

        info!(
            env_id = %env_id,
            environment_name = %template.name,
            host_port,
            "Creating environment"
        );

        let workload_id = match self.launch(&env_id, &template, host_port).await {
            Ok(id) => id,
            Err(e) => {
                self.ports.release(host_port);
                error!(
                    env_id = %env_id,
                    environment_name = %template.name,
                    host_port,
                    error = %e,
                    "Workload launch failed"
                );
                return Err(Error::Launch(e));
            }
        };

        let instance = EnvironmentInstance {
            env_id: env_id.clone(),
            environment_name: template.name.clone(),
            workload_id: workload_id.clone(),
            host_port,
            base_url: base_url.clone(),
            created_at,
            status: InstanceStatus::Starting,
        };
        self.registry.insert(instance.clone()).await;

        if template.needs_configuration() {
            self.spawn_configuration(env_id, workload_id, template, base_url)
                .await;
        }

        Ok(instance)
    }

    async fn spawn_configuration(
        &self,
        env_id: String,
        workload_id: String,
        template: EnvironmentTemplate,
        base_url: String,
    ) {
        let applier = self.applier.clone();
        let mut tasks = self.configuration_tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            if let Err(e) = applier.apply(&workload_id, &template, &base_url).await {
                error!(
                    env_id = %env_id,
                    environment_name = %template.name,
                    error = %e,
                    "Post-launch configuration abandoned"
                );
            }
        });
    }

    /// Wait until every detached configuration task has finished.
    pub async fn wait_for_configuration(&self) {
        let mut tasks = std::mem::take(&mut *self.configuration_tasks.lock().await);
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Configuration task panicked: {}", e);
            }
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Probe an environment and record the result.
    pub async fn status(&self, env_id: &str) -> Result<StatusReport> {
        let instance = self
            .registry
            .get(env_id)
            .await
            .ok_or_else(|| Error::InstanceNotFound(env_id.to_string()))?;

        let status = if self.probe.is_healthy(&instance.base_url).await {
            InstanceStatus::Running
        } else {
            InstanceStatus::Starting
        };

        let updated = self
            .registry
            .update(env_id, |i| i.status = status)
            .await
            .ok_or_else(|| Error::InstanceNotFound(env_id.to_string()))?;

        debug!(env_id, status = %status, "Status probed");

        Ok(StatusReport {
            env_id: updated.env_id.clone(),
            status: updated.status,
            started_seconds_ago: updated.started_seconds_ago(Utc::now()),
        })
    }

    // ========================================================================
    // Reset
    // ========================================================================

    /// Replace an environment's workload with a fresh one on the same port.
    ///
    /// Blocks through the configuration stage. Only teardown and launch
    /// failures fail the reset.
    pub async fn reset(&self, env_id: &str) -> Result<EnvironmentInstance> {
        let instance = self
            .registry
            .get(env_id)
            .await
            .ok_or_else(|| Error::InstanceNotFound(env_id.to_string()))?;

        let reset_failed = |reason: String| Error::ResetFailed {
            env_id: env_id.to_string(),
            reason,
        };

        let template = self
            .catalog
            .get(&instance.environment_name)
            .cloned()
            .ok_or_else(|| {
                reset_failed(format!(
                    "no template for environment '{}'",
                    instance.environment_name
                ))
            })?;

        info!(
            env_id,
            environment_name = %instance.environment_name,
            workload_id = %instance.workload_id,
            host_port = instance.host_port,
            "Resetting environment"
        );
        self.registry
            .update(env_id, |i| i.status = InstanceStatus::Starting)
            .await;

        self.teardown(&instance.workload_id, RESET_STOP_TIMEOUT)
            .await
            .map_err(|e| reset_failed(e.to_string()))?;

        let workload_id = self
            .launch(env_id, &template, instance.host_port)
            .await
            .map_err(|e| reset_failed(e.to_string()))?;

        let updated = self
            .registry
            .update(env_id, |i| {
                i.workload_id = workload_id.clone();
                i.status = InstanceStatus::Starting;
                i.created_at = next_launch_time(i.created_at);
            })
            .await
            .ok_or_else(|| Error::InstanceNotFound(env_id.to_string()))?;

        if let Err(e) = self
            .applier
            .apply(&workload_id, &template, &updated.base_url)
            .await
        {
            error!(
                env_id,
                environment_name = %template.name,
                error = %e,
                "Post-launch configuration abandoned after reset"
            );
        }

        Ok(self.registry.get(env_id).await.unwrap_or(updated))
    }

    // ========================================================================
    // Reconcile
    // ========================================================================

    /// Adopt managed workloads left running by a previous process.
    ///
    /// Adopted instances keep their workload and port and are not
    /// reconfigured. Running it again with the same workloads changes nothing.
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let (label, value) = management_selector();
        let workloads = self.runtime.list(label, value).await?;
        let mut summary = ReconcileSummary::default();

        for workload in workloads {
            let Some(labels) = ManagedLabels::from_map(&workload.labels) else {
                warn!(
                    workload_id = %workload.workload_id,
                    "Skipping managed workload without env labels"
                );
                summary.skipped += 1;
                continue;
            };

            let Some(&host_port) = workload.published_ports.first() else {
                warn!(
                    workload_id = %workload.workload_id,
                    env_id = %labels.env_id,
                    "Skipping managed workload without a published port"
                );
                summary.skipped += 1;
                continue;
            };

            if self.catalog.get(&labels.env_name).is_none() {
                warn!(
                    workload_id = %workload.workload_id,
                    env_id = %labels.env_id,
                    environment_name = %labels.env_name,
                    "Adopting managed workload of unknown environment type; it cannot be reset"
                );
            }

            let instance = EnvironmentInstance {
                env_id: labels.env_id.clone(),
                environment_name: labels.env_name.clone(),
                workload_id: workload.workload_id.clone(),
                host_port,
                base_url: base_url_for(&self.public_host, host_port),
                created_at: Utc::now(),
                status: InstanceStatus::Starting,
            };

            if self.registry.insert_if_absent(instance).await {
                self.ports.reserve(host_port);
                info!(
                    env_id = %labels.env_id,
                    environment_name = %labels.env_name,
                    workload_id = %workload.workload_id,
                    host_port,
                    "Adopted existing workload"
                );
                summary.adopted += 1;
            } else {
                summary.already_known += 1;
            }
        }

        info!(
            adopted = summary.adopted,
            already_known = summary.already_known,
            skipped = summary.skipped,
            "Reconciliation complete"
        );

        Ok(summary)
    }

    // ========================================================================
    // Reap
    // ========================================================================

    /// Stop and remove every managed workload and clear the registry.
    ///
    /// Best-effort: failures are logged per workload and never abort the pass.
    pub async fn reap(&self) -> ReapSummary {
        let (label, value) = management_selector();
        let mut workload_ids: Vec<String> = match self.runtime.list(label, value).await {
            Ok(workloads) => workloads.into_iter().map(|w| w.workload_id).collect(),
            Err(e) => {
                error!(error = %e, "Failed to list managed workloads, reaping registered ones only");
                Vec::new()
            }
        };

        for instance in self.registry.drain().await {
            self.ports.release(instance.host_port);
            if !workload_ids.contains(&instance.workload_id) {
                workload_ids.push(instance.workload_id);
            }
        }

        let mut summary = ReapSummary::default();
        for workload_id in workload_ids {
            match self.teardown(&workload_id, REAP_STOP_TIMEOUT).await {
                Ok(()) => {
                    debug!(workload_id = %workload_id, "Reaped workload");
                    summary.removed += 1;
                }
                Err(e) => {
                    warn!(workload_id = %workload_id, error = %e, "Failed to reap workload");
                    summary.failed += 1;
                }
            }
        }

        info!(
            removed = summary.removed,
            failed = summary.failed,
            "Reap complete"
        );

        summary
    }

    // ========================================================================
    // Age-out
    // ========================================================================

    /// Tear down instances whose last (re)launch is older than `max_age`.
    ///
    /// Returns the ids that were removed.
    pub async fn expire_older_than(&self, max_age: Duration) -> Vec<String> {
        let now = Utc::now();
        let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        let mut expired = Vec::new();

        for instance in self.registry.list().await {
            if instance.started_seconds_ago(now) < max_age_secs {
                continue;
            }

            match self
                .teardown(&instance.workload_id, REAP_STOP_TIMEOUT)
                .await
            {
                Ok(()) => {
                    self.registry.remove(&instance.env_id).await;
                    self.ports.release(instance.host_port);
                    info!(
                        env_id = %instance.env_id,
                        environment_name = %instance.environment_name,
                        age_secs = instance.started_seconds_ago(now),
                        "Expired environment"
                    );
                    expired.push(instance.env_id);
                }
                Err(e) => {
                    warn!(
                        env_id = %instance.env_id,
                        error = %e,
                        "Failed to tear down expired environment"
                    );
                }
            }
        }

        expired
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn new_env_id(&self) -> String {
        loop {
            let env_id = generate_env_id();
            if !self.registry.contains(&env_id).await {
                return env_id;
            }
        }
    }

    async fn launch(
        &self,
        env_id: &str,
        template: &EnvironmentTemplate,
        host_port: u16,
    ) -> std::result::Result<String, RuntimeError> {
        let spec = LaunchSpec {
            name: workload_name(env_id, &template.name),
            image: template.image.clone(),
            host_port,
            internal_port: template.internal_port,
            command: template.start_command.clone(),
            labels: ManagedLabels::new(env_id, &template.name).to_map(),
            memory_limit_bytes: Some(WORKLOAD_MEMORY_LIMIT_BYTES),
        };
        self.runtime.launch(&spec).await
    }

    /// Stop then force-remove. An absent workload is not an error.
    async fn teardown(
        &self,
        workload_id: &str,
        timeout: Duration,
    ) -> std::result::Result<(), RuntimeError> {
        match self.runtime.stop(workload_id, timeout).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => {
                warn!(workload_id, error = %e, "Graceful stop failed, forcing removal");
            }
        }
        match self.runtime.remove(workload_id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_env_id_format() {
        for _ in 0..100 {
            let id = generate_env_id();
            assert_eq!(id.len(), 12);
            assert!(id.starts_with("env_"));
            assert!(
                id[4..]
                    .chars()
                    .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
            );
        }
    }

    #[test]
    fn test_workload_name() {
        assert_eq!(workload_name("env_12ab34cd", "gitlab"), "env_12ab34cd-gitlab");
    }

    #[test]
    fn test_next_launch_time_strictly_increases() {
        let future = Utc::now() + chrono::Duration::seconds(60);
        assert!(next_launch_time(future) > future);

        let past = Utc::now() - chrono::Duration::seconds(60);
        assert!(next_launch_time(past) > past);
    }
}
