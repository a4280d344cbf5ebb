// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for webarena-environment.
//!
//! [`EnvironmentRuntime`] wires the orchestrator, the HTTP server and the
//! optional expiry worker together so the control plane can run inside an
//! existing tokio application as well as from the bundled binary.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use webarena_environment::runner::DockerRuntime;
//! use webarena_environment::runtime::EnvironmentRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let docker = Arc::new(DockerRuntime::connect("/var/run/docker.sock".as_ref())?);
//!
//!     let runtime = EnvironmentRuntime::builder()
//!         .runtime(docker)
//!         .public_host("arena.example.org")
//!         .port_pool(30000, 30100)
//!         .bind_addr("0.0.0.0:8000".parse()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!
//!     // Stops serving, then removes every managed workload.
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{Config, DEFAULT_PORT_POOL_END, DEFAULT_PORT_POOL_START};
use crate::configurator::ConfigurationPolicy;
use crate::expiry_worker::{ExpiryWorker, ExpiryWorkerConfig};
use crate::health::{HealthProbe, HttpHealthProbe};
use crate::orchestrator::{LifecycleOrchestrator, ReapSummary};
use crate::port_allocator::PortAllocator;
use crate::runner::WorkloadRuntime;
use crate::server;
use crate::templates::TemplateCatalog;

/// Builder for creating an [`EnvironmentRuntime`].
pub struct EnvironmentRuntimeBuilder {
    runtime: Option<Arc<dyn WorkloadRuntime>>,
    probe: Option<Arc<dyn HealthProbe>>,
    catalog: TemplateCatalog,
    public_host: String,
    port_pool_start: u16,
    port_pool_end: u16,
    bind_addr: SocketAddr,
    configuration_policy: ConfigurationPolicy,
    expiry: Option<ExpiryWorkerConfig>,
}

impl Default for EnvironmentRuntimeBuilder {
    fn default() -> Self {
        Self {
            runtime: None,
            probe: None,
            catalog: TemplateCatalog::builtin(),
            public_host: "127.0.0.1".to_string(),
            port_pool_start: DEFAULT_PORT_POOL_START,
            port_pool_end: DEFAULT_PORT_POOL_END,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8000)),
            configuration_policy: ConfigurationPolicy::default(),
            expiry: None,
        }
    }
}

impl EnvironmentRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply every setting carried by a loaded [`Config`].
    pub fn config(self, config: &Config) -> Self {
        let builder = self
            .public_host(config.public_host.clone())
            .port_pool(config.port_pool_start, config.port_pool_end)
            .bind_addr(config.http_addr);
        match config.max_env_age {
            Some(max_age) => builder.expiry(ExpiryWorkerConfig {
                poll_interval: config.expiry_poll_interval,
                max_age,
            }),
            None => builder,
        }
    }

    /// Set the workload runtime (required).
    pub fn runtime(mut self, runtime: Arc<dyn WorkloadRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Set the health probe.
    ///
    /// Default: [`HttpHealthProbe`] with a 6 second timeout
    pub fn probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Set the template catalog.
    ///
    /// Default: [`TemplateCatalog::builtin`]
    pub fn catalog(mut self, catalog: TemplateCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Set the host used in every base URL.
    ///
    /// Default: `127.0.0.1`
    pub fn public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = host.into();
        self
    }

    /// Set the inclusive host port pool.
    ///
    /// Default: `30000..=30100`
    pub fn port_pool(mut self, start: u16, end: u16) -> Self {
        self.port_pool_start = start;
        self.port_pool_end = end;
        self
    }

    /// Set the bind address for the HTTP server.
    ///
    /// Default: `0.0.0.0:8000`
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the post-launch configuration policy.
    pub fn configuration_policy(mut self, policy: ConfigurationPolicy) -> Self {
        self.configuration_policy = policy;
        self
    }

    /// Enable the expiry worker.
    ///
    /// Default: disabled
    pub fn expiry(mut self, config: ExpiryWorkerConfig) -> Self {
        self.expiry = Some(config);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing or the port pool is
    /// inverted, or if the default HTTP probe client cannot be built.
    pub fn build(self) -> Result<EnvironmentRuntimeConfig> {
        let runtime = self
            .runtime
            .ok_or_else(|| anyhow::anyhow!("runtime is required"))?;
        if self.port_pool_start > self.port_pool_end {
            anyhow::bail!(
                "port pool start {} is greater than end {}",
                self.port_pool_start,
                self.port_pool_end
            );
        }
        let probe: Arc<dyn HealthProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpHealthProbe::new()?),
        };

        let orchestrator = LifecycleOrchestrator::new(
            Arc::new(self.catalog),
            runtime,
            probe,
            Arc::new(PortAllocator::new(self.port_pool_start, self.port_pool_end)),
            self.public_host,
        )
        .with_configuration_policy(self.configuration_policy);

        Ok(EnvironmentRuntimeConfig {
            orchestrator: Arc::new(orchestrator),
            bind_addr: self.bind_addr,
            expiry: self.expiry,
        })
    }
}

/// Configuration for an [`EnvironmentRuntime`].
pub struct EnvironmentRuntimeConfig {
    orchestrator: Arc<LifecycleOrchestrator>,
    bind_addr: SocketAddr,
    expiry: Option<ExpiryWorkerConfig>,
}

impl EnvironmentRuntimeConfig {
    /// The orchestrator the runtime will serve.
    pub fn orchestrator(&self) -> &Arc<LifecycleOrchestrator> {
        &self.orchestrator
    }

    /// Reconcile existing workloads, then start serving.
    pub async fn start(self) -> Result<EnvironmentRuntime> {
        // Adopt workloads left behind by a previous process before taking traffic.
        if let Err(e) = self.orchestrator.reconcile().await {
            warn!(error = %e, "Failed to reconcile existing workloads");
        }

        let listener = TcpListener::bind(self.bind_addr).await?;
        let bind_addr = listener.local_addr()?;

        let (server_shutdown_tx, mut server_shutdown_rx) = watch::channel(false);
        let app = server::router(self.orchestrator.clone());
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    while server_shutdown_rx.changed().await.is_ok() {
                        if *server_shutdown_rx.borrow() {
                            break;
                        }
                    }
                    info!("HTTP server received shutdown signal");
                })
                .await
                .map_err(anyhow::Error::from)
        });

        let expiry = self.expiry.map(|config| {
            let worker = ExpiryWorker::new(self.orchestrator.clone(), config);
            let shutdown = worker.shutdown_handle();
            let handle = tokio::spawn(async move {
                worker.run().await;
            });
            (handle, shutdown)
        });

        info!(
            bind_addr = %bind_addr,
            expiry_enabled = expiry.is_some(),
            environments = ?self.orchestrator.environment_types(),
            "EnvironmentRuntime started"
        );

        Ok(EnvironmentRuntime {
            server_handle,
            server_shutdown_tx,
            expiry,
            orchestrator: self.orchestrator,
            bind_addr,
        })
    }
}

/// A running control plane.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination. Shutdown removes
/// every managed workload.
pub struct EnvironmentRuntime {
    server_handle: JoinHandle<Result<()>>,
    server_shutdown_tx: watch::Sender<bool>,
    expiry: Option<(JoinHandle<()>, Arc<Notify>)>,
    orchestrator: Arc<LifecycleOrchestrator>,
    bind_addr: SocketAddr,
}

impl EnvironmentRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EnvironmentRuntimeBuilder {
        EnvironmentRuntimeBuilder::new()
    }

    /// Address the HTTP server is listening on.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// The orchestrator behind the HTTP surface.
    pub fn orchestrator(&self) -> &Arc<LifecycleOrchestrator> {
        &self.orchestrator
    }

    /// Stop serving, stop the expiry worker, then reap every managed workload.
    pub async fn shutdown(self) -> Result<ReapSummary> {
        info!("EnvironmentRuntime shutting down...");

        let _ = self.server_shutdown_tx.send(true);

        if let Some((handle, shutdown)) = self.expiry {
            shutdown.notify_one();
            if let Err(e) = handle.await {
                error!("Expiry worker task panicked: {}", e);
            }
        }

        let server_result = match tokio::time::timeout(Duration::from_secs(30), self.server_handle)
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(anyhow::anyhow!("server task panicked: {}", e)),
            Err(_) => Err(anyhow::anyhow!("server did not drain within 30s")),
        };
        if let Err(e) = &server_result {
            error!("HTTP server error during shutdown: {}", e);
        }

        let summary = self.orchestrator.reap().await;
        info!(
            removed = summary.removed,
            failed = summary.failed,
            "EnvironmentRuntime shutdown complete"
        );

        server_result.map(|()| summary)
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
            && self
                .expiry
                .as_ref()
                .is_none_or(|(handle, _)| !handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::MockRuntime;
    use std::collections::HashMap;

    #[test]
    fn test_builder_default_values() {
        let builder = EnvironmentRuntimeBuilder::default();

        assert!(builder.runtime.is_none());
        assert!(builder.probe.is_none());
        assert_eq!(builder.public_host, "127.0.0.1");
        assert_eq!(builder.port_pool_start, 30000);
        assert_eq!(builder.port_pool_end, 30100);
        assert_eq!(
            builder.bind_addr,
            "0.0.0.0:8000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(builder.configuration_policy, ConfigurationPolicy::default());
        assert!(builder.expiry.is_none());
    }

    #[test]
    fn test_builder_bind_addr() {
        let builder =
            EnvironmentRuntimeBuilder::new().bind_addr("192.168.1.1:9000".parse().unwrap());

        assert_eq!(
            builder.bind_addr,
            "192.168.1.1:9000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_builder_from_config() {
        let vars: HashMap<&str, &str> = [
            ("WORKER_PUBLIC_HOST", "arena.local"),
            ("PORT_POOL_START", "31000"),
            ("PORT_POOL_END", "31010"),
            ("WEBARENA_MAX_ENV_AGE_SECS", "7200"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        let builder = EnvironmentRuntimeBuilder::new().config(&config);

        assert_eq!(builder.public_host, "arena.local");
        assert_eq!(builder.port_pool_start, 31000);
        assert_eq!(builder.port_pool_end, 31010);
        let expiry = builder.expiry.unwrap();
        assert_eq!(expiry.max_age, Duration::from_secs(7200));
        assert_eq!(expiry.poll_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_build_requires_runtime() {
        let result = EnvironmentRuntimeBuilder::new().build();
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("runtime"));
    }

    #[test]
    fn test_build_rejects_inverted_pool() {
        let result = EnvironmentRuntimeBuilder::new()
            .runtime(Arc::new(MockRuntime::new()))
            .port_pool(30100, 30000)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_uses_builtin_catalog() {
        let config = EnvironmentRuntimeBuilder::new()
            .runtime(Arc::new(MockRuntime::new()))
            .build()
            .unwrap();
        assert_eq!(
            config.orchestrator().environment_types(),
            vec!["shopping", "shopping_admin", "reddit", "gitlab"]
        );
    }
}
