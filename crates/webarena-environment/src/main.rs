// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WebArena Environment - control plane server
//!
//! An HTTP server responsible for:
//! - Provisioning environments from the built-in templates
//! - Post-launch configuration and status probing
//! - Resetting environments in place
//! - Reclaiming every managed workload on shutdown

use std::sync::Arc;
use tracing::{info, warn};

use webarena_environment::config::Config;
use webarena_environment::runner::{DockerRuntime, WorkloadRuntime};
use webarena_environment::runtime::EnvironmentRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webarena_environment=info,tower_http=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        public_host = %config.public_host,
        port_pool_start = config.port_pool_start,
        port_pool_end = config.port_pool_end,
        docker_socket = %config.docker_socket.display(),
        "Starting WebArena Environment"
    );

    let docker = Arc::new(DockerRuntime::connect(&config.docker_socket)?);
    info!(runtime_type = docker.runtime_type(), "Workload runtime initialized");

    let runtime = EnvironmentRuntime::builder()
        .config(&config)
        .runtime(docker)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.bind_addr(), "Environment server ready");

    wait_for_shutdown_signal().await?;
    info!("Shutdown signal received");

    let summary = runtime.shutdown().await?;

    info!(
        removed = summary.removed,
        failed = summary.failed,
        "WebArena Environment shut down"
    );

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
