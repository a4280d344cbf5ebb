// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker that tears down environments past a maximum age.
//!
//! Disabled unless `WEBARENA_MAX_ENV_AGE_SECS` is set. Age is measured from the
//! most recent (re)launch, so a reset gives an environment a fresh lease.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::orchestrator::LifecycleOrchestrator;

/// Configuration for the expiry worker.
#[derive(Debug, Clone)]
pub struct ExpiryWorkerConfig {
    /// How often to scan the registry.
    pub poll_interval: Duration,
    /// Instances older than this are torn down.
    pub max_age: Duration,
}

impl Default for ExpiryWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            max_age: Duration::from_secs(24 * 3600),
        }
    }
}

/// Background worker that expires old environments.
pub struct ExpiryWorker {
    orchestrator: Arc<LifecycleOrchestrator>,
    config: ExpiryWorkerConfig,
    shutdown: Arc<Notify>,
}

impl ExpiryWorker {
    /// Create a new expiry worker.
    pub fn new(orchestrator: Arc<LifecycleOrchestrator>, config: ExpiryWorkerConfig) -> Self {
        Self {
            orchestrator,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the expiry loop until the shutdown signal is received.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_age_secs = self.config.max_age.as_secs(),
            "Expiry worker started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Expiry worker received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.expire_once().await;
                }
            }
        }

        info!("Expiry worker stopped");
    }

    /// Run a single expiry pass. Returns the expired ids.
    pub async fn expire_once(&self) -> Vec<String> {
        let expired = self
            .orchestrator
            .expire_older_than(self.config.max_age)
            .await;
        if expired.is_empty() {
            debug!("No environments to expire");
        } else {
            info!(count = expired.len(), "Expired environments");
        }
        expired
    }
}
