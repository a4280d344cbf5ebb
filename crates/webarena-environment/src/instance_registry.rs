// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance Registry
//!
//! In-memory registry of provisioned environments. It is the control plane's
//! own view of the world; the running workloads are the source of truth and
//! the registry is rebuilt from them at startup.
//!
//! The registry does not enforce cross-instance invariants such as port
//! uniqueness. That is the orchestrator's job at allocation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Lifecycle status of an environment instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Launched, not yet answering on its base URL.
    Starting,
    /// Answered the most recent health probe.
    Running,
}

impl InstanceStatus {
    /// Get the status string
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
        }
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provisioned environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentInstance {
    /// Instance id (`env_` + 8 hex chars).
    pub env_id: String,
    /// Environment type name.
    pub environment_name: String,
    /// Runtime id of the workload currently serving this instance.
    pub workload_id: String,
    /// Host port, fixed for the instance's lifetime.
    pub host_port: u16,
    /// `http://<public host>:<host_port>`, fixed for the instance's lifetime.
    pub base_url: String,
    /// Time of the most recent (re)launch.
    pub created_at: DateTime<Utc>,
    /// Current status.
    pub status: InstanceStatus,
}

impl EnvironmentInstance {
    /// Whole seconds since the most recent (re)launch.
    pub fn started_seconds_ago(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds().max(0)
    }
}

/// Build the base URL for a host port.
pub fn base_url_for(public_host: &str, host_port: u16) -> String {
    format!("http://{}:{}", public_host, host_port)
}

/// Concurrent map from instance id to instance.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: RwLock<HashMap<String, EnvironmentInstance>>,
}

impl InstanceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an instance.
    pub async fn insert(&self, instance: EnvironmentInstance) {
        self.instances
            .write()
            .await
            .insert(instance.env_id.clone(), instance);
    }

    /// Insert an instance unless its id is already present.
    ///
    /// Returns true if the instance was inserted.
    pub async fn insert_if_absent(&self, instance: EnvironmentInstance) -> bool {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.env_id) {
            return false;
        }
        instances.insert(instance.env_id.clone(), instance);
        true
    }

    /// Get a snapshot of an instance.
    pub async fn get(&self, env_id: &str) -> Option<EnvironmentInstance> {
        self.instances.read().await.get(env_id).cloned()
    }

    /// Whether an id is registered.
    pub async fn contains(&self, env_id: &str) -> bool {
        self.instances.read().await.contains_key(env_id)
    }

    /// Mutate an instance in place and return a snapshot of the result.
    pub async fn update<F>(&self, env_id: &str, f: F) -> Option<EnvironmentInstance>
    where
        F: FnOnce(&mut EnvironmentInstance),
    {
        let mut instances = self.instances.write().await;
        let instance = instances.get_mut(env_id)?;
        f(instance);
        Some(instance.clone())
    }

    /// Remove an instance.
    pub async fn remove(&self, env_id: &str) -> Option<EnvironmentInstance> {
        self.instances.write().await.remove(env_id)
    }

    /// Snapshot of every instance, ordered by id.
    pub async fn list(&self) -> Vec<EnvironmentInstance> {
        let mut all: Vec<_> = self.instances.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.env_id.cmp(&b.env_id));
        all
    }

    /// Number of registered instances.
    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    /// Whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    /// Remove and return every instance.
    pub async fn drain(&self) -> Vec<EnvironmentInstance> {
        self.instances
            .write()
            .await
            .drain()
            .map(|(_, instance)| instance)
            .collect()
    }
}
