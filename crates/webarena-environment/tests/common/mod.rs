// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for webarena-environment tests.
//!
//! Provides TestContext for wiring an orchestrator to a mock runtime and a
//! scriptable health probe.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use webarena_environment::configurator::ConfigurationPolicy;
use webarena_environment::health::HealthProbe;
use webarena_environment::labels::ManagedLabels;
use webarena_environment::orchestrator::LifecycleOrchestrator;
use webarena_environment::port_allocator::PortAllocator;
use webarena_environment::runner::MockRuntime;
use webarena_environment::templates::{ConfigStep, EnvironmentTemplate, TemplateCatalog};

pub const PUBLIC_HOST: &str = "arena.test";

/// Health probe whose answer is set by the test.
#[derive(Default)]
pub struct StaticProbe {
    healthy: AtomicBool,
}

impl StaticProbe {
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl HealthProbe for StaticProbe {
    async fn is_healthy(&self, _base_url: &str) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

/// Configuration policy without waits.
pub fn fast_policy() -> ConfigurationPolicy {
    ConfigurationPolicy {
        grace_period: Duration::ZERO,
        max_attempts: 3,
        retry_delay: Duration::ZERO,
    }
}

/// A pool of `size + 1` ports around a port that was free a moment ago.
pub fn free_port_pool(size: u16) -> (u16, u16) {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    let start = port.saturating_sub(size / 2).max(1024);
    (start, start.saturating_add(size))
}

/// Management labels for a workload the control plane would own.
pub fn managed_labels(env_id: &str, env_name: &str) -> HashMap<String, String> {
    ManagedLabels::new(env_id, env_name).to_map()
}

/// A template with a one-step recipe and a stale marker, for exercising
/// configuration retries without the Magento recipe's length.
pub fn tiny_template() -> EnvironmentTemplate {
    EnvironmentTemplate::new("tiny", "tiny:latest", 8080)
        .with_recipe(vec![ConfigStep::shell("echo configure")])
        .with_stale_marker("stale.example")
}

/// Built-in catalog plus [`tiny_template`].
pub fn test_catalog() -> TemplateCatalog {
    TemplateCatalog::builtin().with_template(tiny_template())
}

/// Test context holding an orchestrator and its collaborators.
pub struct TestContext {
    pub runtime: Arc<MockRuntime>,
    pub probe: Arc<StaticProbe>,
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub pool: (u16, u16),
}

impl TestContext {
    /// Context with a fresh mock runtime.
    pub fn new() -> Self {
        Self::with_runtime(MockRuntime::new())
    }

    /// Context around a preconfigured mock runtime.
    pub fn with_runtime(runtime: MockRuntime) -> Self {
        let runtime = Arc::new(runtime);
        let probe = Arc::new(StaticProbe::default());
        let pool = free_port_pool(64);
        let orchestrator = LifecycleOrchestrator::new(
            Arc::new(test_catalog()),
            runtime.clone(),
            probe.clone(),
            Arc::new(PortAllocator::new(pool.0, pool.1)),
            PUBLIC_HOST,
        )
        .with_configuration_policy(fast_policy());

        Self {
            runtime,
            probe,
            orchestrator: Arc::new(orchestrator),
            pool,
        }
    }

    /// Whether any port of the pool is still reserved.
    pub fn any_port_reserved(&self) -> bool {
        (self.pool.0..=self.pool.1).any(|p| self.orchestrator.ports().is_reserved(p))
    }
}
