// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the embeddable runtime over real HTTP.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::Value;
use webarena_environment::expiry_worker::ExpiryWorkerConfig;
use webarena_environment::runner::MockRuntime;
use webarena_environment::runtime::{EnvironmentRuntime, EnvironmentRuntimeBuilder};

fn builder(runtime: Arc<MockRuntime>, probe: Arc<StaticProbe>) -> EnvironmentRuntimeBuilder {
    let (start, end) = free_port_pool(32);
    EnvironmentRuntime::builder()
        .runtime(runtime)
        .probe(probe)
        .catalog(test_catalog())
        .public_host(PUBLIC_HOST)
        .port_pool(start, end)
        .bind_addr("127.0.0.1:0".parse().unwrap())
        .configuration_policy(fast_policy())
}

fn url(runtime: &EnvironmentRuntime, path: &str) -> String {
    format!("http://{}{}", runtime.bind_addr(), path)
}

#[tokio::test]
async fn test_full_lifecycle_over_http() {
    let mock = Arc::new(MockRuntime::new());
    let probe = Arc::new(StaticProbe::default());
    let runtime = builder(mock.clone(), probe.clone())
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();
    assert!(runtime.is_running());
    let client = reqwest::Client::new();

    let types: Value = client
        .get(url(&runtime, "/environments"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(types["environments"][0], "shopping");

    let created: Value = client
        .post(url(&runtime, "/environments?environment_name=shopping"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(created["status"], "starting");
    let env_id = created["env_id"].as_str().unwrap().to_string();

    runtime.orchestrator().wait_for_configuration().await;
    probe.set_healthy(true);

    let status: Value = client
        .post(url(&runtime, &format!("/environments/{}/status", env_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "running");
    drop(client);

    let summary = runtime.shutdown().await.unwrap();
    assert_eq!(summary.removed, 1);
    assert_eq!(mock.workload_count().await, 0);
}

#[tokio::test]
async fn test_start_adopts_existing_workloads() {
    let mock = Arc::new(MockRuntime::new());
    let leftover = free_port_pool(0).0;
    mock.insert_external(managed_labels("env_c0ffee00", "reddit"), Some(leftover))
        .await;

    let runtime = builder(mock.clone(), Arc::new(StaticProbe::default()))
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let adopted = runtime
        .orchestrator()
        .registry()
        .get("env_c0ffee00")
        .await
        .unwrap();
    assert_eq!(adopted.host_port, leftover);

    let response = reqwest::Client::new()
        .post(url(&runtime, "/environments/env_c0ffee00/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    drop(response);

    runtime.shutdown().await.unwrap();
    assert_eq!(mock.workload_count().await, 0);
}

#[tokio::test]
async fn test_shutdown_stops_serving() {
    let runtime = builder(
        Arc::new(MockRuntime::new()),
        Arc::new(StaticProbe::default()),
    )
    .build()
    .unwrap()
    .start()
    .await
    .unwrap();
    let endpoint = url(&runtime, "/environments");

    runtime.shutdown().await.unwrap();

    let result = reqwest::Client::new()
        .get(endpoint)
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_expiry_worker_reclaims_old_environments() {
    let mock = Arc::new(MockRuntime::new());
    let runtime = builder(mock.clone(), Arc::new(StaticProbe::default()))
        .expiry(ExpiryWorkerConfig {
            poll_interval: Duration::from_millis(50),
            max_age: Duration::ZERO,
        })
        .build()
        .unwrap()
        .start()
        .await
        .unwrap();

    let instance = runtime.orchestrator().create("reddit").await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while runtime
            .orchestrator()
            .registry()
            .contains(&instance.env_id)
            .await
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("environment was not expired");
    assert!(mock.workload(&instance.workload_id).await.is_none());

    runtime.shutdown().await.unwrap();
}
