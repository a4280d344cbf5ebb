// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the HTTP health probe against a mock server.

use std::time::Duration;

use webarena_environment::health::{HealthProbe, HttpHealthProbe};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn server_answering(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_ok_is_healthy() {
    let server = server_answering(200).await;
    assert!(HttpHealthProbe::new().unwrap().is_healthy(&server.uri()).await);
}

#[tokio::test]
async fn test_client_error_is_healthy() {
    let server = server_answering(404).await;
    assert!(HttpHealthProbe::new().unwrap().is_healthy(&server.uri()).await);
}

#[tokio::test]
async fn test_server_error_is_unhealthy() {
    let server = server_answering(502).await;
    assert!(!HttpHealthProbe::new().unwrap().is_healthy(&server.uri()).await);
}

fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn test_connection_refused_is_unhealthy() {
    let port = closed_port();

    let probe = HttpHealthProbe::with_timeout(Duration::from_secs(1)).unwrap();
    assert!(!probe.is_healthy(&format!("http://127.0.0.1:{}", port)).await);
}

#[tokio::test]
async fn test_redirect_is_healthy_without_following() {
    let server = MockServer::start().await;
    let target = format!("http://127.0.0.1:{}/", closed_port());
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", target.as_str()))
        .expect(1)
        .mount(&server)
        .await;

    let probe = HttpHealthProbe::with_timeout(Duration::from_secs(1)).unwrap();
    assert!(probe.is_healthy(&server.uri()).await);
}

#[tokio::test]
async fn test_timeout_is_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let probe = HttpHealthProbe::with_timeout(Duration::from_millis(200)).unwrap();
    assert!(!probe.is_healthy(&server.uri()).await);
}
