// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment reachability probing.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Default timeout for a single probe request.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(6);

/// Decides whether an environment answers on its base URL.
///
/// Probes never fail: a booting environment that refuses connections or times
/// out is simply not healthy yet.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether `base_url` responds with a non-server-error status.
    async fn is_healthy(&self, base_url: &str) -> bool;
}

/// HTTP probe backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpHealthProbe {
    /// Create a probe with the default timeout.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    /// Create a probe with a custom per-request timeout.
    ///
    /// Redirects are not followed: a 3xx from the environment itself counts
    /// as an answer, wherever it points.
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_healthy(&self, base_url: &str) -> bool {
        match self.client.get(base_url).timeout(self.timeout).send().await {
            Ok(response) => {
                let status = response.status();
                debug!(base_url, status = status.as_u16(), "Health probe answered");
                !status.is_server_error()
            }
            Err(e) => {
                debug!(base_url, error = %e, "Health probe failed");
                false
            }
        }
    }
}
