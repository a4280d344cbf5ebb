// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for webarena-environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default port pool, inclusive on both ends.
pub const DEFAULT_PORT_POOL_START: u16 = 30000;
/// Upper bound of the default port pool.
pub const DEFAULT_PORT_POOL_END: u16 = 30100;

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hostname clients use to reach provisioned environments.
    pub public_host: String,
    /// First host port of the allocation pool (inclusive).
    pub port_pool_start: u16,
    /// Last host port of the allocation pool (inclusive).
    pub port_pool_end: u16,
    /// Bind address of the HTTP API.
    pub http_addr: SocketAddr,
    /// Unix socket of the Docker daemon.
    pub docker_socket: PathBuf,
    /// Maximum environment age before the expiry worker reclaims it.
    /// `None` disables the worker.
    pub max_env_age: Option<Duration>,
    /// How often the expiry worker scans the registry.
    pub expiry_poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let public_host = get("WORKER_PUBLIC_HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port_pool_start = parse_port(get("PORT_POOL_START"), "PORT_POOL_START")?
            .unwrap_or(DEFAULT_PORT_POOL_START);
        let port_pool_end =
            parse_port(get("PORT_POOL_END"), "PORT_POOL_END")?.unwrap_or(DEFAULT_PORT_POOL_END);

        if port_pool_start > port_pool_end {
            return Err(ConfigError::InvalidPortRange {
                start: port_pool_start,
                end: port_pool_end,
            });
        }

        let http_addr = get("WEBARENA_HTTP_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("WEBARENA_HTTP_ADDR"))?;

        let docker_socket = PathBuf::from(
            get("DOCKER_SOCKET").unwrap_or_else(|| "/var/run/docker.sock".to_string()),
        );

        let max_env_age = match get("WEBARENA_MAX_ENV_AGE_SECS") {
            Some(v) => Some(Duration::from_secs(
                v.parse()
                    .map_err(|_| ConfigError::InvalidValue("WEBARENA_MAX_ENV_AGE_SECS"))?,
            )),
            None => None,
        };

        let expiry_poll_interval = Duration::from_secs(match get("WEBARENA_EXPIRY_POLL_SECS") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WEBARENA_EXPIRY_POLL_SECS"))?,
            None => 60,
        });

        Ok(Self {
            public_host,
            port_pool_start,
            port_pool_end,
            http_addr,
            docker_socket,
            max_env_age,
            expiry_poll_interval,
        })
    }
}

fn parse_port(value: Option<String>, var: &'static str) -> Result<Option<u16>, ConfigError> {
    value
        .map(|v| v.parse::<u16>().map_err(|_| ConfigError::InvalidPort(var)))
        .transpose()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A port variable is not a valid port number.
    #[error("Invalid port number in {0}")]
    InvalidPort(&'static str),
    /// The port pool bounds are inverted.
    #[error("Invalid port pool: start {start} is greater than end {end}")]
    InvalidPortRange {
        /// Configured start.
        start: u16,
        /// Configured end.
        end: u16,
    },
    /// A variable could not be parsed.
    #[error("Invalid value for {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.public_host, "127.0.0.1");
        assert_eq!(config.port_pool_start, 30000);
        assert_eq!(config.port_pool_end, 30100);
        assert_eq!(config.http_addr, "0.0.0.0:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.docker_socket, PathBuf::from("/var/run/docker.sock"));
        assert!(config.max_env_age.is_none());
        assert_eq!(config.expiry_poll_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("WORKER_PUBLIC_HOST", " arena.example.com "),
            ("PORT_POOL_START", "40000"),
            ("PORT_POOL_END", "40010"),
            ("WEBARENA_HTTP_ADDR", "127.0.0.1:9000"),
            ("WEBARENA_MAX_ENV_AGE_SECS", "7200"),
        ])
        .unwrap();

        assert_eq!(config.public_host, "arena.example.com");
        assert_eq!(config.port_pool_start, 40000);
        assert_eq!(config.port_pool_end, 40010);
        assert_eq!(config.http_addr.port(), 9000);
        assert_eq!(config.max_env_age, Some(Duration::from_secs(7200)));
    }

    #[test]
    fn test_single_port_pool_is_valid() {
        let config = load(&[("PORT_POOL_START", "31000"), ("PORT_POOL_END", "31000")]).unwrap();
        assert_eq!(config.port_pool_start, config.port_pool_end);
    }

    #[test]
    fn test_inverted_pool_rejected() {
        let err = load(&[("PORT_POOL_START", "40010"), ("PORT_POOL_END", "40000")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidPortRange {
                start: 40010,
                end: 40000
            }
        ));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let err = load(&[("PORT_POOL_END", "70000")]).unwrap_err();
        assert!(err.to_string().contains("PORT_POOL_END"));
    }

    #[test]
    fn test_empty_public_host_falls_back() {
        let config = load(&[("WORKER_PUBLIC_HOST", "   ")]).unwrap();
        assert_eq!(config.public_host, "127.0.0.1");
    }
}
