// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! WebArena Environment - Environment Lifecycle Management
//!
//! This crate provides the control plane for ephemeral web application
//! environments. Each environment is one container started from a pre-built
//! application image, published on a host port from a fixed pool, rewritten to
//! know its public URL, and reclaimed when the control plane shuts down.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         External Clients                                 │
//! │                  (benchmark harnesses, agents, curl)                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │ HTTP/JSON
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  webarena-environment (This Crate)                       │
//! │                         Port 8000                                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │  Template   │  │  Lifecycle  │  │  Instance   │  │    Port     │     │
//! │  │  Catalog    │  │ Orchestrator│  │  Registry   │  │  Allocator  │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! │                   ┌─────────────┐  ┌─────────────┐                      │
//! │                   │Configuration│  │   Health    │                      │
//! │                   │   Applier   │  │   Probe     │                      │
//! │                   └─────────────┘  └─────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                        │ create/stop/remove/exec/list     │ GET base_url
//!                        ▼                                  ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                         Docker daemon                                   │
//! │      (containers labelled webarena.managed / env_id / env_name)        │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # HTTP API (Port 8000)
//!
//! | Route | Description |
//! |-------|-------------|
//! | `GET /environments` | List environment types |
//! | `POST /environments?environment_name=<type>` | Provision an environment |
//! | `POST /environments/{env_id}/status` | Probe and report status |
//! | `POST /environments/{env_id}/reset` | Replace the container on the same port |
//!
//! Errors are `{"detail": "<message>"}` with 400, 404 or 500.
//!
//! # Instance Status State Machine
//!
//! ```text
//!                     ┌──────────┐
//!   create/reconcile  │ STARTING │◄─────────────┐
//!   ─────────────────►│          │◄──┐          │
//!                     └────┬─────┘   │          │
//!                          │ probe   │ probe    │ reset
//!                          │ ok      │ fails    │
//!                          ▼         │          │
//!                     ┌──────────┐   │          │
//!                     │ RUNNING  │───┴──────────┘
//!                     └──────────┘
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `WORKER_PUBLIC_HOST` | No | `127.0.0.1` | Host used in every base URL |
//! | `PORT_POOL_START` | No | `30000` | First host port of the pool |
//! | `PORT_POOL_END` | No | `30100` | Last host port of the pool |
//! | `WEBARENA_HTTP_ADDR` | No | `0.0.0.0:8000` | HTTP bind address |
//! | `DOCKER_SOCKET` | No | `/var/run/docker.sock` | Docker daemon socket |
//! | `WEBARENA_MAX_ENV_AGE_SECS` | No | - | Enables the expiry worker |
//! | `WEBARENA_EXPIRY_POLL_SECS` | No | `60` | Expiry worker poll interval |
//!
//! # Modules
//!
//! - [`config`]: Server configuration from environment variables
//! - [`error`]: Error types for Environment operations
//! - [`templates`]: Environment types and their configuration recipes
//! - [`labels`]: Management labels attached to every container
//! - [`runner`]: Workload runtime backends (Docker, mock)
//! - [`port_allocator`]: Host port pool
//! - [`configurator`]: Post-launch configuration with retries
//! - [`health`]: Base URL reachability probing
//! - [`instance_registry`]: In-memory instance registry
//! - [`orchestrator`]: Create, status, reset, reconcile, reap
//! - [`server`]: HTTP server
//! - [`expiry_worker`]: Optional age-out of old environments
//! - [`runtime`]: Process wiring and graceful shutdown

#![deny(missing_docs)]

/// Server configuration loaded from environment variables.
pub mod config;

/// Error types for Environment operations.
pub mod error;

/// Environment templates and the built-in catalog.
pub mod templates;

/// Management label contract.
pub mod labels;

/// Workload runtime backends (Docker, mock).
pub mod runner;

/// Host port allocation.
pub mod port_allocator;

/// Post-launch configuration.
pub mod configurator;

/// Environment reachability probing.
pub mod health;

/// In-memory registry of provisioned environments.
pub mod instance_registry;

/// Environment lifecycle orchestration.
pub mod orchestrator;

/// HTTP server for the environment API.
pub mod server;

/// Background worker for expiring old environments.
pub mod expiry_worker;

/// Embeddable runtime for webarena-environment.
pub mod runtime;

pub use config::Config;
pub use error::Error;
pub use orchestrator::LifecycleOrchestrator;
