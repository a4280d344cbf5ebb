// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for webarena-environment.

use thiserror::Error;

/// Environment errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The requested environment type has no template.
    #[error("Unknown environment '{name}'. Options: {available:?}")]
    UnknownEnvironmentType {
        /// Normalized name that was requested.
        name: String,
        /// Known environment types, in catalog order.
        available: Vec<String>,
    },

    /// No instance is registered under this id.
    #[error("env_id not found: {0}")]
    InstanceNotFound(String),

    /// Every probed port in the pool was occupied.
    #[error(transparent)]
    PortAllocationExhausted(#[from] crate::port_allocator::AllocationError),

    /// The workload runtime refused to start the workload.
    #[error("Docker run failed: {0}")]
    Launch(#[source] crate::runner::RuntimeError),

    /// Teardown or relaunch during reset failed.
    #[error("reset failed: {reason}")]
    ResetFailed {
        /// Instance being reset.
        env_id: String,
        /// What went wrong.
        reason: String,
    },

    /// Workload runtime operation failed outside of launch/reset.
    #[error("Runtime error: {0}")]
    Runtime(#[from] crate::runner::RuntimeError),
}

impl Error {
    /// HTTP status code this error maps to at the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::UnknownEnvironmentType { .. } => 400,
            Error::InstanceNotFound(_) => 404,
            _ => 500,
        }
    }

    /// Whether the error was caused by the caller rather than the server.
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

/// Result type using Environment Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port_allocator::AllocationError;
    use crate::runner::RuntimeError;

    #[test]
    fn test_status_codes() {
        let unknown = Error::UnknownEnvironmentType {
            name: "nope".to_string(),
            available: vec!["shopping".to_string()],
        };
        assert_eq!(unknown.status_code(), 400);
        assert!(unknown.is_client_error());

        assert_eq!(Error::InstanceNotFound("env_1".into()).status_code(), 404);

        let exhausted = Error::from(AllocationError::Exhausted {
            start: 1,
            end: 2,
            attempts: 400,
        });
        assert_eq!(exhausted.status_code(), 500);

        let launch = Error::Launch(RuntimeError::LaunchFailed("no such image".into()));
        assert_eq!(launch.status_code(), 500);
        assert!(!launch.is_client_error());

        let reset = Error::ResetFailed {
            env_id: "env_1".into(),
            reason: "boom".into(),
        };
        assert_eq!(reset.status_code(), 500);
    }

    #[test]
    fn test_unknown_type_message_lists_options() {
        let err = Error::UnknownEnvironmentType {
            name: "wiki".to_string(),
            available: vec!["shopping".to_string(), "reddit".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'wiki'"));
        assert!(msg.contains("shopping"));
        assert!(msg.contains("reddit"));
    }

    #[test]
    fn test_launch_message_includes_cause() {
        let err = Error::Launch(RuntimeError::LaunchFailed("pull access denied".into()));
        assert!(err.to_string().contains("pull access denied"));
    }
}
