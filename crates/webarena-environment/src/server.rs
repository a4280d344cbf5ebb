// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Environment HTTP server.
//!
//! Thin JSON layer over [`LifecycleOrchestrator`]. Every error is rendered as
//! `{"detail": "<message>"}` with the status code from
//! [`Error::status_code`](crate::error::Error::status_code).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::Error;
use crate::instance_registry::InstanceStatus;
use crate::orchestrator::{LifecycleOrchestrator, StatusReport};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters of `POST /environments`.
#[derive(Debug, Deserialize)]
pub struct CreateEnvironmentParams {
    /// Requested environment type.
    pub environment_name: Option<String>,
}

/// Response of `GET /environments`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnvironmentTypesResponse {
    /// Available environment type names.
    pub environments: Vec<String>,
}

/// Response of `POST /environments`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateEnvironmentResponse {
    /// New instance id.
    pub env_id: String,
    /// Environment type.
    pub environment_name: String,
    /// Where the environment will be reachable.
    pub base_url: String,
    /// Launch time, ISO-8601 UTC.
    pub created_at: String,
    /// Always `starting`.
    pub status: InstanceStatus,
}

/// Response of `POST /environments/{env_id}/reset`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ResetEnvironmentResponse {
    /// Instance id.
    pub env_id: String,
    /// Always `restarting`.
    pub status: String,
}

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub detail: String,
}

/// An error rendered at the HTTP boundary.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = StatusCode::from_u16(err.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %err, "Request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                detail: self.detail,
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Build the HTTP router.
pub fn router(orchestrator: Arc<LifecycleOrchestrator>) -> Router {
    Router::new()
        .route(
            "/environments",
            get(list_environment_types).post(create_environment),
        )
        .route("/environments/{env_id}/status", post(environment_status))
        .route("/environments/{env_id}/reset", post(reset_environment))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

// ============================================================================
// Handlers
// ============================================================================

async fn list_environment_types(
    State(orchestrator): State<Arc<LifecycleOrchestrator>>,
) -> Json<EnvironmentTypesResponse> {
    Json(EnvironmentTypesResponse {
        environments: orchestrator.environment_types(),
    })
}

async fn create_environment(
    State(orchestrator): State<Arc<LifecycleOrchestrator>>,
    Query(params): Query<CreateEnvironmentParams>,
) -> Result<Json<CreateEnvironmentResponse>, ApiError> {
    let Some(requested) = params.environment_name else {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "Missing query parameter: environment_name",
        ));
    };

    let instance = orchestrator.create(&requested).await?;

    info!(
        env_id = %instance.env_id,
        environment_name = %instance.environment_name,
        base_url = %instance.base_url,
        "Environment created"
    );

    Ok(Json(CreateEnvironmentResponse {
        env_id: instance.env_id,
        environment_name: instance.environment_name,
        base_url: instance.base_url,
        created_at: instance
            .created_at
            .to_rfc3339_opts(SecondsFormat::Micros, true),
        status: instance.status,
    }))
}

async fn environment_status(
    State(orchestrator): State<Arc<LifecycleOrchestrator>>,
    Path(env_id): Path<String>,
) -> Result<Json<StatusReport>, ApiError> {
    Ok(Json(orchestrator.status(&env_id).await?))
}

async fn reset_environment(
    State(orchestrator): State<Arc<LifecycleOrchestrator>>,
    Path(env_id): Path<String>,
) -> Result<Json<ResetEnvironmentResponse>, ApiError> {
    let instance = orchestrator.reset(&env_id).await?;
    Ok(Json(ResetEnvironmentResponse {
        env_id: instance.env_id,
        status: "restarting".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_from_not_found() {
        let err = ApiError::from(Error::InstanceNotFound("env_deadbeef".to_string()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.detail, "env_id not found: env_deadbeef");
    }

    #[test]
    fn test_api_error_from_unknown_type() {
        let err = ApiError::from(Error::UnknownEnvironmentType {
            name: "wiki".to_string(),
            available: vec!["shopping".to_string()],
        });
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.detail.contains("Options"));
    }

    #[test]
    fn test_create_response_serializes_status() {
        let body = CreateEnvironmentResponse {
            env_id: "env_00000000".to_string(),
            environment_name: "reddit".to_string(),
            base_url: "http://127.0.0.1:30000".to_string(),
            created_at: "2025-01-01T00:00:00.000000Z".to_string(),
            status: InstanceStatus::Starting,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "starting");
    }
}
