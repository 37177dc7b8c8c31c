use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::underwriting::{RegistryError, RepositoryError, ServiceError, StateError};

/// Failures surfaced by binaries embedding the engine.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server error: {0}")]
    Server(#[from] axum::Error),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("workflow error: {0}")]
    Workflow(#[from] ServiceError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Workflow(ServiceError::State(StateError::InvalidInput(_))) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Workflow(ServiceError::Repository(RepositoryError::NotFound)) => {
                StatusCode::NOT_FOUND
            }
            AppError::Workflow(ServiceError::Repository(RepositoryError::Conflict))
            | AppError::Workflow(ServiceError::AlreadyProcessing(_))
            | AppError::Workflow(ServiceError::AlreadySettled { .. }) => StatusCode::CONFLICT,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_)
            | AppError::Registry(_)
            | AppError::Workflow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
