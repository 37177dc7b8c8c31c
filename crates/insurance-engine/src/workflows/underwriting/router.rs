use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tracing::error;

use super::domain::{ApplicationId, ApplicationInputs};
use super::repository::{ApplicationRepository, RepositoryError};
use super::service::{ServiceError, UnderwritingService};

/// Router builder exposing HTTP endpoints for submission, status, messages and cancellation.
pub fn application_router<R>(service: Arc<UnderwritingService<R>>) -> Router
where
    R: ApplicationRepository + 'static,
{
    Router::new()
        .route("/api/v1/applications", post(submit_handler::<R>))
        .route(
            "/api/v1/applications/:application_id",
            get(status_handler::<R>),
        )
        .route(
            "/api/v1/applications/:application_id/messages",
            get(messages_handler::<R>),
        )
        .route(
            "/api/v1/applications/:application_id/cancel",
            post(cancel_handler::<R>),
        )
        .with_state(service)
}

pub(crate) async fn submit_handler<R>(
    State(service): State<Arc<UnderwritingService<R>>>,
    axum::Json(inputs): axum::Json<ApplicationInputs>,
) -> Response
where
    R: ApplicationRepository + 'static,
{
    match service.submit(inputs) {
        Ok(record) => {
            let view = record.status_view();
            let application_id = record.application_id().clone();
            let worker = Arc::clone(&service);
            tokio::task::spawn_blocking(move || {
                if let Err(err) = worker.process(&application_id) {
                    error!(%application_id, error = %err, "application processing failed");
                }
            });
            (StatusCode::ACCEPTED, axum::Json(view)).into_response()
        }
        Err(ServiceError::State(error)) => {
            let payload = json!({
                "error": error.to_string(),
            });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
        Err(ServiceError::Repository(RepositoryError::Conflict)) => {
            let payload = json!({
                "error": "application already exists",
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        Err(other) => internal_error(other),
    }
}

pub(crate) async fn status_handler<R>(
    State(service): State<Arc<UnderwritingService<R>>>,
    Path(application_id): Path<String>,
) -> Response
where
    R: ApplicationRepository + 'static,
{
    let id = ApplicationId(application_id);
    match service.get(&id) {
        Ok(record) => (StatusCode::OK, axum::Json(record.status_view())).into_response(),
        Err(ServiceError::Repository(RepositoryError::NotFound)) => not_found(&id),
        Err(other) => internal_error(other),
    }
}

pub(crate) async fn messages_handler<R>(
    State(service): State<Arc<UnderwritingService<R>>>,
    Path(application_id): Path<String>,
) -> Response
where
    R: ApplicationRepository + 'static,
{
    let id = ApplicationId(application_id);
    match service.get(&id) {
        Ok(_) => {
            let messages = service.messages(&id);
            (StatusCode::OK, axum::Json(messages)).into_response()
        }
        Err(ServiceError::Repository(RepositoryError::NotFound)) => not_found(&id),
        Err(other) => internal_error(other),
    }
}

pub(crate) async fn cancel_handler<R>(
    State(service): State<Arc<UnderwritingService<R>>>,
    Path(application_id): Path<String>,
) -> Response
where
    R: ApplicationRepository + 'static,
{
    let id = ApplicationId(application_id);
    match service.cancel(&id) {
        Ok(()) => {
            let payload = json!({
                "application_id": id.0,
                "cancellation": "requested",
            });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(ServiceError::AlreadySettled { status, .. }) => {
            let payload = json!({
                "application_id": id.0,
                "error": "application already settled",
                "status": status.label(),
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        Err(ServiceError::Repository(RepositoryError::NotFound)) => not_found(&id),
        Err(other) => internal_error(other),
    }
}

fn not_found(id: &ApplicationId) -> Response {
    let payload = json!({
        "application_id": id.0,
        "error": "application not found",
    });
    (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
}

fn internal_error(error: ServiceError) -> Response {
    let payload = json!({
        "error": error.to_string(),
    });
    (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
}
