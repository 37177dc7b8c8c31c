use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use insurance_engine::workflows::underwriting::{
    application_router, ApplicationRepository, UnderwritingService,
};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_application_routes<R>(service: Arc<UnderwritingService<R>>) -> axum::Router
where
    R: ApplicationRepository + 'static,
{
    application_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Acquire);
    let (status, label) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "initializing")
    };

    (status, Json(json!({ "status": label })))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::{build_engine, FaultPlan, InMemoryApplicationRepository};
    use axum::body::Body;
    use axum::http::Request;
    use insurance_engine::config::OrchestrationConfig;
    use insurance_engine::workflows::underwriting::{DeterministicPolicy, Orchestrator};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    fn app(ready: bool) -> axum::Router {
        let config = OrchestrationConfig::default();
        let engine = build_engine(&config, &FaultPlan::default()).expect("engine builds");
        let orchestrator = Orchestrator::new(
            Arc::clone(&engine.registry),
            Arc::new(DeterministicPolicy::new(Arc::clone(&engine.registry))),
            Arc::clone(&engine.bus),
            config.orchestrator_settings(),
        );
        let service = Arc::new(UnderwritingService::new(
            Arc::new(InMemoryApplicationRepository::default()),
            orchestrator,
            config.submission_rules(),
        ));
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        with_application_routes(service).layer(Extension(state))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).expect("request builds")
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = app(true).oneshot(get("/health")).await.expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_the_flag() {
        let ready = app(true).oneshot(get("/ready")).await.expect("route executes");
        let starting = app(false).oneshot(get("/ready")).await.expect("route executes");

        assert_eq!(ready.status(), StatusCode::OK);
        assert_eq!(starting.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_render_as_prometheus_text() {
        let response = app(true).oneshot(get("/metrics")).await.expect("route executes");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).map(|value| value.as_bytes()),
            Some("text/plain; version=0.0.4".as_bytes())
        );
    }

    #[tokio::test]
    async fn application_routes_are_mounted() {
        let response = app(true)
            .oneshot(get("/api/v1/applications/app-404404"))
            .await
            .expect("route executes");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
