use crate::cli::ServeArgs;
use crate::infra::{build_engine, AppState, FaultPlan, InMemoryApplicationRepository};
use crate::routes::with_application_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use insurance_engine::config::AppConfig;
use insurance_engine::error::AppError;
use insurance_engine::telemetry;
use insurance_engine::workflows::underwriting::{
    NoAdvisor, Orchestrator, ReasoningPolicy, UnderwritingService,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let engine = build_engine(&config.orchestration, &FaultPlan::default())?;
    info!(
        steps = engine.registry.len(),
        max_iterations = config.orchestration.max_iterations,
        step_timeout_ms = config.orchestration.step_timeout.as_millis() as u64,
        "capability registry ready"
    );
    let policy = Arc::new(ReasoningPolicy::new(
        Arc::new(NoAdvisor),
        Arc::clone(&engine.registry),
    ));
    let orchestrator = Orchestrator::new(
        Arc::clone(&engine.registry),
        policy,
        Arc::clone(&engine.bus),
        config.orchestration.orchestrator_settings(),
    );
    let application_service = Arc::new(UnderwritingService::new(
        Arc::new(InMemoryApplicationRepository::default()),
        orchestrator,
        config.orchestration.submission_rules(),
    ));

    let app = with_application_routes(application_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "insurance orchestrator ready");

    axum::serve(listener, app).await?;
    Ok(())
}
