//! HTTP server implementation using Axum.

use axum::{
    Router,
    extract::State,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use affinity_core::config::GatewayConfig;
use affinity_scheduler::{EventDispatcher, ExecutionHistory, ScheduleQueue, ScheduleRegistry};
use affinity_store::WorkflowStore;

/// Shared state for the gateway server.
pub struct AppState {
    pub gateway_config: GatewayConfig,
    pub store: Arc<WorkflowStore>,
    pub queue: Arc<ScheduleQueue>,
    pub registry: Arc<ScheduleRegistry>,
    pub history: Arc<ExecutionHistory>,
    pub dispatcher: Arc<EventDispatcher>,
    pub start_time: std::time::Instant,
}

/// API token middleware — validates X-Api-Token header or ?token= query.
/// No configured token means the gateway is open (single-box deployments
/// behind the app's own gateway).
async fn require_token(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let expected = &state.gateway_config.api_token;
    if expected.is_empty() {
        return next.run(req).await;
    }

    let from_header = req
        .headers()
        .get("X-Api-Token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if from_header == expected {
        return next.run(req).await;
    }

    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some(token) = pair.strip_prefix("token=")
                && token == expected
            {
                return next.run(req).await;
            }
        }
    }

    axum::response::Response::builder()
        .status(axum::http::StatusCode::UNAUTHORIZED)
        .header("Content-Type", "application/json")
        .body(axum::body::Body::from(
            serde_json::json!({"ok": false, "error": "unauthorized"}).to_string(),
        ))
        .unwrap()
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    build_router_from_arc(Arc::new(state))
}

pub fn build_router_from_arc(shared: Arc<AppState>) -> Router {
    // Management routes — require the API token; every workflow-scoped
    // handler additionally checks ownership via X-Owner-Id.
    let protected = Router::new()
        .route("/api/v1/workflows", post(super::routes::create_workflow))
        .route("/api/v1/workflows/{workflow_id}", get(super::routes::get_workflow))
        .route(
            "/api/v1/workflows/{workflow_id}/active",
            post(super::routes::set_workflow_active),
        )
        .route(
            "/api/v1/workflows/{workflow_id}/triggers",
            post(super::routes::create_trigger).get(super::routes::list_triggers),
        )
        .route(
            "/api/v1/workflows/{workflow_id}/triggers/{trigger_id}/schedule",
            post(super::routes::register_schedule).get(super::routes::get_schedule),
        )
        .route(
            "/api/v1/workflows/{workflow_id}/triggers/{trigger_id}/schedule/pause",
            post(super::routes::pause_schedule),
        )
        .route(
            "/api/v1/workflows/{workflow_id}/triggers/{trigger_id}/schedule/resume",
            post(super::routes::resume_schedule),
        )
        .route(
            "/api/v1/triggers/{trigger_id}/executions",
            get(super::routes::get_history),
        )
        .layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_token,
        ));

    // Inbound event routes carry their own secrets; health is open.
    let public = Router::new()
        .route("/health", get(super::routes::health_check))
        .route(
            "/api/v1/workflows/{workflow_id}/triggers/{trigger_id}/webhook",
            post(super::routes::dispatch_webhook),
        )
        .route(
            "/api/v1/integrations/events",
            post(super::routes::dispatch_integration_event),
        );

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Bind and serve until shutdown.
pub async fn serve(state: AppState) -> std::io::Result<()> {
    let addr = format!("{}:{}", state.gateway_config.host, state.gateway_config.port);
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway listening on http://{addr}");
    axum::serve(listener, router).await
}
