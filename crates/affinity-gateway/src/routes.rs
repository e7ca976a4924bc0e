//! API route handlers for the gateway.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use affinity_core::error::CoreError;
use affinity_scheduler::{IntegrationEvent, RegisterSchedule};
use affinity_scheduler::cron;
use affinity_store::{Trigger, TriggerConfig, TriggerType, Workflow};

use super::server::AppState;

/// Core error → HTTP response. Body shape matches the rest of the
/// platform: {"ok": false, "code": ..., "error": ...}.
pub(crate) struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            // Config doubles as the bad-request class at the API boundary
            CoreError::InvalidSchedule(_) | CoreError::Config(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoreError::Invocation(_) => StatusCode::BAD_GATEWAY,
            CoreError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "ok": false,
            "code": self.0.code(),
            "error": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

type ApiResult = Result<Json<serde_json::Value>, ApiError>;

/// Resolve the caller's owner id. The upstream app gateway authenticates
/// the user and forwards their id — a missing header is an auth failure,
/// not a missing resource.
fn owner_from(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("X-Owner-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or(ApiError(CoreError::Unauthorized))
}

/// Load a workflow and require the caller to own it. A foreign workflow
/// reads as missing — ownership mismatches never confirm existence.
fn owned_workflow(
    state: &AppState,
    headers: &HeaderMap,
    workflow_id: &str,
) -> Result<Workflow, ApiError> {
    let owner = owner_from(headers)?;
    let workflow = state
        .store
        .get_workflow(workflow_id)?
        .filter(|wf| wf.owner_id == owner)
        .ok_or_else(|| CoreError::NotFound(format!("workflow '{workflow_id}'")))?;
    Ok(workflow)
}

/// Load a trigger and require it to sit under the given owned workflow.
fn owned_trigger(
    state: &AppState,
    headers: &HeaderMap,
    workflow_id: &str,
    trigger_id: &str,
) -> Result<Trigger, ApiError> {
    owned_workflow(state, headers, workflow_id)?;
    let trigger = state
        .store
        .get_trigger(trigger_id)?
        .filter(|t| t.workflow_id == workflow_id)
        .ok_or_else(|| CoreError::NotFound(format!("trigger '{trigger_id}'")))?;
    Ok(trigger)
}

fn trigger_json(t: &Trigger) -> serde_json::Value {
    serde_json::json!({
        "trigger_id": t.trigger_id,
        "workflow_id": t.workflow_id,
        "trigger_type": t.trigger_type.as_str(),
        "config": t.config.to_json(),
        "is_active": t.is_active,
        "created_at": t.created_at.to_rfc3339(),
        "updated_at": t.updated_at.to_rfc3339(),
    })
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "affinity-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "armed_schedules": state.queue.len().await,
    }))
}

// ---- Workflow management (collaborator surface) ----

/// Create a workflow owned by the caller.
pub async fn create_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    let owner = owner_from(&headers)?;
    let name = body["name"].as_str().unwrap_or("").trim();
    if name.is_empty() {
        return Err(CoreError::Config("'name' is required".into()).into());
    }

    let mut workflow = Workflow::new(&owner, name);
    if let Some(active) = body["is_active"].as_bool() {
        workflow.is_active = active;
    }
    state.store.insert_workflow(&workflow)?;
    tracing::info!("[api] Workflow created: {} ({})", workflow.name, workflow.workflow_id);

    Ok(Json(serde_json::json!({
        "ok": true,
        "workflow_id": workflow.workflow_id,
        "name": workflow.name,
        "is_active": workflow.is_active,
    })))
}

/// Fetch one owned workflow with its triggers.
pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(workflow_id): Path<String>,
) -> ApiResult {
    let workflow = owned_workflow(&state, &headers, &workflow_id)?;
    let triggers = state.store.triggers_for_workflow(&workflow_id)?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "workflow_id": workflow.workflow_id,
        "name": workflow.name,
        "is_active": workflow.is_active,
        "triggers": triggers.iter().map(trigger_json).collect::<Vec<_>>(),
    })))
}

/// Flip a workflow's active flag. Inactive workflows skip every firing,
/// armed schedules included.
pub async fn set_workflow_active(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(workflow_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    owned_workflow(&state, &headers, &workflow_id)?;
    let active = body["active"].as_bool().unwrap_or(true);
    state.store.set_workflow_active(&workflow_id, active)?;
    tracing::info!("[api] Workflow {workflow_id} set active={active}");
    Ok(Json(serde_json::json!({"ok": true, "is_active": active})))
}

/// Create a trigger under an owned workflow. The config bag is validated
/// into its typed form before anything is stored.
pub async fn create_trigger(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(workflow_id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    owned_workflow(&state, &headers, &workflow_id)?;

    let type_str = body["trigger_type"].as_str().unwrap_or("");
    let trigger_type = TriggerType::parse(type_str)
        .map_err(|_| CoreError::Config(format!("unknown trigger_type '{type_str}'")))?;
    let config = TriggerConfig::from_parts(trigger_type, &body["config"])?;

    // Schedule configs must parse before they are ever armed.
    if let TriggerConfig::Schedule { cron: expr, timezone } = &config {
        cron::validate(expr)?;
        cron::resolve_timezone(timezone)?;
    }

    let trigger = Trigger::new(&workflow_id, config);
    state.store.insert_trigger(&trigger)?;
    tracing::info!(
        "[api] Trigger created: {} ({}) on workflow {workflow_id}",
        trigger.trigger_type.as_str(),
        trigger.trigger_id
    );

    Ok(Json(serde_json::json!({"ok": true, "trigger": trigger_json(&trigger)})))
}

/// List an owned workflow's triggers.
pub async fn list_triggers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(workflow_id): Path<String>,
) -> ApiResult {
    owned_workflow(&state, &headers, &workflow_id)?;
    let triggers = state.store.triggers_for_workflow(&workflow_id)?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "triggers": triggers.iter().map(trigger_json).collect::<Vec<_>>(),
        "count": triggers.len(),
    })))
}

// ---- Schedule registry ----

/// Register (or re-register) a schedule for a trigger.
pub async fn register_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((workflow_id, trigger_id)): Path<(String, String)>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult {
    owned_workflow(&state, &headers, &workflow_id)?;

    let cron_expr = body["cron"].as_str().unwrap_or("").to_string();
    let req = RegisterSchedule {
        trigger_id,
        workflow_id,
        cron: cron_expr,
        timezone: body["timezone"].as_str().map(String::from),
        enabled: body["enabled"].as_bool(),
    };
    let armed = state.registry.register_schedule(req).await?;

    Ok(Json(serde_json::json!({
        "ok": true,
        "armed": armed,
    })))
}

/// Current schedule state: persisted config plus the armed queue entry.
pub async fn get_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((workflow_id, trigger_id)): Path<(String, String)>,
) -> ApiResult {
    let trigger = owned_trigger(&state, &headers, &workflow_id, &trigger_id)?;
    let armed = state.queue.armed(&trigger_id).await;
    Ok(Json(serde_json::json!({
        "ok": true,
        "trigger": trigger_json(&trigger),
        "armed": armed,
    })))
}

/// Suspend a schedule without deleting its configuration.
pub async fn pause_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((workflow_id, trigger_id)): Path<(String, String)>,
) -> ApiResult {
    owned_trigger(&state, &headers, &workflow_id, &trigger_id)?;
    state.registry.pause_schedule(&trigger_id).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

/// Re-arm a paused schedule from its persisted configuration.
pub async fn resume_schedule(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((workflow_id, trigger_id)): Path<(String, String)>,
) -> ApiResult {
    owned_trigger(&state, &headers, &workflow_id, &trigger_id)?;
    let armed = state.registry.resume_schedule(&trigger_id).await?;
    Ok(Json(serde_json::json!({"ok": true, "armed": armed})))
}

// ---- Execution history ----

#[derive(serde::Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Execution history and derived stats for an owned trigger.
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(trigger_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult {
    // History routes address the trigger directly; resolve its workflow
    // for the ownership check.
    let owner = owner_from(&headers)?;
    let trigger = state
        .store
        .get_trigger(&trigger_id)?
        .ok_or_else(|| CoreError::NotFound(format!("trigger '{trigger_id}'")))?;
    state
        .store
        .get_workflow(&trigger.workflow_id)?
        .filter(|wf| wf.owner_id == owner)
        .ok_or_else(|| CoreError::NotFound(format!("trigger '{trigger_id}'")))?;

    let page = state.history.get_history(&trigger_id, query.limit)?;
    Ok(Json(serde_json::json!({
        "ok": true,
        "executions": page.records,
        "stats": page.stats,
    })))
}

// ---- Inbound events ----

#[derive(serde::Deserialize)]
pub struct WebhookQuery {
    pub secret: Option<String>,
}

/// Direct webhook dispatch. The secret may arrive as a ?secret= query
/// parameter or an X-Webhook-Secret header; either match is accepted.
pub async fn dispatch_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((workflow_id, trigger_id)): Path<(String, String)>,
    Query(query): Query<WebhookQuery>,
    body: String,
) -> ApiResult {
    let mut secrets: Vec<String> = Vec::new();
    if let Some(s) = query.secret {
        secrets.push(s);
    }
    if let Some(s) = headers
        .get("X-Webhook-Secret")
        .and_then(|v| v.to_str().ok())
    {
        secrets.push(s.to_string());
    }

    let payload = if body.trim().is_empty() {
        None
    } else {
        match serde_json::from_str(&body) {
            Ok(v) => Some(v),
            Err(e) => {
                return Err(CoreError::Config(format!("invalid JSON payload: {e}")).into());
            }
        }
    };

    let result = state
        .dispatcher
        .dispatch_webhook(&workflow_id, &trigger_id, &secrets, payload)
        .await?;

    Ok(Json(serde_json::json!({
        "ok": result.success,
        "run_id": result.run_id,
        "error": result.error,
    })))
}

/// Integration event fan-out. Reports how many triggers were attempted —
/// per-match outcomes are visible in execution history, not here.
pub async fn dispatch_integration_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<IntegrationEvent>,
) -> ApiResult {
    if event.provider.trim().is_empty() || event.event.trim().is_empty() {
        return Err(CoreError::Config("'provider' and 'event' are required".into()).into());
    }
    let dispatched = state.dispatcher.dispatch_integration_event(event).await?;
    Ok(Json(serde_json::json!({"ok": true, "dispatched": dispatched})))
}
