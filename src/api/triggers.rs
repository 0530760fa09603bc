/// Trigger management, execution audit and operator catalogue endpoints

use crate::api::{ApiError, AppState};
use crate::runtime::conditions::{available_operators, OperatorInfo};
use crate::storage::{ExecutionRecord, ExecutionSummary, NodeContextRecord};
use crate::triggers::manager::{CleanupReport, TestTriggerResult, TriggerStats};
use crate::triggers::{CreatedTrigger, TriggerConfig};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub fn create_trigger_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/workflows/{id}/triggers",
            get(trigger_stats).post(create_trigger),
        )
        .route("/api/workflows/{id}/triggers/restart", post(restart_trigger))
        .route("/api/workflows/{id}/test", post(test_trigger))
        .route("/api/workflows/{id}/executions/summary", get(execution_summary))
        .route("/api/triggers/cleanup", post(cleanup))
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/operators", get(operators))
}

#[derive(Debug, Deserialize)]
struct CreateTriggerRequest {
    #[serde(rename = "type")]
    trigger_type: String,
    #[serde(default)]
    config: Value,
}

#[derive(Debug, Default, Deserialize)]
struct TestTriggerRequest {
    #[serde(default, alias = "triggerType", rename = "trigger_type")]
    trigger_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExecutionDetail {
    execution: ExecutionRecord,
    contexts: Vec<NodeContextRecord>,
}

/// POST /api/workflows/{id}/triggers
/// Body: { "type": "schedule", "config": { "cron": "*/5 * * * *" } }
async fn create_trigger(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateTriggerRequest>,
) -> Result<(StatusCode, Json<CreatedTrigger>), ApiError> {
    let config = TriggerConfig::from_parts(&payload.trigger_type, &payload.config)?;
    let created = state.triggers.create_trigger(&id, config).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/workflows/{id}/triggers
async fn trigger_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TriggerStats>, ApiError> {
    Ok(Json(state.triggers.trigger_stats(&id).await?))
}

/// POST /api/workflows/{id}/triggers/restart
async fn restart_trigger(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    state.triggers.restart_workflow_trigger(&id).await?;
    Ok(Json(json!({ "message": format!("Trigger restarted for workflow '{}'", id) })))
}

/// POST /api/workflows/{id}/test
/// Body (optional): { "triggerType": "manual" }
async fn test_trigger(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<TestTriggerResult>, ApiError> {
    let request: TestTriggerRequest = if body.is_empty() {
        TestTriggerRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(e.to_string()))?
    };
    Ok(Json(
        state
            .triggers
            .test_trigger(&id, request.trigger_type.as_deref())
            .await?,
    ))
}

/// GET /api/workflows/{id}/executions/summary
async fn execution_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionSummary>, ApiError> {
    Ok(Json(state.storage.execution_summary(&id).await?))
}

/// POST /api/triggers/cleanup
async fn cleanup(State(state): State<AppState>) -> Result<Json<CleanupReport>, ApiError> {
    Ok(Json(state.triggers.cleanup_inactive_triggers().await?))
}

/// GET /api/executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionDetail>, ApiError> {
    let execution = state
        .storage
        .get_execution(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("execution '{}' not found", id)))?;
    let contexts = state.storage.list_node_contexts(&id).await?;
    Ok(Json(ExecutionDetail { execution, contexts }))
}

/// GET /api/operators
async fn operators() -> Json<Vec<OperatorInfo>> {
    Json(available_operators())
}
