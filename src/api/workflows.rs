/// Workflow management REST API endpoints
///
/// CRUD over workflow definitions. Every save validates the graph and its condition
/// nodes, then restarts the workflow's trigger so timer and webhook state follow the
/// stored definition.

use crate::api::{ApiError, AppState};
use crate::error::ConfigError;
use crate::runtime::conditions::validate_group;
use crate::workflow::{ConditionGroup, NodeKind, Workflow, WorkflowGraph};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation and update
#[derive(Debug, Deserialize)]
pub struct SaveWorkflowRequest {
    pub workflow: Workflow,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
}

/// Reject definitions the engine would refuse at execution time.
pub fn validate_workflow(workflow: &Workflow) -> Result<(), ConfigError> {
    let graph_form = workflow.clone().into_graph_form();
    WorkflowGraph::build(&graph_form)?;

    for node in graph_form.nodes.iter().filter(|n| n.node_type == NodeKind::Condition) {
        let group = ConditionGroup::from_node_config(&node.node_id, &node.config)?;
        validate_group(&group)?;
    }
    for connection in &graph_form.connections {
        if let Some(group) = &connection.condition_config {
            validate_group(group)?;
        }
    }
    Ok(())
}

/// Create a new workflow
///
/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...], "connections": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<SaveWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowResponse>), ApiError> {
    let workflow = payload.workflow;

    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(ApiError::bad_request("workflow id and name are required"));
    }
    if state.storage.get_workflow(&workflow.id).await?.is_some() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("workflow '{}' already exists", workflow.id),
        ));
    }
    validate_workflow(&workflow)?;

    state.storage.save_workflow(&workflow).await?;
    state.triggers.restart_workflow_trigger(&workflow.id).await?;

    tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);

    Ok((
        StatusCode::CREATED,
        Json(WorkflowResponse {
            id: workflow.id.clone(),
            message: format!("Workflow '{}' created successfully", workflow.name),
        }),
    ))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state.storage.list_workflows().await?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// GET /api/workflows/{id}
async fn get_workflow(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Workflow>, ApiError> {
    state
        .storage
        .get_workflow(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("workflow '{}' not found", id)))
}

/// Replace an existing workflow and hot-reload its trigger
///
/// PUT /api/workflows/{id}
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SaveWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let mut workflow = payload.workflow;
    workflow.id = id.clone();

    if workflow.name.is_empty() {
        return Err(ApiError::bad_request("workflow name is required"));
    }
    if state.storage.get_workflow(&id).await?.is_none() {
        return Err(ApiError::not_found(format!("workflow '{}' not found", id)));
    }
    validate_workflow(&workflow)?;

    state.storage.save_workflow(&workflow).await?;
    state.triggers.restart_workflow_trigger(&id).await?;

    tracing::info!("🔥 Hot-reloaded workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id,
        message: format!("Workflow '{}' updated successfully", workflow.name),
    }))
}

/// Delete a workflow together with its timer and webhooks
///
/// DELETE /api/workflows/{id}
async fn delete_workflow(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    state.triggers.remove_workflow(&id).await?;

    if state.storage.delete_workflow(&id).await? {
        tracing::info!("🗑️ Deleted workflow: {}", id);
        Ok(Json(json!({ "message": "Workflow deleted successfully" })))
    } else {
        Err(ApiError::not_found(format!("workflow '{}' not found", id)))
    }
}
