/// HTTP API Layer
///
/// REST endpoints on top of the engine and the trigger subsystem:
/// - Inbound webhook dispatch at `/webhook/{path}`
/// - Workflow CRUD with trigger hot-reload
/// - Trigger creation, stats, restart, manual test and cleanup
/// - Execution audit lookups and the condition operator catalogue

use crate::error::{ConfigError, ExecutionError, StorageError, TriggerError};
use crate::runtime::WorkflowEngine;
use crate::storage::Storage;
use crate::triggers::{TriggerManager, WebhookError, WebhookManager};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

// Inbound webhook dispatch and endpoint management
pub mod webhooks;

// Workflow management endpoints (POST/GET/PUT/DELETE)
pub mod workflows;

// Trigger management, executions and operator catalogue
pub mod triggers;

pub use triggers::create_trigger_routes;
pub use webhooks::create_webhook_routes;
pub use workflows::create_workflow_routes;

/// Shared state of every router
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub engine: Arc<WorkflowEngine>,
    pub webhooks: Arc<WebhookManager>,
    pub triggers: Arc<TriggerManager>,
}

/// Error response rendered as `{ "error": message }`
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("❌ {} {}", self.status, self.message);
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        Self::bad_request(e.to_string())
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<ExecutionError> for ApiError {
    fn from(e: ExecutionError) -> Self {
        let status = match &e {
            ExecutionError::WorkflowNotFound(_) => StatusCode::NOT_FOUND,
            ExecutionError::Config(_) => StatusCode::BAD_REQUEST,
            ExecutionError::Node { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ExecutionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<WebhookError> for ApiError {
    fn from(e: WebhookError) -> Self {
        Self::new(e.status_code(), e.to_string())
    }
}

impl From<TriggerError> for ApiError {
    fn from(e: TriggerError) -> Self {
        match e {
            TriggerError::WorkflowNotFound(_) => Self::not_found(e.to_string()),
            TriggerError::Config(e) => e.into(),
            TriggerError::Execution(e) => e.into(),
            TriggerError::Webhook(e) => e.into(),
            TriggerError::Storage(_) | TriggerError::Scheduler(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::runtime::BuiltinComponentRunner;
    use crate::storage::SqliteStorage;
    use axum::{body::Body, http::Request, Router};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    pub async fn state() -> AppState {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let engine = Arc::new(WorkflowEngine::new(
            storage.clone(),
            Arc::new(BuiltinComponentRunner::default()),
            Duration::from_secs(5),
        ));
        let webhooks = Arc::new(WebhookManager::new(storage.clone(), engine.clone(), "http://hooks.test"));
        let triggers = Arc::new(
            TriggerManager::new(storage.clone(), engine.clone(), webhooks.clone())
                .await
                .unwrap(),
        );
        AppState {
            storage,
            engine,
            webhooks,
            triggers,
        }
    }

    /// Send one request and return the status with the decoded JSON body (Null when empty).
    pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}
