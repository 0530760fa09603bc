/// Webhook endpoints
///
/// `/webhook/{path}` accepts any method; the Webhook Manager decides between dispatch and
/// 404/410/405/401. Management routes toggle, delete and test endpoints by id.

use crate::api::{ApiError, AppState};
use crate::storage::WebhookEndpoint;
use crate::triggers::webhooks::{WebhookAccepted, WebhookError, WebhookRequest};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    response::{IntoResponse, Json, Response},
    routing::{any, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/webhook/{path}", any(receive_webhook))
        .route("/api/webhooks/{id}", patch(toggle_webhook).delete(delete_webhook))
        .route("/api/webhooks/{id}/test", post(test_webhook))
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Inbound call
///
/// METHOD /webhook/{path}
/// Body: JSON (falls back to the raw text when it does not parse)
async fn receive_webhook(
    State(state): State<AppState>,
    Path(path): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<WebhookAccepted>, WebhookError> {
    tracing::info!("📥 Webhook request received: {} /webhook/{}", method, path);

    let request = WebhookRequest {
        method: method.as_str().to_string(),
        headers: header_map(&headers),
        query: query.into_iter().map(|(k, v)| (k, Value::String(v))).collect(),
        body: parse_body(&body),
        params: Map::from_iter([("path".to_string(), Value::String(path.clone()))]),
    };

    let accepted = state.webhooks.handle_webhook_request(&path, request).await?;
    Ok(Json(accepted))
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn parse_body(body: &Bytes) -> Value {
    if body.is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_slice(body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

#[derive(Debug, Deserialize)]
struct ToggleRequest {
    #[serde(alias = "is_active", rename = "isActive")]
    is_active: bool,
}

/// PATCH /api/webhooks/{id}
/// Body: { "isActive": false }
async fn toggle_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ToggleRequest>,
) -> Result<Json<WebhookEndpoint>, ApiError> {
    state
        .webhooks
        .toggle_webhook(&id, payload.is_active)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("webhook '{}' not found", id)))
}

/// DELETE /api/webhooks/{id}
async fn delete_webhook(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    if state.webhooks.delete_webhook(&id).await? {
        Ok(Json(json!({ "message": "Webhook deleted successfully" })))
    } else {
        Err(ApiError::not_found(format!("webhook '{}' not found", id)))
    }
}

/// POST /api/webhooks/{id}/test
async fn test_webhook(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WebhookAccepted>, WebhookError> {
    Ok(Json(state.webhooks.test_webhook(&id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{send, state};
    use crate::workflow::Workflow;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn app_with_hook(use_secret: bool) -> (Router, AppState, String, Option<String>) {
        let state = state().await;
        let workflow: Workflow = serde_json::from_value(json!({
            "id": "wf", "name": "Hooked", "owner_id": "user-1",
            "nodes": [
                { "node_id": "t", "node_type": "trigger", "component_key": "webhook-trigger" },
                { "node_id": "a", "node_type": "action", "component_key": "echo",
                  "config": { "order": "{{trigger.body.order}}" } }
            ],
            "connections": [{ "from_node_id": "t", "to_node_id": "a" }]
        }))
        .unwrap();
        state.storage.save_workflow(&workflow).await.unwrap();
        let created = state.webhooks.create_webhook("wf", Some("POST"), use_secret).await.unwrap();
        let app = create_webhook_routes().with_state(state.clone());
        (app, state, created.path, created.secret_token)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatch_runs_the_workflow() {
        let (app, state, path, _) = app_with_hook(false).await;

        let (status, body) = send(&app, "POST", &format!("/webhook/{}?src=test", path), Some(json!({ "order": 7 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("success"));
        assert_eq!(body["workflowId"], json!("wf"));

        let execution_id = body["executionId"].as_str().unwrap();
        let contexts = state.storage.list_node_contexts(execution_id).await.unwrap();
        let trigger = contexts.iter().find(|c| c.node_id == "t").unwrap();
        assert_eq!(trigger.output["data"]["query"]["src"], json!("test"));
        let action = contexts.iter().find(|c| c.node_id == "a").unwrap();
        assert_eq!(action.output["data"]["order"], json!(7));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejections_map_to_status_codes() {
        let (app, state, path, secret) = app_with_hook(true).await;
        let secret = secret.unwrap();

        let (status, body) = send(&app, "POST", "/webhook/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        let (status, _) = send(&app, "GET", &format!("/webhook/{}", path), None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, _) = send(&app, "POST", &format!("/webhook/{}", path), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method("POST")
            .uri(format!("/webhook/{}", path))
            .header("Authorization", format!("Bearer {}", secret))
            .body(Body::from("plain text"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let id = state.webhooks.cached(&path).unwrap().id;
        let (status, body) = send(&app, "PATCH", &format!("/api/webhooks/{}", id), Some(json!({ "isActive": false }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_active"], json!(false));
        assert!(body.get("secret_token").is_none());

        let (status, _) = send(&app, "POST", &format!("/webhook/{}", path), None).await;
        assert_eq!(status, StatusCode::GONE);

        let (status, _) = send(&app, "DELETE", &format!("/api/webhooks/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "DELETE", &format!("/api/webhooks/{}", id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_route_uses_stored_secret() {
        let (app, state, path, _) = app_with_hook(true).await;
        let id = state.webhooks.cached(&path).unwrap().id;

        let (status, body) = send(&app, "POST", &format!("/api/webhooks/{}/test", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["workflowId"], json!("wf"));
        assert_eq!(state.storage.get_webhook(&id).await.unwrap().unwrap().total_triggers, 1);
    }
}
