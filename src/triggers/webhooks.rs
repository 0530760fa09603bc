//! Webhook Manager
//!
//! Keeps every webhook endpoint in an in-memory `path -> endpoint` map so inbound calls
//! are dispatched without a datastore read. The map is swapped atomically on
//! create/toggle/delete/reload; inactive endpoints stay cached so callers get 410 instead
//! of 404.

use crate::error::{ConfigError, ExecutionError, StorageError};
use crate::runtime::WorkflowEngine;
use crate::storage::{Storage, WebhookEndpoint};
use arc_swap::ArcSwap;
use axum::http::StatusCode;
use chrono::Utc;
use rand::RngCore;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

/// Methods a webhook endpoint may be bound to.
pub const ALLOWED_METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

const PATH_BYTES: usize = 16;
const SECRET_BYTES: usize = 32;

/// Dispatch and management failures, each with a fixed HTTP status
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook not found")]
    NotFound,

    #[error("webhook is inactive")]
    Inactive,

    #[error("method {0} not allowed")]
    MethodNotAllowed(String),

    #[error("invalid secret token")]
    Unauthorized,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("workflow execution failed: {0}")]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::NotFound => StatusCode::NOT_FOUND,
            WebhookError::Inactive => StatusCode::GONE,
            WebhookError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            WebhookError::Unauthorized => StatusCode::UNAUTHORIZED,
            WebhookError::Config(_) => StatusCode::BAD_REQUEST,
            WebhookError::Execution(_) | WebhookError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// An inbound call, already decoded by the HTTP layer
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub method: String,
    /// Header names lowercased
    pub headers: BTreeMap<String, String>,
    pub query: Map<String, Value>,
    pub body: Value,
    pub params: Map<String, Value>,
}

impl WebhookRequest {
    fn presented_secret(&self) -> Option<&str> {
        self.headers.get("x-webhook-secret").map(String::as_str).or_else(|| {
            self.headers
                .get("authorization")
                .and_then(|value| value.strip_prefix("Bearer "))
        })
    }
}

/// Returned once at creation; the only time the secret is disclosed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedWebhook {
    pub id: String,
    pub url: String,
    pub path: String,
    pub method: String,
    pub secret_token: Option<String>,
    pub is_active: bool,
}

/// Endpoint listing entry with its external URL
#[derive(Debug, Clone, Serialize)]
pub struct WebhookView {
    #[serde(flatten)]
    pub endpoint: WebhookEndpoint,
    pub url: String,
}

/// Successful dispatch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAccepted {
    pub status: &'static str,
    pub workflow_id: String,
    pub execution_id: String,
}

pub struct WebhookManager {
    storage: Arc<dyn Storage>,
    engine: Arc<WorkflowEngine>,
    cache: ArcSwap<HashMap<String, WebhookEndpoint>>,
    base_url: String,
}

impl WebhookManager {
    pub fn new(storage: Arc<dyn Storage>, engine: Arc<WorkflowEngine>, base_url: impl Into<String>) -> Self {
        Self {
            storage,
            engine,
            cache: ArcSwap::new(Arc::new(HashMap::new())),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Replace the cache with every stored endpoint.
    pub async fn load_webhooks(&self) -> Result<usize, StorageError> {
        let endpoints = self.storage.list_webhooks().await?;
        let active = endpoints.iter().filter(|e| e.is_active).count();
        let map: HashMap<String, WebhookEndpoint> =
            endpoints.into_iter().map(|e| (e.path.clone(), e)).collect();
        let total = map.len();

        self.cache.store(Arc::new(map));
        tracing::info!("🔗 Loaded {} webhooks ({} active)", total, active);
        Ok(total)
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/webhook/{}", self.base_url, path)
    }

    /// Cached endpoint behind a path.
    pub fn cached(&self, path: &str) -> Option<WebhookEndpoint> {
        self.cache.load().get(path).cloned()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.load().len()
    }

    /// Register a new endpoint for `workflow_id`. Defaults to `POST`.
    pub async fn create_webhook(
        &self,
        workflow_id: &str,
        method: Option<&str>,
        use_secret: bool,
    ) -> Result<CreatedWebhook, WebhookError> {
        let method = validate_method(method.unwrap_or("POST"))?;

        let endpoint = WebhookEndpoint {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            path: random_hex(PATH_BYTES),
            http_method: method,
            secret_token: use_secret.then(|| random_hex(SECRET_BYTES)),
            is_active: true,
            total_triggers: 0,
            last_triggered_at: None,
            created_at: Utc::now(),
        };

        self.storage.insert_webhook(&endpoint).await?;
        self.cache_upsert(endpoint.clone());

        tracing::info!(
            webhook_id = %endpoint.id,
            workflow_id,
            method = %endpoint.http_method,
            "🪝 Webhook created"
        );

        Ok(CreatedWebhook {
            url: self.url_for(&endpoint.path),
            id: endpoint.id,
            path: endpoint.path,
            method: endpoint.http_method,
            secret_token: endpoint.secret_token,
            is_active: endpoint.is_active,
        })
    }

    /// Validate an inbound call and run the bound workflow.
    pub async fn handle_webhook_request(
        &self,
        path: &str,
        request: WebhookRequest,
    ) -> Result<WebhookAccepted, WebhookError> {
        let Some(endpoint) = self.cached(path) else {
            tracing::warn!(path, "Webhook not found");
            return Err(WebhookError::NotFound);
        };

        if !endpoint.is_active {
            tracing::warn!(webhook_id = %endpoint.id, "Webhook inactive");
            return Err(WebhookError::Inactive);
        }

        if !request.method.eq_ignore_ascii_case(&endpoint.http_method) {
            return Err(WebhookError::MethodNotAllowed(request.method.to_uppercase()));
        }

        if let Some(expected) = endpoint.secret_token.as_deref() {
            let presented = request.presented_secret().unwrap_or_default();
            if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
                tracing::warn!(webhook_id = %endpoint.id, "Invalid webhook secret");
                return Err(WebhookError::Unauthorized);
            }
        }

        let triggered_at = Utc::now();
        let payload = json!({
            "method": request.method.to_uppercase(),
            "headers": request.headers,
            "query": request.query,
            "body": request.body,
            "params": request.params,
            "webhook": {
                "id": endpoint.id,
                "path": endpoint.path,
                "triggeredAt": triggered_at.to_rfc3339(),
            },
        });

        tracing::info!(webhook_id = %endpoint.id, workflow_id = %endpoint.workflow_id, "📨 Webhook triggered");
        self.record_trigger(&endpoint, triggered_at).await;

        let outcome = self
            .engine
            .execute_workflow(&endpoint.workflow_id, payload, None)
            .await?;

        Ok(WebhookAccepted {
            status: "success",
            workflow_id: endpoint.workflow_id,
            execution_id: outcome.execution_id,
        })
    }

    pub async fn toggle_webhook(&self, id: &str, active: bool) -> Result<Option<WebhookEndpoint>, WebhookError> {
        let updated = self.storage.set_webhook_active(id, active).await?;
        if let Some(endpoint) = &updated {
            self.cache_upsert(endpoint.clone());
            tracing::info!(webhook_id = id, active, "Webhook toggled");
        }
        Ok(updated)
    }

    pub async fn delete_webhook(&self, id: &str) -> Result<bool, WebhookError> {
        match self.storage.delete_webhook(id).await? {
            Some(endpoint) => {
                self.cache_remove(&endpoint.path);
                tracing::info!(webhook_id = id, "🗑️ Webhook deleted");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete every endpoint of a workflow; returns how many were removed.
    pub async fn delete_workflow_webhooks(&self, workflow_id: &str) -> Result<usize, WebhookError> {
        let endpoints = self.storage.list_workflow_webhooks(workflow_id).await?;
        let mut removed = 0;
        for endpoint in endpoints {
            if self.delete_webhook(&endpoint.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn workflow_webhooks(&self, workflow_id: &str) -> Result<Vec<WebhookView>, WebhookError> {
        let endpoints = self.storage.list_workflow_webhooks(workflow_id).await?;
        Ok(endpoints
            .into_iter()
            .map(|endpoint| WebhookView {
                url: self.url_for(&endpoint.path),
                endpoint,
            })
            .collect())
    }

    /// Push a synthetic request through the full dispatch path.
    pub async fn test_webhook(&self, id: &str) -> Result<WebhookAccepted, WebhookError> {
        let endpoint = self.storage.get_webhook(id).await?.ok_or(WebhookError::NotFound)?;

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("user-agent".to_string(), "relayflow-webhook-test/1.0".to_string());
        if let Some(secret) = &endpoint.secret_token {
            headers.insert("x-webhook-secret".to_string(), secret.clone());
        }

        let request = WebhookRequest {
            method: endpoint.http_method.clone(),
            headers,
            body: json!({
                "test": true,
                "message": "Webhook test",
                "timestamp": Utc::now().to_rfc3339(),
                "webhookId": endpoint.id,
            }),
            ..WebhookRequest::default()
        };

        self.handle_webhook_request(&endpoint.path, request).await
    }

    async fn record_trigger(&self, endpoint: &WebhookEndpoint, at: chrono::DateTime<Utc>) {
        if let Err(e) = self.storage.record_webhook_trigger(&endpoint.id, at).await {
            tracing::warn!(webhook_id = %endpoint.id, error = %e, "Failed to update webhook stats");
        }

        self.cache.rcu(|current| {
            let mut next = HashMap::clone(current);
            if let Some(cached) = next.get_mut(&endpoint.path) {
                cached.total_triggers += 1;
                cached.last_triggered_at = Some(at);
            }
            next
        });
    }

    fn cache_upsert(&self, endpoint: WebhookEndpoint) {
        self.cache.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(endpoint.path.clone(), endpoint.clone());
            next
        });
    }

    fn cache_remove(&self, path: &str) {
        self.cache.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(path);
            next
        });
    }
}

/// Upper-cased method if it is one a webhook may use.
pub fn validate_method(method: &str) -> Result<String, ConfigError> {
    let upper = method.trim().to_uppercase();
    if ALLOWED_METHODS.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(ConfigError::InvalidWebhookMethod(method.to_string()))
    }
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
